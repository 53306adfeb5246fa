use super::money::{Amount, Balance};
use super::transaction::TransactionId;
use super::wallet::{BankDetails, WalletId};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayoutRequestId(pub u64);

impl fmt::Display for PayoutRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a withdrawal.
///
/// ```text
/// requested -> validating -> debited -> submitted -> settled
///                  |                        |
///                  v                        v
///               rejected                 failed -> reversed
/// ```
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PayoutState {
    Requested,
    Validating,
    Debited,
    Submitted,
    Settled,
    Rejected,
    Failed,
    Reversed,
}

impl PayoutState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Settled | Self::Rejected | Self::Reversed)
    }

    fn can_become(&self, next: PayoutState) -> bool {
        use PayoutState::*;
        matches!(
            (self, next),
            (Requested, Validating)
                | (Requested, Rejected)
                | (Validating, Debited)
                | (Validating, Rejected)
                | (Debited, Submitted)
                | (Submitted, Settled)
                | (Submitted, Failed)
                | (Failed, Reversed)
        )
    }

    /// What a caller should be shown for a request in this state.
    pub fn display_label(&self) -> &'static str {
        match self {
            Self::Requested | Self::Validating => "requested",
            Self::Debited | Self::Submitted | Self::Failed => "processing",
            Self::Settled => "paid",
            Self::Rejected => "rejected",
            Self::Reversed => "returned",
        }
    }
}

impl fmt::Display for PayoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Requested => "requested",
            Self::Validating => "validating",
            Self::Debited => "debited",
            Self::Submitted => "submitted",
            Self::Settled => "settled",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
            Self::Reversed => "reversed",
        };
        f.write_str(name)
    }
}

/// Why a payout never reached the ledger.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionReason {
    BelowMinimum { minimum: Balance },
    InsufficientFunds { available: Balance },
    UnverifiedBankAccount,
    WalletHalted,
    Cancelled,
    /// The process stopped before the debit was recorded.
    Interrupted,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BelowMinimum { minimum } => write!(f, "below minimum payout of {minimum}"),
            Self::InsufficientFunds { available } => {
                write!(f, "insufficient balance, {available} available")
            }
            Self::UnverifiedBankAccount => f.write_str("bank account is not verified"),
            Self::WalletHalted => f.write_str("wallet is halted pending reconciliation"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Interrupted => f.write_str("interrupted before debit"),
        }
    }
}

/// A new payout request before the store assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutDraft {
    pub wallet_id: WalletId,
    pub requested_amount: Amount,
    pub idempotency_key: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PayoutRequest {
    pub id: PayoutRequestId,
    pub wallet_id: WalletId,
    pub requested_amount: Amount,
    pub state: PayoutState,
    pub idempotency_key: String,
    /// Bank account captured when the request passed validation.
    pub destination: Option<BankDetails>,
    pub processor_reference: Option<String>,
    pub rejection: Option<RejectionReason>,
    pub failure_reason: Option<String>,
    pub debit_transaction: Option<TransactionId>,
    pub reversal_transaction: Option<TransactionId>,
    pub submission_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PayoutRequest {
    pub fn from_draft(id: PayoutRequestId, draft: PayoutDraft) -> Self {
        let now = Utc::now();
        Self {
            id,
            wallet_id: draft.wallet_id,
            requested_amount: draft.requested_amount,
            state: PayoutState::Requested,
            idempotency_key: draft.idempotency_key,
            destination: None,
            processor_reference: None,
            rejection: None,
            failure_reason: None,
            debit_transaction: None,
            reversal_transaction: None,
            submission_attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, next: PayoutState) -> Result<()> {
        if !self.state.can_become(next) {
            return Err(LedgerError::InvalidState(format!(
                "payout {} cannot move from {} to {next}",
                self.id, self.state
            )));
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn begin_validation(&mut self) -> Result<()> {
        self.transition(PayoutState::Validating)
    }

    pub fn reject(&mut self, reason: RejectionReason) -> Result<()> {
        self.transition(PayoutState::Rejected)?;
        self.rejection = Some(reason);
        Ok(())
    }

    pub fn mark_debited(&mut self, debit: TransactionId) -> Result<()> {
        self.transition(PayoutState::Debited)?;
        self.debit_transaction = Some(debit);
        Ok(())
    }

    pub fn record_attempt(&mut self) {
        self.submission_attempts += 1;
        self.updated_at = Utc::now();
    }

    pub fn mark_submitted(&mut self, processor_reference: String) -> Result<()> {
        self.transition(PayoutState::Submitted)?;
        self.processor_reference = Some(processor_reference);
        Ok(())
    }

    pub fn mark_settled(&mut self) -> Result<()> {
        self.transition(PayoutState::Settled)
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(PayoutState::Failed)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    pub fn mark_reversed(&mut self, reversal: TransactionId) -> Result<()> {
        self.transition(PayoutState::Reversed)?;
        self.reversal_transaction = Some(reversal);
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        match self.state {
            PayoutState::Requested | PayoutState::Validating => {
                self.reject(RejectionReason::Cancelled)
            }
            state => Err(LedgerError::InvalidState(format!(
                "payout {} is {state} and can no longer be cancelled",
                self.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn payout() -> PayoutRequest {
        PayoutRequest::from_draft(
            PayoutRequestId(1),
            PayoutDraft {
                wallet_id: WalletId::new("w").unwrap(),
                requested_amount: Amount::new(dec!(900)).unwrap(),
                idempotency_key: "key-1".into(),
            },
        )
    }

    #[test]
    fn test_success_path() {
        let mut p = payout();
        p.begin_validation().unwrap();
        p.mark_debited(TransactionId(4)).unwrap();
        p.mark_submitted("ref-1".into()).unwrap();
        p.mark_settled().unwrap();
        assert_eq!(p.state, PayoutState::Settled);
        assert!(p.state.is_terminal());
        assert_eq!(p.debit_transaction, Some(TransactionId(4)));
        assert_eq!(p.processor_reference.as_deref(), Some("ref-1"));
    }

    #[test]
    fn test_failure_path() {
        let mut p = payout();
        p.begin_validation().unwrap();
        p.mark_debited(TransactionId(4)).unwrap();
        p.mark_submitted("ref-1".into()).unwrap();
        p.mark_failed("account closed").unwrap();
        assert_eq!(p.state.display_label(), "processing");
        p.mark_reversed(TransactionId(5)).unwrap();
        assert_eq!(p.state, PayoutState::Reversed);
        assert_eq!(p.failure_reason.as_deref(), Some("account closed"));
    }

    #[test]
    fn test_illegal_transitions() {
        let mut p = payout();
        assert!(matches!(p.mark_settled(), Err(LedgerError::InvalidState(_))));
        p.begin_validation().unwrap();
        assert!(matches!(
            p.mark_submitted("ref".into()),
            Err(LedgerError::InvalidState(_))
        ));
        p.reject(RejectionReason::UnverifiedBankAccount).unwrap();
        assert!(matches!(
            p.mark_debited(TransactionId(1)),
            Err(LedgerError::InvalidState(_))
        ));
    }

    #[test]
    fn test_cancel_only_before_debit() {
        let mut p = payout();
        p.cancel().unwrap();
        assert_eq!(p.rejection, Some(RejectionReason::Cancelled));

        let mut debited = payout();
        debited.begin_validation().unwrap();
        debited.mark_debited(TransactionId(9)).unwrap();
        assert!(matches!(debited.cancel(), Err(LedgerError::InvalidState(_))));
    }
}
