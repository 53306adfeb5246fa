//! The payout state machine.
//!
//! A request is validated without touching the ledger, debited under the
//! wallet lock, submitted to the processor outside of it, and finally settled
//! or reversed when the processor confirms an outcome. Anything the processor
//! has not confirmed stays `submitted` until reconciliation learns more.

use crate::application::engine::WalletLedger;
use crate::domain::events::LedgerEvent;
use crate::domain::money::{Amount, Balance};
use crate::domain::payout::{PayoutDraft, PayoutRequest, PayoutRequestId, PayoutState, RejectionReason};
use crate::domain::ports::ProcessorStatus;
use crate::domain::transaction::{
    META_LINKED_TRANSACTION, META_PAYOUT_REQUEST, Transaction, TransactionDraft, TransactionId,
    TransactionStatus, TransactionType,
};
use crate::domain::wallet::{Wallet, WalletId};
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

fn rejection_error(payout: &PayoutRequest, reason: &RejectionReason) -> LedgerError {
    match reason {
        RejectionReason::InsufficientFunds { available } => LedgerError::InsufficientFunds {
            requested: payout.requested_amount.into(),
            available: *available,
        },
        RejectionReason::WalletHalted => LedgerError::WalletHalted(payout.wallet_id.clone()),
        RejectionReason::BelowMinimum { .. } | RejectionReason::UnverifiedBankAccount => {
            LedgerError::Validation(format!("payout {} rejected: {reason}", payout.id))
        }
        RejectionReason::Cancelled | RejectionReason::Interrupted => {
            LedgerError::InvalidState(format!("payout {} rejected: {reason}", payout.id))
        }
    }
}

fn prior_outcome(existing: &PayoutRequest) -> Result<PayoutRequestId> {
    match (existing.state, &existing.rejection) {
        (PayoutState::Rejected, Some(reason)) => Err(rejection_error(existing, reason)),
        _ => Ok(existing.id),
    }
}

impl WalletLedger {
    /// Requests a withdrawal of `amount` to the wallet's verified bank account.
    ///
    /// Returns the request id once the funds are debited (and, if the
    /// processor answered in time, submitted). A repeated `idempotency_key`
    /// returns the original request without debiting again; a request that
    /// stopped before its debit is driven forward by the retry.
    pub async fn request_payout(
        &self,
        wallet_id: &WalletId,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<PayoutRequestId> {
        let amount = Amount::new(amount)?;
        if idempotency_key.trim().is_empty() {
            return Err(LedgerError::Validation("idempotency key must not be empty".into()));
        }
        self.load_wallet(wallet_id).await?;

        let (payout, created) = self
            .payouts
            .insert_if_absent(PayoutDraft {
                wallet_id: wallet_id.clone(),
                requested_amount: amount,
                idempotency_key: idempotency_key.to_string(),
            })
            .await?;
        if created {
            info!(
                payout_id = %payout.id,
                wallet_id = %wallet_id,
                amount = %amount,
                idempotency_key,
                "payout requested"
            );
        } else if !self.replay(&payout, amount)? {
            return prior_outcome(&payout);
        }

        // `None` below means a concurrent caller moved the request on.
        if self.validate(payout.id, wallet_id).await?.is_none() {
            return prior_outcome(&self.reload_payout(payout.id).await?);
        }
        if self.debit(payout.id, wallet_id).await?.is_none() {
            return prior_outcome(&self.reload_payout(payout.id).await?);
        }
        let payout = self.submit(payout.id).await?;
        Ok(payout.id)
    }

    /// Checks a repeated request against the original and reports whether
    /// the original stopped before its debit.
    fn replay(&self, existing: &PayoutRequest, amount: Amount) -> Result<bool> {
        if existing.requested_amount != amount {
            return Err(LedgerError::Validation(format!(
                "idempotency key {:?} was already used for a payout of {}",
                existing.idempotency_key, existing.requested_amount
            )));
        }
        debug!(payout_id = %existing.id, state = %existing.state, "payout request replayed");
        Ok(matches!(
            existing.state,
            PayoutState::Requested | PayoutState::Validating
        ))
    }

    /// Checks made before any ledger entry exists.
    fn precheck(&self, wallet: &Wallet, amount: Amount) -> std::result::Result<(), RejectionReason> {
        let requested = Balance::from(amount);
        if wallet.is_halted() {
            return Err(RejectionReason::WalletHalted);
        }
        if requested < self.config.minimum_payout() {
            return Err(RejectionReason::BelowMinimum {
                minimum: self.config.minimum_payout(),
            });
        }
        if requested > wallet.balances.available {
            return Err(RejectionReason::InsufficientFunds {
                available: wallet.balances.available,
            });
        }
        if !wallet.bank_details.as_ref().is_some_and(|d| d.is_verified()) {
            return Err(RejectionReason::UnverifiedBankAccount);
        }
        Ok(())
    }

    /// Records the rejection and returns the error to hand back to the caller.
    async fn reject(&self, mut payout: PayoutRequest, reason: RejectionReason) -> Result<LedgerError> {
        let error = rejection_error(&payout, &reason);
        info!(payout_id = %payout.id, wallet_id = %payout.wallet_id, %reason, "payout rejected");
        payout.reject(reason)?;
        self.payouts.update(payout.clone()).await?;
        self.publish(LedgerEvent::PayoutStateChanged { payout });
        Ok(error)
    }

    pub(crate) async fn reload_payout(&self, id: PayoutRequestId) -> Result<PayoutRequest> {
        self.payouts
            .get(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("payout request {id}")))
    }

    /// `requested -> validating`, or `rejected` when a check fails.
    ///
    /// Returns `None` if the request is already past validation.
    async fn validate(&self, id: PayoutRequestId, wallet_id: &WalletId) -> Result<Option<PayoutRequest>> {
        let validated = self
            .locked(wallet_id, "payout_validate", async {
                let mut payout = self.reload_payout(id).await?;
                match payout.state {
                    PayoutState::Requested => payout.begin_validation()?,
                    PayoutState::Validating => {}
                    _ => return Ok(None),
                }
                let wallet = self.load_wallet(wallet_id).await?;
                if let Err(reason) = self.precheck(&wallet, payout.requested_amount) {
                    return Err(self.reject(payout, reason).await?);
                }
                payout.destination = wallet.bank_details.clone();
                self.payouts.update(payout.clone()).await?;
                Ok(Some(payout))
            })
            .await?;

        if let Some(payout) = &validated {
            self.publish(LedgerEvent::PayoutStateChanged {
                payout: payout.clone(),
            });
        }
        Ok(validated)
    }

    /// `validating -> debited`: the only step that reserves funds.
    ///
    /// Returns `None` if another caller already debited or rejected it.
    async fn debit(&self, id: PayoutRequestId, wallet_id: &WalletId) -> Result<Option<PayoutRequest>> {
        let debited = self
            .locked(wallet_id, "payout_debit", async {
                let mut payout = self.reload_payout(id).await?;
                if payout.state != PayoutState::Validating {
                    return Ok(None);
                }
                let mut wallet = self.load_wallet(wallet_id).await?;
                // Balance may have moved since validation.
                if wallet.is_halted() {
                    return Err(self.reject(payout, RejectionReason::WalletHalted).await?);
                }
                let available = wallet.balances.available;
                if Balance::from(payout.requested_amount) > available {
                    return Err(self
                        .reject(payout, RejectionReason::InsufficientFunds { available })
                        .await?);
                }
                wallet.reserve(payout.requested_amount)?;

                let debit = self
                    .log
                    .append(
                        TransactionDraft::new(
                            wallet_id.clone(),
                            TransactionType::PayoutDebit,
                            payout.requested_amount.value(),
                            TransactionStatus::Pending,
                        )
                        .describe("Payout to bank account")
                        .with_meta(META_PAYOUT_REQUEST, payout.id),
                    )
                    .await?;
                self.wallets.store(wallet.clone()).await?;
                payout.mark_debited(debit.id)?;
                self.payouts.update(payout.clone()).await?;
                Ok(Some((payout, wallet.balances)))
            })
            .await?;

        let Some((payout, balances)) = debited else {
            return Ok(None);
        };
        info!(
            payout_id = %payout.id,
            wallet_id = %payout.wallet_id,
            tx_id = ?payout.debit_transaction,
            "payout debited"
        );
        self.publish(LedgerEvent::BalanceChanged {
            wallet_id: payout.wallet_id.clone(),
            balances,
        });
        self.publish(LedgerEvent::PayoutStateChanged {
            payout: payout.clone(),
        });
        Ok(Some(payout))
    }

    /// `debited -> submitted`. The processor call runs without the wallet lock.
    ///
    /// The attempt and the outcome are each recorded under the lock against a
    /// freshly read request, so a request that moved on while the processor
    /// was answering is left alone. A processor error or timeout is logged and
    /// leaves the request `debited`; resubmitting later with the same
    /// idempotency key is safe.
    pub(crate) async fn submit(&self, id: PayoutRequestId) -> Result<PayoutRequest> {
        let wallet_id = self.reload_payout(id).await?.wallet_id;
        let attempt = self
            .locked(&wallet_id, "payout_submit", async {
                let mut payout = self.reload_payout(id).await?;
                if payout.state != PayoutState::Debited {
                    return Ok(None);
                }
                let destination = payout.destination.clone().ok_or_else(|| {
                    LedgerError::InvalidState(format!("payout {id} has no destination"))
                })?;
                payout.record_attempt();
                self.payouts.update(payout.clone()).await?;
                Ok(Some((payout, destination)))
            })
            .await?;
        let Some((payout, destination)) = attempt else {
            return self.reload_payout(id).await;
        };

        let submitted = self
            .call_adapter(self.adapter.submit_payout(
                &payout.idempotency_key,
                payout.requested_amount,
                &destination,
            ))
            .await;
        let reference = match submitted {
            Ok(reference) => reference,
            Err(e) => {
                warn!(
                    payout_id = %id,
                    attempts = payout.submission_attempts,
                    error = %e,
                    "payout submission unconfirmed, left for reconciliation"
                );
                return Ok(payout);
            }
        };

        let recorded = self
            .locked(&wallet_id, "payout_submitted", async {
                let mut current = self.reload_payout(id).await?;
                if current.state != PayoutState::Debited {
                    return Ok((current, false));
                }
                current.mark_submitted(reference)?;
                self.payouts.update(current.clone()).await?;
                Ok((current, true))
            })
            .await;
        match recorded {
            Ok((current, true)) => {
                info!(
                    payout_id = %current.id,
                    reference = ?current.processor_reference,
                    attempts = current.submission_attempts,
                    "payout submitted"
                );
                self.publish(LedgerEvent::PayoutStateChanged {
                    payout: current.clone(),
                });
                Ok(current)
            }
            Ok((current, false)) => {
                debug!(payout_id = %id, state = %current.state, "payout moved on during submission");
                Ok(current)
            }
            Err(e) => {
                warn!(
                    payout_id = %id,
                    error = %e,
                    "processor accepted payout but it was not recorded, left for reconciliation"
                );
                Ok(payout)
            }
        }
    }

    /// Applies a processor callback for the payout with this reference.
    pub async fn handle_settlement_signal(
        &self,
        processor_reference: &str,
        status: ProcessorStatus,
    ) -> Result<PayoutRequest> {
        let payout = self
            .payouts
            .find_by_reference(processor_reference)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("payout with reference {processor_reference}")))?;
        self.apply_outcome(payout.id, status).await
    }

    /// `submitted -> settled` or `submitted -> failed -> reversed`.
    ///
    /// The payout is re-read under the wallet lock, so duplicate or concurrent
    /// signals see the effect of the first one and become no-ops.
    pub(crate) async fn apply_outcome(
        &self,
        id: PayoutRequestId,
        status: ProcessorStatus,
    ) -> Result<PayoutRequest> {
        if status == ProcessorStatus::Pending {
            return self.reload_payout(id).await;
        }
        let wallet_id = self.reload_payout(id).await?.wallet_id;

        let (payout, changed) = self
            .locked(&wallet_id, "payout_outcome", async {
                let payout = self.reload_payout(id).await?;
                match (payout.state, status) {
                    (PayoutState::Submitted, ProcessorStatus::Settled) => {
                        self.settle_locked(payout).await
                    }
                    (PayoutState::Submitted, ProcessorStatus::Failed) => {
                        self.reverse_locked(payout, "processor reported failure").await
                    }
                    (PayoutState::Settled, ProcessorStatus::Settled)
                    | (PayoutState::Reversed, ProcessorStatus::Failed) => {
                        debug!(payout_id = %id, %status, "duplicate settlement signal ignored");
                        Ok((payout, None))
                    }
                    (state, status) => {
                        error!(payout_id = %id, %state, %status, "conflicting settlement signal");
                        Err(LedgerError::InvalidState(format!(
                            "payout {id} is {state}, cannot apply processor status {status}"
                        )))
                    }
                }
            })
            .await?;

        if let Some(resolved) = changed {
            self.publish(LedgerEvent::TransactionResolved {
                transaction: resolved,
            });
            let balances = self.get_balance(&wallet_id).await?;
            self.publish(LedgerEvent::BalanceChanged {
                wallet_id: wallet_id.clone(),
                balances,
            });
            self.publish(LedgerEvent::PayoutStateChanged {
                payout: payout.clone(),
            });
        }
        Ok(payout)
    }

    async fn settle_locked(
        &self,
        mut payout: PayoutRequest,
    ) -> Result<(PayoutRequest, Option<Transaction>)> {
        let debit = self.debit_transaction(&payout)?;
        // Checked before the first write so a refusal leaves nothing behind.
        let mut wallet = self.load_active_wallet(&payout.wallet_id).await?;
        wallet.settle(payout.requested_amount)?;
        let resolution = self
            .log
            .resolve(debit, TransactionStatus::Completed, payout.processor_reference.clone())
            .await?;
        if resolution.is_resolved() {
            self.wallets.store(wallet).await?;
        } else {
            warn!(payout_id = %payout.id, tx_id = %debit, "debit already completed, wallet left as is");
        }
        payout.mark_settled()?;
        self.payouts.update(payout.clone()).await?;
        info!(payout_id = %payout.id, wallet_id = %payout.wallet_id, "payout settled");
        Ok((payout, Some(resolution.transaction().clone())))
    }

    async fn reverse_locked(
        &self,
        mut payout: PayoutRequest,
        reason: &str,
    ) -> Result<(PayoutRequest, Option<Transaction>)> {
        let debit = self.debit_transaction(&payout)?;
        let mut wallet = self.load_active_wallet(&payout.wallet_id).await?;
        wallet.release(payout.requested_amount)?;
        let resolution = self
            .log
            .resolve(debit, TransactionStatus::Failed, payout.processor_reference.clone())
            .await?;
        let reversal = self.append_reversal(&payout, debit).await?;
        self.wallets.store(wallet).await?;

        payout.mark_failed(reason)?;
        self.publish(LedgerEvent::PayoutStateChanged {
            payout: payout.clone(),
        });
        payout.mark_reversed(reversal)?;
        self.payouts.update(payout.clone()).await?;
        warn!(
            payout_id = %payout.id,
            wallet_id = %payout.wallet_id,
            reason,
            reversal_tx = %reversal,
            "payout failed, funds returned"
        );
        Ok((payout, Some(resolution.transaction().clone())))
    }

    pub(crate) async fn append_reversal(
        &self,
        payout: &PayoutRequest,
        debit: TransactionId,
    ) -> Result<TransactionId> {
        let reversal = self
            .log
            .append(
                TransactionDraft::new(
                    payout.wallet_id.clone(),
                    TransactionType::PayoutReversal,
                    payout.requested_amount.value(),
                    TransactionStatus::Completed,
                )
                .describe("Returned failed payout")
                .with_meta(META_LINKED_TRANSACTION, debit)
                .with_meta(META_PAYOUT_REQUEST, payout.id),
            )
            .await?;
        Ok(reversal.id)
    }

    fn debit_transaction(&self, payout: &PayoutRequest) -> Result<TransactionId> {
        payout.debit_transaction.ok_or_else(|| {
            LedgerError::InvalidState(format!("payout {} has no debit entry", payout.id))
        })
    }

    /// Cancels a request that has not been debited yet.
    pub async fn cancel_payout(&self, id: PayoutRequestId) -> Result<PayoutRequest> {
        let wallet_id = self.reload_payout(id).await?.wallet_id;
        let payout = self
            .locked(&wallet_id, "payout_cancel", async {
                let mut payout = self.reload_payout(id).await?;
                payout.cancel()?;
                self.payouts.update(payout.clone()).await?;
                Ok(payout)
            })
            .await?;
        info!(payout_id = %id, wallet_id = %wallet_id, "payout cancelled");
        self.publish(LedgerEvent::PayoutStateChanged {
            payout: payout.clone(),
        });
        Ok(payout)
    }

    pub async fn get_payout(&self, id: PayoutRequestId) -> Result<PayoutRequest> {
        self.reload_payout(id).await
    }

    pub async fn find_payout(&self, wallet_id: &WalletId, idempotency_key: &str) -> Result<Option<PayoutRequest>> {
        self.payouts.find_by_key(wallet_id, idempotency_key).await
    }
}
