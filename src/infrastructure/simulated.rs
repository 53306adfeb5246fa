use crate::domain::money::Amount;
use crate::domain::ports::{ProcessorStatus, SettlementAdapter};
use crate::domain::wallet::BankDetails;
use crate::error::{AdapterError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Transfer {
    reference: String,
    amount: Amount,
    account_number: String,
}

#[derive(Debug)]
struct Processor {
    accounts: HashMap<(String, String), String>,
    accept_any_account: bool,
    transfers: HashMap<String, Transfer>,
    by_reference: HashMap<String, String>,
    outcomes: HashMap<String, ProcessorStatus>,
    default_outcome: ProcessorStatus,
    submit_calls: HashMap<String, usize>,
    fail_next: usize,
    delay: Option<Duration>,
    next_reference: u64,
}

/// An in-process payment processor.
///
/// Transfers are deduplicated by idempotency key the way a real provider
/// does. Outcomes, failures and latency are scriptable so the payout state
/// machine can be driven through every path.
#[derive(Debug, Clone)]
pub struct SimulatedSettlement {
    state: Arc<Mutex<Processor>>,
}

impl Default for SimulatedSettlement {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSettlement {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(Processor {
                accounts: HashMap::new(),
                accept_any_account: false,
                transfers: HashMap::new(),
                by_reference: HashMap::new(),
                outcomes: HashMap::new(),
                default_outcome: ProcessorStatus::Settled,
                submit_calls: HashMap::new(),
                fail_next: 0,
                delay: None,
                next_reference: 1,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, Processor> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register_account(&self, account_number: &str, bank_code: &str, account_name: &str) {
        self.state().accounts.insert(
            (account_number.to_string(), bank_code.to_string()),
            account_name.to_string(),
        );
    }

    /// Resolves any ten digit account number to a placeholder holder name.
    pub fn accept_any_account(&self) {
        self.state().accept_any_account = true;
    }

    /// Outcome reported for transfers without an explicit one.
    pub fn set_default_outcome(&self, status: ProcessorStatus) {
        self.state().default_outcome = status;
    }

    /// Fixes the outcome reported for one transfer.
    pub fn resolve(&self, reference: &str, status: ProcessorStatus) {
        self.state().outcomes.insert(reference.to_string(), status);
    }

    /// Refuses the next `n` submissions.
    pub fn fail_next_submissions(&self, n: usize) {
        self.state().fail_next = n;
    }

    /// Delays every submission and status call.
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    /// Submission calls seen for an idempotency key, including refused ones.
    pub fn submission_count(&self, idempotency_key: &str) -> usize {
        self.state()
            .submit_calls
            .get(idempotency_key)
            .copied()
            .unwrap_or(0)
    }

    /// Distinct transfers accepted.
    pub fn transfers(&self) -> usize {
        self.state().transfers.len()
    }

    async fn wait(&self) {
        let delay = self.state().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl SettlementAdapter for SimulatedSettlement {
    async fn verify_account(&self, account_number: &str, bank_code: &str) -> Result<String> {
        let state = self.state();
        if let Some(name) = state
            .accounts
            .get(&(account_number.to_string(), bank_code.to_string()))
        {
            return Ok(name.clone());
        }
        if state.accept_any_account
            && account_number.len() == 10
            && account_number.chars().all(|c| c.is_ascii_digit())
        {
            let last4 = &account_number[6..];
            return Ok(format!("ACCOUNT HOLDER {last4}"));
        }
        Err(AdapterError::Verification(format!(
            "account {account_number} not found at bank {bank_code}"
        ))
        .into())
    }

    async fn submit_payout(
        &self,
        idempotency_key: &str,
        amount: Amount,
        destination: &BankDetails,
    ) -> Result<String> {
        self.wait().await;
        let mut state = self.state();
        *state
            .submit_calls
            .entry(idempotency_key.to_string())
            .or_default() += 1;

        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(AdapterError::Submission("processor unavailable".into()).into());
        }
        if let Some(existing) = state.transfers.get(idempotency_key) {
            if existing.amount != amount || existing.account_number != destination.account_number {
                return Err(AdapterError::Submission(format!(
                    "idempotency key {idempotency_key} reused with different details"
                ))
                .into());
            }
            return Ok(existing.reference.clone());
        }

        let reference = format!("PRC-{}", state.next_reference);
        state.next_reference += 1;
        state.transfers.insert(
            idempotency_key.to_string(),
            Transfer {
                reference: reference.clone(),
                amount,
                account_number: destination.account_number.clone(),
            },
        );
        state
            .by_reference
            .insert(reference.clone(), idempotency_key.to_string());
        Ok(reference)
    }

    async fn get_payout_status(&self, processor_reference: &str) -> Result<ProcessorStatus> {
        self.wait().await;
        let state = self.state();
        if !state.by_reference.contains_key(processor_reference) {
            return Err(AdapterError::Status(format!(
                "unknown transfer {processor_reference}"
            ))
            .into());
        }
        Ok(state
            .outcomes
            .get(processor_reference)
            .copied()
            .unwrap_or(state.default_outcome))
    }
}
