//! Crash recovery, drift detection and the periodic settlement sweep.

use crate::application::engine::WalletLedger;
use crate::application::projector;
use crate::domain::events::LedgerEvent;
use crate::domain::payout::{PayoutRequest, PayoutState, RejectionReason};
use crate::domain::ports::ProcessorStatus;
use crate::domain::transaction::{Transaction, TransactionStatus, TransactionType};
use crate::domain::wallet::{Balances, WalletId};
use crate::error::{LedgerError, Result};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// What one reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub recovered_wallets: usize,
    pub abandoned_requests: usize,
    pub resubmitted: usize,
    pub settled: usize,
    pub reversed: usize,
    pub still_pending: usize,
    pub wallets_checked: usize,
    pub drifted: Vec<WalletId>,
    /// Adapter calls that failed or timed out; retried on the next pass.
    pub adapter_errors: usize,
    pub errors: usize,
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "recovered={} abandoned={} resubmitted={} settled={} reversed={} pending={} checked={} drifted={} adapter_errors={} errors={}",
            self.recovered_wallets,
            self.abandoned_requests,
            self.resubmitted,
            self.settled,
            self.reversed,
            self.still_pending,
            self.wallets_checked,
            self.drifted.len(),
            self.adapter_errors,
            self.errors
        )
    }
}

fn debit_of<'a>(history: &'a [Transaction], payout: &PayoutRequest) -> Option<&'a Transaction> {
    history.iter().find(|tx| {
        tx.r#type == TransactionType::PayoutDebit && tx.payout_request() == Some(payout.id.0)
    })
}

fn reversal_of<'a>(history: &'a [Transaction], payout: &PayoutRequest) -> Option<&'a Transaction> {
    history.iter().find(|tx| {
        tx.r#type == TransactionType::PayoutReversal && tx.payout_request() == Some(payout.id.0)
    })
}

impl WalletLedger {
    /// Completes whatever an interrupted operation left half done.
    ///
    /// Must run under the wallet's lock. The ledger is the source of truth:
    /// payout records are moved to match the entries that exist, and the
    /// cached balances are rebuilt from the log.
    pub(crate) async fn roll_forward(&self, wallet_id: &WalletId, operation: &str) -> Result<()> {
        let open = self
            .payouts
            .in_states(&[
                PayoutState::Validating,
                PayoutState::Debited,
                PayoutState::Submitted,
                PayoutState::Failed,
            ])
            .await?;
        let history = self.log.history(wallet_id).await?;

        for mut payout in open.into_iter().filter(|p| &p.wallet_id == wallet_id) {
            let Some(debit) = debit_of(&history, &payout) else {
                // No entry yet: either still being validated or abandoned; the sweep decides.
                continue;
            };
            let before = payout.state;
            if payout.state == PayoutState::Validating {
                payout.mark_debited(debit.id)?;
            }
            match (payout.state, debit.status) {
                (PayoutState::Submitted, TransactionStatus::Completed) => payout.mark_settled()?,
                (PayoutState::Submitted, TransactionStatus::Failed) => {
                    payout.mark_failed("processor reported failure")?;
                }
                _ => {}
            }
            if payout.state == PayoutState::Failed && debit.status == TransactionStatus::Failed {
                let reversal = match reversal_of(&history, &payout) {
                    Some(tx) => tx.id,
                    None => self.append_reversal(&payout, debit.id).await?,
                };
                payout.mark_reversed(reversal)?;
            }
            if payout.state != before {
                info!(
                    payout_id = %payout.id,
                    from = %before,
                    to = %payout.state,
                    "payout rolled forward"
                );
                self.payouts.update(payout.clone()).await?;
                self.publish(LedgerEvent::PayoutStateChanged { payout });
            }
        }

        let Some(mut wallet) = self.wallets.get(wallet_id).await? else {
            return Ok(());
        };
        let recomputed = projector::project(&self.log.history(wallet_id).await?)?;
        if recomputed != wallet.balances {
            let previous = wallet.balances;
            let halted = wallet.is_halted();
            wallet.restore(recomputed);
            if halted {
                wallet.halt();
            }
            self.wallets.store(wallet).await?;
            warn!(
                wallet_id = %wallet_id,
                interrupted = operation,
                %previous,
                restored = %recomputed,
                "cached balances rebuilt from ledger"
            );
            self.publish(LedgerEvent::LedgerRepaired {
                wallet_id: wallet_id.clone(),
                previous,
                restored: recomputed,
                reason: format!("rolled forward interrupted {operation}"),
            });
        }
        Ok(())
    }

    /// Recomputes the wallet's balances from its ledger and compares them with
    /// the cache.
    ///
    /// A mismatch halts the wallet, publishes `LedgerDriftDetected` and
    /// returns `LedgerDrift`. The wallet stays halted until `repair_wallet`.
    pub async fn reconcile_wallet(&self, wallet_id: &WalletId) -> Result<Balances> {
        let outcome = self
            .locked(wallet_id, "reconcile", async {
                let mut wallet = self.load_wallet(wallet_id).await?;
                let entries = self.log.history(wallet_id).await?;
                match projector::check(&wallet, &entries) {
                    Ok(balances) => Ok(Ok(balances)),
                    Err(LedgerError::LedgerDrift {
                        cached, recomputed, ..
                    }) => {
                        if !wallet.is_halted() {
                            wallet.halt();
                            self.wallets.store(wallet).await?;
                        }
                        Ok(Err((cached, recomputed)))
                    }
                    Err(e) => Err(e),
                }
            })
            .await?;

        match outcome {
            Ok(balances) => {
                debug!(wallet_id = %wallet_id, %balances, "wallet reconciled");
                Ok(balances)
            }
            Err((cached, recomputed)) => {
                error!(
                    wallet_id = %wallet_id,
                    %cached,
                    %recomputed,
                    "ledger drift detected, wallet halted"
                );
                self.publish(LedgerEvent::LedgerDriftDetected {
                    wallet_id: wallet_id.clone(),
                    cached,
                    recomputed,
                });
                Err(LedgerError::LedgerDrift {
                    wallet_id: wallet_id.clone(),
                    cached,
                    recomputed,
                })
            }
        }
    }

    /// Rebuilds a wallet's cached balances from its ledger and lifts the halt.
    ///
    /// Operator action; `reason` is kept in the `LedgerRepaired` audit event.
    pub async fn repair_wallet(&self, wallet_id: &WalletId, reason: &str) -> Result<Balances> {
        if reason.trim().is_empty() {
            return Err(LedgerError::Validation("repair reason must not be empty".into()));
        }
        let (previous, restored) = self
            .locked(wallet_id, "repair", async {
                let mut wallet = self.load_wallet(wallet_id).await?;
                let restored = projector::project(&self.log.history(wallet_id).await?)?;
                let previous = wallet.balances;
                wallet.restore(restored);
                self.wallets.store(wallet).await?;
                Ok((previous, restored))
            })
            .await?;

        warn!(wallet_id = %wallet_id, %previous, %restored, reason, "wallet repaired");
        self.publish(LedgerEvent::LedgerRepaired {
            wallet_id: wallet_id.clone(),
            previous,
            restored,
            reason: reason.to_string(),
        });
        Ok(restored)
    }

    /// A request stuck before its debit for longer than a sweep interval is
    /// either debited (the entry exists) or rejected as interrupted.
    async fn abandon_stale_request(&self, payout: &PayoutRequest) -> Result<bool> {
        let id = payout.id;
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.sweep_interval)
                .map_err(|e| LedgerError::Config(e.to_string()))?;

        let changed = self
            .locked(&payout.wallet_id, "abandon_request", async {
                let mut payout = self.reload_payout(id).await?;
                if !matches!(payout.state, PayoutState::Requested | PayoutState::Validating)
                    || payout.updated_at > cutoff
                {
                    return Ok(None);
                }
                let history = self.log.history(&payout.wallet_id).await?;
                match debit_of(&history, &payout) {
                    Some(debit) => {
                        if payout.state == PayoutState::Requested {
                            payout.begin_validation()?;
                        }
                        payout.mark_debited(debit.id)?;
                    }
                    None => payout.reject(RejectionReason::Interrupted)?,
                }
                self.payouts.update(payout.clone()).await?;
                Ok(Some(payout))
            })
            .await?;

        match changed {
            Some(payout) => {
                warn!(payout_id = %payout.id, state = %payout.state, "stale payout request recovered");
                let abandoned = payout.state == PayoutState::Rejected;
                self.publish(LedgerEvent::PayoutStateChanged { payout });
                Ok(abandoned)
            }
            None => Ok(false),
        }
    }

    /// One pass over everything that may need attention.
    ///
    /// Per-item failures are logged and counted; only failing to list the work
    /// aborts the pass.
    pub async fn run_reconciliation(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for marker in self.guard.markers().await? {
            // Taking the lock rolls the wallet forward.
            match self
                .locked(&marker.wallet_id, "recover", async { Ok(()) })
                .await
            {
                Ok(()) => report.recovered_wallets += 1,
                Err(e) => {
                    warn!(wallet_id = %marker.wallet_id, error = %e, "recovery failed");
                    report.errors += 1;
                }
            }
        }

        let waiting = self
            .payouts
            .in_states(&[PayoutState::Requested, PayoutState::Validating])
            .await?;
        for payout in &waiting {
            match self.abandon_stale_request(payout).await {
                Ok(true) => report.abandoned_requests += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(payout_id = %payout.id, error = %e, "could not recover stale request");
                    report.errors += 1;
                }
            }
        }

        for payout in self.payouts.in_states(&[PayoutState::Debited]).await? {
            let id = payout.id;
            match self.submit(id).await {
                Ok(p) if p.state == PayoutState::Submitted => report.resubmitted += 1,
                Ok(p) if p.state == PayoutState::Debited => report.adapter_errors += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(payout_id = %id, error = %e, "resubmission failed");
                    report.errors += 1;
                }
            }
        }

        for payout in self.payouts.in_states(&[PayoutState::Submitted]).await? {
            let Some(reference) = payout.processor_reference.clone() else {
                report.errors += 1;
                continue;
            };
            let status = match self
                .call_adapter(self.adapter.get_payout_status(&reference))
                .await
            {
                Ok(status) => status,
                Err(e) => {
                    warn!(payout_id = %payout.id, reference = %reference, error = %e, "status poll failed");
                    report.adapter_errors += 1;
                    continue;
                }
            };
            match status {
                ProcessorStatus::Pending => report.still_pending += 1,
                status => match self.apply_outcome(payout.id, status).await {
                    Ok(p) if p.state == PayoutState::Settled => report.settled += 1,
                    Ok(p) if p.state == PayoutState::Reversed => report.reversed += 1,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(payout_id = %payout.id, error = %e, "could not apply polled status");
                        report.errors += 1;
                    }
                },
            }
        }

        // Failed but not yet reversed: the wallet's roll-forward finishes it.
        for payout in self.payouts.in_states(&[PayoutState::Failed]).await? {
            let wallet_id = payout.wallet_id.clone();
            let finished = self
                .locked(&wallet_id, "finish_reversal", async {
                    self.roll_forward(&wallet_id, "finish_reversal").await
                })
                .await;
            match finished {
                Ok(()) => {
                    if self.reload_payout(payout.id).await?.state == PayoutState::Reversed {
                        report.reversed += 1;
                    }
                }
                Err(e) => {
                    warn!(payout_id = %payout.id, error = %e, "could not finish reversal");
                    report.errors += 1;
                }
            }
        }

        for wallet in self.wallets.get_all().await? {
            if wallet.is_halted() {
                continue;
            }
            report.wallets_checked += 1;
            match self.reconcile_wallet(&wallet.user_id).await {
                Ok(_) => {}
                Err(LedgerError::LedgerDrift { wallet_id, .. }) => report.drifted.push(wallet_id),
                Err(e) => {
                    warn!(wallet_id = %wallet.user_id, error = %e, "reconciliation check failed");
                    report.errors += 1;
                }
            }
        }

        info!(%report, "reconciliation pass finished");
        Ok(report)
    }

    /// Runs `run_reconciliation` every `sweep_interval` until `shutdown` turns true.
    pub fn spawn_reconciliation(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_reconciliation().await {
                            error!(error = %e, "reconciliation pass aborted");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("reconciliation sweep stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}
