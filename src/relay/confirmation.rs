//! Confirmation tracking.
//!
//! # States
//! ```text
//! Pending → Confirmed   (ledger reports finality)
//! Pending → Reverted    (included but failed; terminal)
//! Pending → TimedOut    (deadline passed; ambiguous, finality may still occur)
//! ```
//!
//! Poll errors are transient: they are logged and polling continues until the deadline.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::observability::metrics;
use crate::relay::ports::{Ledger, LedgerStatus};
use crate::relay::types::TxId;
use crate::resilience::with_deadline;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationState {
    Pending,
    Confirmed { block_number: u64 },
    Reverted { reason: String },
    TimedOut { waited: Duration },
}

impl ConfirmationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConfirmationState::Pending)
    }
}

#[derive(Clone)]
pub struct ConfirmationTracker {
    ledger: Arc<dyn Ledger>,
    poll_interval: Duration,
    deadline: Duration,
    rpc_timeout: Duration,
}

impl ConfirmationTracker {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        poll_interval: Duration,
        deadline: Duration,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            poll_interval,
            deadline,
            rpc_timeout,
        }
    }

    /// Poll until finality, revert, or the deadline.
    pub async fn track(&self, tx_id: &TxId) -> ConfirmationState {
        let started = Instant::now();

        let result = timeout(self.deadline, async {
            let mut ticker = interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let state = self.poll_once(tx_id).await;
                if state.is_terminal() {
                    return state;
                }
            }
        })
        .await;

        let state = result.unwrap_or(ConfirmationState::TimedOut {
            waited: self.deadline,
        });

        let outcome = match &state {
            ConfirmationState::Confirmed { .. } => "confirmed",
            ConfirmationState::Reverted { .. } => "reverted",
            ConfirmationState::TimedOut { .. } => "timed_out",
            ConfirmationState::Pending => "pending",
        };
        metrics::record_confirmation(started.elapsed(), outcome);

        if let ConfirmationState::TimedOut { waited } = &state {
            tracing::warn!(
                tx_id = %tx_id,
                waited_secs = waited.as_secs(),
                "Finality not observed before deadline"
            );
        }
        state
    }

    /// One status query. Errors and unknown transactions read as `Pending`.
    pub async fn poll_once(&self, tx_id: &TxId) -> ConfirmationState {
        let status = with_deadline(self.rpc_timeout, "get_status", self.ledger.get_status(tx_id)).await;

        match status {
            Ok(LedgerStatus::Finalized { block_number }) => {
                tracing::info!(tx_id = %tx_id, block_number = block_number, "Transaction finalized");
                ConfirmationState::Confirmed { block_number }
            }
            Ok(LedgerStatus::Reverted { block_number, reason }) => {
                tracing::warn!(
                    tx_id = %tx_id,
                    block_number = ?block_number,
                    reason = %reason,
                    "Transaction reverted"
                );
                ConfirmationState::Reverted { reason }
            }
            Ok(LedgerStatus::Pending { confirmations }) => {
                tracing::debug!(tx_id = %tx_id, confirmations = confirmations, "Waiting for confirmations");
                ConfirmationState::Pending
            }
            Ok(LedgerStatus::Unknown) => {
                tracing::debug!(tx_id = %tx_id, "Transaction not yet visible");
                ConfirmationState::Pending
            }
            Err(e) => {
                tracing::warn!(tx_id = %tx_id, error = %e, "Status poll failed");
                ConfirmationState::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::mock::{Finality, MockLedger, MockSigner};
    use crate::relay::ports::Signer;
    use crate::relay::types::{IntentKind, TransactionIntent, UnsignedTransaction};

    async fn broadcast_one(ledger: &MockLedger) -> TxId {
        let signer = MockSigner::new("0xadmin");
        let tx = signer
            .sign(&UnsignedTransaction {
                intent: TransactionIntent::new(IntentKind::SponsoredCall, "call-1", b"p".to_vec()),
                account: signer.account().clone(),
                sequence: 0,
                gas_price: 1,
            })
            .await
            .unwrap();
        ledger.broadcast(&tx).await.unwrap()
    }

    fn tracker(ledger: Arc<MockLedger>, deadline_ms: u64) -> ConfirmationTracker {
        ConfirmationTracker::new(
            ledger,
            Duration::from_millis(5),
            Duration::from_millis(deadline_ms),
            Duration::from_millis(100),
        )
    }

    #[tokio::test]
    async fn test_confirms_after_pending_polls() {
        let ledger = Arc::new(MockLedger::new().with_finality(Finality::Finalize { pending_polls: 2 }));
        let tx_id = broadcast_one(&ledger).await;

        let state = tracker(ledger, 1_000).track(&tx_id).await;
        assert_eq!(state, ConfirmationState::Confirmed { block_number: 100 });
    }

    #[tokio::test]
    async fn test_poll_errors_do_not_end_tracking() {
        let ledger = Arc::new(MockLedger::new());
        let tx_id = broadcast_one(&ledger).await;
        ledger.fail_status_polls(3);

        let tracker = tracker(ledger.clone(), 1_000);
        assert_eq!(tracker.poll_once(&tx_id).await, ConfirmationState::Pending);

        let state = tracker.track(&tx_id).await;
        assert_eq!(state, ConfirmationState::Confirmed { block_number: 100 });
    }

    #[tokio::test]
    async fn test_revert_is_terminal() {
        let ledger = Arc::new(MockLedger::new().with_finality(Finality::Revert));
        let tx_id = broadcast_one(&ledger).await;

        let state = tracker(ledger, 1_000).track(&tx_id).await;
        assert!(matches!(state, ConfirmationState::Reverted { .. }));
    }

    #[tokio::test]
    async fn test_times_out_when_never_final() {
        let ledger = Arc::new(MockLedger::new().with_finality(Finality::Never));
        let tx_id = broadcast_one(&ledger).await;

        let state = tracker(ledger, 40).track(&tx_id).await;
        assert_eq!(
            state,
            ConfirmationState::TimedOut {
                waited: Duration::from_millis(40)
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_transaction_polls_as_pending() {
        let ledger = Arc::new(MockLedger::new());
        let state = tracker(ledger, 100)
            .poll_once(&TxId("0xmissing".to_string()))
            .await;
        assert_eq!(state, ConfirmationState::Pending);
    }
}
