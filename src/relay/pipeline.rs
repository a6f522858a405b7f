//! Transaction pipeline: intent in, receipt out.
//!
//! # Data Flow
//! ```text
//! submit_and_confirm(intent)
//!     → validate
//!     → claims.begin(key)
//!         Done       → stored receipt
//!         InProgress → wait on the owner's channel
//!         Fresh      → spawn run, then wait like everyone else
//!
//! run (fresh key):
//!     lease sequence → gas price → sign → record_signed
//!     → submit (retry) → commit lease → record_submitted
//!     → track → complete(receipt)
//!
//! run (resumable key):
//!     reclaim stored sequence → poll once → re-broadcast same bytes → track → complete
//!     (a refused re-broadcast the ledger never saw completes as rejected)
//! ```
//!
//! # Design Decisions
//! - The run is a spawned task, so a cancelled caller cannot strand a key mid-flight
//! - A sequence mismatch re-signs with the resynced sequence; the rejected signature never landed
//! - Network failure before anything is signed frees the key instead of storing a receipt

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::schema::RelayConfig;
use crate::observability::metrics;
use crate::relay::claims::{Begin, ClaimGuard, ClaimStore};
use crate::relay::confirmation::{ConfirmationState, ConfirmationTracker};
use crate::relay::error::RelayError;
use crate::relay::ports::{Ledger, LedgerError, LedgerStatus, Signer};
use crate::relay::sequencer::NonceSequencer;
use crate::relay::submission::{SubmissionClient, SubmitError};
use crate::relay::types::{
    Receipt, ReceiptError, SignedTransaction, TransactionIntent, UnsignedTransaction,
};
use crate::resilience::{with_deadline, RetryPolicy};

/// Times a caller re-attaches after an owner vanished without an outcome.
const MAX_ATTACH_ATTEMPTS: u32 = 3;

/// Tunables for one pipeline, fixed at construction.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub retry: RetryPolicy,
    pub rpc_timeout: Duration,
    pub poll_interval: Duration,
    pub confirmation_timeout: Duration,
    pub max_resyncs: u32,
}

impl PipelineSettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            retry: RetryPolicy::from(&config.retries),
            rpc_timeout: Duration::from_secs(config.ledger.rpc_timeout_secs),
            poll_interval: Duration::from_millis(config.confirmation.poll_interval_ms),
            confirmation_timeout: Duration::from_secs(config.confirmation.timeout_secs),
            max_resyncs: config.sequencer.max_resyncs,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

/// Current view of one idempotency key, for status queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptStatus {
    /// The key was never seen (or has been pruned).
    Unknown,
    /// A run for the key has not produced a receipt yet.
    InFlight,
    Ready(Receipt),
}

struct PipelineInner {
    signer: Arc<dyn Signer>,
    ledger: Arc<dyn Ledger>,
    sequencer: NonceSequencer,
    submitter: SubmissionClient,
    tracker: ConfirmationTracker,
    claims: ClaimStore,
    settings: PipelineSettings,
}

/// Submits intents and tracks them to a receipt. Cheap to clone.
#[derive(Clone)]
pub struct TransactionPipeline {
    inner: Arc<PipelineInner>,
}

impl TransactionPipeline {
    pub fn new(
        signer: Arc<dyn Signer>,
        ledger: Arc<dyn Ledger>,
        claims: ClaimStore,
        settings: PipelineSettings,
    ) -> Self {
        let sequencer = NonceSequencer::new(ledger.clone(), settings.rpc_timeout);
        let submitter = SubmissionClient::new(ledger.clone(), settings.retry, settings.rpc_timeout);
        let tracker = ConfirmationTracker::new(
            ledger.clone(),
            settings.poll_interval,
            settings.confirmation_timeout,
            settings.rpc_timeout,
        );

        Self {
            inner: Arc::new(PipelineInner {
                signer,
                ledger,
                sequencer,
                submitter,
                tracker,
                claims,
                settings,
            }),
        }
    }

    pub fn from_config(
        config: &RelayConfig,
        signer: Arc<dyn Signer>,
        ledger: Arc<dyn Ledger>,
        claims: ClaimStore,
    ) -> Self {
        Self::new(signer, ledger, claims, PipelineSettings::from_config(config))
    }

    pub fn claims(&self) -> &ClaimStore {
        &self.inner.claims
    }

    pub fn sequencer(&self) -> &NonceSequencer {
        &self.inner.sequencer
    }

    /// Submit `intent` (once per idempotency key) and wait for its receipt.
    ///
    /// Ledger failures come back as `Ok(receipt)` with `receipt.error` set.
    /// `Err` means no receipt could be issued: invalid intent, storage failure,
    /// or a network failure before anything was signed.
    pub async fn submit_and_confirm(&self, intent: TransactionIntent) -> Result<Receipt, RelayError> {
        intent.validate()?;
        let key = intent.idempotency_key.clone();

        for _ in 0..MAX_ATTACH_ATTEMPTS {
            let waiter = match self.inner.claims.begin(&key) {
                Begin::Done(receipt) => {
                    self.warn_on_payload_mismatch(&intent);
                    metrics::record_intent(intent.kind.as_str(), "duplicate");
                    tracing::debug!(key = %key, outcome = receipt.outcome(), "Returning stored receipt");
                    return Ok(receipt);
                }
                Begin::InProgress(waiter) => {
                    tracing::debug!(key = %key, "Attaching to in-flight submission");
                    waiter
                }
                Begin::Fresh(guard) => {
                    let waiter = guard.subscribe();
                    let pipeline = self.clone();
                    let intent = intent.clone();
                    tokio::spawn(async move { pipeline.run(guard, intent).await });
                    waiter
                }
            };

            match waiter.wait().await {
                Some(outcome) => return outcome,
                None => tracing::warn!(key = %key, "In-flight submission ended without an outcome, retrying"),
            }
        }

        Err(RelayError::Abandoned(format!(
            "no outcome for {} after {} attempts",
            key, MAX_ATTACH_ATTEMPTS
        )))
    }

    /// Current receipt for `key`. An ambiguous receipt is re-checked against the
    /// ledger once and upgraded if finality (or a revert) has since been observed.
    pub async fn check_receipt(&self, key: &str) -> ReceiptStatus {
        let claims = &self.inner.claims;
        let Some(record) = claims.get(key) else {
            return ReceiptStatus::Unknown;
        };
        if claims.is_inflight(key) {
            return ReceiptStatus::InFlight;
        }
        let Some(receipt) = record.receipt else {
            // Signed before a restart, waiting to be resumed.
            return ReceiptStatus::InFlight;
        };
        let (true, Some(signed)) = (receipt.is_ambiguous(), record.signed) else {
            return ReceiptStatus::Ready(receipt);
        };

        let upgraded = match self.inner.tracker.poll_once(&signed.tx_id).await {
            ConfirmationState::Confirmed { block_number } => Receipt::confirmed(&signed, block_number),
            ConfirmationState::Reverted { reason } => {
                Receipt::failed(&signed, ReceiptError::Reverted { reason })
            }
            _ => return ReceiptStatus::Ready(receipt),
        };

        if claims.supersede(key, &upgraded) {
            tracing::info!(key = %key, outcome = upgraded.outcome(), "Ambiguous receipt resolved");
            return ReceiptStatus::Ready(upgraded);
        }
        // Lost a race with a resumed run; report whatever it stored.
        match claims.get(key).and_then(|r| r.receipt) {
            Some(latest) if !claims.is_inflight(key) => ReceiptStatus::Ready(latest),
            _ => ReceiptStatus::InFlight,
        }
    }

    /// Resume every record left signed but unfinished by a previous process.
    ///
    /// Returns the number of runs started.
    pub fn resume_unfinished(&self) -> usize {
        let mut started = 0;
        for key in self.inner.claims.unfinished_keys() {
            let Begin::Fresh(guard) = self.inner.claims.begin(&key) else {
                continue;
            };
            let Some(intent) = guard.resume_from().map(|signed| signed.intent.clone()) else {
                continue;
            };
            let pipeline = self.clone();
            tokio::spawn(async move { pipeline.run(guard, intent).await });
            started += 1;
        }
        if started > 0 {
            tracing::info!(count = started, "Resumed unfinished submissions");
        }
        started
    }

    /// Ledger reachability; also updates the health gauge.
    pub async fn ledger_healthy(&self) -> bool {
        let healthy = self.inner.ledger.is_healthy().await;
        metrics::record_ledger_health(healthy);
        healthy
    }

    async fn run(self, guard: ClaimGuard, intent: TransactionIntent) {
        let started = Instant::now();
        let kind = intent.kind;

        let outcome = match guard.resume_from().cloned() {
            Some(signed) => Ok(self.resume(&guard, signed).await),
            None => self.execute(&guard, &intent).await,
        };

        match outcome {
            Ok(receipt) => {
                metrics::record_intent(kind.as_str(), receipt.outcome());
                tracing::info!(
                    key = %guard.key(),
                    kind = %kind,
                    outcome = receipt.outcome(),
                    tx_id = ?receipt.tx_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Intent completed"
                );
                guard.complete(receipt);
            }
            Err(e) => {
                metrics::record_intent(kind.as_str(), "abandoned");
                tracing::warn!(key = %guard.key(), kind = %kind, error = %e, "Intent abandoned before broadcast");
                guard.abandon(e);
            }
        }
    }

    async fn execute(
        &self,
        guard: &ClaimGuard,
        intent: &TransactionIntent,
    ) -> Result<Receipt, RelayError> {
        let inner = &self.inner;
        let key = intent.idempotency_key.as_str();
        let account = inner.signer.account().clone();

        let mut lease = inner.sequencer.next(&account).await?;

        let gas_price =
            match with_deadline(inner.settings.rpc_timeout, "gas_price", inner.ledger.gas_price()).await {
                Ok(price) => price,
                Err(LedgerError::Rejected(reason)) => {
                    return Ok(Receipt::not_submitted(key, ReceiptError::Rejected { reason }));
                }
                Err(e) => return Err(e.into()),
            };

        let mut resyncs = 0u32;
        loop {
            let unsigned = UnsignedTransaction {
                intent: intent.clone(),
                account: account.clone(),
                sequence: lease.sequence(),
                gas_price,
            };
            let signed = match inner.signer.sign(&unsigned).await {
                Ok(signed) => signed,
                Err(e) => {
                    tracing::error!(key = %key, account = %account, error = %e, "Signing failed");
                    return Ok(Receipt::not_submitted(key, ReceiptError::Signing { reason: e.0 }));
                }
            };

            // Persist before broadcast so a crash can only resume this exact transaction.
            guard.record_signed(&signed).await?;

            match inner.submitter.submit(&signed).await {
                Ok(submitted) => {
                    lease.commit();
                    guard.record_submitted(&submitted.tx_id, submitted.attempts);
                    return Ok(self.confirm(&signed).await);
                }
                Err(SubmitError::SequenceMismatch(reason)) if resyncs < inner.settings.max_resyncs => {
                    resyncs += 1;
                    guard.record_attempt_error(&reason);
                    lease.resync().await?;
                }
                Err(SubmitError::SequenceMismatch(reason)) => {
                    return Ok(Receipt::not_submitted(
                        key,
                        ReceiptError::Rejected {
                            reason: format!("sequence mismatch after {} resyncs: {}", resyncs, reason),
                        },
                    ));
                }
                Err(SubmitError::Rejected(reason)) => {
                    return Ok(Receipt::not_submitted(key, ReceiptError::Rejected { reason }));
                }
                Err(SubmitError::Exhausted { attempts, last_error }) => {
                    // The ledger may hold this transaction, so the receipt names it.
                    return Ok(Receipt::failed(
                        &signed,
                        ReceiptError::SubmissionExhausted { attempts, last_error },
                    ));
                }
            }
        }
    }

    async fn resume(&self, guard: &ClaimGuard, signed: SignedTransaction) -> Receipt {
        let inner = &self.inner;
        tracing::info!(
            key = %guard.key(),
            tx_id = %signed.tx_id,
            sequence = signed.sequence,
            "Resuming previously signed transaction"
        );

        // Hold the account while re-broadcasting so fresh leases cannot interleave.
        let lease = match inner.sequencer.reclaim(&signed.account, signed.sequence).await {
            Ok(lease) => Some(lease),
            Err(e) => {
                tracing::warn!(key = %guard.key(), error = %e, "Could not lock account for resume");
                None
            }
        };

        match inner.tracker.poll_once(&signed.tx_id).await {
            ConfirmationState::Confirmed { block_number } => {
                if let Some(lease) = lease {
                    lease.commit();
                }
                return Receipt::confirmed(&signed, block_number);
            }
            ConfirmationState::Reverted { reason } => {
                if let Some(lease) = lease {
                    lease.commit();
                }
                return Receipt::failed(&signed, ReceiptError::Reverted { reason });
            }
            _ => {}
        }

        // The ledger may never have seen it; the same bytes are safe to send again.
        match with_deadline(inner.settings.rpc_timeout, "broadcast", inner.ledger.broadcast(&signed)).await {
            Ok(tx_id) => {
                if let Some(lease) = lease {
                    lease.commit();
                }
                guard.record_submitted(&tx_id, 1);
            }
            Err(LedgerError::SequenceMismatch(reason) | LedgerError::Rejected(reason)) => {
                drop(lease);
                if let Some(receipt) = self.settle_refused(&signed, &reason).await {
                    return receipt;
                }
            }
            Err(e) => {
                drop(lease);
                tracing::debug!(tx_id = %signed.tx_id, error = %e, "Re-broadcast not accepted");
            }
        }

        self.confirm(&signed).await
    }

    /// A refused re-broadcast is final only if the ledger has never seen the transaction.
    async fn settle_refused(&self, signed: &SignedTransaction, reason: &str) -> Option<Receipt> {
        let inner = &self.inner;
        let status =
            with_deadline(inner.settings.rpc_timeout, "get_status", inner.ledger.get_status(&signed.tx_id)).await;

        match status {
            Ok(LedgerStatus::Unknown) => {
                tracing::warn!(
                    tx_id = %signed.tx_id,
                    sequence = signed.sequence,
                    reason = %reason,
                    "Resumed transaction can no longer land"
                );
                Some(Receipt::failed(
                    signed,
                    ReceiptError::Rejected {
                        reason: format!(
                            "sequence {} consumed by another transaction: {}",
                            signed.sequence, reason
                        ),
                    },
                ))
            }
            Ok(LedgerStatus::Finalized { block_number }) => Some(Receipt::confirmed(signed, block_number)),
            Ok(LedgerStatus::Reverted { reason, .. }) => {
                Some(Receipt::failed(signed, ReceiptError::Reverted { reason }))
            }
            // Seen but not final, or unreadable right now: keep tracking.
            Ok(LedgerStatus::Pending { .. }) | Err(_) => None,
        }
    }

    async fn confirm(&self, signed: &SignedTransaction) -> Receipt {
        match self.inner.tracker.track(&signed.tx_id).await {
            ConfirmationState::Confirmed { block_number } => Receipt::confirmed(signed, block_number),
            ConfirmationState::Reverted { reason } => {
                Receipt::failed(signed, ReceiptError::Reverted { reason })
            }
            ConfirmationState::TimedOut { waited } => Receipt::failed(
                signed,
                ReceiptError::AmbiguousFinality {
                    waited_secs: waited.as_secs(),
                },
            ),
            ConfirmationState::Pending => Receipt::failed(
                signed,
                ReceiptError::AmbiguousFinality {
                    waited_secs: self.inner.settings.confirmation_timeout.as_secs(),
                },
            ),
        }
    }

    fn warn_on_payload_mismatch(&self, intent: &TransactionIntent) {
        let stored = self
            .inner
            .claims
            .get(&intent.idempotency_key)
            .and_then(|record| record.signed);
        if let Some(signed) = stored {
            if signed.intent.payload != intent.payload || signed.intent.kind != intent.kind {
                tracing::warn!(
                    key = %intent.idempotency_key,
                    "Idempotency key reused with a different intent; returning the original receipt"
                );
            }
        }
    }
}

impl std::fmt::Debug for TransactionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionPipeline")
            .field("account", self.inner.signer.account())
            .field("settings", &self.inner.settings)
            .field("claims", &self.inner.claims)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::mock::{Finality, MockLedger, MockSigner, ScriptedFailure};
    use crate::relay::types::IntentKind;

    fn settings() -> PipelineSettings {
        PipelineSettings {
            retry: RetryPolicy::new(4, Duration::from_millis(1), Duration::from_millis(5)),
            rpc_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(5),
            confirmation_timeout: Duration::from_millis(200),
            max_resyncs: 2,
        }
    }

    fn pipeline(ledger: Arc<MockLedger>, signer: Arc<MockSigner>) -> TransactionPipeline {
        TransactionPipeline::new(signer, ledger, ClaimStore::default(), settings())
    }

    fn intent(key: &str) -> TransactionIntent {
        TransactionIntent::new(IntentKind::CommitHash, key, b"mystery-hash".to_vec())
    }

    #[tokio::test]
    async fn test_happy_path_confirms() {
        let ledger = Arc::new(MockLedger::new());
        let signer = Arc::new(MockSigner::new("0xadmin"));
        let pipeline = pipeline(ledger.clone(), signer);

        let receipt = pipeline.submit_and_confirm(intent("c-1")).await.unwrap();
        assert!(receipt.finalized);
        assert_eq!(receipt.sequence, Some(0));
        assert_eq!(receipt.block_number, Some(100));
        assert_eq!(receipt.tx_id, Some(ledger.accepted()[0].tx_id.clone()));
    }

    #[tokio::test]
    async fn test_invalid_intent_touches_nothing() {
        let ledger = Arc::new(MockLedger::new());
        let pipeline = pipeline(ledger.clone(), Arc::new(MockSigner::new("0xadmin")));

        let err = pipeline.submit_and_confirm(intent("")).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidIntent(_)));
        assert!(pipeline.claims().is_empty());
        assert_eq!(ledger.broadcast_attempts(), 0);
    }

    #[tokio::test]
    async fn test_sequence_mismatch_resyncs_and_resubmits() {
        let ledger = Arc::new(MockLedger::new());
        let signer = Arc::new(MockSigner::new("0xadmin"));
        let pipeline = pipeline(ledger.clone(), signer.clone());

        pipeline.submit_and_confirm(intent("c-1")).await.unwrap();
        // Another sender used sequences 1..5 behind our back.
        ledger.set_account_sequence(signer.account(), 5);

        let receipt = pipeline.submit_and_confirm(intent("c-2")).await.unwrap();
        assert!(receipt.finalized);
        assert_eq!(receipt.sequence, Some(5));
        assert_eq!(signer.signatures(), 3);
    }

    #[tokio::test]
    async fn test_persistent_mismatch_becomes_rejection() {
        let ledger = Arc::new(MockLedger::new().with_failures([
            ScriptedFailure::SequenceMismatch,
            ScriptedFailure::SequenceMismatch,
            ScriptedFailure::SequenceMismatch,
        ]));
        let pipeline = pipeline(ledger.clone(), Arc::new(MockSigner::new("0xadmin")));

        let receipt = pipeline.submit_and_confirm(intent("c-1")).await.unwrap();
        assert!(!receipt.finalized);
        assert!(receipt.tx_id.is_none());
        assert!(matches!(receipt.error, Some(ReceiptError::Rejected { .. })));
        assert_eq!(ledger.broadcast_attempts(), 3);
    }

    #[tokio::test]
    async fn test_network_failure_before_signing_frees_key() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_network_down(true);
        let pipeline = pipeline(ledger.clone(), Arc::new(MockSigner::new("0xadmin")));

        let err = pipeline.submit_and_confirm(intent("c-1")).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(pipeline.claims().get("c-1").is_none());

        ledger.set_network_down(false);
        let receipt = pipeline.submit_and_confirm(intent("c-1")).await.unwrap();
        assert!(receipt.finalized);
    }

    #[tokio::test]
    async fn test_check_receipt_upgrades_ambiguous() {
        let ledger = Arc::new(MockLedger::new().with_finality(Finality::Never));
        let pipeline = pipeline(ledger.clone(), Arc::new(MockSigner::new("0xadmin")));

        let receipt = pipeline.submit_and_confirm(intent("c-1")).await.unwrap();
        assert!(receipt.is_ambiguous());
        assert_eq!(pipeline.check_receipt("c-1").await, ReceiptStatus::Ready(receipt.clone()));

        ledger.set_finality(Finality::Finalize { pending_polls: 0 });
        match pipeline.check_receipt("c-1").await {
            ReceiptStatus::Ready(upgraded) => {
                assert!(upgraded.finalized);
                assert_eq!(upgraded.tx_id, receipt.tx_id);
            }
            other => panic!("unexpected status: {:?}", other),
        }
        assert_eq!(pipeline.check_receipt("missing").await, ReceiptStatus::Unknown);
    }
}
