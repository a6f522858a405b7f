//! Submission client: broadcast with retry.
//!
//! # Responsibilities
//! - Broadcast a signed transaction, each attempt bounded by the RPC timeout
//! - Retry network errors with exponential backoff up to the attempt cap
//! - Surface rejections and sequence mismatches immediately

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::observability::metrics;
use crate::relay::ports::{Ledger, LedgerError};
use crate::relay::types::{SignedTransaction, TxId};
use crate::resilience::{with_deadline, RetryPolicy};

/// Why a submission did not go through.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Sequence mismatch: {0}")]
    SequenceMismatch(String),

    #[error("Submission exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// A broadcast the ledger acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub tx_id: TxId,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

#[derive(Clone)]
pub struct SubmissionClient {
    ledger: Arc<dyn Ledger>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl SubmissionClient {
    pub fn new(ledger: Arc<dyn Ledger>, policy: RetryPolicy, attempt_timeout: Duration) -> Self {
        Self {
            ledger,
            policy,
            attempt_timeout,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Broadcast `tx`, retrying network errors.
    pub async fn submit(&self, tx: &SignedTransaction) -> Result<Submitted, SubmitError> {
        let mut last_error = String::new();

        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.policy.backoff(attempt - 1)).await;
            }

            let result =
                with_deadline(self.attempt_timeout, "broadcast", self.ledger.broadcast(tx)).await;

            match result {
                Ok(tx_id) => {
                    metrics::record_submit_attempt("accepted");
                    if tx_id != tx.tx_id {
                        tracing::warn!(
                            expected = %tx.tx_id,
                            reported = %tx_id,
                            "Ledger reported a different transaction id than the signed one"
                        );
                    }
                    tracing::debug!(
                        tx_id = %tx_id,
                        sequence = tx.sequence,
                        attempt = attempt,
                        "Transaction broadcast"
                    );
                    return Ok(Submitted { tx_id, attempts: attempt });
                }
                Err(LedgerError::Network(e)) => {
                    metrics::record_submit_attempt("network_error");
                    tracing::warn!(
                        tx_id = %tx.tx_id,
                        attempt = attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "Broadcast failed, will retry"
                    );
                    last_error = e;
                }
                Err(LedgerError::Rejected(e)) => {
                    metrics::record_submit_attempt("rejected");
                    tracing::warn!(tx_id = %tx.tx_id, error = %e, "Broadcast rejected");
                    return Err(SubmitError::Rejected(e));
                }
                Err(LedgerError::SequenceMismatch(e)) => {
                    metrics::record_submit_attempt("sequence_mismatch");
                    return Err(SubmitError::SequenceMismatch(e));
                }
            }
        }

        tracing::error!(
            tx_id = %tx.tx_id,
            attempts = self.policy.max_attempts,
            error = %last_error,
            "Broadcast retries exhausted"
        );
        Err(SubmitError::Exhausted {
            attempts: self.policy.max_attempts,
            last_error,
        })
    }
}
