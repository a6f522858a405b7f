//! Deadlines for ledger calls.
//!
//! Every network call the relay makes goes through [`with_deadline`], so a
//! hung endpoint surfaces as a retryable `LedgerError::Network` instead of
//! blocking a caller indefinitely.

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

use crate::relay::ports::{LedgerError, LedgerResult};

/// Run `fut` with a deadline; elapsing counts as a network error.
pub async fn with_deadline<T, F>(limit: Duration, operation: &str, fut: F) -> LedgerResult<T>
where
    F: Future<Output = LedgerResult<T>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(LedgerError::Network(format!(
            "{} timed out after {}ms",
            operation,
            limit.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_elapsed_deadline_is_network_error() {
        let result: LedgerResult<()> = with_deadline(Duration::from_millis(5), "broadcast", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(LedgerError::Network(msg)) => assert!(msg.contains("broadcast timed out")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let result: LedgerResult<()> = with_deadline(Duration::from_secs(1), "broadcast", async {
            Err(LedgerError::Rejected("bad".to_string()))
        })
        .await;
        assert_eq!(result, Err(LedgerError::Rejected("bad".to_string())));
    }
}
