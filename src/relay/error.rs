//! Error taxonomy surfaced to relay callers.

use thiserror::Error;

use crate::relay::claims::ClaimStoreError;
use crate::relay::ports::LedgerError;

/// Errors returned by the relay.
///
/// Ledger outcomes normally travel inside a [`Receipt`](crate::relay::Receipt);
/// this type is returned directly only when no receipt can be issued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Missing or invalid credentials/settings. Fatal at startup only.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transient ledger connectivity failure. Retryable.
    #[error("Network error: {0}")]
    Network(String),

    /// Refused by the ledger. Not retryable.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Broadcast retries exhausted.
    #[error("Submission exhausted after {attempts} attempts: {last_error}")]
    SubmissionExhausted { attempts: u32, last_error: String },

    /// Tracking deadline passed before finality; poll the receipt later instead of resubmitting.
    #[error("Finality not observed within {waited_secs}s; re-check receipt status")]
    AmbiguousFinality { waited_secs: u64 },

    /// The signer failed.
    #[error("Signing error: {0}")]
    Signing(String),

    /// The intent cannot be processed as given.
    #[error("Invalid intent: {0}")]
    InvalidIntent(String),

    /// The claim store could not persist state.
    #[error("Claim store error: {0}")]
    Storage(String),

    /// The in-flight run for this key went away without an outcome.
    #[error("In-flight submission abandoned: {0}")]
    Abandoned(String),
}

impl RelayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayError::Network(_) | RelayError::Abandoned(_))
    }
}

impl From<LedgerError> for RelayError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Network(e) => RelayError::Network(e),
            LedgerError::Rejected(e) | LedgerError::SequenceMismatch(e) => RelayError::Rejected(e),
        }
    }
}

impl From<ClaimStoreError> for RelayError {
    fn from(err: ClaimStoreError) -> Self {
        RelayError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayError::SubmissionExhausted {
            attempts: 5,
            last_error: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Submission exhausted after 5 attempts: connection refused"
        );
        assert!(!err.is_retryable());
        assert!(RelayError::Network("reset".to_string()).is_retryable());
    }

    #[test]
    fn test_ledger_error_mapping() {
        let err: RelayError = LedgerError::Network("timeout".to_string()).into();
        assert_eq!(err, RelayError::Network("timeout".to_string()));

        let err: RelayError = LedgerError::Rejected("insufficient funds".to_string()).into();
        assert!(matches!(err, RelayError::Rejected(_)));
    }
}
