//! Chain-specific types and error definitions.

use thiserror::Error;

use crate::relay::ports::LedgerError;

/// Chain ID type for strong typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainId(pub u64);

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ChainId> for u64 {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

/// Errors that can occur during blockchain operations.
#[derive(Debug, Error)]
pub enum BlockchainError {
    /// RPC connection or request failed on every provider.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// The node answered with a JSON-RPC error.
    #[error("Node rejected request (code {code}): {message}")]
    Rejected { code: i64, message: String },

    /// The node refused the transaction's nonce.
    #[error("Nonce rejected: {0}")]
    NonceMismatch(String),

    /// Invalid private key format or derivation error.
    #[error("Wallet error: {0}")]
    Wallet(String),

    /// Gas price exceeded maximum allowed.
    #[error("Gas price {current_gwei} gwei exceeds maximum {max_gwei} gwei")]
    GasPriceTooHigh { current_gwei: u64, max_gwei: u64 },

    /// Chain configuration mismatch.
    #[error("Chain ID mismatch: expected {expected}, got {actual}")]
    ChainMismatch { expected: u64, actual: u64 },

    /// An address or hash could not be parsed.
    #[error("Invalid {kind}: {value}")]
    InvalidInput { kind: &'static str, value: String },
}

/// Result type for blockchain operations.
pub type BlockchainResult<T> = Result<T, BlockchainError>;

impl BlockchainError {
    /// Classify a JSON-RPC error message from `eth_sendRawTransaction`.
    pub fn from_node_message(code: i64, message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("nonce too low")
            || lower.contains("nonce too high")
            || lower.contains("invalid nonce")
        {
            BlockchainError::NonceMismatch(message.to_string())
        } else {
            BlockchainError::Rejected {
                code,
                message: message.to_string(),
            }
        }
    }

    /// The node already holds this exact transaction.
    pub fn is_already_known(&self) -> bool {
        match self {
            BlockchainError::Rejected { message, .. } => {
                let lower = message.to_ascii_lowercase();
                lower.contains("already known") || lower.contains("known transaction")
            }
            _ => false,
        }
    }
}

impl From<BlockchainError> for LedgerError {
    fn from(err: BlockchainError) -> Self {
        match err {
            BlockchainError::Rpc(_) => LedgerError::Network(err.to_string()),
            BlockchainError::NonceMismatch(msg) => LedgerError::SequenceMismatch(msg),
            other => LedgerError::Rejected(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_conversion() {
        let chain_id = ChainId::from(9000u64);
        assert_eq!(chain_id.0, 9000);
        assert_eq!(u64::from(chain_id), 9000);
    }

    #[test]
    fn test_node_message_classification() {
        let err = BlockchainError::from_node_message(-32000, "nonce too low: next nonce 5, tx nonce 3");
        assert!(matches!(err, BlockchainError::NonceMismatch(_)));

        let err = BlockchainError::from_node_message(-32000, "insufficient funds for gas * price + value");
        assert!(matches!(err, BlockchainError::Rejected { code: -32000, .. }));
        assert!(!err.is_already_known());

        let err = BlockchainError::from_node_message(-32000, "already known");
        assert!(err.is_already_known());
    }

    #[test]
    fn test_ledger_error_mapping() {
        let err: LedgerError = BlockchainError::Rpc("All RPC providers failed".to_string()).into();
        assert!(matches!(err, LedgerError::Network(_)));

        let err: LedgerError = BlockchainError::NonceMismatch("nonce too high".to_string()).into();
        assert_eq!(err, LedgerError::SequenceMismatch("nonce too high".to_string()));

        let err: LedgerError = BlockchainError::GasPriceTooHigh {
            current_gwei: 600,
            max_gwei: 500,
        }
        .into();
        assert!(matches!(err, LedgerError::Rejected(ref m) if m.contains("600")));
    }
}
