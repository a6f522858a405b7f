//! Collaborator traits the relay core depends on.
//!
//! The core never encodes, signs or talks to a node itself. Ledger adapters
//! (see [`crate::blockchain`]) and signers implement these traits.

use async_trait::async_trait;
use thiserror::Error;

use crate::relay::types::{AccountId, SignedTransaction, TxId, UnsignedTransaction};

/// Errors reported by a ledger adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Connectivity failure or timeout. Safe to retry.
    #[error("Network error: {0}")]
    Network(String),

    /// The ledger refused the request. Retrying the same request will not help.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The transaction's sequence number does not match the account's on-chain sequence.
    #[error("Sequence mismatch: {0}")]
    SequenceMismatch(String),
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Error returned by a [`Signer`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Signing error: {0}")]
pub struct SigningError(pub String);

/// Ledger view of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerStatus {
    /// The ledger has no record of the transaction.
    Unknown,
    /// Seen (mempool or included) but not final yet.
    Pending { confirmations: u64 },
    /// Irreversible under the configured finality rule.
    Finalized { block_number: u64 },
    /// Included but failed.
    Reverted {
        block_number: Option<u64>,
        reason: String,
    },
}

/// Remote ledger RPC.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Broadcast signed bytes. Returns the ledger's transaction id.
    async fn broadcast(&self, tx: &SignedTransaction) -> LedgerResult<TxId>;

    /// Current status of a transaction.
    async fn get_status(&self, tx_id: &TxId) -> LedgerResult<LedgerStatus>;

    /// Next sequence number the ledger expects from `account`.
    async fn account_sequence(&self, account: &AccountId) -> LedgerResult<u64>;

    /// Fee price to sign with.
    async fn gas_price(&self) -> LedgerResult<u128>;

    /// Whether the ledger endpoint is reachable.
    async fn is_healthy(&self) -> bool;
}

/// Signing collaborator. Key custody lives behind this trait.
#[async_trait]
pub trait Signer: Send + Sync {
    /// The account this signer signs for.
    fn account(&self) -> &AccountId;

    /// Sign a transaction for [`Signer::account`].
    async fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, SigningError>;
}
