//! Blockchain integration subsystem.
//!
//! # Data Flow
//! ```text
//! Environment Variables (private key)
//!     → wallet.rs (key loading)
//!     → transaction.rs (relay call encoding, signing: LocalKeySigner)
//!     → client.rs (RPC connection with timeouts and failover)
//!     → ledger.rs (EvmLedger: broadcast, status, nonce, gas price)
//! ```
//!
//! # Security Constraints
//! - Private keys ONLY from environment variables
//! - Never log private keys or sensitive data
//! - All RPC calls have configurable timeouts
//! - Graceful degradation when blockchain unreachable

pub mod client;
pub mod ledger;
pub mod transaction;
pub mod types;
pub mod wallet;

pub use client::BlockchainClient;
pub use ledger::EvmLedger;
pub use transaction::LocalKeySigner;
pub use types::{BlockchainError, ChainId};
pub use wallet::Wallet;
