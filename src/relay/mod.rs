//! Transaction relay core.
//!
//! # Data Flow
//! ```text
//! TransactionIntent
//!     → claims.rs (one in-flight run per idempotency key)
//!     → sequencer.rs (per-account sequence lease)
//!     → Signer (ports.rs)
//!     → submission.rs (broadcast with retry)
//!     → confirmation.rs (poll to finality)
//!     → Receipt
//! ```
//!
//! The core only talks to the outside world through the [`Ledger`] and
//! [`Signer`] traits. With the `testing` feature, `mock` provides in-memory
//! implementations of both.

pub mod claims;
pub mod confirmation;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod mock;
pub mod pipeline;
pub mod ports;
pub mod sequencer;
pub mod submission;
pub mod types;

pub use claims::{Begin, ClaimGuard, ClaimStore, ClaimStoreError, ReceiptWaiter};
pub use confirmation::{ConfirmationState, ConfirmationTracker};
pub use error::RelayError;
pub use pipeline::{PipelineSettings, ReceiptStatus, TransactionPipeline};
pub use ports::{Ledger, LedgerError, LedgerResult, LedgerStatus, Signer, SigningError};
pub use sequencer::{NonceSequencer, SequenceLease};
pub use submission::{SubmissionClient, SubmitError, Submitted};
pub use types::{
    AccountId, IntentKind, Receipt, ReceiptError, SignedTransaction, SubmissionRecord,
    SubmissionStage, TransactionIntent, TxId, UnsignedTransaction,
};
