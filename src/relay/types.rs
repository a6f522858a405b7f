//! Relay data model: intents, signed transactions, submission records, receipts.

use alloy::primitives::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::relay::error::RelayError;

/// Longest idempotency key accepted, in bytes.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 256;

/// Seconds since the Unix epoch.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Logical operation kinds the relay knows how to put on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    /// Commit a hash (e.g. a mystery reveal) on behalf of the operator.
    CommitHash,
    /// A call whose fee is paid by the operator account.
    SponsoredCall,
    /// A reward claim for a player.
    RewardClaim,
}

impl IntentKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            IntentKind::CommitHash => "commit_hash",
            IntentKind::SponsoredCall => "sponsored_call",
            IntentKind::RewardClaim => "reward_claim",
        }
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical on-chain operation requested by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionIntent {
    /// What to do.
    pub kind: IntentKind,
    /// Opaque operation payload.
    pub payload: Bytes,
    /// Caller-supplied key, unique per logical operation.
    pub idempotency_key: String,
}

impl TransactionIntent {
    pub fn new(kind: IntentKind, idempotency_key: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
            idempotency_key: idempotency_key.into(),
        }
    }

    /// Reward claim for one player in one game session.
    ///
    /// The key is `"{session}:{player}"` so a session pays a player at most once.
    pub fn reward_claim(game_session_id: &str, player: &str, amount: u64) -> Self {
        Self::new(
            IntentKind::RewardClaim,
            format!("{}:{}", game_session_id, player),
            amount.to_string().into_bytes(),
        )
    }

    /// Reject intents that cannot be keyed.
    pub fn validate(&self) -> Result<(), RelayError> {
        let key = self.idempotency_key.as_str();
        if key.trim().is_empty() {
            return Err(RelayError::InvalidIntent(
                "idempotency key must not be empty".to_string(),
            ));
        }
        if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(RelayError::InvalidIntent(format!(
                "idempotency key is {} bytes (max {})",
                key.len(),
                MAX_IDEMPOTENCY_KEY_LEN
            )));
        }
        Ok(())
    }
}

/// Handle of a signing account on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ledger-native transaction identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(pub String);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An intent bound to an account and sequence number, ready for signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub intent: TransactionIntent,
    pub account: AccountId,
    pub sequence: u64,
    /// Fee price quoted by the ledger, in the ledger's smallest unit.
    pub gas_price: u128,
}

/// A signed transaction. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub intent: TransactionIntent,
    pub account: AccountId,
    pub sequence: u64,
    /// Identifier derived from the signed bytes.
    pub tx_id: TxId,
    /// Ledger-native encoding, broadcast as-is.
    pub raw: Bytes,
}

/// Where a submission record stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStage {
    /// Claimed, nothing signed yet.
    Pending,
    /// Signed and persisted; the ledger may or may not have seen it.
    Signed,
    /// Acknowledged by the ledger.
    Submitted,
    /// A receipt has been issued.
    Completed,
}

/// Durable state of one idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub idempotency_key: String,
    pub stage: SubmissionStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed: Option<SignedTransaction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<TxId>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<Receipt>,
    pub updated_at: u64,
}

impl SubmissionRecord {
    pub fn pending(idempotency_key: &str) -> Self {
        Self {
            idempotency_key: idempotency_key.to_string(),
            stage: SubmissionStage::Pending,
            signed: None,
            tx_id: None,
            attempts: 0,
            last_error: None,
            receipt: None,
            updated_at: unix_now(),
        }
    }

    /// A transaction exists for this key but no final outcome has been observed.
    ///
    /// Resuming means tracking (and re-broadcasting) the stored transaction, never signing a new one.
    pub fn is_resumable(&self) -> bool {
        if self.signed.is_none() {
            return false;
        }
        match self.stage {
            SubmissionStage::Signed | SubmissionStage::Submitted => true,
            SubmissionStage::Completed => self.receipt.as_ref().is_some_and(Receipt::is_ambiguous),
            SubmissionStage::Pending => false,
        }
    }
}

/// Typed failure carried by a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReceiptError {
    /// The ledger refused the transaction (malformed, underpriced, insufficient balance).
    #[error("Rejected: {reason}")]
    Rejected { reason: String },

    /// Network retries ran out before the ledger acknowledged the transaction.
    #[error("Submission exhausted after {attempts} attempts: {last_error}")]
    SubmissionExhausted { attempts: u32, last_error: String },

    /// The transaction was included but failed on-chain.
    #[error("Reverted: {reason}")]
    Reverted { reason: String },

    /// No finality observed before the deadline; finality may still occur.
    #[error("Finality not observed within {waited_secs}s")]
    AmbiguousFinality { waited_secs: u64 },

    /// The signer refused or failed.
    #[error("Signing failed: {reason}")]
    Signing { reason: String },
}

impl ReceiptError {
    /// Callers must poll status rather than resubmit.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, ReceiptError::AmbiguousFinality { .. })
    }
}

impl From<ReceiptError> for RelayError {
    fn from(err: ReceiptError) -> Self {
        match err {
            ReceiptError::Rejected { reason } => RelayError::Rejected(reason),
            ReceiptError::SubmissionExhausted { attempts, last_error } => {
                RelayError::SubmissionExhausted { attempts, last_error }
            }
            ReceiptError::Reverted { reason } => {
                RelayError::Rejected(format!("reverted on-chain: {}", reason))
            }
            ReceiptError::AmbiguousFinality { waited_secs } => {
                RelayError::AmbiguousFinality { waited_secs }
            }
            ReceiptError::Signing { reason } => RelayError::Signing(reason),
        }
    }
}

/// Terminal outcome of one idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub idempotency_key: String,
    pub tx_id: Option<TxId>,
    pub finalized: bool,
    pub block_number: Option<u64>,
    pub sequence: Option<u64>,
    pub error: Option<ReceiptError>,
    pub issued_at: u64,
}

impl Receipt {
    /// Finality observed for `signed` at `block_number`.
    pub fn confirmed(signed: &SignedTransaction, block_number: u64) -> Self {
        Self {
            idempotency_key: signed.intent.idempotency_key.clone(),
            tx_id: Some(signed.tx_id.clone()),
            finalized: true,
            block_number: Some(block_number),
            sequence: Some(signed.sequence),
            error: None,
            issued_at: unix_now(),
        }
    }

    /// Failure of a transaction that may exist on the ledger.
    pub fn failed(signed: &SignedTransaction, error: ReceiptError) -> Self {
        Self {
            idempotency_key: signed.intent.idempotency_key.clone(),
            tx_id: Some(signed.tx_id.clone()),
            finalized: false,
            block_number: None,
            sequence: Some(signed.sequence),
            error: Some(error),
            issued_at: unix_now(),
        }
    }

    /// Failure before anything reached the ledger.
    pub fn not_submitted(idempotency_key: &str, error: ReceiptError) -> Self {
        Self {
            idempotency_key: idempotency_key.to_string(),
            tx_id: None,
            finalized: false,
            block_number: None,
            sequence: None,
            error: Some(error),
            issued_at: unix_now(),
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        self.error.as_ref().is_some_and(ReceiptError::is_ambiguous)
    }

    /// Metric/log label for the outcome.
    pub fn outcome(&self) -> &'static str {
        match &self.error {
            None => "confirmed",
            Some(ReceiptError::Rejected { .. }) => "rejected",
            Some(ReceiptError::SubmissionExhausted { .. }) => "exhausted",
            Some(ReceiptError::Reverted { .. }) => "reverted",
            Some(ReceiptError::AmbiguousFinality { .. }) => "ambiguous",
            Some(ReceiptError::Signing { .. }) => "signing_failed",
        }
    }

    /// Typed view: `Ok` only for finalized receipts.
    pub fn into_result(self) -> Result<Receipt, RelayError> {
        match self.error.clone() {
            None => Ok(self),
            Some(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed(key: &str) -> SignedTransaction {
        SignedTransaction {
            intent: TransactionIntent::new(IntentKind::CommitHash, key, b"hash".to_vec()),
            account: AccountId("0xadmin".to_string()),
            sequence: 7,
            tx_id: TxId("0xabc".to_string()),
            raw: Bytes::from_static(b"raw"),
        }
    }

    #[test]
    fn test_reward_claim_key_and_payload() {
        let intent = TransactionIntent::reward_claim("session-42", "player-A", 100);
        assert_eq!(intent.kind, IntentKind::RewardClaim);
        assert_eq!(intent.idempotency_key, "session-42:player-A");
        assert_eq!(&intent.payload[..], b"100");
    }

    #[test]
    fn test_intent_validation() {
        let ok = TransactionIntent::new(IntentKind::SponsoredCall, "k-1", Vec::<u8>::new());
        assert!(ok.validate().is_ok());

        let empty = TransactionIntent::new(IntentKind::SponsoredCall, "  ", Vec::<u8>::new());
        assert!(matches!(empty.validate(), Err(RelayError::InvalidIntent(_))));

        let long = TransactionIntent::new(IntentKind::SponsoredCall, "x".repeat(300), Vec::<u8>::new());
        assert!(long.validate().unwrap_err().to_string().contains("300"));
    }

    #[test]
    fn test_resumable_records() {
        let mut record = SubmissionRecord::pending("k");
        assert!(!record.is_resumable());

        record.stage = SubmissionStage::Signed;
        record.signed = Some(signed("k"));
        assert!(record.is_resumable());

        record.stage = SubmissionStage::Completed;
        record.receipt = Some(Receipt::confirmed(&signed("k"), 10));
        assert!(!record.is_resumable());

        record.receipt = Some(Receipt::failed(
            &signed("k"),
            ReceiptError::AmbiguousFinality { waited_secs: 30 },
        ));
        assert!(record.is_resumable());
    }

    #[test]
    fn test_receipt_into_result() {
        let ok = Receipt::confirmed(&signed("k"), 5);
        assert!(ok.finalized);
        assert_eq!(ok.outcome(), "confirmed");
        assert!(ok.into_result().is_ok());

        let reverted = Receipt::failed(
            &signed("k"),
            ReceiptError::Reverted { reason: "out of gas".to_string() },
        );
        assert!(!reverted.finalized);
        let err = reverted.into_result().unwrap_err();
        assert!(matches!(err, RelayError::Rejected(ref r) if r.contains("out of gas")));
    }

    #[test]
    fn test_receipt_serde_tags_errors() {
        let receipt = Receipt::not_submitted(
            "k",
            ReceiptError::Signing { reason: "hsm offline".to_string() },
        );
        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["error"]["type"], "signing");
        assert!(json["tx_id"].is_null());
    }
}
