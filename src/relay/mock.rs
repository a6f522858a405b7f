//! Deterministic in-memory ledger and signer for tests and offline runs.
//!
//! The mock ledger enforces per-account sequence numbers the way a real node
//! does, so sequencing bugs show up as `SequenceMismatch` errors.

use alloy::primitives::{keccak256, Bytes};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::relay::ports::{Ledger, LedgerError, LedgerResult, LedgerStatus, Signer, SigningError};
use crate::relay::types::{AccountId, SignedTransaction, TxId, UnsignedTransaction};

/// Scripted broadcast failure, consumed one per broadcast call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    Network,
    Rejected,
    SequenceMismatch,
}

/// How accepted transactions resolve when polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finality {
    /// Finalized after `pending_polls` pending answers.
    Finalize { pending_polls: u32 },
    /// Reverted on first poll.
    Revert,
    /// Stays pending forever.
    Never,
}

#[derive(Debug)]
struct MockState {
    sequences: HashMap<AccountId, u64>,
    accepted: Vec<SignedTransaction>,
    failures: VecDeque<ScriptedFailure>,
    polls: HashMap<TxId, u32>,
    finality: Finality,
    gas_price: u128,
    gas_price_rejection: Option<String>,
    network_down: bool,
    /// Status polls left to fail with a network error.
    status_failures: u32,
}

#[derive(Debug)]
pub struct MockLedger {
    state: Mutex<MockState>,
    broadcast_attempts: AtomicU32,
    broadcast_delay: Duration,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                sequences: HashMap::new(),
                accepted: Vec::new(),
                failures: VecDeque::new(),
                polls: HashMap::new(),
                finality: Finality::Finalize { pending_polls: 0 },
                gas_price: 25_000_000_000,
                gas_price_rejection: None,
                network_down: false,
                status_failures: 0,
            }),
            broadcast_attempts: AtomicU32::new(0),
            broadcast_delay: Duration::ZERO,
        }
    }

    pub fn with_failures(self, failures: impl IntoIterator<Item = ScriptedFailure>) -> Self {
        self.state.lock().expect("mutex poisoned").failures.extend(failures);
        self
    }

    pub fn with_finality(self, finality: Finality) -> Self {
        self.state.lock().expect("mutex poisoned").finality = finality;
        self
    }

    /// Fail the next `count` status polls with a network error.
    pub fn with_status_failures(self, count: u32) -> Self {
        self.fail_status_polls(count);
        self
    }

    pub fn fail_status_polls(&self, count: u32) {
        self.state.lock().expect("mutex poisoned").status_failures = count;
    }

    /// Delay every broadcast, widening race windows in concurrency tests.
    pub fn with_broadcast_delay(mut self, delay: Duration) -> Self {
        self.broadcast_delay = delay;
        self
    }

    /// Every broadcast fails with a network error while set.
    pub fn set_network_down(&self, down: bool) {
        self.state.lock().expect("mutex poisoned").network_down = down;
    }

    pub fn set_finality(&self, finality: Finality) {
        self.state.lock().expect("mutex poisoned").finality = finality;
    }

    /// Simulate transactions landing from elsewhere (another relay instance, a wallet).
    pub fn set_account_sequence(&self, account: &AccountId, sequence: u64) {
        self.state
            .lock()
            .expect("mutex poisoned")
            .sequences
            .insert(account.clone(), sequence);
    }

    pub fn reject_gas_price(&self, reason: &str) {
        self.state.lock().expect("mutex poisoned").gas_price_rejection = Some(reason.to_string());
    }

    /// Transactions accepted by the ledger, in acceptance order.
    pub fn accepted(&self) -> Vec<SignedTransaction> {
        self.state.lock().expect("mutex poisoned").accepted.clone()
    }

    /// Broadcast calls made, including failed ones.
    pub fn broadcast_attempts(&self) -> u32 {
        self.broadcast_attempts.load(Ordering::SeqCst)
    }
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn broadcast(&self, tx: &SignedTransaction) -> LedgerResult<TxId> {
        if !self.broadcast_delay.is_zero() {
            tokio::time::sleep(self.broadcast_delay).await;
        }
        self.broadcast_attempts.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.lock().expect("mutex poisoned");
        if state.network_down {
            return Err(LedgerError::Network("connection refused".to_string()));
        }
        if let Some(failure) = state.failures.pop_front() {
            return Err(match failure {
                ScriptedFailure::Network => LedgerError::Network("connection reset".to_string()),
                ScriptedFailure::Rejected => {
                    LedgerError::Rejected("insufficient funds for gas".to_string())
                }
                ScriptedFailure::SequenceMismatch => {
                    LedgerError::SequenceMismatch("nonce too low".to_string())
                }
            });
        }

        if state.accepted.iter().any(|a| a.tx_id == tx.tx_id) {
            return Ok(tx.tx_id.clone());
        }

        let expected = state.sequences.get(&tx.account).copied().unwrap_or(0);
        if tx.sequence != expected {
            return Err(LedgerError::SequenceMismatch(format!(
                "expected sequence {}, got {}",
                expected, tx.sequence
            )));
        }
        state.sequences.insert(tx.account.clone(), expected + 1);
        state.accepted.push(tx.clone());
        Ok(tx.tx_id.clone())
    }

    async fn get_status(&self, tx_id: &TxId) -> LedgerResult<LedgerStatus> {
        let mut state = self.state.lock().expect("mutex poisoned");
        if state.status_failures > 0 {
            state.status_failures -= 1;
            return Err(LedgerError::Network("status endpoint unavailable".to_string()));
        }
        let Some(index) = state.accepted.iter().position(|a| &a.tx_id == tx_id) else {
            return Ok(LedgerStatus::Unknown);
        };
        let block_number = 100 + index as u64;

        let polls = state.polls.entry(tx_id.clone()).or_insert(0);
        *polls += 1;
        let polls = *polls;

        Ok(match state.finality {
            Finality::Finalize { pending_polls } if polls > pending_polls => {
                LedgerStatus::Finalized { block_number }
            }
            Finality::Finalize { .. } | Finality::Never => LedgerStatus::Pending {
                confirmations: u64::from(polls),
            },
            Finality::Revert => LedgerStatus::Reverted {
                block_number: Some(block_number),
                reason: "execution reverted".to_string(),
            },
        })
    }

    async fn account_sequence(&self, account: &AccountId) -> LedgerResult<u64> {
        let state = self.state.lock().expect("mutex poisoned");
        if state.network_down {
            return Err(LedgerError::Network("connection refused".to_string()));
        }
        Ok(state.sequences.get(account).copied().unwrap_or(0))
    }

    async fn gas_price(&self) -> LedgerResult<u128> {
        let state = self.state.lock().expect("mutex poisoned");
        match &state.gas_price_rejection {
            Some(reason) => Err(LedgerError::Rejected(reason.clone())),
            None => Ok(state.gas_price),
        }
    }

    async fn is_healthy(&self) -> bool {
        !self.state.lock().expect("mutex poisoned").network_down
    }
}

/// Signer producing deterministic ids: `keccak256(account, sequence, key, payload)`.
#[derive(Debug)]
pub struct MockSigner {
    account: AccountId,
    failing: AtomicBool,
    signatures: AtomicU32,
}

impl MockSigner {
    pub fn new(account: &str) -> Self {
        Self {
            account: AccountId(account.to_string()),
            failing: AtomicBool::new(false),
            signatures: AtomicU32::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Successful signatures produced.
    pub fn signatures(&self) -> u32 {
        self.signatures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Signer for MockSigner {
    fn account(&self) -> &AccountId {
        &self.account
    }

    async fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, SigningError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SigningError("key unavailable".to_string()));
        }

        let mut raw = Vec::new();
        raw.extend_from_slice(tx.account.0.as_bytes());
        raw.extend_from_slice(&tx.sequence.to_be_bytes());
        raw.extend_from_slice(tx.intent.idempotency_key.as_bytes());
        raw.extend_from_slice(&tx.intent.payload);
        let hash = keccak256(&raw);

        self.signatures.fetch_add(1, Ordering::SeqCst);
        Ok(SignedTransaction {
            intent: tx.intent.clone(),
            account: tx.account.clone(),
            sequence: tx.sequence,
            tx_id: TxId(hash.to_string()),
            raw: Bytes::from(raw),
        })
    }
}
