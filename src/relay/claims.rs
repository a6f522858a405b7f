//! Claim idempotency store.
//!
//! # Contract
//! `begin(key)` returns exactly one of:
//! - `Fresh(guard)`: the caller owns the key's single in-flight submission
//! - `InProgress(waiter)`: another run owns it; the waiter observes its outcome
//! - `Done(receipt)`: the key already has a terminal receipt
//!
//! # Durability
//! Records are written to a JSON file (temp file + rename) on the blocking
//! pool and reloaded at startup. The signed stage is written before
//! `record_signed` returns; later transitions are queued and coalesced. Records reloaded mid-flight, and
//! records whose receipt is ambiguous, are resumable: `begin` hands out a
//! `Fresh` guard carrying the stored signed transaction so the pipeline
//! tracks it instead of signing a new one. Settled records are pruned after
//! the retention window.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch};

use crate::observability::metrics;
use crate::relay::error::RelayError;
use crate::relay::types::{
    unix_now, Receipt, SignedTransaction, SubmissionRecord, SubmissionStage, TxId,
};

/// Outcome delivered to every caller attached to a key.
pub type ClaimOutcome = Result<Receipt, RelayError>;

#[derive(Debug, Error)]
pub enum ClaimStoreError {
    #[error("Claim store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Claim store encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

struct Slot {
    record: SubmissionRecord,
    /// Present while a guard owns the key.
    inflight: Option<watch::Receiver<Option<ClaimOutcome>>>,
}

struct StoreInner {
    slots: DashMap<String, Slot>,
    persistence_path: Option<PathBuf>,
    retention: Duration,
    write_lock: Mutex<()>,
    /// A background write is queued and has not taken its snapshot yet.
    write_queued: AtomicBool,
    inflight: AtomicI64,
}

/// Thread-safe, optionally durable map of idempotency key → submission record.
#[derive(Clone)]
pub struct ClaimStore {
    inner: Arc<StoreInner>,
}

/// Result of [`ClaimStore::begin`].
pub enum Begin {
    Fresh(ClaimGuard),
    InProgress(ReceiptWaiter),
    Done(Receipt),
}

impl ClaimStore {
    /// Create an empty store. `persistence_path = None` keeps it in memory only.
    pub fn new(persistence_path: Option<PathBuf>, retention: Duration) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                slots: DashMap::new(),
                persistence_path,
                retention,
                write_lock: Mutex::new(()),
                write_queued: AtomicBool::new(false),
                inflight: AtomicI64::new(0),
            }),
        }
    }

    /// Load records from `path` if it exists; the store keeps persisting there.
    pub fn load_from_file(path: &Path, retention: Duration) -> Result<Self, ClaimStoreError> {
        let store = Self::new(Some(path.to_path_buf()), retention);
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            let records: HashMap<String, SubmissionRecord> = serde_json::from_reader(reader)?;

            let mut resumable = 0usize;
            for (key, record) in records {
                // Nothing was signed for a pending record, so nothing can exist on the ledger.
                if record.stage == SubmissionStage::Pending {
                    continue;
                }
                if record.is_resumable() {
                    resumable += 1;
                }
                store.inner.slots.insert(key, Slot { record, inflight: None });
            }

            tracing::info!(
                path = %path.display(),
                records = store.inner.slots.len(),
                resumable = resumable,
                "Loaded claim records"
            );
        }
        Ok(store)
    }

    /// Claim `key` or attach to its current state.
    pub fn begin(&self, key: &str) -> Begin {
        let begin = match self.inner.slots.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(None);
                vacant.insert(Slot {
                    record: SubmissionRecord::pending(key),
                    inflight: Some(rx),
                });
                Begin::Fresh(ClaimGuard::new(self.clone(), key, tx, None))
            }
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                if let Some(rx) = &slot.inflight {
                    Begin::InProgress(ReceiptWaiter { rx: rx.clone() })
                } else if slot.record.is_resumable() {
                    let (tx, rx) = watch::channel(None);
                    slot.inflight = Some(rx);
                    let resume = slot.record.signed.clone();
                    Begin::Fresh(ClaimGuard::new(self.clone(), key, tx, resume))
                } else if let Some(receipt) = &slot.record.receipt {
                    Begin::Done(receipt.clone())
                } else {
                    // Completed without a receipt cannot happen; any other leftover is unclaimed.
                    let (tx, rx) = watch::channel(None);
                    slot.record = SubmissionRecord::pending(key);
                    slot.inflight = Some(rx);
                    Begin::Fresh(ClaimGuard::new(self.clone(), key, tx, None))
                }
            }
        };

        if matches!(begin, Begin::Fresh(_)) {
            let inflight = self.inner.inflight.fetch_add(1, Ordering::SeqCst) + 1;
            metrics::set_inflight_claims(inflight);
        }
        begin
    }

    /// Snapshot of the record for `key`.
    pub fn get(&self, key: &str) -> Option<SubmissionRecord> {
        self.inner.slots.get(key).map(|slot| slot.record.clone())
    }

    pub fn is_inflight(&self, key: &str) -> bool {
        self.inner
            .slots
            .get(key)
            .is_some_and(|slot| slot.inflight.is_some())
    }

    /// Keys signed (or submitted) by an earlier run that never completed.
    pub fn unfinished_keys(&self) -> Vec<String> {
        self.inner
            .slots
            .iter()
            .filter(|slot| {
                let slot = slot.value();
                slot.inflight.is_none()
                    && matches!(
                        slot.record.stage,
                        SubmissionStage::Signed | SubmissionStage::Submitted
                    )
            })
            .map(|slot| slot.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    /// Replace an ambiguous receipt with a later observation for the same transaction.
    ///
    /// Returns false (and changes nothing) if the key is in flight or its receipt is not ambiguous.
    pub fn supersede(&self, key: &str, receipt: &Receipt) -> bool {
        {
            let Some(mut slot) = self.inner.slots.get_mut(key) else {
                return false;
            };
            let ambiguous = slot.record.receipt.as_ref().is_some_and(Receipt::is_ambiguous);
            if slot.inflight.is_some() || !ambiguous {
                return false;
            }
            slot.record.receipt = Some(receipt.clone());
            slot.record.last_error = receipt.error.as_ref().map(|e| e.to_string());
            slot.record.updated_at = unix_now();
        }
        self.persist_logged();
        true
    }

    /// Drop settled records older than the retention window. Returns the number removed.
    ///
    /// Ambiguous receipts stay until a re-check or resume settles them.
    pub fn prune_expired(&self) -> usize {
        let now = unix_now();
        let retention = self.inner.retention.as_secs();
        let before = self.inner.slots.len();

        self.inner.slots.retain(|_, slot| {
            let expired = slot.inflight.is_none()
                && slot.record.stage == SubmissionStage::Completed
                && !slot.record.is_resumable()
                && now.saturating_sub(slot.record.updated_at) >= retention;
            !expired
        });

        let removed = before.saturating_sub(self.inner.slots.len());
        if removed > 0 {
            tracing::info!(removed = removed, "Pruned expired claim records");
            self.persist_logged();
        }
        removed
    }

    /// Periodically prune until shutdown.
    pub async fn run_pruner(self, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.prune_expired();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Claim pruner received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Write all non-pending records to the persistence file, if configured.
    pub fn save_to_file(&self) -> Result<(), ClaimStoreError> {
        let Some(path) = &self.inner.persistence_path else {
            return Ok(());
        };

        let _write = self.inner.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let records: HashMap<String, SubmissionRecord> = self
            .inner
            .slots
            .iter()
            .filter(|slot| slot.value().record.stage != SubmissionStage::Pending)
            .map(|slot| (slot.key().clone(), slot.value().record.clone()))
            .collect();

        let tmp_path = path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            serde_json::to_writer(&mut writer, &records)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, path)?;

        tracing::debug!(records = records.len(), "Saved claim records");
        Ok(())
    }

    /// Persist on the blocking pool. A burst of changes shares one queued write,
    /// which snapshots the records only when it runs.
    fn persist_logged(&self) {
        if self.inner.persistence_path.is_none() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.write_logged();
            return;
        };
        if self.inner.write_queued.swap(true, Ordering::AcqRel) {
            return;
        }
        let store = self.clone();
        handle.spawn_blocking(move || {
            store.inner.write_queued.store(false, Ordering::Release);
            store.write_logged();
        });
    }

    fn write_logged(&self) {
        if let Err(e) = self.save_to_file() {
            tracing::error!(error = %e, "Failed to persist claim records");
        }
    }

    /// Write now, off the async worker threads.
    async fn save_blocking(&self) -> Result<(), ClaimStoreError> {
        if self.inner.persistence_path.is_none() {
            return Ok(());
        }
        let store = self.clone();
        match tokio::task::spawn_blocking(move || store.save_to_file()).await {
            Ok(result) => result,
            Err(e) => Err(ClaimStoreError::Io(std::io::Error::other(e.to_string()))),
        }
    }

    fn update<F>(&self, key: &str, f: F) -> Option<SubmissionRecord>
    where
        F: FnOnce(&mut SubmissionRecord),
    {
        let mut slot = self.inner.slots.get_mut(key)?;
        let previous = slot.record.clone();
        f(&mut slot.record);
        slot.record.updated_at = unix_now();
        Some(previous)
    }

    fn restore(&self, key: &str, previous: SubmissionRecord) {
        if let Some(mut slot) = self.inner.slots.get_mut(key) {
            slot.record = previous;
        }
    }

    /// Release the in-flight lock. `discard` removes the record entirely.
    fn release(&self, key: &str, discard: bool) {
        let remove = match self.inner.slots.get_mut(key) {
            Some(mut slot) => {
                slot.inflight = None;
                discard || slot.record.stage == SubmissionStage::Pending
            }
            None => false,
        };
        if remove {
            self.inner.slots.remove(key);
        }

        let inflight = self.inner.inflight.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_inflight_claims(inflight);
    }
}

impl Default for ClaimStore {
    fn default() -> Self {
        Self::new(None, Duration::from_secs(7 * 24 * 3600))
    }
}

impl std::fmt::Debug for ClaimStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimStore")
            .field("records", &self.inner.slots.len())
            .field("persistence_path", &self.inner.persistence_path)
            .finish()
    }
}

/// Exclusive ownership of one key's in-flight submission.
///
/// Dropping the guard without [`complete`](ClaimGuard::complete) or
/// [`abandon`](ClaimGuard::abandon) releases the key; waiters then retry `begin`.
/// A record that already holds a signed transaction stays resumable in that case.
pub struct ClaimGuard {
    store: ClaimStore,
    key: String,
    tx: watch::Sender<Option<ClaimOutcome>>,
    resume: Option<SignedTransaction>,
    finished: bool,
}

impl ClaimGuard {
    fn new(
        store: ClaimStore,
        key: &str,
        tx: watch::Sender<Option<ClaimOutcome>>,
        resume: Option<SignedTransaction>,
    ) -> Self {
        Self {
            store,
            key: key.to_string(),
            tx,
            resume,
            finished: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The previously signed transaction this key must resume, if any.
    pub fn resume_from(&self) -> Option<&SignedTransaction> {
        self.resume.as_ref()
    }

    /// A waiter for this guard's outcome.
    pub fn subscribe(&self) -> ReceiptWaiter {
        ReceiptWaiter {
            rx: self.tx.subscribe(),
        }
    }

    /// Persist the signed transaction before it is broadcast.
    ///
    /// On a write failure the in-memory record is restored and the error returned,
    /// so nothing unpersisted is ever broadcast.
    pub async fn record_signed(&self, signed: &SignedTransaction) -> Result<(), ClaimStoreError> {
        let previous = self.store.update(&self.key, |record| {
            record.stage = SubmissionStage::Signed;
            record.signed = Some(signed.clone());
            record.tx_id = Some(signed.tx_id.clone());
        });

        if let Err(e) = self.store.save_blocking().await {
            if let Some(previous) = previous {
                self.store.restore(&self.key, previous);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Note a failed attempt that did not end the run.
    pub fn record_attempt_error(&self, error: &str) {
        self.store.update(&self.key, |record| {
            record.attempts += 1;
            record.last_error = Some(error.to_string());
        });
    }

    /// The ledger acknowledged the transaction.
    pub fn record_submitted(&self, tx_id: &TxId, attempts: u32) {
        self.store.update(&self.key, |record| {
            record.stage = SubmissionStage::Submitted;
            record.tx_id = Some(tx_id.clone());
            record.attempts += attempts;
        });
        self.store.persist_logged();
    }

    /// Store the terminal receipt, wake every waiter and release the key.
    pub fn complete(mut self, receipt: Receipt) -> Receipt {
        self.store.update(&self.key, |record| {
            record.stage = SubmissionStage::Completed;
            if record.tx_id.is_none() {
                record.tx_id = receipt.tx_id.clone();
            }
            record.last_error = receipt.error.as_ref().map(|e| e.to_string());
            record.receipt = Some(receipt.clone());
        });
        self.finished = true;
        self.store.release(&self.key, false);
        self.store.persist_logged();

        self.tx.send_replace(Some(Ok(receipt.clone())));
        receipt
    }

    /// End the run without a receipt; nothing reached the ledger, so the key is freed.
    pub fn abandon(mut self, error: RelayError) {
        self.finished = true;
        self.store.release(&self.key, true);
        self.store.persist_logged();
        self.tx.send_replace(Some(Err(error)));
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(key = %self.key, "Claim guard dropped without an outcome");
            self.store.release(&self.key, false);
        }
    }
}

/// Observer of another caller's in-flight run.
pub struct ReceiptWaiter {
    rx: watch::Receiver<Option<ClaimOutcome>>,
}

impl ReceiptWaiter {
    /// Wait for the outcome. `None` means the run ended without one; call `begin` again.
    pub async fn wait(mut self) -> Option<ClaimOutcome> {
        loop {
            let current = self.rx.borrow_and_update().clone();
            if current.is_some() {
                return current;
            }
            if self.rx.changed().await.is_err() {
                return self.rx.borrow().clone();
            }
        }
    }
}
