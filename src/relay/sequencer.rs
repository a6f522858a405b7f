//! Per-account sequence (nonce) assignment.
//!
//! # Contract
//! - `next(account)` returns a [`SequenceLease`] holding the account's single-writer lock
//! - `lease.commit()` consumes the number once the ledger has accepted the transaction
//! - a lease dropped without commit leaves the number available (failed-before-submission)
//! - on a ledger sequence mismatch, `lease.resync()` reloads the on-chain sequence
//! - `reclaim(account, sequence)` locks the account for a transaction signed earlier,
//!   so a resumed re-broadcast cannot interleave with a fresh lease
//! - every ledger read runs under the RPC deadline; the lock is never held past it
//!
//! Different accounts never contend; the per-account lock is a `tokio::sync::Mutex`
//! so waiting callers suspend instead of blocking the runtime.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::observability::metrics;
use crate::relay::ports::{Ledger, LedgerResult};
use crate::relay::types::AccountId;
use crate::resilience::with_deadline;

#[derive(Debug, Default)]
struct AccountSlot {
    /// Next sequence to hand out. `None` until seeded from the ledger.
    next: Option<u64>,
}

/// Hands out strictly increasing, gap-free sequence numbers per account.
#[derive(Clone)]
pub struct NonceSequencer {
    ledger: Arc<dyn Ledger>,
    rpc_timeout: Duration,
    accounts: Arc<DashMap<AccountId, Arc<Mutex<AccountSlot>>>>,
}

impl NonceSequencer {
    pub fn new(ledger: Arc<dyn Ledger>, rpc_timeout: Duration) -> Self {
        Self {
            ledger,
            rpc_timeout,
            accounts: Arc::new(DashMap::new()),
        }
    }

    fn slot(&self, account: &AccountId) -> Arc<Mutex<AccountSlot>> {
        self.accounts
            .entry(account.clone())
            .or_insert_with(|| Arc::new(Mutex::new(AccountSlot::default())))
            .clone()
    }

    /// Reserve the next sequence for `account`.
    ///
    /// Waits while another lease for the same account is alive.
    pub async fn next(&self, account: &AccountId) -> LedgerResult<SequenceLease> {
        let mut guard = self.slot(account).lock_owned().await;
        let sequence = self.seed(account, &mut guard).await?;
        Ok(self.lease(account, sequence, guard))
    }

    /// Lock `account` for a transaction already signed at `sequence` (e.g. one
    /// resumed after a restart).
    ///
    /// The returned lease carries the stored sequence; committing it moves the
    /// counter past that sequence, dropping it leaves the counter as seeded.
    pub async fn reclaim(&self, account: &AccountId, sequence: u64) -> LedgerResult<SequenceLease> {
        let mut guard = self.slot(account).lock_owned().await;
        self.seed(account, &mut guard).await?;
        Ok(self.lease(account, sequence, guard))
    }

    async fn seed(&self, account: &AccountId, slot: &mut AccountSlot) -> LedgerResult<u64> {
        if let Some(next) = slot.next {
            return Ok(next);
        }
        let on_chain = with_deadline(
            self.rpc_timeout,
            "account_sequence",
            self.ledger.account_sequence(account),
        )
        .await?;
        tracing::info!(
            account = %account,
            sequence = on_chain,
            "Seeded account sequence from ledger"
        );
        slot.next = Some(on_chain);
        Ok(on_chain)
    }

    fn lease(
        &self,
        account: &AccountId,
        sequence: u64,
        guard: OwnedMutexGuard<AccountSlot>,
    ) -> SequenceLease {
        SequenceLease {
            account: account.clone(),
            sequence,
            guard,
            ledger: self.ledger.clone(),
            rpc_timeout: self.rpc_timeout,
        }
    }

    /// Next sequence that would be handed out, if seeded.
    pub async fn peek(&self, account: &AccountId) -> Option<u64> {
        let slot = self.slot(account);
        let next = slot.lock().await.next;
        next
    }
}

impl std::fmt::Debug for NonceSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceSequencer")
            .field("accounts", &self.accounts.len())
            .finish()
    }
}

/// A reserved sequence number plus exclusive access to its account.
pub struct SequenceLease {
    account: AccountId,
    sequence: u64,
    guard: OwnedMutexGuard<AccountSlot>,
    ledger: Arc<dyn Ledger>,
    rpc_timeout: Duration,
}

impl SequenceLease {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// Reload the account's sequence from the ledger after a mismatch.
    pub async fn resync(&mut self) -> LedgerResult<u64> {
        let on_chain = with_deadline(
            self.rpc_timeout,
            "account_sequence",
            self.ledger.account_sequence(&self.account),
        )
        .await?;
        tracing::warn!(
            account = %self.account,
            local = self.sequence,
            on_chain = on_chain,
            "Sequence mismatch, resynchronized from ledger"
        );
        metrics::record_sequence_resync();
        self.guard.next = Some(on_chain);
        self.sequence = on_chain;
        Ok(on_chain)
    }

    /// Consume the sequence number. Call only after the ledger accepted the transaction.
    ///
    /// The counter never moves backwards.
    pub fn commit(mut self) -> u64 {
        let after = self.sequence + 1;
        self.guard.next = Some(self.guard.next.map_or(after, |next| next.max(after)));
        self.sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::mock::MockLedger;
    use crate::relay::ports::{LedgerError, LedgerStatus};
    use crate::relay::types::{SignedTransaction, TxId};
    use async_trait::async_trait;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn account() -> AccountId {
        AccountId("0xadmin".to_string())
    }

    #[tokio::test]
    async fn test_seeds_from_ledger_and_increments() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_account_sequence(&account(), 41);
        let sequencer = NonceSequencer::new(ledger, TIMEOUT);

        let lease = sequencer.next(&account()).await.unwrap();
        assert_eq!(lease.sequence(), 41);
        assert_eq!(lease.commit(), 41);

        let lease = sequencer.next(&account()).await.unwrap();
        assert_eq!(lease.sequence(), 42);
    }

    #[tokio::test]
    async fn test_uncommitted_lease_does_not_consume() {
        let sequencer = NonceSequencer::new(Arc::new(MockLedger::new()), TIMEOUT);

        let lease = sequencer.next(&account()).await.unwrap();
        assert_eq!(lease.sequence(), 0);
        drop(lease);

        let lease = sequencer.next(&account()).await.unwrap();
        assert_eq!(lease.sequence(), 0);
        lease.commit();
        assert_eq!(sequencer.peek(&account()).await, Some(1));
    }

    #[tokio::test]
    async fn test_resync_adopts_on_chain_sequence() {
        let ledger = Arc::new(MockLedger::new());
        let sequencer = NonceSequencer::new(ledger.clone(), TIMEOUT);

        sequencer.next(&account()).await.unwrap().commit();
        ledger.set_account_sequence(&account(), 10);

        let mut lease = sequencer.next(&account()).await.unwrap();
        assert_eq!(lease.sequence(), 1);
        assert_eq!(lease.resync().await.unwrap(), 10);
        assert_eq!(lease.commit(), 10);
        assert_eq!(sequencer.peek(&account()).await, Some(11));
    }

    #[tokio::test]
    async fn test_concurrent_leases_are_serialized() {
        let sequencer = NonceSequencer::new(Arc::new(MockLedger::new()), TIMEOUT);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let sequencer = sequencer.clone();
            handles.push(tokio::spawn(async move {
                let lease = sequencer.next(&account()).await.unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
                lease.commit()
            }));
        }

        let mut assigned = Vec::new();
        for handle in handles {
            assigned.push(handle.await.unwrap());
        }
        assigned.sort_unstable();
        assert_eq!(assigned, (0..16).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_reclaim_seeds_and_never_moves_backwards() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_account_sequence(&account(), 3);
        let sequencer = NonceSequencer::new(ledger, TIMEOUT);

        // A stored transaction ahead of the chain.
        let lease = sequencer.reclaim(&account(), 4).await.unwrap();
        assert_eq!(lease.sequence(), 4);
        assert_eq!(lease.commit(), 4);
        assert_eq!(sequencer.peek(&account()).await, Some(5));

        // An older one, dropped without commit, leaves the counter alone.
        drop(sequencer.reclaim(&account(), 1).await.unwrap());
        sequencer.reclaim(&account(), 2).await.unwrap().commit();
        assert_eq!(sequencer.peek(&account()).await, Some(5));
    }

    #[tokio::test]
    async fn test_reclaim_unseeded_does_not_consume() {
        let sequencer = NonceSequencer::new(Arc::new(MockLedger::new()), TIMEOUT);

        drop(sequencer.reclaim(&account(), 0).await.unwrap());
        assert_eq!(sequencer.peek(&account()).await, Some(0));
    }

    /// Ledger whose sequence reads never answer.
    struct StalledLedger;

    #[async_trait]
    impl Ledger for StalledLedger {
        async fn broadcast(&self, _tx: &SignedTransaction) -> LedgerResult<TxId> {
            std::future::pending().await
        }

        async fn get_status(&self, _tx_id: &TxId) -> LedgerResult<LedgerStatus> {
            std::future::pending().await
        }

        async fn account_sequence(&self, _account: &AccountId) -> LedgerResult<u64> {
            std::future::pending().await
        }

        async fn gas_price(&self) -> LedgerResult<u128> {
            std::future::pending().await
        }

        async fn is_healthy(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_stalled_ledger_hits_deadline_and_frees_account() {
        let sequencer = NonceSequencer::new(Arc::new(StalledLedger), Duration::from_millis(20));

        let first = tokio::time::timeout(Duration::from_secs(2), sequencer.next(&account()))
            .await
            .expect("sequencer should give up at the RPC deadline");
        assert!(matches!(first, Err(LedgerError::Network(_))));

        // The failed seed released the account lock.
        let second = tokio::time::timeout(Duration::from_secs(2), sequencer.next(&account()))
            .await
            .expect("account lock should be free");
        assert!(second.is_err());
        assert_eq!(sequencer.peek(&account()).await, None);
    }
}
