//! Concurrency tests: duplicate suppression and sequence ordering under load.

use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tx_relay::relay::mock::{MockLedger, MockSigner};
use tx_relay::relay::TransactionIntent;

mod common;

fn slow_ledger() -> Arc<MockLedger> {
    Arc::new(MockLedger::new().with_broadcast_delay(Duration::from_millis(20)))
}

#[tokio::test]
async fn test_concurrent_duplicates_broadcast_once() {
    let ledger = slow_ledger();
    let signer = Arc::new(MockSigner::new(common::ADMIN));
    let pipeline = common::pipeline(ledger.clone(), signer.clone());

    let calls = (0..16).map(|_| {
        let pipeline = pipeline.clone();
        async move { pipeline.submit_and_confirm(common::sponsored("dup-key")).await }
    });
    let receipts: Vec<_> = join_all(calls).await.into_iter().map(|r| r.unwrap()).collect();

    assert_eq!(ledger.broadcast_attempts(), 1);
    assert_eq!(signer.signatures(), 1);
    assert!(receipts.iter().all(|r| r == &receipts[0]), "Every caller sees the same receipt");
    assert!(receipts[0].finalized);
}

#[tokio::test]
async fn test_concurrent_reward_claims_share_tx_id() {
    let ledger = slow_ledger();
    let pipeline = common::pipeline(ledger.clone(), Arc::new(MockSigner::new(common::ADMIN)));

    let claim = || TransactionIntent::reward_claim("session-42", "player-A", 100);
    let (a, b) = tokio::join!(
        pipeline.submit_and_confirm(claim()),
        pipeline.submit_and_confirm(claim())
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.idempotency_key, "session-42:player-A");
    assert!(a.tx_id.is_some());
    assert_eq!(a.tx_id, b.tx_id);
    assert_eq!(ledger.accepted().len(), 1);
    assert_eq!(&ledger.accepted()[0].intent.payload[..], b"100");
}

#[tokio::test]
async fn test_concurrent_distinct_keys_get_gap_free_sequences() {
    let ledger = Arc::new(MockLedger::new().with_broadcast_delay(Duration::from_millis(2)));
    let pipeline = common::pipeline(ledger.clone(), Arc::new(MockSigner::new(common::ADMIN)));

    let calls = (0..25).map(|i| {
        let pipeline = pipeline.clone();
        async move { pipeline.submit_and_confirm(common::sponsored(&format!("key-{}", i))).await }
    });
    let receipts: Vec<_> = join_all(calls).await.into_iter().map(|r| r.unwrap()).collect();

    assert!(receipts.iter().all(|r| r.finalized));
    let mut sequences: Vec<u64> = receipts.iter().filter_map(|r| r.sequence).collect();
    sequences.sort_unstable();
    assert_eq!(sequences, (0..25).collect::<Vec<u64>>());

    // Acceptance order on the ledger is the sequence order.
    let accepted: Vec<u64> = ledger.accepted().iter().map(|tx| tx.sequence).collect();
    assert_eq!(accepted, (0..25).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_mixed_load_with_repeated_keys() {
    let ledger = Arc::new(MockLedger::new().with_broadcast_delay(Duration::from_millis(1)));
    let signer = Arc::new(MockSigner::new(common::ADMIN));
    let pipeline = common::pipeline(ledger.clone(), signer.clone());

    let calls = (0..60).map(|i| {
        let pipeline = pipeline.clone();
        async move { pipeline.submit_and_confirm(common::sponsored(&format!("k-{}", i % 20))).await }
    });
    let receipts: Vec<_> = join_all(calls).await.into_iter().map(|r| r.unwrap()).collect();

    let tx_ids: HashSet<_> = receipts.iter().filter_map(|r| r.tx_id.clone()).collect();
    assert_eq!(tx_ids.len(), 20);
    assert_eq!(ledger.accepted().len(), 20);
    assert_eq!(signer.signatures(), 20);
    assert_eq!(pipeline.claims().len(), 20);
}
