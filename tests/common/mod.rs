//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tx_relay::relay::mock::{MockLedger, MockSigner};
use tx_relay::relay::{ClaimStore, IntentKind, PipelineSettings, TransactionIntent, TransactionPipeline};
use tx_relay::resilience::RetryPolicy;

pub const ADMIN: &str = "0xadmin";

/// Settings with millisecond delays so failure scenarios finish quickly.
pub fn fast_settings(max_attempts: u32) -> PipelineSettings {
    PipelineSettings {
        retry: RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(10)),
        rpc_timeout: Duration::from_secs(1),
        poll_interval: Duration::from_millis(5),
        confirmation_timeout: Duration::from_millis(300),
        max_resyncs: 3,
    }
}

/// A pipeline wired to the given mocks and an in-memory claim store.
pub fn pipeline(ledger: Arc<MockLedger>, signer: Arc<MockSigner>) -> TransactionPipeline {
    pipeline_with(ledger, signer, ClaimStore::default(), fast_settings(5))
}

pub fn pipeline_with(
    ledger: Arc<MockLedger>,
    signer: Arc<MockSigner>,
    claims: ClaimStore,
    settings: PipelineSettings,
) -> TransactionPipeline {
    TransactionPipeline::new(signer, ledger, claims, settings)
}

pub fn mocks() -> (Arc<MockLedger>, Arc<MockSigner>) {
    (Arc::new(MockLedger::new()), Arc::new(MockSigner::new(ADMIN)))
}

pub fn sponsored(key: &str) -> TransactionIntent {
    TransactionIntent::new(IntentKind::SponsoredCall, key, key.as_bytes().to_vec())
}
