//! Startup orchestration.
//!
//! # Responsibilities
//! - Load the signing key and check it against the configured admin account
//! - Connect the ledger client
//! - Open (and reload) the claim store
//! - Assemble the transaction pipeline
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready); see `main`

use alloy::primitives::Address;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::blockchain::{BlockchainClient, EvmLedger, LocalKeySigner, Wallet};
use crate::config::schema::{ClaimsConfig, RelayConfig};
use crate::config::validation::validate_signer;
use crate::relay::{ClaimStore, RelayError, TransactionPipeline};

/// Open the claim store described by `config`, reloading any persisted records.
pub fn open_claim_store(config: &ClaimsConfig) -> Result<ClaimStore, RelayError> {
    let retention = Duration::from_secs(config.retention_secs);
    if config.store_path.trim().is_empty() {
        tracing::warn!("claims.store_path is empty; claims are kept in memory only");
        return Ok(ClaimStore::new(None, retention));
    }

    let path = PathBuf::from(&config.store_path);
    Ok(ClaimStore::load_from_file(&path, retention)?)
}

/// Build the production pipeline: EVM ledger, local key signer, durable claim store.
pub async fn build_pipeline(config: &RelayConfig) -> Result<TransactionPipeline, RelayError> {
    let wallet = Wallet::from_env(config.ledger.chain_id)
        .map_err(|e| RelayError::Configuration(e.to_string()))?;
    validate_signer(config, wallet.address())
        .map_err(|e| RelayError::Configuration(e.to_string()))?;

    let contract: Address = config.relay.contract_address.parse().map_err(|_| {
        RelayError::Configuration(format!(
            "relay.contract_address '{}' is not an address",
            config.relay.contract_address
        ))
    })?;

    let client = BlockchainClient::new(config.ledger.clone())
        .await
        .map_err(|e| RelayError::Configuration(e.to_string()))?;

    let ledger = Arc::new(EvmLedger::new(client));
    let signer = Arc::new(LocalKeySigner::new(wallet, contract, config.ledger.gas_limit));
    let claims = open_claim_store(&config.claims)?;

    tracing::info!(
        admin = %signer.address(),
        contract = %contract,
        chain_id = config.ledger.chain_id,
        claims = claims.len(),
        "Relay pipeline assembled"
    );

    Ok(TransactionPipeline::from_config(config, signer, ledger, claims))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_store_path_is_memory_only() {
        let config = ClaimsConfig {
            store_path: String::new(),
            ..ClaimsConfig::default()
        };
        let store = open_claim_store(&config).unwrap();
        assert!(store.is_empty());
        assert!(store.save_to_file().is_ok());
    }

    #[test]
    fn test_corrupt_store_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claims.json");
        std::fs::write(&path, b"{not json").unwrap();

        let config = ClaimsConfig {
            store_path: path.to_string_lossy().into_owned(),
            ..ClaimsConfig::default()
        };
        assert!(matches!(open_claim_store(&config), Err(RelayError::Storage(_))));
    }
}
