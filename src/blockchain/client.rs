//! Blockchain RPC client with timeout and failover.
//!
//! # Responsibilities
//! - Connect to the primary JSON-RPC endpoint plus failovers
//! - Query chain state (block number, nonces, receipts, gas price)
//! - Broadcast raw signed transactions
//! - Bound every call with the RPC timeout
//!
//! Transport failures and timeouts move on to the next provider. A JSON-RPC
//! error response is the node's answer and is returned as-is.

use alloy::eips::BlockId;
use alloy::primitives::{Address, TxHash};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Transaction, TransactionReceipt};
use alloy::transports::TransportResult;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::blockchain::types::{BlockchainError, BlockchainResult, ChainId};
use crate::config::schema::LedgerConfig;

type DynProvider = Arc<dyn Provider + Send + Sync>;

/// Blockchain RPC client wrapper with failover support.
#[derive(Clone)]
pub struct BlockchainClient {
    /// List of providers (primary + failovers).
    providers: Vec<DynProvider>,
    config: LedgerConfig,
    timeout_duration: Duration,
}

impl BlockchainClient {
    /// Create a new blockchain client.
    ///
    /// Fails only on an unparseable primary URL; an unreachable node is
    /// logged and tolerated so the relay can start while the RPC recovers.
    pub async fn new(config: LedgerConfig) -> BlockchainResult<Self> {
        let timeout_duration = Duration::from_secs(config.rpc_timeout_secs);
        let mut providers = Vec::new();

        let primary_url: url::Url = config.rpc_url.parse().map_err(|e| {
            BlockchainError::Rpc(format!("Invalid RPC URL '{}': {}", config.rpc_url, e))
        })?;
        providers.push(Arc::new(ProviderBuilder::new().connect_http(primary_url)) as DynProvider);

        for url_str in &config.failover_urls {
            match url_str.parse::<url::Url>() {
                Ok(url) => {
                    providers.push(Arc::new(ProviderBuilder::new().connect_http(url)) as DynProvider)
                }
                Err(_) => tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL"),
            }
        }

        let client = Self {
            providers,
            config: config.clone(),
            timeout_duration,
        };

        match client.verify_chain_id().await {
            Ok(()) => {
                tracing::info!(
                    rpc_url = %config.rpc_url,
                    chain_id = config.chain_id,
                    failovers = client.providers.len() - 1,
                    "Blockchain client initialized"
                );
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Blockchain client initialized but chain verification failed"
                );
            }
        }

        Ok(client)
    }

    /// Run `op` against each provider in order until one answers.
    async fn call<T, F, Fut>(&self, operation: &str, op: F) -> BlockchainResult<T>
    where
        F: Fn(DynProvider) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.timeout_duration, op(provider.clone())).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => {
                    if let Some(resp) = e.as_error_resp() {
                        return Err(BlockchainError::from_node_message(resp.code, &resp.message));
                    }
                    tracing::warn!(
                        provider_idx = i,
                        operation = operation,
                        error = %e,
                        "RPC error, trying next provider"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        provider_idx = i,
                        operation = operation,
                        timeout_secs = self.config.rpc_timeout_secs,
                        "RPC timeout, trying next provider"
                    );
                }
            }
        }
        Err(BlockchainError::Rpc(format!(
            "All RPC providers failed ({})",
            operation
        )))
    }

    /// Verify the connected chain ID matches configuration.
    pub async fn verify_chain_id(&self) -> BlockchainResult<()> {
        let chain_id = self.get_chain_id().await?;
        if chain_id.0 != self.config.chain_id {
            return Err(BlockchainError::ChainMismatch {
                expected: self.config.chain_id,
                actual: chain_id.0,
            });
        }
        Ok(())
    }

    pub async fn get_chain_id(&self) -> BlockchainResult<ChainId> {
        self.call("eth_chainId", |p| async move { p.get_chain_id().await })
            .await
            .map(ChainId)
    }

    pub async fn get_block_number(&self) -> BlockchainResult<u64> {
        self.call("eth_blockNumber", |p| async move { p.get_block_number().await })
            .await
    }

    /// Next nonce for `address`, counting transactions still in the mempool.
    pub async fn get_pending_transaction_count(&self, address: Address) -> BlockchainResult<u64> {
        self.call("eth_getTransactionCount", |p| async move {
            p.get_transaction_count(address)
                .block_id(BlockId::pending())
                .await
        })
        .await
    }

    pub async fn get_transaction_receipt(
        &self,
        tx_hash: TxHash,
    ) -> BlockchainResult<Option<TransactionReceipt>> {
        self.call("eth_getTransactionReceipt", |p| async move {
            p.get_transaction_receipt(tx_hash).await
        })
        .await
    }

    pub async fn get_transaction_by_hash(
        &self,
        tx_hash: TxHash,
    ) -> BlockchainResult<Option<Transaction>> {
        self.call("eth_getTransactionByHash", |p| async move {
            p.get_transaction_by_hash(tx_hash).await
        })
        .await
    }

    /// Current gas price in wei.
    pub async fn get_gas_price(&self) -> BlockchainResult<u128> {
        self.call("eth_gasPrice", |p| async move { p.get_gas_price().await })
            .await
    }

    /// Broadcast EIP-2718 encoded bytes. Returns the hash the node reports.
    pub async fn send_raw_transaction(&self, raw: &[u8]) -> BlockchainResult<TxHash> {
        let raw = raw.to_vec();
        self.call("eth_sendRawTransaction", |p| {
            let raw = raw.clone();
            async move {
                p.send_raw_transaction(&raw)
                    .await
                    .map(|pending| *pending.tx_hash())
            }
        })
        .await
    }

    /// Reachable if any provider returns the block number.
    pub async fn is_healthy(&self) -> bool {
        self.get_block_number().await.is_ok()
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Confirmations required on top of the inclusion block.
    pub fn confirmation_blocks(&self) -> u32 {
        self.config.confirmation_blocks
    }
}

impl std::fmt::Debug for BlockchainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockchainClient")
            .field("rpc_url", &self.config.rpc_url)
            .field("chain_id", &self.config.chain_id)
            .field("providers", &self.providers.len())
            .field("timeout_secs", &self.config.rpc_timeout_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LedgerConfig {
        LedgerConfig {
            rpc_url: "http://127.0.0.1:1".to_string(),
            rpc_timeout_secs: 1,
            ..LedgerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_client_creation_tolerates_unreachable_node() {
        let result = BlockchainClient::new(test_config()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_primary_url_is_rejected() {
        let config = LedgerConfig {
            rpc_url: "not a url".to_string(),
            ..test_config()
        };
        let err = BlockchainClient::new(config).await.unwrap_err();
        assert!(err.to_string().contains("Invalid RPC URL"));
    }

    #[tokio::test]
    async fn test_rpc_failover_exhausts_all_providers() {
        let mut config = test_config();
        config.failover_urls.push("http://127.0.0.1:2".to_string());
        config.failover_urls.push("::invalid::".to_string());

        let client = BlockchainClient::new(config).await.unwrap();
        assert_eq!(client.providers.len(), 2);

        let result = client.get_block_number().await;
        assert!(result.unwrap_err().to_string().contains("All RPC providers failed"));
        assert!(!client.is_healthy().await);
    }
}
