//! EVM implementation of the relay's [`Ledger`] port.
//!
//! # Finality
//! A transaction is final once `confirmation_blocks` blocks sit on top of its
//! inclusion block. A receipt with a failed status is a revert. A hash the node
//! only knows from its mempool is pending; an unknown hash is `Unknown`.
//!
//! # Gas
//! The node's gas price is multiplied by `gas_price_multiplier`. Quotes above
//! `max_gas_price_gwei` are refused before anything is signed.

use alloy::primitives::{Address, TxHash};
use async_trait::async_trait;
use std::str::FromStr;

use crate::blockchain::client::BlockchainClient;
use crate::blockchain::types::{BlockchainError, BlockchainResult};
use crate::observability::metrics;
use crate::relay::ports::{Ledger, LedgerError, LedgerResult, LedgerStatus};
use crate::relay::types::{AccountId, SignedTransaction, TxId};

const WEI_PER_GWEI: u128 = 1_000_000_000;

#[derive(Debug, Clone)]
pub struct EvmLedger {
    client: BlockchainClient,
}

impl EvmLedger {
    pub fn new(client: BlockchainClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &BlockchainClient {
        &self.client
    }

    /// Apply the configured multiplier and cap to a quoted gas price.
    /// Apply the multiplier, then enforce the cap on what will actually be paid.
    fn adjust_gas_price(&self, quoted: u128) -> BlockchainResult<u128> {
        let config = self.client.config();
        let adjusted = (quoted as f64 * config.gas_price_multiplier) as u128;
        let adjusted_gwei = adjusted / WEI_PER_GWEI;
        if adjusted_gwei > u128::from(config.max_gas_price_gwei) {
            return Err(BlockchainError::GasPriceTooHigh {
                current_gwei: adjusted_gwei as u64,
                max_gwei: config.max_gas_price_gwei,
            });
        }
        Ok(adjusted)
    }

    async fn status(&self, hash: TxHash) -> BlockchainResult<LedgerStatus> {
        let Some(receipt) = self.client.get_transaction_receipt(hash).await? else {
            let in_mempool = self.client.get_transaction_by_hash(hash).await?.is_some();
            return Ok(if in_mempool {
                LedgerStatus::Pending { confirmations: 0 }
            } else {
                LedgerStatus::Unknown
            });
        };

        if !receipt.status() {
            return Ok(LedgerStatus::Reverted {
                block_number: receipt.block_number,
                reason: "execution reverted".to_string(),
            });
        }

        let Some(tx_block) = receipt.block_number else {
            return Ok(LedgerStatus::Pending { confirmations: 0 });
        };
        let current_block = self.client.get_block_number().await?;
        let confirmations = current_block.saturating_sub(tx_block);

        if confirmations >= u64::from(self.client.confirmation_blocks()) {
            Ok(LedgerStatus::Finalized {
                block_number: tx_block,
            })
        } else {
            tracing::debug!(
                tx_hash = %hash,
                confirmations = confirmations,
                required = self.client.confirmation_blocks(),
                "Waiting for confirmations"
            );
            Ok(LedgerStatus::Pending { confirmations })
        }
    }
}

fn parse_hash(tx_id: &TxId) -> LedgerResult<TxHash> {
    TxHash::from_str(&tx_id.0).map_err(|_| {
        BlockchainError::InvalidInput {
            kind: "transaction hash",
            value: tx_id.0.clone(),
        }
        .into()
    })
}

fn parse_address(account: &AccountId) -> LedgerResult<Address> {
    Address::from_str(&account.0).map_err(|_| {
        BlockchainError::InvalidInput {
            kind: "address",
            value: account.0.clone(),
        }
        .into()
    })
}

#[async_trait]
impl Ledger for EvmLedger {
    async fn broadcast(&self, tx: &SignedTransaction) -> LedgerResult<TxId> {
        match self.client.send_raw_transaction(&tx.raw).await {
            Ok(hash) => Ok(TxId(hash.to_string())),
            Err(e) if e.is_already_known() => {
                tracing::debug!(tx_id = %tx.tx_id, "Node already holds transaction");
                Ok(tx.tx_id.clone())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_status(&self, tx_id: &TxId) -> LedgerResult<LedgerStatus> {
        let hash = parse_hash(tx_id)?;
        self.status(hash).await.map_err(LedgerError::from)
    }

    async fn account_sequence(&self, account: &AccountId) -> LedgerResult<u64> {
        let address = parse_address(account)?;
        Ok(self.client.get_pending_transaction_count(address).await?)
    }

    async fn gas_price(&self) -> LedgerResult<u128> {
        let quoted = self.client.get_gas_price().await?;
        Ok(self.adjust_gas_price(quoted)?)
    }

    async fn is_healthy(&self) -> bool {
        let healthy = self.client.is_healthy().await;
        metrics::record_ledger_health(healthy);
        healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LedgerConfig;

    async fn ledger(multiplier: f64, max_gwei: u64) -> EvmLedger {
        let config = LedgerConfig {
            rpc_url: "http://127.0.0.1:1".to_string(),
            rpc_timeout_secs: 1,
            gas_price_multiplier: multiplier,
            max_gas_price_gwei: max_gwei,
            ..LedgerConfig::default()
        };
        EvmLedger::new(BlockchainClient::new(config).await.unwrap())
    }

    #[tokio::test]
    async fn test_gas_price_multiplier_and_cap() {
        let ledger = ledger(1.5, 100).await;
        assert_eq!(ledger.adjust_gas_price(10 * WEI_PER_GWEI).unwrap(), 15 * WEI_PER_GWEI);

        let err = ledger.adjust_gas_price(150 * WEI_PER_GWEI).unwrap_err();
        assert!(matches!(
            err,
            BlockchainError::GasPriceTooHigh { current_gwei: 225, max_gwei: 100 }
        ));
        assert!(matches!(LedgerError::from(err), LedgerError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_gas_cap_applies_after_multiplier() {
        let ledger = ledger(1.5, 500).await;
        // 400 gwei quoted is under the cap, but 600 gwei would be paid.
        let err = ledger.adjust_gas_price(400 * WEI_PER_GWEI).unwrap_err();
        assert!(matches!(
            err,
            BlockchainError::GasPriceTooHigh { current_gwei: 600, max_gwei: 500 }
        ));

        let ok = ledger.adjust_gas_price(300 * WEI_PER_GWEI).unwrap();
        assert_eq!(ok, 450 * WEI_PER_GWEI);
    }

    #[tokio::test]
    async fn test_malformed_ids_are_rejected() {
        let ledger = ledger(1.0, 100).await;
        let err = ledger.get_status(&TxId("0xnothex".to_string())).await.unwrap_err();
        assert!(matches!(err, LedgerError::Rejected(_)));

        let err = ledger
            .account_sequence(&AccountId("admin".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_unreachable_node_is_network_error() {
        let ledger = ledger(1.0, 100).await;
        let err = ledger.gas_price().await.unwrap_err();
        assert!(matches!(err, LedgerError::Network(_)));
        assert!(!ledger.is_healthy().await);
    }
}
