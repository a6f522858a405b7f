//! Relay contract call encoding and transaction signing.
//!
//! # Responsibilities
//! - ABI-encode each intent kind against the relay contract interface
//! - Build legacy (EIP-155) transactions at the leased nonce and quoted gas price
//! - Sign locally and derive the transaction hash before broadcast

use alloy::eips::eip2718::Encodable2718;
use alloy::network::TransactionBuilder;
use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;

use crate::blockchain::wallet::Wallet;
use crate::relay::ports::{Signer, SigningError};
use crate::relay::types::{
    AccountId, IntentKind, SignedTransaction, TransactionIntent, TxId, UnsignedTransaction,
};

sol! {
    /// Entry points of the on-chain relay contract.
    interface IRelay {
        function commitHash(bytes32 key, bytes payload) external;
        function sponsoredCall(bytes32 key, bytes payload) external;
        function claimReward(bytes32 key, bytes payload) external;
    }
}

/// Contract-side key for an idempotency key.
pub fn contract_key(idempotency_key: &str) -> B256 {
    keccak256(idempotency_key.as_bytes())
}

/// ABI call data for `intent`.
pub fn encode_call(intent: &TransactionIntent) -> Bytes {
    let key = contract_key(&intent.idempotency_key);
    let payload = intent.payload.clone();

    let data = match intent.kind {
        IntentKind::CommitHash => IRelay::commitHashCall { key, payload }.abi_encode(),
        IntentKind::SponsoredCall => IRelay::sponsoredCallCall { key, payload }.abi_encode(),
        IntentKind::RewardClaim => IRelay::claimRewardCall { key, payload }.abi_encode(),
    };
    Bytes::from(data)
}

/// Signs relay contract calls with the operator's local key.
#[derive(Debug, Clone)]
pub struct LocalKeySigner {
    wallet: Wallet,
    account: AccountId,
    contract: Address,
    gas_limit: u64,
}

impl LocalKeySigner {
    pub fn new(wallet: Wallet, contract: Address, gas_limit: u64) -> Self {
        let account = AccountId(wallet.address().to_checksum(None));
        Self {
            wallet,
            account,
            contract,
            gas_limit,
        }
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    fn request(&self, tx: &UnsignedTransaction) -> TransactionRequest {
        TransactionRequest::default()
            .with_from(self.wallet.address())
            .with_to(self.contract)
            .with_value(U256::ZERO)
            .with_input(encode_call(&tx.intent))
            .with_nonce(tx.sequence)
            .with_gas_price(tx.gas_price)
            .with_chain_id(self.wallet.chain_id())
            .with_gas_limit(self.gas_limit)
    }
}

#[async_trait]
impl Signer for LocalKeySigner {
    fn account(&self) -> &AccountId {
        &self.account
    }

    async fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, SigningError> {
        if tx.account != self.account {
            return Err(SigningError(format!(
                "signer holds {} but transaction is for {}",
                self.account, tx.account
            )));
        }

        let envelope = self
            .request(tx)
            .build(&self.wallet.ethereum_wallet())
            .await
            .map_err(|e| SigningError(format!("failed to build transaction: {}", e)))?;

        let tx_id = TxId(envelope.tx_hash().to_string());
        let raw = Bytes::from(envelope.encoded_2718());

        tracing::debug!(
            tx_id = %tx_id,
            nonce = tx.sequence,
            gas_price = tx.gas_price,
            kind = %tx.intent.kind,
            "Transaction signed"
        );

        Ok(SignedTransaction {
            intent: tx.intent.clone(),
            account: tx.account.clone(),
            sequence: tx.sequence,
            tx_id,
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::consensus::{Transaction as _, TxEnvelope};
    use alloy::eips::eip2718::Decodable2718;

    const TEST_PRIVATE_KEY: &str =
        "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

    fn signer() -> LocalKeySigner {
        let wallet = Wallet::from_private_key(TEST_PRIVATE_KEY, 9000).unwrap();
        LocalKeySigner::new(wallet, CONTRACT.parse().unwrap(), 300_000)
    }

    fn unsigned(signer: &LocalKeySigner, sequence: u64) -> UnsignedTransaction {
        UnsignedTransaction {
            intent: TransactionIntent::reward_claim("session-42", "player-A", 100),
            account: signer.account().clone(),
            sequence,
            gas_price: 25_000_000_000,
        }
    }

    #[test]
    fn test_encode_call_selects_function() {
        let intent = TransactionIntent::reward_claim("session-42", "player-A", 100);
        let data = encode_call(&intent);
        assert_eq!(&data[..4], IRelay::claimRewardCall::SELECTOR.as_slice());

        let decoded = IRelay::claimRewardCall::abi_decode(&data).unwrap();
        assert_eq!(decoded.key, contract_key("session-42:player-A"));
        assert_eq!(&decoded.payload[..], b"100");
    }

    #[tokio::test]
    async fn test_signed_bytes_match_request() {
        let signer = signer();
        let signed = signer.sign(&unsigned(&signer, 7)).await.unwrap();

        let mut buf: &[u8] = &signed.raw;
        let envelope = TxEnvelope::decode_2718(&mut buf).unwrap();
        assert_eq!(envelope.tx_hash().to_string(), signed.tx_id.0);
        assert_eq!(envelope.nonce(), 7);
        assert_eq!(envelope.chain_id(), Some(9000));
        assert_eq!(envelope.to(), Some(CONTRACT.parse().unwrap()));
        assert_eq!(envelope.gas_limit(), 300_000);
    }

    #[tokio::test]
    async fn test_same_input_gives_same_tx_id() {
        let signer = signer();
        let a = signer.sign(&unsigned(&signer, 3)).await.unwrap();
        let b = signer.sign(&unsigned(&signer, 3)).await.unwrap();
        let c = signer.sign(&unsigned(&signer, 4)).await.unwrap();
        assert_eq!(a.tx_id, b.tx_id);
        assert_ne!(a.tx_id, c.tx_id);
    }

    #[tokio::test]
    async fn test_rejects_foreign_account() {
        let signer = signer();
        let mut tx = unsigned(&signer, 0);
        tx.account = AccountId("0x0000000000000000000000000000000000000001".to_string());
        assert!(signer.sign(&tx).await.is_err());
    }
}
