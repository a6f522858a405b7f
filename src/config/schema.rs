//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// HTTP API settings.
    pub api: ApiConfig,

    /// Ledger RPC settings.
    pub ledger: LedgerConfig,

    /// Operator account and relay contract.
    pub relay: RelayAccountConfig,

    /// Broadcast retry configuration.
    pub retries: RetryConfig,

    /// Confirmation tracking settings.
    pub confirmation: ConfirmationConfig,

    /// Claim idempotency store settings.
    pub claims: ClaimsConfig,

    pub sequencer: SequencerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// HTTP API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Per-request timeout in seconds. Must cover the confirmation timeout.
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 180,
        }
    }
}

/// Ledger (JSON-RPC) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoint URLs.
    #[serde(default)]
    pub failover_urls: Vec<String>,

    /// Chain ID used for EIP-155 signatures.
    pub chain_id: u64,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// Number of block confirmations required for finality.
    pub confirmation_blocks: u32,

    /// Gas price multiplier (1.0 = estimated, 1.2 = 20% buffer).
    pub gas_price_multiplier: f64,

    /// Maximum gas price in gwei (protection against spikes).
    pub max_gas_price_gwei: u64,

    /// Gas limit for relay contract calls.
    pub gas_limit: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            failover_urls: Vec::new(),
            chain_id: 9000,
            rpc_timeout_secs: 10,
            confirmation_blocks: 3,
            gas_price_multiplier: 1.2,
            max_gas_price_gwei: 500,
            gas_limit: 300_000,
        }
    }
}

/// Operator account and relay contract addresses.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayAccountConfig {
    /// Address of the signing (admin) account. Must match the configured key.
    pub admin_address: String,

    /// Address of the relay contract that receives calls.
    pub contract_address: String,
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total broadcast attempts, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 200,
            max_delay_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Status polling interval in milliseconds.
    pub poll_interval_ms: u64,

    /// How long to wait for finality before issuing an ambiguous receipt, in seconds.
    pub timeout_secs: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            timeout_secs: 120,
        }
    }
}

/// Claim idempotency store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClaimsConfig {
    /// JSON file the store persists to. Empty keeps claims in memory only.
    pub store_path: String,

    /// How long completed records are kept, in seconds.
    pub retention_secs: u64,

    /// Pruning interval in seconds.
    pub prune_interval_secs: u64,
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self {
            store_path: "claims.json".to_string(),
            retention_secs: 7 * 24 * 3600,
            prune_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Resyncs allowed per submission before a mismatch becomes a rejection.
    pub max_resyncs: u32,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self { max_resyncs: 3 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
