//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, URLs and value ranges
//! - Check the signing key belongs to the configured admin account
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use alloy::primitives::Address;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::RelayConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check every section; collect all problems.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.api.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "api.bind_address",
            format!("'{}' is not a socket address", config.api.bind_address),
        ));
    }
    if config.api.request_timeout_secs < config.confirmation.timeout_secs {
        errors.push(ValidationError::new(
            "api.request_timeout_secs",
            "must be at least confirmation.timeout_secs",
        ));
    }

    let ledger = &config.ledger;
    if ledger.rpc_url.parse::<url::Url>().is_err() {
        errors.push(ValidationError::new(
            "ledger.rpc_url",
            format!("'{}' is not a URL", ledger.rpc_url),
        ));
    }
    for failover in &ledger.failover_urls {
        if failover.parse::<url::Url>().is_err() {
            errors.push(ValidationError::new(
                "ledger.failover_urls",
                format!("'{}' is not a URL", failover),
            ));
        }
    }
    if ledger.rpc_timeout_secs == 0 {
        errors.push(ValidationError::new("ledger.rpc_timeout_secs", "must be > 0"));
    }
    if !(ledger.gas_price_multiplier >= 1.0) {
        errors.push(ValidationError::new("ledger.gas_price_multiplier", "must be >= 1.0"));
    }
    if ledger.max_gas_price_gwei == 0 {
        errors.push(ValidationError::new("ledger.max_gas_price_gwei", "must be > 0"));
    }
    if ledger.gas_limit < 21_000 {
        errors.push(ValidationError::new("ledger.gas_limit", "must be >= 21000"));
    }

    check_address(&mut errors, "relay.admin_address", &config.relay.admin_address);
    check_address(&mut errors, "relay.contract_address", &config.relay.contract_address);

    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be >= 1"));
    }
    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }

    if config.confirmation.poll_interval_ms == 0 {
        errors.push(ValidationError::new("confirmation.poll_interval_ms", "must be > 0"));
    }
    if config.confirmation.timeout_secs == 0 {
        errors.push(ValidationError::new("confirmation.timeout_secs", "must be > 0"));
    }

    if config.claims.prune_interval_secs == 0 {
        errors.push(ValidationError::new("claims.prune_interval_secs", "must be > 0"));
    }

    let obs = &config.observability;
    if !LOG_LEVELS.contains(&obs.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("'{}' is not one of {:?}", obs.log_level, LOG_LEVELS),
        ));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.trim().is_empty() {
        errors.push(ValidationError::new(field, "is required"));
    } else if value.parse::<Address>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("'{}' is not an address", value),
        ));
    }
}

/// The loaded signing key must belong to the configured admin account.
pub fn validate_signer(config: &RelayConfig, signer: Address) -> Result<(), ValidationError> {
    let admin: Address = config.relay.admin_address.parse().map_err(|_| {
        ValidationError::new("relay.admin_address", "is not an address")
    })?;
    if admin != signer {
        return Err(ValidationError::new(
            "relay.admin_address",
            format!("{} does not match the signing key's address {}", admin, signer),
        ));
    }
    Ok(())
}
