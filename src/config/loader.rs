//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::RelayConfig;
use crate::config::validation::{validate_config, ValidationError};

pub const RPC_URL_ENV_VAR: &str = "RELAY_RPC_URL";
pub const ADMIN_ADDRESS_ENV_VAR: &str = "RELAY_ADMIN_ADDRESS";
pub const CONTRACT_ADDRESS_ENV_VAR: &str = "RELAY_CONTRACT_ADDRESS";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, apply environment overrides, and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<RelayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse TOML text, apply environment overrides, and validate.
pub fn parse_config(content: &str) -> Result<RelayConfig, ConfigError> {
    let mut config: RelayConfig = toml::from_str(content)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Override deployment-specific settings from the environment.
///
/// `lookup` abstracts `std::env::var` so tests do not mutate the process environment.
pub fn apply_env_overrides<F>(config: &mut RelayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(url) = non_empty(RPC_URL_ENV_VAR) {
        config.ledger.rpc_url = url;
    }
    if let Some(admin) = non_empty(ADMIN_ADDRESS_ENV_VAR) {
        config.relay.admin_address = admin;
    }
    if let Some(contract) = non_empty(CONTRACT_ADDRESS_ENV_VAR) {
        config.relay.contract_address = contract;
    }
}
