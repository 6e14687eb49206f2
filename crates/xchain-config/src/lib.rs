//! Configuration module for the xchain intent client.
//!
//! This module provides structures and utilities for managing client configuration.
//! It supports loading configuration from TOML files and provides validation to ensure
//! all required configuration values are properly set.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files for better organization:
//! - Use `include = ["file1.toml", "file2.toml"]` to include other config files
//! - Each top-level section must be unique across all files (no duplicates allowed)

mod loader;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use xchain_types::{networks::deserialize_networks, Address, NetworksConfig};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message, drop the echoed input
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the client.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Identity of this client instance.
	pub client: ClientConfig,
	/// Chains the client may submit to.
	#[serde(deserialize_with = "deserialize_networks")]
	pub networks: NetworksConfig,
	/// Signer selection.
	pub account: AccountConfig,
	/// Settler selection, retry and timeout bounds.
	pub settlement: SettlementConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
	/// Identifier used in logs.
	pub id: String,
}

/// Configuration for account management.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of account implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for settlement.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SettlementConfig {
	/// Which settler implementation to use.
	pub primary: String,
	/// Map of settler implementation names to their raw configurations.
	pub implementations: HashMap<String, toml::Value>,
	/// Retries after the first attempt of a submission.
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,
	#[serde(default = "default_initial_backoff_ms")]
	pub initial_backoff_ms: u64,
	#[serde(default = "default_max_backoff_ms")]
	pub max_backoff_ms: u64,
	/// Bound on each connection attempt.
	#[serde(default = "default_connect_timeout_seconds")]
	pub connect_timeout_seconds: u64,
	/// Bound on a whole submission, retries included.
	#[serde(default = "default_submission_timeout_seconds")]
	pub submission_timeout_seconds: u64,
	/// Fill deadline of submitted orders, relative to submission time.
	#[serde(default = "default_fill_deadline_seconds")]
	pub fill_deadline_seconds: u64,
}

fn default_max_retries() -> u32 {
	3
}

fn default_initial_backoff_ms() -> u64 {
	250
}

fn default_max_backoff_ms() -> u64 {
	5_000
}

fn default_connect_timeout_seconds() -> u64 {
	10
}

fn default_submission_timeout_seconds() -> u64 {
	120
}

fn default_fill_deadline_seconds() -> u64 {
	3_600
}

impl SettlementConfig {
	pub fn initial_backoff(&self) -> Duration {
		Duration::from_millis(self.initial_backoff_ms)
	}

	pub fn max_backoff(&self) -> Duration {
		Duration::from_millis(self.max_backoff_ms)
	}

	pub fn connect_timeout(&self) -> Duration {
		Duration::from_secs(self.connect_timeout_seconds)
	}

	pub fn submission_timeout(&self) -> Duration {
		Duration::from_secs(self.submission_timeout_seconds)
	}

	pub fn fill_deadline(&self) -> Duration {
		Duration::from_secs(self.fill_deadline_seconds)
	}

	/// Raw configuration of the primary settler.
	pub fn primary_config(&self) -> Option<&toml::Value> {
		self.implementations.get(&self.primary)
	}
}

impl AccountConfig {
	/// Raw configuration of the primary account.
	pub fn primary_config(&self) -> Option<&toml::Value> {
		self.implementations.get(&self.primary)
	}
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB to prevent ReDoS attacks.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last = 0;

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match std::env::var(var_name.as_str()) {
			Ok(v) => v,
			Err(_) => match cap.get(2) {
				Some(default) => default.as_str().to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name.as_str()
					)))
				},
			},
		};

		result.push_str(&input[last..full_match.start()]);
		result.push_str(&value);
		last = full_match.end();
	}
	result.push_str(&input[last..]);

	Ok(result)
}

fn has_supported_scheme(url: &str) -> bool {
	["http://", "https://", "ws://", "wss://"]
		.iter()
		.any(|scheme| url.starts_with(scheme))
}

impl Config {
	/// Loads configuration from a file with async environment variable resolution.
	///
	/// This method supports modular configuration through include directives:
	/// - `include = ["file1.toml", "file2.toml"]` - Include specific files
	///
	/// Each top-level section must be unique across all configuration files.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	/// Validates the configuration to ensure all required fields are properly set.
	///
	/// - Ensures the client ID is not empty
	/// - Checks every network's endpoint and contract addresses
	/// - Verifies the primary account and settler are configured
	/// - Checks retry and timeout bounds
	/// - Ensures settler implementations only reference configured networks
	fn validate(&self) -> Result<(), ConfigError> {
		if self.client.id.is_empty() {
			return Err(ConfigError::Validation("Client ID cannot be empty".into()));
		}

		if self.networks.is_empty() {
			return Err(ConfigError::Validation(
				"Networks configuration cannot be empty".into(),
			));
		}
		for (chain_id, network) in &self.networks {
			if !has_supported_scheme(&network.rpc_url) {
				return Err(ConfigError::Validation(format!(
					"Network {} rpc_url must start with http(s):// or ws(s)://",
					chain_id
				)));
			}
			if network.origin_settler_address == Address::ZERO {
				return Err(ConfigError::Validation(format!(
					"Network {} must have a non-zero origin_settler_address",
					chain_id
				)));
			}
			if network.delegate_address == Some(Address::ZERO) {
				return Err(ConfigError::Validation(format!(
					"Network {} delegate_address cannot be the zero address",
					chain_id
				)));
			}
		}

		if self.account.primary_config().is_none() {
			return Err(ConfigError::Validation(format!(
				"Primary account '{}' not found in implementations",
				self.account.primary
			)));
		}

		if self.settlement.primary_config().is_none() {
			return Err(ConfigError::Validation(format!(
				"Primary settlement '{}' not found in implementations",
				self.settlement.primary
			)));
		}
		if self.settlement.initial_backoff_ms == 0 {
			return Err(ConfigError::Validation(
				"initial_backoff_ms must be greater than 0".into(),
			));
		}
		if self.settlement.max_backoff_ms < self.settlement.initial_backoff_ms {
			return Err(ConfigError::Validation(
				"max_backoff_ms cannot be less than initial_backoff_ms".into(),
			));
		}
		if self.settlement.connect_timeout_seconds == 0
			|| self.settlement.submission_timeout_seconds == 0
		{
			return Err(ConfigError::Validation(
				"Settlement timeouts must be greater than 0".into(),
			));
		}
		if self.settlement.fill_deadline_seconds == 0 {
			return Err(ConfigError::Validation(
				"fill_deadline_seconds must be greater than 0".into(),
			));
		}

		self.validate_settlement_networks()
	}

	/// Checks that every settler implementation names networks that exist.
	fn validate_settlement_networks(&self) -> Result<(), ConfigError> {
		for (impl_name, impl_config) in &self.settlement.implementations {
			let network_ids = impl_config
				.get("network_ids")
				.and_then(|v| v.as_array())
				.ok_or_else(|| {
					ConfigError::Validation(format!(
						"Settlement implementation '{}' missing 'network_ids' field",
						impl_name
					))
				})?;

			for network_value in network_ids {
				let network_id = network_value
					.as_integer()
					.and_then(|id| u64::try_from(id).ok())
					.ok_or_else(|| {
						ConfigError::Validation(format!(
							"Invalid network_id in settlement '{}'",
							impl_name
						))
					})?;

				if !self.networks.contains_key(&network_id) {
					return Err(ConfigError::Validation(format!(
						"Settlement '{}' references network {} which doesn't exist in networks config",
						impl_name, network_id
					)));
				}
			}
		}

		Ok(())
	}
}

/// Parses a TOML string, resolving environment variables and validating the result.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const BASE: &str = r#"
[client]
id = "${TEST_CLIENT_ID:-xchain-client}"

[networks.31337]
rpc_url = "ws://127.0.0.1:8545"
origin_settler_address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
delegate_address = "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512"

[account]
primary = "local"
[account.implementations.local]
private_key = "${TEST_PRIVATE_KEY:-0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80}"

[settlement]
primary = "evm_alloy"
max_retries = 5
[settlement.implementations.evm_alloy]
network_ids = [31337]
"#;

	#[test]
	fn test_env_var_resolution() {
		std::env::set_var("TEST_HOST", "localhost");
		std::env::set_var("TEST_PORT", "5432");

		let input = "host = \"${TEST_HOST}:${TEST_PORT}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "host = \"localhost:5432\"");

		std::env::remove_var("TEST_HOST");
		std::env::remove_var("TEST_PORT");
	}

	#[test]
	fn test_env_var_with_default() {
		let input = "value = \"${MISSING_VAR:-default_value}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "value = \"default_value\"");
	}

	#[test]
	fn test_missing_env_var_error() {
		let input = "value = \"${MISSING_VAR}\"";
		let result = resolve_env_vars(input);
		assert!(result.is_err());
		assert!(result.unwrap_err().to_string().contains("MISSING_VAR"));
	}

	#[test]
	fn test_defaults_applied() {
		let config: Config = BASE.parse().unwrap();
		assert_eq!(config.client.id, "xchain-client");
		assert_eq!(config.settlement.max_retries, 5);
		assert_eq!(config.settlement.initial_backoff(), Duration::from_millis(250));
		assert_eq!(config.settlement.submission_timeout(), Duration::from_secs(120));
		assert_eq!(
			config.networks[&31337].delegate_address,
			Some("0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512".parse().unwrap())
		);
		assert!(config.account.primary_config().is_some());
	}

	#[test]
	fn test_unknown_primary_settler_rejected() {
		let config_str = BASE.replace("primary = \"evm_alloy\"", "primary = \"missing\"");
		let err = Config::from_str(&config_str).unwrap_err();
		assert!(err.to_string().contains("Primary settlement 'missing'"));
	}

	#[test]
	fn test_settlement_references_invalid_network() {
		let config_str = BASE.replace("network_ids = [31337]", "network_ids = [31337, 999]");
		let err = Config::from_str(&config_str).unwrap_err();
		assert!(err
			.to_string()
			.contains("references network 999 which doesn't exist"));
	}

	#[test]
	fn test_unsupported_rpc_scheme_rejected() {
		let config_str = BASE.replace("ws://127.0.0.1:8545", "ipc:///tmp/node.ipc");
		let err = Config::from_str(&config_str).unwrap_err();
		assert!(err.to_string().contains("rpc_url"));
	}

	#[test]
	fn test_backoff_bounds_checked() {
		let config_str = BASE.replace(
			"max_retries = 5",
			"max_retries = 5\ninitial_backoff_ms = 1000\nmax_backoff_ms = 10",
		);
		let err = Config::from_str(&config_str).unwrap_err();
		assert!(err.to_string().contains("max_backoff_ms"));
	}

	#[test]
	fn test_zero_settler_address_rejected() {
		let config_str = BASE.replace(
			"0x5FbDB2315678afecb367f032d93F642f64180aa3",
			"0x0000000000000000000000000000000000000000",
		);
		assert!(Config::from_str(&config_str).is_err());
	}
}
