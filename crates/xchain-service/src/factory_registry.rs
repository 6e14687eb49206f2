//! Factory registry for signer and settler implementations.
//!
//! Every implementation crate lists its factories; this module collects them
//! once and instantiates the ones named by the configuration.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use xchain_account::{AccountFactory, AccountService};
use xchain_config::Config;
use xchain_settlement::{
	EventBus, OriginSettlerInterface, SettlementClient, SettlerFactory, SubmissionConfig,
};
use xchain_types::SecretString;

/// All known implementations by configuration name.
pub struct FactoryRegistry {
	pub account: HashMap<String, AccountFactory>,
	pub settlement: HashMap<String, SettlerFactory>,
}

impl FactoryRegistry {
	fn new() -> Self {
		Self {
			account: HashMap::new(),
			settlement: HashMap::new(),
		}
	}
}

static REGISTRY: OnceLock<FactoryRegistry> = OnceLock::new();

/// Returns the registry, filling it on first use.
pub fn get_registry() -> &'static FactoryRegistry {
	REGISTRY.get_or_init(|| {
		let mut registry = FactoryRegistry::new();

		for (name, factory) in xchain_account::get_all_implementations() {
			tracing::debug!("Registering account implementation: {}", name);
			registry.account.insert(name.to_string(), factory);
		}

		for (name, factory) in xchain_settlement::get_all_implementations() {
			tracing::debug!("Registering settlement implementation: {}", name);
			registry.settlement.insert(name.to_string(), factory);
		}

		registry
	})
}

fn unknown(kind: &str, name: &str, available: &HashMap<String, impl Sized>) -> String {
	let mut names: Vec<_> = available.keys().cloned().collect();
	names.sort();
	format!(
		"Unknown {} implementation '{}'. Available: [{}]",
		kind,
		name,
		names.join(", ")
	)
}

/// Retry and timeout bounds from the settlement section.
pub fn submission_config(config: &Config) -> SubmissionConfig {
	let settlement = &config.settlement;
	SubmissionConfig {
		max_retries: settlement.max_retries,
		initial_backoff: settlement.initial_backoff(),
		max_backoff: settlement.max_backoff(),
		connect_timeout: settlement.connect_timeout(),
		submission_timeout: settlement.submission_timeout(),
		fill_deadline: settlement.fill_deadline(),
	}
}

/// Builds the primary account named in `config`. Never touches the network.
pub fn build_account(config: &Config) -> Result<Arc<AccountService>, Box<dyn std::error::Error>> {
	let registry = get_registry();

	let account_name = &config.account.primary;
	let account_factory = registry
		.account
		.get(account_name)
		.ok_or_else(|| unknown("account", account_name, &registry.account))?;
	let account_config = config
		.account
		.primary_config()
		.ok_or_else(|| format!("Missing configuration for account '{}'", account_name))?;

	tracing::debug!(account = %account_name, "Built account");
	Ok(Arc::new(AccountService::new(account_factory(account_config)?)))
}

/// Builds the primary settler named in `config` and the client driving it
/// for `account`.
pub fn build_client(
	config: &Config,
	account: Arc<AccountService>,
) -> Result<SettlementClient, Box<dyn std::error::Error>> {
	let registry = get_registry();

	// Outer transactions are paid for by the same key that signs intents.
	let outer_key = config
		.account
		.primary_config()
		.and_then(|account_config| account_config.get("private_key"))
		.and_then(|v| v.as_str())
		.map(SecretString::from)
		.unwrap_or_else(|| SecretString::from(""));

	let settler_name = &config.settlement.primary;
	let settler_factory = registry
		.settlement
		.get(settler_name)
		.ok_or_else(|| unknown("settlement", settler_name, &registry.settlement))?;
	let settler_config = config
		.settlement
		.primary_config()
		.ok_or_else(|| format!("Missing configuration for settlement '{}'", settler_name))?;
	let settler: Arc<dyn OriginSettlerInterface> =
		Arc::from(settler_factory(settler_config, &config.networks, &outer_key)?);

	tracing::info!(
		account = %config.account.primary,
		settlement = %settler_name,
		networks = ?settler.supported_networks(),
		"Built client"
	);

	Ok(SettlementClient::new(
		settler,
		account,
		submission_config(config),
		EventBus::default(),
	))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::str::FromStr;
	use std::time::Duration;
	use xchain_types::Address;

	const LOCAL_CONFIG: &str = r#"
[client]
id = "test-client"

[networks.31337]
rpc_url = "http://127.0.0.1:8545"
origin_settler_address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
delegate_address = "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512"

[account]
primary = "local"
[account.implementations.local]
private_key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"

[settlement]
primary = "local"
submission_timeout_seconds = 30
[settlement.implementations.local]
network_ids = [31337]
"#;

	#[test]
	fn test_registry_contains_builtin_implementations() {
		let registry = get_registry();
		assert!(registry.account.contains_key("local"));
		assert!(registry.settlement.contains_key("local"));
		assert!(registry.settlement.contains_key("evm_alloy"));
	}

	#[tokio::test]
	async fn test_build_local_client() {
		let config = Config::from_str(LOCAL_CONFIG).unwrap();
		let account = build_account(&config).unwrap();
		assert_eq!(
			account.get_address().await.unwrap(),
			"0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
				.parse::<Address>()
				.unwrap()
		);

		let client = build_client(&config, account).unwrap();
		assert_eq!(client.config().submission_timeout, Duration::from_secs(30));
	}

	#[tokio::test]
	async fn test_evm_client_builds_without_reaching_node() {
		let config_str = LOCAL_CONFIG
			.replace("http://127.0.0.1:8545", "ws://127.0.0.1:1")
			.replace("primary = \"local\"\nsubmission", "primary = \"evm_alloy\"\nsubmission")
			.replace(
				"[settlement.implementations.local]",
				"[settlement.implementations.evm_alloy]",
			);
		let config = Config::from_str(&config_str).unwrap();

		let account = build_account(&config).unwrap();
		let client = build_client(&config, account).unwrap();
		assert_eq!(client.config().submission_timeout, Duration::from_secs(30));
	}

	#[test]
	fn test_unknown_settler_lists_available() {
		let config_str = LOCAL_CONFIG
			.replace("primary = \"local\"\nsubmission", "primary = \"relay\"\nsubmission")
			.replace("[settlement.implementations.local]", "[settlement.implementations.relay]");
		let config = Config::from_str(&config_str).unwrap();

		let account = build_account(&config).unwrap();
		let err = build_client(&config, account).err().unwrap().to_string();
		assert!(err.contains("Unknown settlement implementation 'relay'"));
		assert!(err.contains("evm_alloy, local"));
	}
}
