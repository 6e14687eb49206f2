//! Alloy-backed EVM chain connections.
//!
//! One provider is built per configured network, on first use. The transport is
//! chosen from the endpoint scheme (`http(s)://` or `ws(s)://`), and a wallet
//! filler signs outer transactions with the configured key.

use crate::{DeliveryError, DeliveryInterface};
use alloy_json_rpc::RpcError;
use alloy_network::EthereumWallet;
use alloy_primitives::B256;
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types::TransactionRequest;
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_transport::{BoxTransport, TransportError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use xchain_types::{
	Address, ConfigSchema, Field, FieldType, LogEntry, NetworksConfig, Schema, SecretString,
	Transaction, TransactionHash, TransactionReceipt, ValidationError,
};

type DynProvider = Arc<dyn Provider<BoxTransport> + Send + Sync>;

/// Maps a provider error onto the delivery taxonomy.
///
/// JSON-RPC error responses (reverts during estimation, nonce or fee refusals)
/// are definitive. Transport failures are transient. Anything the client could
/// not parse is an invalid response.
fn classify(context: &str, err: TransportError) -> DeliveryError {
	match err {
		RpcError::ErrorResp(payload) => DeliveryError::Rejected(format!("{}: {}", context, payload)),
		RpcError::NullResp => DeliveryError::InvalidResponse(format!("{}: null response", context)),
		RpcError::DeserError { err, .. } => {
			DeliveryError::InvalidResponse(format!("{}: {}", context, err))
		},
		RpcError::SerError(err) => DeliveryError::InvalidResponse(format!("{}: {}", context, err)),
		other => DeliveryError::Network(format!("{}: {}", context, other)),
	}
}

fn to_b256(hash: &TransactionHash) -> Result<B256, DeliveryError> {
	if hash.0.len() != 32 {
		return Err(DeliveryError::InvalidResponse(format!(
			"transaction hash must be 32 bytes, got {}",
			hash.0.len()
		)));
	}
	Ok(B256::from_slice(&hash.0))
}

fn convert_receipt(receipt: &alloy_rpc_types::TransactionReceipt) -> TransactionReceipt {
	let logs = receipt
		.inner
		.logs()
		.iter()
		.map(|log| LogEntry {
			address: log.address(),
			topics: log.topics().to_vec(),
			data: log.data().data.to_vec(),
		})
		.collect();

	TransactionReceipt {
		hash: TransactionHash::from(receipt.transaction_hash),
		block_number: receipt.block_number.unwrap_or(0),
		success: receipt.status(),
		logs,
	}
}

/// Endpoint of one network and its provider, once connected.
struct Endpoint {
	rpc_url: String,
	provider: OnceCell<DynProvider>,
}

/// Alloy-based EVM delivery implementation.
///
/// Providers are created on first use, so building an instance never opens a
/// socket. A failed connection leaves the endpoint unconnected and the next
/// request tries again.
pub struct AlloyDelivery {
	/// Endpoints for each supported network.
	endpoints: HashMap<u64, Endpoint>,
	/// Key signing outer transactions.
	signer: PrivateKeySigner,
	/// Interval between receipt polls.
	poll_interval: Duration,
	/// Upper bound on waiting for a receipt.
	confirmation_timeout: Duration,
}

impl AlloyDelivery {
	/// Prepares connections to every network in `network_ids`.
	pub fn new(
		network_ids: Vec<u64>,
		networks: &NetworksConfig,
		signer: PrivateKeySigner,
		poll_interval: Duration,
		confirmation_timeout: Duration,
	) -> Result<Self, DeliveryError> {
		if network_ids.is_empty() {
			return Err(DeliveryError::InvalidConfig(
				"At least one network_id must be specified".to_string(),
			));
		}

		let mut endpoints = HashMap::new();
		for network_id in &network_ids {
			let network = networks.get(network_id).ok_or_else(|| {
				DeliveryError::InvalidConfig(format!(
					"Network {} not found in configuration",
					network_id
				))
			})?;
			endpoints.insert(
				*network_id,
				Endpoint {
					rpc_url: network.rpc_url.clone(),
					provider: OnceCell::new(),
				},
			);
		}

		Ok(Self {
			endpoints,
			signer,
			poll_interval,
			confirmation_timeout,
		})
	}

	async fn open_provider(&self, chain_id: u64, rpc_url: &str) -> Result<DynProvider, DeliveryError> {
		let wallet = EthereumWallet::from(self.signer.clone().with_chain_id(Some(chain_id)));

		let provider = ProviderBuilder::new()
			.with_recommended_fillers()
			.wallet(wallet)
			.on_builtin(rpc_url)
			.await
			.map_err(|e| classify(&format!("connecting to network {}", chain_id), e))?;

		provider.client().set_poll_interval(self.poll_interval);

		tracing::debug!(chain_id, rpc_url = %rpc_url, "Connected provider");
		Ok(Arc::new(provider) as DynProvider)
	}

	async fn get_provider(&self, chain_id: u64) -> Result<&DynProvider, DeliveryError> {
		let endpoint = self
			.endpoints
			.get(&chain_id)
			.ok_or(DeliveryError::NoProviderAvailable(chain_id))?;
		endpoint
			.provider
			.get_or_try_init(|| self.open_provider(chain_id, &endpoint.rpc_url))
			.await
	}
}

/// Configuration schema for Alloy delivery provider.
///
/// ```toml
/// network_ids = [31337]
/// poll_interval_ms = 1000        # optional
/// confirmation_timeout_seconds = 300  # optional
/// ```
pub struct AlloyDeliverySchema;

impl AlloyDeliverySchema {
	/// Static validation method for use before instance creation
	pub fn validate_config(config: &toml::Value) -> Result<(), ValidationError> {
		let instance = Self;
		instance.validate(config)
	}
}

impl ConfigSchema for AlloyDeliverySchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			// Required fields
			vec![Field::new(
				"network_ids",
				FieldType::Array(Box::new(FieldType::Integer {
					min: Some(1),
					max: None,
				})),
			)
			.with_validator(|value| match value.as_array() {
				Some(arr) if arr.is_empty() => Err("network_ids cannot be empty".to_string()),
				_ => Ok(()),
			})],
			// Optional fields
			vec![
				Field::new(
					"poll_interval_ms",
					FieldType::Integer {
						min: Some(10),
						max: Some(60_000),
					},
				),
				Field::new(
					"confirmation_timeout_seconds",
					FieldType::Integer {
						min: Some(1),
						max: Some(3600),
					},
				),
				Field::new(
					"min_confirmations",
					FieldType::Integer {
						min: Some(0),
						max: Some(64),
					},
				),
			],
		);

		schema.validate(config)
	}
}

#[async_trait]
impl DeliveryInterface for AlloyDelivery {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(AlloyDeliverySchema)
	}

	fn supports(&self, chain_id: u64) -> bool {
		self.endpoints.contains_key(&chain_id)
	}

	fn sender(&self) -> Address {
		self.signer.address()
	}

	async fn connect(&self, chain_id: u64) -> Result<(), DeliveryError> {
		self.get_provider(chain_id).await.map(|_| ())
	}

	async fn submit(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError> {
		let chain_id = tx.chain_id;
		let provider = self.get_provider(chain_id).await?;
		let request: TransactionRequest = tx.into();

		// The wallet filler signs; estimation reverts surface here as error responses.
		let pending_tx = provider
			.send_transaction(request)
			.await
			.map_err(|e| classify("sending transaction", e))?;

		let hash = TransactionHash::from(*pending_tx.tx_hash());
		tracing::info!(tx_hash = %hash, chain_id, "Submitted transaction");
		Ok(hash)
	}

	async fn wait_for_confirmation(
		&self,
		hash: &TransactionHash,
		chain_id: u64,
		confirmations: u64,
	) -> Result<TransactionReceipt, DeliveryError> {
		let tx_hash = to_b256(hash)?;
		let provider = self.get_provider(chain_id).await?;
		let deadline = tokio::time::Instant::now() + self.confirmation_timeout;

		tracing::debug!(
			tx_hash = %hash,
			chain_id,
			confirmations,
			"Waiting for confirmations"
		);

		loop {
			if tokio::time::Instant::now() > deadline {
				return Err(DeliveryError::Network(format!(
					"Timeout waiting for {} confirmations after {} seconds",
					confirmations,
					self.confirmation_timeout.as_secs()
				)));
			}

			let receipt = match provider.get_transaction_receipt(tx_hash).await {
				Ok(Some(receipt)) => receipt,
				Ok(None) => {
					tokio::time::sleep(self.poll_interval).await;
					continue;
				},
				Err(e) => return Err(classify("fetching receipt", e)),
			};

			let tx_block = receipt.block_number.unwrap_or(0);
			let current_block = provider
				.get_block_number()
				.await
				.map_err(|e| classify("fetching block number", e))?;

			// The inclusion block counts as the first confirmation.
			if current_block.saturating_sub(tx_block) + 1 >= confirmations {
				return Ok(convert_receipt(&receipt));
			}

			tokio::time::sleep(self.poll_interval).await;
		}
	}

	async fn call(&self, tx: Transaction) -> Result<Vec<u8>, DeliveryError> {
		let provider = self.get_provider(tx.chain_id).await?;
		let request: TransactionRequest = tx.into();

		provider
			.call(&request)
			.await
			.map(|bytes| bytes.to_vec())
			.map_err(|e| classify("eth_call", e))
	}

	async fn get_nonce(&self, address: Address, chain_id: u64) -> Result<u64, DeliveryError> {
		let provider = self.get_provider(chain_id).await?;

		provider
			.get_transaction_count(address)
			.await
			.map_err(|e| classify("fetching transaction count", e))
	}

	async fn get_chain_id(&self, chain_id: u64) -> Result<u64, DeliveryError> {
		let provider = self.get_provider(chain_id).await?;

		provider
			.get_chain_id()
			.await
			.map_err(|e| classify("fetching chain id", e))
	}
}

/// Factory function to create an Alloy delivery provider from configuration.
///
/// # Parameters
/// - `config`: TOML table containing:
///   - `network_ids` (required): networks to connect to
///   - `poll_interval_ms` (optional): receipt poll interval, default 1000
///   - `confirmation_timeout_seconds` (optional): receipt wait bound, default 300
/// - `networks`: Network configuration containing RPC URLs
/// - `private_key`: Key signing outer transactions
pub fn create_alloy_delivery(
	config: &toml::Value,
	networks: &NetworksConfig,
	private_key: &SecretString,
) -> Result<Box<dyn DeliveryInterface>, DeliveryError> {
	AlloyDeliverySchema::validate_config(config)
		.map_err(|e| DeliveryError::InvalidConfig(e.to_string()))?;

	let network_ids = config
		.get("network_ids")
		.and_then(|v| v.as_array())
		.map(|arr| {
			arr.iter()
				.filter_map(|v| v.as_integer().map(|i| i as u64))
				.collect::<Vec<_>>()
		})
		.ok_or_else(|| DeliveryError::InvalidConfig("network_ids is required".to_string()))?;

	let poll_interval = Duration::from_millis(
		config
			.get("poll_interval_ms")
			.and_then(|v| v.as_integer())
			.unwrap_or(1000) as u64,
	);
	let confirmation_timeout = Duration::from_secs(
		config
			.get("confirmation_timeout_seconds")
			.and_then(|v| v.as_integer())
			.unwrap_or(300) as u64,
	);

	let signer: PrivateKeySigner = private_key.with_exposed(|key| {
		key.trim()
			.parse()
			.map_err(|_| DeliveryError::InvalidConfig("Invalid private key format".to_string()))
	})?;

	Ok(Box::new(AlloyDelivery::new(
		network_ids,
		networks,
		signer,
		poll_interval,
		confirmation_timeout,
	)?))
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_json_rpc::ErrorPayload;
	use alloy_transport::TransportErrorKind;
	use xchain_types::NetworkConfig;

	const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

	fn unreachable_network() -> NetworksConfig {
		let mut networks = NetworksConfig::new();
		networks.insert(
			31337,
			NetworkConfig {
				rpc_url: "ws://127.0.0.1:1".to_string(),
				origin_settler_address: Address::repeat_byte(0x5e),
				delegate_address: None,
				order_data_type: None,
			},
		);
		networks
	}

	#[tokio::test]
	async fn test_factory_does_not_connect() {
		let config: toml::Value = toml::from_str("network_ids = [31337]").unwrap();
		let delivery = create_alloy_delivery(
			&config,
			&unreachable_network(),
			&SecretString::from(ANVIL_KEY),
		)
		.unwrap();

		assert!(delivery.supports(31337));
		assert!(!delivery.supports(1));
		assert_eq!(
			delivery.sender(),
			"0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
				.parse::<Address>()
				.unwrap()
		);

		// The socket is only opened on connect, and a refusal is a transport error.
		assert!(matches!(
			delivery.connect(31337).await,
			Err(DeliveryError::Network(_))
		));
		assert!(matches!(
			delivery.connect(1).await,
			Err(DeliveryError::NoProviderAvailable(1))
		));
	}

	#[test]
	fn test_factory_rejects_unknown_network() {
		let config: toml::Value = toml::from_str("network_ids = [10]").unwrap();
		let result = create_alloy_delivery(
			&config,
			&unreachable_network(),
			&SecretString::from(ANVIL_KEY),
		);
		assert!(matches!(result, Err(DeliveryError::InvalidConfig(_))));
	}

	#[test]
	fn test_schema_requires_network_ids() {
		let missing: toml::Value = toml::from_str("poll_interval_ms = 500").unwrap();
		assert!(AlloyDeliverySchema::validate_config(&missing).is_err());

		let empty: toml::Value = toml::from_str("network_ids = []").unwrap();
		assert!(AlloyDeliverySchema::validate_config(&empty).is_err());

		let valid: toml::Value =
			toml::from_str("network_ids = [31337]\nconfirmation_timeout_seconds = 30").unwrap();
		AlloyDeliverySchema::validate_config(&valid).unwrap();
	}

	#[test]
	fn test_error_classification() {
		let revert = RpcError::ErrorResp(ErrorPayload {
			code: 3,
			message: "execution reverted: nonce already used".into(),
			data: None,
		});
		assert!(matches!(classify("send", revert), DeliveryError::Rejected(_)));

		let dropped = TransportErrorKind::backend_gone();
		assert!(matches!(classify("send", dropped), DeliveryError::Network(_)));

		let null: TransportError = RpcError::NullResp;
		assert!(matches!(classify("call", null), DeliveryError::InvalidResponse(_)));
	}

	#[test]
	fn test_hash_length_checked() {
		assert!(to_b256(&TransactionHash(vec![0u8; 31])).is_err());
		assert_eq!(to_b256(&TransactionHash(vec![7u8; 32])).unwrap(), B256::repeat_byte(7));
	}
}
