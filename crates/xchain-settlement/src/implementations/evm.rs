//! On-chain origin settler reached through the delivery layer.
//!
//! Payloads are sent as `open(order)` transactions to the settler configured for
//! each network. Before the first submission to a chain the contract is asked
//! for its `ORDER_DATA_TYPE_HASH`; a contract that cannot answer, or answers with
//! a different hash than the one pinned in the network configuration, is treated
//! as an ABI mismatch.

use crate::{OriginSettlerInterface, SettlementError};
use alloy_primitives::keccak256;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use xchain_delivery::implementations::evm::alloy::{create_alloy_delivery, AlloyDeliverySchema};
use xchain_delivery::{DeliveryError, DeliveryService};
use xchain_types::origin_settler::{
	decode_order_data_type, encode_open_call, encode_order_data_type_call, find_open_order_id,
	find_requested_delegation,
};
use xchain_types::{
	truncate_id, Address, ConfigSchema, Field, FieldType, NetworksConfig, Schema, SecretString,
	SettlementReceipt, SubmissionPayload, Transaction, TransactionHash, ValidationError, B256,
};

/// Reads the pinned order data type hash of `chain_id`, if the network has one.
///
/// The value is either a 0x-prefixed 32-byte hash or the type string itself,
/// which is hashed.
pub fn pinned_type_hash(
	networks: &NetworksConfig,
	chain_id: u64,
) -> Result<Option<B256>, SettlementError> {
	let Some(raw) = networks
		.get(&chain_id)
		.and_then(|network| network.order_data_type.as_deref())
	else {
		return Ok(None);
	};
	let raw = raw.trim();
	if raw.is_empty() {
		return Err(SettlementError::InvalidParameter(format!(
			"order_data_type of network {} is empty",
			chain_id
		)));
	}
	if raw.starts_with("0x") {
		return raw.parse::<B256>().map(Some).map_err(|e| {
			SettlementError::InvalidParameter(format!(
				"order_data_type of network {} is not a 32-byte hash: {}",
				chain_id, e
			))
		});
	}
	Ok(Some(keccak256(raw.as_bytes())))
}

/// Origin settler contracts on EVM chains.
pub struct EvmOriginSettler {
	delivery: DeliveryService,
	network_ids: Vec<u64>,
	/// Settler contract per chain.
	settlers: HashMap<u64, Address>,
	/// Expected type hash per chain, when configured.
	pinned: HashMap<u64, B256>,
	/// Type hashes already read from the contracts.
	verified: DashMap<u64, B256>,
}

impl EvmOriginSettler {
	pub fn new(
		delivery: DeliveryService,
		network_ids: Vec<u64>,
		networks: &NetworksConfig,
	) -> Result<Self, SettlementError> {
		let mut settlers = HashMap::new();
		let mut pinned = HashMap::new();

		for chain_id in &network_ids {
			let network = networks.get(chain_id).ok_or_else(|| {
				SettlementError::InvalidParameter(format!(
					"Network {} not found in configuration",
					chain_id
				))
			})?;
			if network.origin_settler_address == Address::ZERO {
				return Err(SettlementError::InvalidParameter(format!(
					"origin_settler_address of network {} is the zero address",
					chain_id
				)));
			}
			if !delivery.supports(*chain_id) {
				return Err(SettlementError::InvalidParameter(format!(
					"no connection configured for chain {}",
					chain_id
				)));
			}
			settlers.insert(*chain_id, network.origin_settler_address);
			if let Some(hash) = pinned_type_hash(networks, *chain_id)? {
				pinned.insert(*chain_id, hash);
			}
		}

		Ok(Self {
			delivery,
			network_ids,
			settlers,
			pinned,
			verified: DashMap::new(),
		})
	}

	fn settler(&self, chain_id: u64) -> Result<Address, SettlementError> {
		self.settlers.get(&chain_id).copied().ok_or_else(|| {
			SettlementError::InvalidParameter(format!(
				"chain {} is not served by this settler",
				chain_id
			))
		})
	}

	/// Type hash reported by the settler on `chain_id`, read once per chain.
	async fn order_data_type(&self, chain_id: u64) -> Result<B256, SettlementError> {
		if let Some(hash) = self.verified.get(&chain_id) {
			return Ok(*hash);
		}

		let settler = self.settler(chain_id)?;
		let data = self
			.delivery
			.call(Transaction::call(
				chain_id,
				settler,
				encode_order_data_type_call(),
			))
			.await
			.map_err(|e| match e {
				// A revert here means the contract has no such getter.
				DeliveryError::Rejected(reason) => SettlementError::AbiMismatch(format!(
					"settler {} did not answer ORDER_DATA_TYPE_HASH: {}",
					settler, reason
				)),
				other => other.into(),
			})?;
		let hash = decode_order_data_type(&data)?;

		if let Some(expected) = self.pinned.get(&chain_id) {
			if *expected != hash {
				return Err(SettlementError::AbiMismatch(format!(
					"settler {} on chain {} uses order data type {}, configured {}",
					settler, chain_id, hash, expected
				)));
			}
		}

		tracing::debug!(chain_id, order_data_type = %hash, "Settler ABI verified");
		self.verified.insert(chain_id, hash);
		Ok(hash)
	}
}

/// Configuration schema for the EVM settler.
///
/// The same table configures the chain connections, so every option of the
/// Alloy delivery is accepted here as well.
///
/// ```toml
/// [settlement.implementations.evm_alloy]
/// network_ids = [1, 10]
/// min_confirmations = 1         # optional
/// poll_interval_ms = 1000       # optional
/// ```
pub struct EvmSettlerSchema;

impl EvmSettlerSchema {
	/// Static validation method for use before instance creation
	pub fn validate_config(config: &toml::Value) -> Result<(), ValidationError> {
		let instance = Self;
		instance.validate(config)
	}
}

impl ConfigSchema for EvmSettlerSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		AlloyDeliverySchema::validate_config(config)?;
		Schema::new(
			vec![],
			vec![Field::new(
				"min_confirmations",
				FieldType::Integer {
					min: Some(0),
					max: Some(64),
				},
			)],
		)
		.validate(config)
	}
}

#[async_trait]
impl OriginSettlerInterface for EvmOriginSettler {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(EvmSettlerSchema)
	}

	fn supported_networks(&self) -> &[u64] {
		&self.network_ids
	}

	async fn connect(&self, chain_id: u64) -> Result<(), SettlementError> {
		self.settler(chain_id)?;
		self.delivery.connect(chain_id).await?;

		let reported = self.delivery.get_chain_id(chain_id).await?;
		if reported != chain_id {
			return Err(SettlementError::InvalidParameter(format!(
				"endpoint configured for chain {} serves chain {}",
				chain_id, reported
			)));
		}

		self.order_data_type(chain_id).await.map(|_| ())
	}

	async fn open(&self, payload: &SubmissionPayload) -> Result<TransactionHash, SettlementError> {
		let chain_id = payload.chain_id();
		let settler = self.settler(chain_id)?;
		let order_data_type = self.order_data_type(chain_id).await?;

		let tx = Transaction::call(chain_id, settler, encode_open_call(order_data_type, payload));
		let tx_hash = self.delivery.deliver(tx).await?;

		tracing::info!(
			chain_id,
			account = %truncate_id(&payload.account().to_string()),
			tx_hash = %truncate_id(&tx_hash.to_string()),
			"Submitted open transaction"
		);
		Ok(tx_hash)
	}

	async fn await_settlement(
		&self,
		chain_id: u64,
		tx_hash: &TransactionHash,
	) -> Result<SettlementReceipt, SettlementError> {
		let settler = self.settler(chain_id)?;
		let receipt = self.delivery.confirm(tx_hash, chain_id).await?;

		if !receipt.success {
			return Err(SettlementError::Rejected(format!(
				"open transaction {} reverted in block {}",
				tx_hash, receipt.block_number
			)));
		}

		let order_id = find_open_order_id(settler, &receipt.logs)?;
		if order_id.is_none() {
			tracing::warn!(chain_id, tx_hash = %tx_hash, "No Open event in receipt");
		}
		let delegated_to = find_requested_delegation(settler, &receipt.logs)?;

		Ok(SettlementReceipt {
			chain_id,
			tx_hash: receipt.hash,
			block_number: receipt.block_number,
			order_id,
			delegated_to,
		})
	}

	async fn next_nonce(&self, account: Address, chain_id: u64) -> Result<u64, SettlementError> {
		self.settler(chain_id)?;
		Ok(self.delivery.get_nonce(chain_id, account).await?)
	}

	async fn delegation_nonce(
		&self,
		account: Address,
		chain_id: u64,
	) -> Result<u64, SettlementError> {
		self.settler(chain_id)?;
		let count = self.delivery.get_nonce(chain_id, account).await?;
		// The open transaction bumps its sender's nonce before the
		// authorization list is applied.
		if self.delivery.sender(chain_id)? == account {
			Ok(count + 1)
		} else {
			Ok(count)
		}
	}
}

/// Factory function to create an EVM settler from configuration.
///
/// # Parameters
/// - `config`: TOML table containing:
///   - `network_ids` (required): chains to submit to
///   - `min_confirmations` (optional): blocks on top of the open transaction, default 1
///   - any option of the Alloy delivery
/// - `networks`: RPC endpoints and settler addresses
/// - `private_key`: Key paying for the open transactions
pub fn create_evm_settler(
	config: &toml::Value,
	networks: &NetworksConfig,
	private_key: &SecretString,
) -> Result<Box<dyn OriginSettlerInterface>, SettlementError> {
	EvmSettlerSchema::validate_config(config)
		.map_err(|e| SettlementError::InvalidParameter(format!("Invalid configuration: {}", e)))?;

	let network_ids: Vec<u64> = config
		.get("network_ids")
		.and_then(|v| v.as_array())
		.map(|arr| arr.iter().filter_map(|v| v.as_integer().map(|i| i as u64)).collect())
		.unwrap_or_default();
	let min_confirmations = config
		.get("min_confirmations")
		.and_then(|v| v.as_integer())
		.unwrap_or(1) as u64;

	let connections = create_alloy_delivery(config, networks, private_key)?;
	let delivery =
		DeliveryService::from_implementation(connections, network_ids.clone(), min_confirmations);

	Ok(Box::new(EvmOriginSettler::new(
		delivery,
		network_ids,
		networks,
	)?))
}

/// Registry for the EVM settler implementation.
pub struct Registry;

impl xchain_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "evm_alloy";
	type Factory = crate::SettlerFactory;

	fn factory() -> Self::Factory {
		create_evm_settler
	}
}

impl crate::SettlerRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_sol_types::SolEvent;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::{Arc, Mutex};
	use xchain_delivery::DeliveryInterface;
	use xchain_types::origin_settler::{
		decode_open_call, Authorization as AbiAuthorization, EIP7702AuthData, IOriginSettler,
	};
	use xchain_types::{
		Asset, CallByUser, LogEntry, NetworkConfig, Signature, TransactionReceipt, U256,
	};

	const CHAIN: u64 = 31337;

	fn settler_address() -> Address {
		Address::repeat_byte(0x5e)
	}

	/// Node answering from fixed values and recording what it was sent.
	struct ScriptedNode {
		reported_chain: u64,
		type_hash_return: Vec<u8>,
		receipt_success: bool,
		receipt_logs: Vec<LogEntry>,
		sender: Address,
		reachable: bool,
		connects: AtomicUsize,
		calls: AtomicUsize,
		sent: Mutex<Vec<Transaction>>,
	}

	impl ScriptedNode {
		fn new(type_hash_return: Vec<u8>) -> Self {
			Self {
				reported_chain: CHAIN,
				type_hash_return,
				receipt_success: true,
				receipt_logs: vec![],
				sender: Address::repeat_byte(0x99),
				reachable: true,
				connects: AtomicUsize::new(0),
				calls: AtomicUsize::new(0),
				sent: Mutex::new(Vec::new()),
			}
		}
	}

	#[async_trait]
	impl DeliveryInterface for ScriptedNode {
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(AlloyDeliverySchema)
		}

		fn supports(&self, chain_id: u64) -> bool {
			chain_id == CHAIN
		}

		fn sender(&self) -> Address {
			self.sender
		}

		async fn connect(&self, _chain_id: u64) -> Result<(), DeliveryError> {
			self.connects.fetch_add(1, Ordering::SeqCst);
			if self.reachable {
				Ok(())
			} else {
				Err(DeliveryError::Network("connection refused".into()))
			}
		}

		async fn submit(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError> {
			self.sent.lock().unwrap().push(tx);
			Ok(TransactionHash(vec![0xab; 32]))
		}

		async fn wait_for_confirmation(
			&self,
			hash: &TransactionHash,
			_chain_id: u64,
			_confirmations: u64,
		) -> Result<TransactionReceipt, DeliveryError> {
			Ok(TransactionReceipt {
				hash: hash.clone(),
				block_number: 7,
				success: self.receipt_success,
				logs: self.receipt_logs.clone(),
			})
		}

		async fn call(&self, _tx: Transaction) -> Result<Vec<u8>, DeliveryError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			Ok(self.type_hash_return.clone())
		}

		async fn get_nonce(&self, _address: Address, _chain_id: u64) -> Result<u64, DeliveryError> {
			Ok(4)
		}

		async fn get_chain_id(&self, _chain_id: u64) -> Result<u64, DeliveryError> {
			Ok(self.reported_chain)
		}
	}

	fn networks(order_data_type: Option<&str>) -> NetworksConfig {
		let mut networks = NetworksConfig::new();
		networks.insert(
			CHAIN,
			NetworkConfig {
				rpc_url: "http://127.0.0.1:8545".to_string(),
				origin_settler_address: settler_address(),
				delegate_address: None,
				order_data_type: order_data_type.map(str::to_string),
			},
		);
		networks
	}

	fn settler(node: Arc<ScriptedNode>, order_data_type: Option<&str>) -> EvmOriginSettler {
		let mut providers: HashMap<u64, Arc<dyn DeliveryInterface>> = HashMap::new();
		providers.insert(CHAIN, node);
		EvmOriginSettler::new(
			DeliveryService::new(providers, 1),
			vec![CHAIN],
			&networks(order_data_type),
		)
		.unwrap()
	}

	fn payload() -> SubmissionPayload {
		let intent = CallByUser {
			user: Address::repeat_byte(1),
			nonce: 3,
			asset: Asset::none(),
			chain_id: CHAIN,
			signature: Signature::new(U256::from(1u64), U256::from(2u64), false),
			calls: vec![],
		};
		SubmissionPayload::new(None, intent).with_fill_deadline(1_900_000_000)
	}

	#[tokio::test]
	async fn test_type_hash_read_once_per_chain() {
		let node = Arc::new(ScriptedNode::new(B256::repeat_byte(7).to_vec()));
		let settler = settler(node.clone(), Some(&B256::repeat_byte(7).to_string()));

		settler.connect(CHAIN).await.unwrap();
		settler.connect(CHAIN).await.unwrap();
		assert_eq!(node.calls.load(Ordering::SeqCst), 1);
		assert_eq!(node.connects.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn test_unreachable_node_is_connection_lost() {
		let mut node = ScriptedNode::new(B256::repeat_byte(7).to_vec());
		node.reachable = false;
		let node = Arc::new(node);
		let settler = settler(node.clone(), None);

		let err = settler.connect(CHAIN).await.unwrap_err();
		assert!(err.is_retryable());
		// Nothing is asked of a node that could not be reached.
		assert_eq!(node.calls.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn test_pinned_type_mismatch() {
		let node = Arc::new(ScriptedNode::new(B256::repeat_byte(7).to_vec()));
		let settler = settler(node, Some(&B256::repeat_byte(8).to_string()));

		assert!(matches!(
			settler.connect(CHAIN).await,
			Err(SettlementError::AbiMismatch(_))
		));
	}

	#[tokio::test]
	async fn test_contract_without_getter_is_abi_mismatch() {
		let settler = settler(Arc::new(ScriptedNode::new(vec![])), None);
		assert!(matches!(
			settler.connect(CHAIN).await,
			Err(SettlementError::AbiMismatch(_))
		));
	}

	#[tokio::test]
	async fn test_wrong_endpoint_chain() {
		let mut node = ScriptedNode::new(B256::repeat_byte(7).to_vec());
		node.reported_chain = 1;
		let settler = settler(Arc::new(node), None);

		assert!(matches!(
			settler.connect(CHAIN).await,
			Err(SettlementError::InvalidParameter(_))
		));
	}

	#[tokio::test]
	async fn test_open_sends_payload_to_settler() {
		let node = Arc::new(ScriptedNode::new(B256::repeat_byte(7).to_vec()));
		let settler = settler(node.clone(), None);

		let hash = settler.open(&payload()).await.unwrap();
		assert_eq!(hash, TransactionHash(vec![0xab; 32]));

		let sent = node.sent.lock().unwrap().clone();
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].to, Some(settler_address()));
		let (order_type, decoded) = decode_open_call(&sent[0].data).unwrap();
		assert_eq!(order_type, B256::repeat_byte(7));
		assert_eq!(decoded, payload());
	}

	#[tokio::test]
	async fn test_reverted_open_is_rejected() {
		let mut node = ScriptedNode::new(B256::repeat_byte(7).to_vec());
		node.receipt_success = false;
		let settler = settler(Arc::new(node), None);

		let err = settler
			.await_settlement(CHAIN, &TransactionHash(vec![0xab; 32]))
			.await
			.unwrap_err();
		assert_eq!(err.kind(), "rejected");
	}

	#[tokio::test]
	async fn test_settled_receipt() {
		let settler = settler(Arc::new(ScriptedNode::new(vec![])), None);
		let receipt = settler
			.await_settlement(CHAIN, &TransactionHash(vec![0xab; 32]))
			.await
			.unwrap();
		assert_eq!(receipt.block_number, 7);
		assert_eq!(receipt.order_id, None);
		assert_eq!(receipt.delegated_to, None);
	}

	#[tokio::test]
	async fn test_settled_receipt_reports_delegation() {
		let delegate = Address::repeat_byte(0xde);
		let event = IOriginSettler::Requested7702Delegation {
			authData: EIP7702AuthData {
				authlist: vec![AbiAuthorization {
					chainId: U256::from(CHAIN),
					codeAddress: delegate,
					nonce: U256::from(5u64),
					signature: vec![0u8; 65].into(),
				}],
			},
		};
		let log_data = event.encode_log_data();
		let mut node = ScriptedNode::new(vec![]);
		node.receipt_logs = vec![LogEntry {
			address: settler_address(),
			topics: log_data.topics().to_vec(),
			data: log_data.data.to_vec(),
		}];
		let settler = settler(Arc::new(node), None);

		let receipt = settler
			.await_settlement(CHAIN, &TransactionHash(vec![0xab; 32]))
			.await
			.unwrap();
		assert_eq!(receipt.delegated_to, Some(delegate));
	}

	#[tokio::test]
	async fn test_delegation_nonce_skips_own_open_transaction() {
		let user = Address::repeat_byte(0x11);
		let mut node = ScriptedNode::new(vec![]);
		node.sender = user;
		let settler = settler(Arc::new(node), None);

		// The node reports a transaction count of 4. The open transaction sent
		// by the same account takes nonce 4, so the authorization must carry 5.
		assert_eq!(settler.delegation_nonce(user, CHAIN).await.unwrap(), 5);
		assert_eq!(settler.next_nonce(user, CHAIN).await.unwrap(), 4);
	}

	#[tokio::test]
	async fn test_delegation_nonce_for_other_sender() {
		let settler = settler(Arc::new(ScriptedNode::new(vec![])), None);
		assert_eq!(
			settler
				.delegation_nonce(Address::repeat_byte(0x11), CHAIN)
				.await
				.unwrap(),
			4
		);
	}

	#[test]
	fn test_pinned_type_forms() {
		let hash = B256::repeat_byte(3);
		assert_eq!(
			pinned_type_hash(&networks(Some(&hash.to_string())), CHAIN).unwrap(),
			Some(hash)
		);
		assert_eq!(
			pinned_type_hash(&networks(Some("Order(uint256 x)")), CHAIN).unwrap(),
			Some(keccak256("Order(uint256 x)"))
		);
		assert_eq!(pinned_type_hash(&networks(None), CHAIN).unwrap(), None);
		assert!(pinned_type_hash(&networks(Some("0x1234")), CHAIN).is_err());
	}

	#[test]
	fn test_unconfigured_network_refused() {
		let providers: HashMap<u64, Arc<dyn DeliveryInterface>> = HashMap::new();
		let result = EvmOriginSettler::new(
			DeliveryService::new(providers, 1),
			vec![CHAIN],
			&networks(None),
		);
		assert!(matches!(result, Err(SettlementError::InvalidParameter(_))));
	}

	#[tokio::test]
	async fn test_factory_builds_without_network() {
		let mut networks = networks(None);
		if let Some(network) = networks.get_mut(&CHAIN) {
			network.rpc_url = "ws://127.0.0.1:1".to_string();
		}
		let config: toml::Value = toml::from_str("network_ids = [31337]").unwrap();
		let key =
			SecretString::from("0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80");

		let settler = create_evm_settler(&config, &networks, &key).unwrap();
		assert_eq!(settler.supported_networks(), &[CHAIN]);

		// The endpoint is only dialled on connect.
		let err = settler.connect(CHAIN).await.unwrap_err();
		assert!(err.is_retryable());
	}

	#[test]
	fn test_schema_bounds_confirmations() {
		let valid: toml::Value =
			toml::from_str("network_ids = [31337]\nmin_confirmations = 2").unwrap();
		EvmSettlerSchema::validate_config(&valid).unwrap();

		let invalid: toml::Value =
			toml::from_str("network_ids = [31337]\nmin_confirmations = 500").unwrap();
		assert!(EvmSettlerSchema::validate_config(&invalid).is_err());
	}
}
