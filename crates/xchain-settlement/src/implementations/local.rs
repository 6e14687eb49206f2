//! In-process origin settler.
//!
//! Applies the settler's acceptance rules without a chain: payloads go through
//! the real `open` calldata encoding, signatures are verified, intent nonces are
//! consumed per account and chain, and delegations are recorded. Used for dry
//! runs and as the reference settler in tests.

use crate::{OriginSettlerInterface, SettlementError};
use alloy_primitives::keccak256;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use xchain_intent::{recover_authority, verify_call_intent};
use xchain_types::origin_settler::{decode_open_call, encode_open_call};
use xchain_types::{
	Address, ConfigSchema, Field, FieldType, NetworksConfig, Schema, SecretString,
	SettlementReceipt, SubmissionPayload, TransactionHash, ValidationError, B256,
};

/// EIP-712 style type string of the order data understood by this settler.
pub const ORDER_DATA_TYPE: &str = "CallByUser(address user,uint256 nonce,Asset asset,uint64 chainId,bytes signature,Call[] calls)Asset(address token,uint256 amount)Call(address target,bytes callData,uint256 value)";

/// Type hash of [`ORDER_DATA_TYPE`].
pub fn order_data_type_hash() -> B256 {
	keccak256(ORDER_DATA_TYPE)
}

#[derive(Default)]
struct Ledger {
	/// Consumed intent nonces per (user, chain).
	consumed: HashMap<(Address, u64), HashSet<u64>>,
	/// Current delegation target per (user, chain).
	delegations: HashMap<(Address, u64), Address>,
	/// Next authorization nonce per (user, chain).
	delegation_nonces: HashMap<(Address, u64), u64>,
	receipts: HashMap<TransactionHash, SettlementReceipt>,
	block_number: u64,
	executions: u64,
}

/// Settler that verifies and records payloads in memory.
pub struct LocalSettler {
	network_ids: Vec<u64>,
	type_hash: B256,
	/// Type hashes the configuration expects per chain.
	pinned: HashMap<u64, B256>,
	ledger: Mutex<Ledger>,
}

impl LocalSettler {
	pub fn new(network_ids: Vec<u64>) -> Self {
		Self {
			network_ids,
			type_hash: order_data_type_hash(),
			pinned: HashMap::new(),
			ledger: Mutex::new(Ledger::default()),
		}
	}

	/// Expects `type_hash` when connecting to `chain_id`.
	pub fn with_pinned_type(mut self, chain_id: u64, type_hash: B256) -> Self {
		self.pinned.insert(chain_id, type_hash);
		self
	}

	/// Number of payloads executed so far.
	pub async fn executions(&self) -> u64 {
		self.ledger.lock().await.executions
	}

	/// Contract `account` currently delegates to on `chain_id`.
	pub async fn delegation_of(&self, account: Address, chain_id: u64) -> Option<Address> {
		self.ledger
			.lock()
			.await
			.delegations
			.get(&(account, chain_id))
			.copied()
	}

	fn check_network(&self, chain_id: u64) -> Result<(), SettlementError> {
		if self.network_ids.contains(&chain_id) {
			Ok(())
		} else {
			Err(SettlementError::InvalidParameter(format!(
				"chain {} is not served by this settler",
				chain_id
			)))
		}
	}
}

fn now() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or_default()
}

/// Configuration schema for the local settler.
///
/// ```toml
/// [settlement.implementations.local]
/// network_ids = [31337]
/// ```
pub struct LocalSettlerSchema;

impl LocalSettlerSchema {
	/// Static validation method for use before instance creation
	pub fn validate_config(config: &toml::Value) -> Result<(), ValidationError> {
		let instance = Self;
		instance.validate(config)
	}
}

impl ConfigSchema for LocalSettlerSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![Field::new(
				"network_ids",
				FieldType::Array(Box::new(FieldType::Integer {
					min: Some(1),
					max: None,
				})),
			)],
			vec![],
		);
		schema.validate(config)
	}
}

#[async_trait]
impl OriginSettlerInterface for LocalSettler {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LocalSettlerSchema)
	}

	fn supported_networks(&self) -> &[u64] {
		&self.network_ids
	}

	async fn connect(&self, chain_id: u64) -> Result<(), SettlementError> {
		self.check_network(chain_id)?;
		match self.pinned.get(&chain_id) {
			Some(expected) if *expected != self.type_hash => Err(SettlementError::AbiMismatch(
				format!(
					"settler order data type {} does not match configured {}",
					self.type_hash, expected
				),
			)),
			_ => Ok(()),
		}
	}

	async fn open(&self, payload: &SubmissionPayload) -> Result<TransactionHash, SettlementError> {
		let chain_id = payload.chain_id();
		self.check_network(chain_id)?;

		// Round-trip through calldata so the settler sees exactly what a chain would.
		let calldata = encode_open_call(self.type_hash, payload);
		let (order_type, decoded) = decode_open_call(&calldata)?;

		if order_type != self.type_hash {
			return Err(SettlementError::Rejected("unknown order data type".to_string()));
		}
		if u64::from(decoded.fill_deadline) < now() {
			return Err(SettlementError::Rejected("fill deadline has passed".to_string()));
		}

		let intent = &decoded.intent;
		if !verify_call_intent(intent) {
			return Err(SettlementError::Rejected("invalid intent signature".to_string()));
		}

		let key = (intent.user, chain_id);
		let mut ledger = self.ledger.lock().await;

		if ledger
			.consumed
			.get(&key)
			.is_some_and(|used| used.contains(&intent.nonce))
		{
			return Err(SettlementError::Rejected(format!(
				"nonce {} already used",
				intent.nonce
			)));
		}

		if let Some(authorization) = &decoded.authorization {
			if authorization.chain_id != chain_id {
				return Err(SettlementError::Rejected(
					"authorization is for another chain".to_string(),
				));
			}
			match recover_authority(authorization) {
				Ok(authority) if authority == intent.user => {},
				_ => {
					return Err(SettlementError::Rejected(
						"invalid authorization signature".to_string(),
					))
				},
			}
			let expected = ledger.delegation_nonces.get(&key).copied().unwrap_or(0);
			if authorization.nonce != expected {
				return Err(SettlementError::Rejected(format!(
					"stale authorization nonce {}, expected {}",
					authorization.nonce, expected
				)));
			}
			ledger
				.delegations
				.insert(key, authorization.contract_address);
			ledger.delegation_nonces.insert(key, expected + 1);
		}

		ledger.consumed.entry(key).or_default().insert(intent.nonce);
		ledger.executions += 1;
		ledger.block_number += 1;

		let mut preimage = calldata;
		preimage.extend_from_slice(&ledger.block_number.to_be_bytes());
		let tx_hash = TransactionHash::from(keccak256(&preimage));
		let receipt = SettlementReceipt {
			chain_id,
			tx_hash: tx_hash.clone(),
			block_number: ledger.block_number,
			order_id: Some(keccak256(&preimage[..preimage.len() - 8])),
			delegated_to: decoded
				.authorization
				.as_ref()
				.map(|authorization| authorization.contract_address),
		};
		ledger.receipts.insert(tx_hash.clone(), receipt);

		tracing::debug!(
			chain_id,
			tx_hash = %tx_hash,
			calls = intent.calls.len(),
			"Executed payload locally"
		);
		Ok(tx_hash)
	}

	async fn await_settlement(
		&self,
		chain_id: u64,
		tx_hash: &TransactionHash,
	) -> Result<SettlementReceipt, SettlementError> {
		self.ledger
			.lock()
			.await
			.receipts
			.get(tx_hash)
			.filter(|receipt| receipt.chain_id == chain_id)
			.cloned()
			.ok_or_else(|| SettlementError::Rejected(format!("unknown transaction {}", tx_hash)))
	}

	async fn next_nonce(&self, account: Address, chain_id: u64) -> Result<u64, SettlementError> {
		self.check_network(chain_id)?;
		Ok(self
			.ledger
			.lock()
			.await
			.consumed
			.get(&(account, chain_id))
			.and_then(|used| used.iter().max())
			.map_or(0, |max| max + 1))
	}

	async fn delegation_nonce(
		&self,
		account: Address,
		chain_id: u64,
	) -> Result<u64, SettlementError> {
		self.check_network(chain_id)?;
		Ok(self
			.ledger
			.lock()
			.await
			.delegation_nonces
			.get(&(account, chain_id))
			.copied()
			.unwrap_or(0))
	}
}

/// Factory function to create a local settler from configuration.
///
/// Networks with a pinned `order_data_type` are checked against this settler's
/// type hash on connect, as the EVM settler does.
pub fn create_local_settler(
	config: &toml::Value,
	networks: &NetworksConfig,
	_private_key: &SecretString,
) -> Result<Box<dyn OriginSettlerInterface>, SettlementError> {
	LocalSettlerSchema::validate_config(config)
		.map_err(|e| SettlementError::InvalidParameter(format!("Invalid configuration: {}", e)))?;

	let network_ids: Vec<u64> = config
		.get("network_ids")
		.and_then(|v| v.as_array())
		.map(|arr| arr.iter().filter_map(|v| v.as_integer().map(|i| i as u64)).collect())
		.unwrap_or_default();

	let mut settler = LocalSettler::new(network_ids.clone());
	for chain_id in network_ids {
		if let Some(pinned) = super::evm::pinned_type_hash(networks, chain_id)? {
			settler = settler.with_pinned_type(chain_id, pinned);
		}
	}
	Ok(Box::new(settler))
}

/// Registry for the local settler implementation.
pub struct Registry;

impl xchain_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "local";
	type Factory = crate::SettlerFactory;

	fn factory() -> Self::Factory {
		create_local_settler
	}
}

impl crate::SettlerRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use xchain_types::{Asset, CallByUser, Signature, U256};

	fn unsigned_payload(fill_deadline: u32) -> SubmissionPayload {
		let intent = CallByUser {
			user: Address::repeat_byte(1),
			nonce: 0,
			asset: Asset::none(),
			chain_id: 31337,
			signature: Signature::new(U256::from(1u64), U256::from(1u64), false),
			calls: vec![],
		};
		SubmissionPayload::new(None, intent).with_fill_deadline(fill_deadline)
	}

	#[tokio::test]
	async fn test_forged_signature_rejected() {
		let settler = LocalSettler::new(vec![31337]);
		let err = settler.open(&unsigned_payload(u32::MAX)).await.unwrap_err();
		assert_eq!(err, SettlementError::Rejected("invalid intent signature".into()));
		assert_eq!(settler.executions().await, 0);
	}

	#[tokio::test]
	async fn test_expired_deadline_rejected() {
		let settler = LocalSettler::new(vec![31337]);
		let err = settler.open(&unsigned_payload(1)).await.unwrap_err();
		assert_eq!(err, SettlementError::Rejected("fill deadline has passed".into()));
	}

	#[tokio::test]
	async fn test_unknown_chain_refused() {
		let settler = LocalSettler::new(vec![1]);
		assert!(matches!(
			settler.connect(31337).await,
			Err(SettlementError::InvalidParameter(_))
		));
		assert!(settler.connect(1).await.is_ok());
	}

	#[tokio::test]
	async fn test_factory_reads_pinned_type() {
		let mut networks = NetworksConfig::new();
		networks.insert(
			31337,
			xchain_types::NetworkConfig {
				rpc_url: "http://127.0.0.1:8545".to_string(),
				origin_settler_address: Address::repeat_byte(2),
				delegate_address: None,
				order_data_type: Some(format!("{}", B256::repeat_byte(9))),
			},
		);
		let config: toml::Value = toml::from_str("network_ids = [31337]").unwrap();
		let settler = create_local_settler(&config, &networks, &SecretString::from("")).unwrap();

		assert_eq!(settler.supported_networks(), &[31337]);
		assert!(matches!(
			settler.connect(31337).await,
			Err(SettlementError::AbiMismatch(_))
		));
	}

	#[test]
	fn test_type_hash_is_stable() {
		assert_eq!(order_data_type_hash(), keccak256(ORDER_DATA_TYPE.as_bytes()));
	}
}
