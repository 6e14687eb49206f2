//! Network configuration types for multi-chain operation.
//!
//! This module defines the per-chain settings the client needs: the endpoint of
//! the chain node, the origin settler contract receiving payloads, and the
//! implementation contract accounts delegate to.

use crate::Address;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Configuration for a single blockchain network.
///
/// # Fields
///
/// * `rpc_url` - Node endpoint; `http(s)://` or `ws(s)://`
/// * `origin_settler_address` - Address of the OriginSettler contract
/// * `delegate_address` - Default implementation contract for EIP-7702 delegation
/// * `order_data_type` - Optional pinned `ORDER_DATA_TYPE_HASH` of the settler ABI version
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
	pub rpc_url: String,
	pub origin_settler_address: Address,
	pub delegate_address: Option<Address>,
	#[serde(default)]
	pub order_data_type: Option<String>,
}

/// Networks configuration mapping chain IDs to their configurations.
///
/// TOML tables cannot have numeric keys, so chain IDs arrive as strings and are
/// converted by [`deserialize_networks`].
pub type NetworksConfig = HashMap<u64, NetworkConfig>;

/// Deserializes a networks table keyed by chain ID strings.
///
/// # Errors
///
/// Returns a deserialization error if a key is not a valid u64 chain ID or a
/// network entry is malformed.
pub fn deserialize_networks<'de, D>(deserializer: D) -> Result<NetworksConfig, D::Error>
where
	D: Deserializer<'de>,
{
	let string_map: HashMap<String, NetworkConfig> = HashMap::deserialize(deserializer)?;
	let mut result = HashMap::new();

	for (key, value) in string_map {
		let chain_id = key
			.parse::<u64>()
			.map_err(|e| serde::de::Error::custom(format!("Invalid chain_id '{}': {}", key, e)))?;
		result.insert(chain_id, value);
	}

	Ok(result)
}
