//! Transaction delivery types for the client.
//!
//! This module defines the chain-agnostic transaction, hash, receipt and log
//! types exchanged between the settler implementations and the delivery layer.

use crate::{with_0x_prefix, Address, B256, U256};
use alloy_rpc_types::TransactionRequest;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Blockchain transaction hash representation.
///
/// Stores transaction hashes as raw bytes to support different blockchain formats.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHash(pub Vec<u8>);

impl fmt::Display for TransactionHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", with_0x_prefix(&hex::encode(&self.0)))
	}
}

impl From<B256> for TransactionHash {
	fn from(hash: B256) -> Self {
		Self(hash.0.to_vec())
	}
}

/// An unsigned transaction to be signed and sent by a delivery implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
	/// Recipient. `None` for contract creation.
	pub to: Option<Address>,
	/// Calldata.
	pub data: Vec<u8>,
	/// Native value sent with the transaction.
	pub value: U256,
	/// Chain the transaction targets.
	pub chain_id: u64,
	/// Optional explicit gas limit; estimated by the provider otherwise.
	pub gas_limit: Option<u64>,
}

impl Transaction {
	/// Creates a call to `to` with the given calldata and no value.
	pub fn call(chain_id: u64, to: Address, data: Vec<u8>) -> Self {
		Self {
			to: Some(to),
			data,
			value: U256::ZERO,
			chain_id,
			gas_limit: None,
		}
	}
}

impl From<Transaction> for TransactionRequest {
	fn from(tx: Transaction) -> Self {
		let mut request = TransactionRequest::default()
			.input(tx.data.into())
			.value(tx.value);
		if let Some(to) = tx.to {
			request = request.to(to);
		}
		if let Some(gas) = tx.gas_limit {
			request = request.gas_limit(gas);
		}
		request.chain_id = Some(tx.chain_id);
		request
	}
}

/// A log emitted by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
	/// Emitting contract.
	pub address: Address,
	/// Indexed topics, event signature first.
	pub topics: Vec<B256>,
	/// Non-indexed event data.
	pub data: Vec<u8>,
}

/// Transaction receipt containing execution details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
	/// The hash of the transaction.
	pub hash: TransactionHash,
	/// The block number where the transaction was included.
	pub block_number: u64,
	/// Whether the transaction executed successfully.
	pub success: bool,
	/// Logs emitted during execution.
	pub logs: Vec<LogEntry>,
}
