//! Textual intent requests.
//!
//! Requests arrive as JSON with signed integers and hex strings. Conversion into
//! [`IntentParams`] rejects negative numbers, malformed addresses and amounts
//! before anything is signed. A missing `calls` field is carried through as
//! `None` so the intent builder can refuse it.
//!
//! ```json
//! {
//!   "chain_id": 31337,
//!   "nonce": 0,
//!   "asset": { "token": "0x0000000000000000000000000000000000000000", "amount": "0" },
//!   "calls": [],
//!   "delegation": { "contract": "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512" }
//! }
//! ```

use crate::IntentError;
use serde::{Deserialize, Serialize};
use xchain_types::{parse_address, parse_amount, without_0x_prefix, Address, Asset, Bytes, Call, U256};

/// Asset as written in a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRequest {
	pub token: String,
	pub amount: String,
}

/// Call as written in a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
	pub target: String,
	#[serde(default)]
	pub data: Option<String>,
	#[serde(default)]
	pub value: Option<String>,
}

/// Delegation section of a request.
///
/// Both fields are optional: the contract defaults to the network's configured
/// delegate and the nonce to the account's current transaction count.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelegationRequest {
	#[serde(default)]
	pub contract: Option<String>,
	#[serde(default)]
	pub nonce: Option<i64>,
}

/// Intent request as read from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRequest {
	pub chain_id: i64,
	#[serde(default)]
	pub nonce: Option<i64>,
	pub asset: AssetRequest,
	#[serde(default)]
	pub calls: Option<Vec<CallRequest>>,
	#[serde(default)]
	pub delegation: Option<DelegationRequest>,
}

/// Validated delegation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationParams {
	pub contract: Option<Address>,
	pub nonce: Option<u64>,
}

/// Validated intent parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentParams {
	pub chain_id: u64,
	/// Intent nonce, or `None` to source it from the settler.
	pub nonce: Option<u64>,
	pub asset: Asset,
	pub calls: Option<Vec<Call>>,
	pub delegation: Option<DelegationParams>,
}

impl IntentRequest {
	pub fn from_json(json: &str) -> Result<Self, IntentError> {
		serde_json::from_str(json)
			.map_err(|e| IntentError::InvalidParameter(format!("malformed request: {}", e)))
	}

	/// Validates the request and converts it into typed parameters.
	pub fn into_params(self) -> Result<IntentParams, IntentError> {
		let chain_id = non_negative("chain_id", self.chain_id)?;
		let nonce = self
			.nonce
			.map(|n| non_negative("nonce", n))
			.transpose()?;

		let asset = Asset::new(
			address("asset.token", &self.asset.token)?,
			amount("asset.amount", &self.asset.amount)?,
		);

		let calls = self
			.calls
			.map(|calls| {
				calls
					.iter()
					.enumerate()
					.map(|(i, call)| call.to_call(i))
					.collect::<Result<Vec<_>, _>>()
			})
			.transpose()?;

		let delegation = self
			.delegation
			.map(|d| -> Result<DelegationParams, IntentError> {
				Ok(DelegationParams {
					contract: d
						.contract
						.as_deref()
						.map(|c| address("delegation.contract", c))
						.transpose()?,
					nonce: d
						.nonce
						.map(|n| non_negative("delegation.nonce", n))
						.transpose()?,
				})
			})
			.transpose()?;

		Ok(IntentParams {
			chain_id,
			nonce,
			asset,
			calls,
			delegation,
		})
	}
}

impl CallRequest {
	fn to_call(&self, index: usize) -> Result<Call, IntentError> {
		let target = address(&format!("calls[{}].target", index), &self.target)?;
		let data = match &self.data {
			Some(data) => hex::decode(without_0x_prefix(data)).map_err(|e| {
				IntentError::InvalidParameter(format!("calls[{}].data: {}", index, e))
			})?,
			None => Vec::new(),
		};
		let value = match &self.value {
			Some(value) => amount(&format!("calls[{}].value", index), value)?,
			None => U256::ZERO,
		};
		Ok(Call::new(target, Bytes::from(data), value))
	}
}

fn non_negative(field: &str, value: i64) -> Result<u64, IntentError> {
	u64::try_from(value)
		.map_err(|_| IntentError::InvalidParameter(format!("{} must not be negative: {}", field, value)))
}

fn address(field: &str, value: &str) -> Result<Address, IntentError> {
	parse_address(value).map_err(|e| IntentError::InvalidParameter(format!("{}: {}", field, e)))
}

fn amount(field: &str, value: &str) -> Result<U256, IntentError> {
	parse_amount(value).map_err(|e| IntentError::InvalidParameter(format!("{}: {}", field, e)))
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy_primitives::address;

	const TRANSFER: &str = r#"{
		"chain_id": 31337,
		"nonce": 2,
		"asset": { "token": "0x5FbDB2315678afecb367f032d93F642f64180aa3", "amount": "100" },
		"calls": [
			{ "target": "0x5FbDB2315678afecb367f032d93F642f64180aa3", "data": "0xa9059cbb", "value": "0" }
		],
		"delegation": { "contract": "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512", "nonce": 0 }
	}"#;

	fn parse(json: &str) -> Result<IntentParams, IntentError> {
		IntentRequest::from_json(json)?.into_params()
	}

	#[test]
	fn test_transfer_request_parses() {
		let params = parse(TRANSFER).unwrap();
		assert_eq!(params.chain_id, 31337);
		assert_eq!(params.nonce, Some(2));
		assert_eq!(params.asset.amount, U256::from(100u64));

		let calls = params.calls.unwrap();
		assert_eq!(calls.len(), 1);
		assert_eq!(calls[0].data.as_ref(), &[0xa9, 0x05, 0x9c, 0xbb]);

		let delegation = params.delegation.unwrap();
		assert_eq!(
			delegation.contract,
			Some(address!("e7f1725E7734CE288F8367e1Bb143E90bb3F0512"))
		);
		assert_eq!(delegation.nonce, Some(0));
	}

	#[test]
	fn test_empty_and_absent_calls_are_distinct() {
		let empty = parse(
			r#"{"chain_id": 1, "asset": {"token": "0x0000000000000000000000000000000000000000", "amount": "0"}, "calls": []}"#,
		)
		.unwrap();
		assert_eq!(empty.calls, Some(vec![]));

		let absent = parse(
			r#"{"chain_id": 1, "asset": {"token": "0x0000000000000000000000000000000000000000", "amount": "0"}}"#,
		)
		.unwrap();
		assert_eq!(absent.calls, None);
		assert_eq!(absent.nonce, None);
		assert_eq!(absent.delegation, None);
	}

	#[test]
	fn test_negative_values_rejected() {
		let negative_chain = TRANSFER.replace("\"chain_id\": 31337", "\"chain_id\": -1");
		assert!(matches!(parse(&negative_chain), Err(IntentError::InvalidParameter(_))));

		let negative_nonce = TRANSFER.replace("\"nonce\": 2", "\"nonce\": -2");
		assert!(matches!(parse(&negative_nonce), Err(IntentError::InvalidParameter(_))));

		let negative_amount = TRANSFER.replace("\"amount\": \"100\"", "\"amount\": \"-100\"");
		assert!(matches!(parse(&negative_amount), Err(IntentError::InvalidParameter(_))));
	}

	#[test]
	fn test_malformed_target_rejected() {
		let bad_target = TRANSFER.replace(
			"\"target\": \"0x5FbDB2315678afecb367f032d93F642f64180aa3\"",
			"\"target\": \"0x5FbDB23156\"",
		);
		let err = parse(&bad_target).unwrap_err();
		assert!(err.to_string().contains("calls[0].target"));
	}

	#[test]
	fn test_malformed_json_rejected() {
		assert!(matches!(
			IntentRequest::from_json("{ not json"),
			Err(IntentError::InvalidParameter(_))
		));
	}
}
