//! OriginSettler ABI bindings.
//!
//! The settler's `open` entry point takes an ERC-7683 `OnchainCrossChainOrder`
//! whose `orderData` is `abi.encode(CallByUser, EIP7702AuthData, Asset)`.
//! This module owns that encoding in both directions so that every component
//! agrees on field order and widths.

use crate::intent as model;
use crate::{Address, LogEntry, Signature, B256, U256};
use alloy_primitives::Bytes;
use alloy_sol_types::{sol, SolCall, SolEvent, SolValue};
use thiserror::Error;

sol! {
	/// Value moved by an intent.
	struct Asset {
		address token;
		uint256 amount;
	}

	/// Single call executed for the user.
	struct Call {
		address target;
		bytes callData;
		uint256 value;
	}

	/// Signed call intent.
	struct CallByUser {
		address user;
		uint256 nonce;
		Asset asset;
		uint64 chainId;
		bytes signature;
		Call[] calls;
	}

	/// Signed EIP-7702 authorization as carried in order data.
	struct Authorization {
		uint256 chainId;
		address codeAddress;
		uint256 nonce;
		bytes signature;
	}

	struct EIP7702AuthData {
		Authorization[] authlist;
	}

	/// ERC-7683 on-chain order.
	struct OnchainCrossChainOrder {
		uint32 fillDeadline;
		bytes32 orderDataType;
		bytes orderData;
	}

	struct Output {
		bytes32 token;
		uint256 amount;
		bytes32 recipient;
		uint256 chainId;
	}

	struct FillInstruction {
		uint64 destinationChainId;
		bytes32 destinationSettler;
		bytes originData;
	}

	struct ResolvedCrossChainOrder {
		address user;
		uint256 originChainId;
		uint32 openDeadline;
		uint32 fillDeadline;
		bytes32 orderId;
		Output[] maxSpent;
		Output[] minReceived;
		FillInstruction[] fillInstructions;
	}

	/// Origin-chain entry point of the settlement protocol.
	interface IOriginSettler {
		event Open(bytes32 indexed orderId, ResolvedCrossChainOrder resolvedOrder);
		event Requested7702Delegation(EIP7702AuthData authData);

		function ORDER_DATA_TYPE_HASH() external view returns (bytes32);
		function open(OnchainCrossChainOrder calldata order) external;
	}
}

/// Errors raised when data does not match the settler ABI.
#[derive(Debug, Error)]
pub enum AbiError {
	/// Bytes could not be decoded as the expected ABI type.
	#[error("ABI decode failed for {context}: {message}")]
	Decode { context: String, message: String },
	/// A value does not fit the width the ABI or the client expects.
	#[error("Value out of range for {field}: {value}")]
	OutOfRange { field: String, value: String },
	/// A signature field does not hold a 65-byte ECDSA signature.
	#[error("Malformed signature in {0}")]
	Signature(String),
}

impl From<&model::Asset> for Asset {
	fn from(asset: &model::Asset) -> Self {
		Asset {
			token: asset.token,
			amount: asset.amount,
		}
	}
}

impl From<&Asset> for model::Asset {
	fn from(asset: &Asset) -> Self {
		model::Asset::new(asset.token, asset.amount)
	}
}

impl From<&model::Call> for Call {
	fn from(call: &model::Call) -> Self {
		Call {
			target: call.target,
			callData: call.data.clone(),
			value: call.value,
		}
	}
}

impl From<&Call> for model::Call {
	fn from(call: &Call) -> Self {
		model::Call::new(call.target, call.callData.clone(), call.value)
	}
}

impl From<&model::CallByUser> for CallByUser {
	fn from(intent: &model::CallByUser) -> Self {
		CallByUser {
			user: intent.user,
			nonce: U256::from(intent.nonce),
			asset: (&intent.asset).into(),
			chainId: intent.chain_id,
			signature: signature_bytes(&intent.signature),
			calls: intent.calls.iter().map(Call::from).collect(),
		}
	}
}

impl TryFrom<&CallByUser> for model::CallByUser {
	type Error = AbiError;

	fn try_from(intent: &CallByUser) -> Result<Self, Self::Error> {
		Ok(model::CallByUser {
			user: intent.user,
			nonce: u256_to_u64("CallByUser.nonce", intent.nonce)?,
			asset: (&intent.asset).into(),
			chain_id: intent.chainId,
			signature: parse_signature("CallByUser.signature", &intent.signature)?,
			calls: intent.calls.iter().map(model::Call::from).collect(),
		})
	}
}

impl From<&model::Authorization> for Authorization {
	fn from(auth: &model::Authorization) -> Self {
		Authorization {
			chainId: U256::from(auth.chain_id),
			codeAddress: auth.contract_address,
			nonce: U256::from(auth.nonce),
			signature: signature_bytes(&auth.signature),
		}
	}
}

impl TryFrom<&Authorization> for model::Authorization {
	type Error = AbiError;

	fn try_from(auth: &Authorization) -> Result<Self, Self::Error> {
		Ok(model::Authorization {
			chain_id: u256_to_u64("Authorization.chainId", auth.chainId)?,
			contract_address: auth.codeAddress,
			nonce: u256_to_u64("Authorization.nonce", auth.nonce)?,
			signature: parse_signature("Authorization.signature", &auth.signature)?,
		})
	}
}

/// Serializes a signature as the 65-byte `r || s || v` form the settler expects.
pub fn signature_bytes(signature: &Signature) -> Bytes {
	Bytes::from(signature.as_bytes().to_vec())
}

fn parse_signature(field: &str, bytes: &Bytes) -> Result<Signature, AbiError> {
	Signature::try_from(bytes.as_ref()).map_err(|_| AbiError::Signature(field.to_string()))
}

fn u256_to_u64(field: &str, value: U256) -> Result<u64, AbiError> {
	u64::try_from(value).map_err(|_| AbiError::OutOfRange {
		field: field.to_string(),
		value: value.to_string(),
	})
}

/// Encodes `(CallByUser, EIP7702AuthData, Asset)` as the order's `orderData`.
pub fn encode_order_data(payload: &model::SubmissionPayload) -> Bytes {
	let intent = CallByUser::from(&payload.intent);
	let auth_data = EIP7702AuthData {
		authlist: payload
			.authorization
			.iter()
			.map(Authorization::from)
			.collect(),
	};
	let origin_asset = Asset::from(&payload.origin_asset);

	(intent, auth_data, origin_asset).abi_encode_params().into()
}

/// Builds the ERC-7683 order wrapping a payload.
pub fn build_order(
	order_data_type: B256,
	payload: &model::SubmissionPayload,
) -> OnchainCrossChainOrder {
	OnchainCrossChainOrder {
		fillDeadline: payload.fill_deadline,
		orderDataType: order_data_type,
		orderData: encode_order_data(payload),
	}
}

/// Calldata for `IOriginSettler.open(order)`.
pub fn encode_open_call(order_data_type: B256, payload: &model::SubmissionPayload) -> Vec<u8> {
	IOriginSettler::openCall {
		order: build_order(order_data_type, payload),
	}
	.abi_encode()
}

/// Calldata for `IOriginSettler.ORDER_DATA_TYPE_HASH()`.
pub fn encode_order_data_type_call() -> Vec<u8> {
	IOriginSettler::ORDER_DATA_TYPE_HASHCall {}.abi_encode()
}

/// Decodes the return data of `ORDER_DATA_TYPE_HASH()`.
///
/// Anything other than a single `bytes32` word means the contract at the
/// configured address does not speak this ABI.
pub fn decode_order_data_type(data: &[u8]) -> Result<B256, AbiError> {
	if data.len() != 32 {
		return Err(AbiError::Decode {
			context: "ORDER_DATA_TYPE_HASH".to_string(),
			message: format!("expected 32 bytes of return data, got {}", data.len()),
		});
	}
	IOriginSettler::ORDER_DATA_TYPE_HASHCall::abi_decode_returns(data, true)
		.map(|ret| ret._0)
		.map_err(|e| AbiError::Decode {
			context: "ORDER_DATA_TYPE_HASH".to_string(),
			message: e.to_string(),
		})
}

/// Decodes `open(order)` calldata back into the order type hash and payload.
pub fn decode_open_call(calldata: &[u8]) -> Result<(B256, model::SubmissionPayload), AbiError> {
	let call = IOriginSettler::openCall::abi_decode(calldata, true).map_err(|e| AbiError::Decode {
		context: "open".to_string(),
		message: e.to_string(),
	})?;
	let order = call.order;
	let payload = decode_order_data(&order.orderData, order.fillDeadline)?;
	Ok((order.orderDataType, payload))
}

/// Decodes `orderData` into the client's payload type.
pub fn decode_order_data(
	order_data: &[u8],
	fill_deadline: u32,
) -> Result<model::SubmissionPayload, AbiError> {
	let (intent, auth_data, origin_asset) =
		<(CallByUser, EIP7702AuthData, Asset)>::abi_decode_params(order_data, true).map_err(
			|e| AbiError::Decode {
				context: "orderData".to_string(),
				message: e.to_string(),
			},
		)?;

	if auth_data.authlist.len() > 1 {
		return Err(AbiError::OutOfRange {
			field: "EIP7702AuthData.authlist".to_string(),
			value: auth_data.authlist.len().to_string(),
		});
	}
	let authorization = auth_data
		.authlist
		.first()
		.map(model::Authorization::try_from)
		.transpose()?;

	Ok(model::SubmissionPayload {
		authorization,
		intent: model::CallByUser::try_from(&intent)?,
		origin_asset: (&origin_asset).into(),
		fill_deadline,
	})
}

/// Finds the order id in the `Open` event emitted by `settler`, if any.
pub fn find_open_order_id(settler: Address, logs: &[LogEntry]) -> Result<Option<B256>, AbiError> {
	let Some(log) = logs.iter().find(|log| {
		log.address == settler && log.topics.first() == Some(&IOriginSettler::Open::SIGNATURE_HASH)
	}) else {
		return Ok(None);
	};

	let event = IOriginSettler::Open::decode_raw_log(log.topics.iter().copied(), &log.data, true)
		.map_err(|e| AbiError::Decode {
			context: "Open event".to_string(),
			message: e.to_string(),
		})?;
	Ok(Some(event.orderId))
}

/// Finds the delegation announced by `settler` in a `Requested7702Delegation`
/// event and returns the contract the account delegated to.
pub fn find_requested_delegation(
	settler: Address,
	logs: &[LogEntry],
) -> Result<Option<Address>, AbiError> {
	let Some(log) = logs.iter().find(|log| {
		log.address == settler
			&& log.topics.first() == Some(&IOriginSettler::Requested7702Delegation::SIGNATURE_HASH)
	}) else {
		return Ok(None);
	};

	let event = IOriginSettler::Requested7702Delegation::decode_raw_log(
		log.topics.iter().copied(),
		&log.data,
		true,
	)
	.map_err(|e| AbiError::Decode {
		context: "Requested7702Delegation event".to_string(),
		message: e.to_string(),
	})?;
	Ok(event
		.authData
		.authlist
		.first()
		.map(|authorization| authorization.codeAddress))
}
