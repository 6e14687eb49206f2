//! Canonical encodings and signature verification.
//!
//! Signatures are always taken over `keccak256(encoding)`. Builders and
//! verifiers share these functions, so the bytes a signer sees are exactly the
//! bytes a verifier reconstructs.

use crate::IntentError;
use alloy_eips::eip7702;
use alloy_primitives::keccak256;
use alloy_rlp::Encodable;
use alloy_sol_types::SolValue;
use xchain_types::origin_settler;
use xchain_types::{Address, Asset, Authorization, Call, CallByUser, Signature, U256};

/// EIP-7702 authorization message prefix.
pub const AUTHORIZATION_MAGIC: u8 = 0x05;

/// Encodes `0x05 || rlp([chain_id, contract_address, nonce])`.
pub fn authorization_encoding(chain_id: u64, contract_address: Address, nonce: u64) -> Vec<u8> {
	let tuple = eip7702::Authorization {
		chain_id,
		address: contract_address,
		nonce,
	};
	let mut out = Vec::with_capacity(1 + tuple.length());
	out.push(AUTHORIZATION_MAGIC);
	tuple.encode(&mut out);
	out
}

/// Encodes the signed fields of a `CallByUser`.
///
/// The result is the ABI parameter encoding of
/// `(address user, uint256 nonce, Asset asset, uint64 chainId, Call[] calls)`.
/// `calls: None` is a malformed request and has no encoding; `Some(&[])` encodes
/// an authorization-only intent.
pub fn call_intent_encoding(
	user: Address,
	nonce: u64,
	asset: &Asset,
	chain_id: u64,
	calls: Option<&[Call]>,
) -> Result<Vec<u8>, IntentError> {
	let calls = calls.ok_or_else(|| {
		IntentError::InvalidParameter(
			"calls must be present; pass an empty list for an authorization-only intent"
				.to_string(),
		)
	})?;

	let abi_calls: Vec<origin_settler::Call> = calls.iter().map(origin_settler::Call::from).collect();
	Ok((
		user,
		U256::from(nonce),
		origin_settler::Asset::from(asset),
		chain_id,
		abi_calls,
	)
		.abi_encode_params())
}

/// Recovers the account that signed an authorization.
pub fn recover_authority(authorization: &Authorization) -> Result<Address, IntentError> {
	let encoding = authorization_encoding(
		authorization.chain_id,
		authorization.contract_address,
		authorization.nonce,
	);
	recover(&authorization.signature, &encoding)
}

/// Returns true when `authorization` was signed by `expected`.
pub fn verify_authorization(authorization: &Authorization, expected: Address) -> bool {
	recover_authority(authorization).is_ok_and(|signer| signer == expected)
}

/// Returns true when the intent's signature was produced by its own `user`.
pub fn verify_call_intent(intent: &CallByUser) -> bool {
	let Ok(encoding) = call_intent_encoding(
		intent.user,
		intent.nonce,
		&intent.asset,
		intent.chain_id,
		Some(&intent.calls),
	) else {
		return false;
	};
	recover(&intent.signature, &encoding).is_ok_and(|signer| signer == intent.user)
}

fn recover(signature: &Signature, encoding: &[u8]) -> Result<Address, IntentError> {
	signature
		.recover_address_from_prehash(&keccak256(encoding))
		.map_err(|e| IntentError::InvalidParameter(format!("unrecoverable signature: {}", e)))
}
