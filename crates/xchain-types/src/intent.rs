//! Authorization and call intent types.
//!
//! These are the values a user signs and hands to the origin settler: an
//! EIP-7702 delegation authorization scoped to one chain, and a `CallByUser`
//! intent describing an asset and an ordered batch of calls executed on the
//! user's behalf. Both are produced by the builders in `xchain-intent` and are
//! treated as immutable once signed.

use crate::{Address, Bytes, Signature, TransactionHash, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fungible value moved as part of an intent.
///
/// The zero address denotes the chain's native currency. The amount is held as
/// an unsigned 256-bit integer in the asset's smallest unit, so it can never be
/// negative once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset {
	/// Token contract address, or the zero address for native currency.
	pub token: Address,
	/// Amount in the token's smallest unit.
	pub amount: U256,
}

impl Asset {
	pub fn new(token: Address, amount: U256) -> Self {
		Self { token, amount }
	}

	/// Native currency of the chain.
	pub fn native(amount: U256) -> Self {
		Self::new(Address::ZERO, amount)
	}

	/// Zero-amount placeholder for intents that move no value.
	pub fn none() -> Self {
		Self::native(U256::ZERO)
	}
}

/// A single call executed on behalf of the user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Call {
	/// Contract (or account) being called.
	pub target: Address,
	/// Calldata passed to the target.
	pub data: Bytes,
	/// Native value forwarded with the call.
	pub value: U256,
}

impl Call {
	pub fn new(target: Address, data: impl Into<Bytes>, value: U256) -> Self {
		Self {
			target,
			data: data.into(),
			value,
		}
	}
}

/// A caller-supplied nonce together with what the caller knows about it.
///
/// Nonce allocation belongs to an external sequencer; builders only refuse
/// values that are already known to be spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Nonce {
	/// Next unused value, reserved for this request.
	Reserved(u64),
	/// Value known to have been consumed by an earlier submission.
	Consumed(u64),
}

impl Nonce {
	pub fn value(&self) -> u64 {
		match self {
			Nonce::Reserved(n) | Nonce::Consumed(n) => *n,
		}
	}

	pub fn is_consumed(&self) -> bool {
		matches!(self, Nonce::Consumed(_))
	}
}

impl From<u64> for Nonce {
	fn from(value: u64) -> Self {
		Nonce::Reserved(value)
	}
}

impl fmt::Display for Nonce {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Nonce::Reserved(n) => write!(f, "{}", n),
			Nonce::Consumed(n) => write!(f, "{} (consumed)", n),
		}
	}
}

/// Signed EIP-7702 delegation of an account's code to `contract_address`.
///
/// The signature covers `0x05 || rlp([chain_id, contract_address, nonce])`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
	/// Chain the delegation applies to.
	pub chain_id: u64,
	/// Implementation contract the account delegates execution to.
	pub contract_address: Address,
	/// Account nonce the delegation is bound to.
	pub nonce: u64,
	/// Signature by the delegating account.
	pub signature: Signature,
}

/// Signed cross-chain call intent.
///
/// The signature covers the ABI encoding of
/// `(user, nonce, asset, chain_id, calls)`; call order is execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallByUser {
	/// Account the calls execute for. Always the signer's own address.
	pub user: Address,
	/// Intent nonce, independent of the account's transaction nonce space.
	pub nonce: u64,
	/// Value moved as part of the intent.
	pub asset: Asset,
	/// Chain on which the intent is authorized.
	pub chain_id: u64,
	/// Signature by `user`.
	pub signature: Signature,
	/// Ordered calls. Empty for an authorization-only intent.
	pub calls: Vec<Call>,
}

impl CallByUser {
	/// True when the intent carries no calls and only exists to deliver a delegation.
	pub fn is_authorization_only(&self) -> bool {
		self.calls.is_empty()
	}
}

/// Everything sent to the origin settler in a single `open` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionPayload {
	/// Optional delegation delivered alongside the intent.
	pub authorization: Option<Authorization>,
	/// The signed intent.
	pub intent: CallByUser,
	/// Asset locked on the origin chain in exchange for execution.
	pub origin_asset: Asset,
	/// Unix timestamp after which the order may no longer be filled.
	pub fill_deadline: u32,
}

impl SubmissionPayload {
	/// Creates a payload that locks the intent's own asset on the origin chain.
	pub fn new(authorization: Option<Authorization>, intent: CallByUser) -> Self {
		let origin_asset = intent.asset.clone();
		Self {
			authorization,
			intent,
			origin_asset,
			fill_deadline: u32::MAX,
		}
	}

	pub fn with_fill_deadline(mut self, fill_deadline: u32) -> Self {
		self.fill_deadline = fill_deadline;
		self
	}

	pub fn account(&self) -> Address {
		self.intent.user
	}

	pub fn chain_id(&self) -> u64 {
		self.intent.chain_id
	}
}

/// Reference to an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
	/// Chain the payload was opened on.
	pub chain_id: u64,
	/// Transaction that carried the payload.
	pub tx_hash: TransactionHash,
	/// Block in which the transaction was included.
	pub block_number: u64,
	/// Order id assigned by the settler, when it emitted one.
	pub order_id: Option<B256>,
	/// Contract the account delegated to, when the settler reported a delegation.
	pub delegated_to: Option<Address>,
}
