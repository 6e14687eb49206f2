//! Authorization and call intent construction for the xchain intent client.
//!
//! This module turns caller input into signed values: EIP-7702 delegation
//! authorizations and `CallByUser` intents. Each value is signed over a single
//! canonical encoding, and the same encoding functions are used to verify a
//! signature after the fact. All input validation happens before the signer is
//! touched, so a malformed request never produces a signature.

use thiserror::Error;
use xchain_account::AccountError;

pub mod authorization;
pub mod call_intent;
pub mod encoding;
pub mod request;

pub use authorization::build_authorization;
pub use call_intent::build_call_intent;
pub use encoding::{
	authorization_encoding, call_intent_encoding, recover_authority, verify_authorization,
	verify_call_intent,
};
pub use request::{
	AssetRequest, CallRequest, DelegationParams, DelegationRequest, IntentParams, IntentRequest,
};

/// Errors that can occur while building or verifying intents.
#[derive(Debug, Error)]
pub enum IntentError {
	/// Input is malformed or out of range. Detected before any signing.
	#[error("Invalid parameter: {0}")]
	InvalidParameter(String),
	/// The signer could not produce a signature.
	#[error("Signing failure: {0}")]
	SigningFailure(String),
}

impl From<AccountError> for IntentError {
	fn from(err: AccountError) -> Self {
		IntentError::SigningFailure(err.to_string())
	}
}

#[cfg(test)]
pub(crate) mod test_support {
	use async_trait::async_trait;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;
	use xchain_account::{AccountError, AccountInterface, AccountService};
	use xchain_types::{Address, ConfigSchema, Schema, Signature, ValidationError, B256, U256};

	pub const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

	pub fn local_signer() -> AccountService {
		let config: toml::Value =
			toml::from_str(&format!("private_key = \"{}\"", ANVIL_KEY)).unwrap();
		AccountService::new(xchain_account::implementations::local::create_account(&config).unwrap())
	}

	struct NoSchema;

	impl ConfigSchema for NoSchema {
		fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
			Schema::new(vec![], vec![]).validate(config)
		}
	}

	/// Signer that counts signing requests and optionally refuses them.
	pub struct CountingSigner {
		pub address: Address,
		pub signed: Arc<AtomicUsize>,
		pub refuse: bool,
	}

	#[async_trait]
	impl AccountInterface for CountingSigner {
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(NoSchema)
		}

		async fn address(&self) -> Result<Address, AccountError> {
			Ok(self.address)
		}

		async fn sign_hash(&self, _hash: &B256) -> Result<Signature, AccountError> {
			self.signed.fetch_add(1, Ordering::SeqCst);
			if self.refuse {
				return Err(AccountError::SigningFailed("key store locked".to_string()));
			}
			Ok(Signature::new(U256::from(1u64), U256::from(1u64), false))
		}
	}

	pub fn counting_signer(address: Address, refuse: bool) -> (AccountService, Arc<AtomicUsize>) {
		let signed = Arc::new(AtomicUsize::new(0));
		let signer = CountingSigner {
			address,
			signed: Arc::clone(&signed),
			refuse,
		};
		(AccountService::new(Box::new(signer)), signed)
	}
}
