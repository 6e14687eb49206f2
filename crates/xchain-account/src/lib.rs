//! Account management module for the xchain intent client.
//!
//! This module provides the signer capability consumed by the authorization and
//! intent builders: an account address and deterministic signatures over
//! canonical message encodings. Key storage is pluggable; implementations are
//! selected by name from configuration.

use alloy_primitives::keccak256;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use xchain_types::{Address, ConfigSchema, ImplementationRegistry, Signature, B256};

/// Re-export implementations
pub mod implementations {
	pub mod local;
}

/// Errors that can occur during account operations.
#[derive(Debug, Error)]
pub enum AccountError {
	/// Error that occurs when signing operations fail.
	#[error("Signing failed: {0}")]
	SigningFailed(String),
	/// Error that occurs when a cryptographic key is invalid or malformed.
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	/// Error that occurs when interacting with the account implementation.
	#[error("Implementation error: {0}")]
	Implementation(String),
}

/// Trait defining the interface for account implementations.
///
/// Implementations wrap key material that never leaves them. Signing is
/// deterministic for a given key and digest.
#[async_trait]
pub trait AccountInterface: Send + Sync {
	/// Returns the configuration schema for this account implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Retrieves the address derived from this account's key material.
	async fn address(&self) -> Result<Address, AccountError>;

	/// Signs a 32-byte digest without any prefixing.
	async fn sign_hash(&self, hash: &B256) -> Result<Signature, AccountError>;

	/// Signs the keccak256 digest of a canonically encoded message.
	///
	/// No EIP-191 prefix is applied: callers pass the exact bytes the verifier
	/// hashes, so two messages collide only if their encodings collide.
	async fn sign_message(&self, message: &[u8]) -> Result<Signature, AccountError> {
		self.sign_hash(&keccak256(message)).await
	}

	/// Whether concurrent signing requests are safe.
	///
	/// Remote or hardware-backed key stores that cannot handle overlapping
	/// requests return false and the [`AccountService`] serializes access.
	fn is_reentrant(&self) -> bool {
		true
	}
}

/// Type alias for account factory functions.
pub type AccountFactory = fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>;

/// Registry trait for account implementations.
pub trait AccountRegistry: ImplementationRegistry<Factory = AccountFactory> {}

/// Get all registered account implementations.
///
/// Returns a vector of (name, factory) tuples for all available account implementations.
pub fn get_all_implementations() -> Vec<(&'static str, AccountFactory)> {
	use implementations::local;

	vec![(local::Registry::NAME, local::Registry::factory())]
}

/// Service that manages account operations.
///
/// Wraps an account implementation and serializes signing for implementations
/// that are not reentrant.
pub struct AccountService {
	implementation: Box<dyn AccountInterface>,
	signing_lock: Mutex<()>,
}

impl AccountService {
	pub fn new(implementation: Box<dyn AccountInterface>) -> Self {
		Self {
			implementation,
			signing_lock: Mutex::new(()),
		}
	}

	/// Retrieves the address associated with the managed account.
	pub async fn get_address(&self) -> Result<Address, AccountError> {
		self.implementation.address().await
	}

	/// Signs a digest with the managed account.
	pub async fn sign_hash(&self, hash: &B256) -> Result<Signature, AccountError> {
		let _guard = self.serialize().await;
		self.implementation.sign_hash(hash).await
	}

	/// Signs the keccak256 digest of `message` with the managed account.
	pub async fn sign_message(&self, message: &[u8]) -> Result<Signature, AccountError> {
		let _guard = self.serialize().await;
		self.implementation.sign_message(message).await
	}

	async fn serialize(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
		if self.implementation.is_reentrant() {
			None
		} else {
			Some(self.signing_lock.lock().await)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;
	use std::time::Duration;
	use xchain_types::{Schema, ValidationError, U256};

	struct NoSchema;

	impl ConfigSchema for NoSchema {
		fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
			Schema::new(vec![], vec![]).validate(config)
		}
	}

	/// Key store that panics if two signatures are requested at once.
	struct SingleSlotSigner {
		in_flight: Arc<AtomicUsize>,
	}

	#[async_trait]
	impl AccountInterface for SingleSlotSigner {
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(NoSchema)
		}

		async fn address(&self) -> Result<Address, AccountError> {
			Ok(Address::ZERO)
		}

		async fn sign_hash(&self, _hash: &B256) -> Result<Signature, AccountError> {
			assert_eq!(self.in_flight.fetch_add(1, Ordering::SeqCst), 0);
			tokio::time::sleep(Duration::from_millis(5)).await;
			self.in_flight.fetch_sub(1, Ordering::SeqCst);
			Ok(Signature::new(U256::from(1u64), U256::from(1u64), false))
		}

		fn is_reentrant(&self) -> bool {
			false
		}
	}

	#[tokio::test]
	async fn test_non_reentrant_signer_is_serialized() {
		let service = Arc::new(AccountService::new(Box::new(SingleSlotSigner {
			in_flight: Arc::new(AtomicUsize::new(0)),
		})));

		let tasks: Vec<_> = (0..4u8)
			.map(|i| {
				let service = Arc::clone(&service);
				tokio::spawn(async move { service.sign_message(&[i]).await })
			})
			.collect();

		for task in tasks {
			task.await.unwrap().unwrap();
		}
	}
}
