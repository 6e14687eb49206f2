//! Transaction delivery module for the xchain intent client.
//!
//! This module owns the chain connections. It sends transactions, performs
//! read-only calls, waits for receipts, reports account nonces, and classifies
//! node failures into transport errors and definitive rejections so the
//! settlement layer knows which ones are worth retrying.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use xchain_types::{Address, ConfigSchema, Transaction, TransactionHash, TransactionReceipt};

/// Re-export implementations
pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
}

/// Errors that can occur during transaction delivery operations.
#[derive(Debug, Error)]
pub enum DeliveryError {
	/// Transport-level failure. The request may not have reached the node.
	#[error("Network error: {0}")]
	Network(String),
	/// The node or the contract refused the request.
	#[error("Rejected: {0}")]
	Rejected(String),
	/// The node answered with data that could not be interpreted.
	#[error("Invalid response: {0}")]
	InvalidResponse(String),
	/// Error that occurs when no provider is configured for the requested chain.
	#[error("No provider available for chain {0}")]
	NoProviderAvailable(u64),
	/// Error that occurs when the implementation configuration is invalid.
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),
}

/// Trait defining the interface for chain connections.
///
/// One implementation instance may serve several chains; every call names the
/// chain it targets.
#[async_trait]
pub trait DeliveryInterface: Send + Sync {
	/// Returns the configuration schema for this delivery implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Returns true if this instance is configured for `chain_id`.
	fn supports(&self, chain_id: u64) -> bool;

	/// Account that signs and pays for outer transactions.
	fn sender(&self) -> Address;

	/// Opens the transport to `chain_id` if it is not open yet.
	///
	/// Construction never touches the network; the first call here (or the
	/// first request to the chain) does.
	async fn connect(&self, chain_id: u64) -> Result<(), DeliveryError>;

	/// Signs and sends a transaction, returning its hash once the node accepted it.
	async fn submit(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError>;

	/// Waits until the transaction is mined with at least `confirmations` blocks on top.
	async fn wait_for_confirmation(
		&self,
		hash: &TransactionHash,
		chain_id: u64,
		confirmations: u64,
	) -> Result<TransactionReceipt, DeliveryError>;

	/// Executes a read-only call against the latest block.
	async fn call(&self, tx: Transaction) -> Result<Vec<u8>, DeliveryError>;

	/// Returns the transaction count of `address`, which is also its next
	/// EIP-7702 authorization nonce.
	async fn get_nonce(&self, address: Address, chain_id: u64) -> Result<u64, DeliveryError>;

	/// Returns the chain id reported by the node configured for `chain_id`.
	async fn get_chain_id(&self, chain_id: u64) -> Result<u64, DeliveryError>;
}

/// Service that routes delivery requests to the connection for each chain.
pub struct DeliveryService {
	/// Map of chain IDs to their corresponding delivery providers.
	providers: HashMap<u64, Arc<dyn DeliveryInterface>>,
	/// Default number of confirmations required for transactions.
	min_confirmations: u64,
}

impl DeliveryService {
	pub fn new(providers: HashMap<u64, Arc<dyn DeliveryInterface>>, min_confirmations: u64) -> Self {
		Self {
			providers,
			min_confirmations,
		}
	}

	/// Builds a service where one implementation serves every chain it supports.
	pub fn from_implementation(
		implementation: Box<dyn DeliveryInterface>,
		chain_ids: impl IntoIterator<Item = u64>,
		min_confirmations: u64,
	) -> Self {
		let implementation: Arc<dyn DeliveryInterface> = Arc::from(implementation);
		let providers = chain_ids
			.into_iter()
			.filter(|chain_id| implementation.supports(*chain_id))
			.map(|chain_id| (chain_id, Arc::clone(&implementation)))
			.collect();
		Self::new(providers, min_confirmations)
	}

	pub fn min_confirmations(&self) -> u64 {
		self.min_confirmations
	}

	pub fn supports(&self, chain_id: u64) -> bool {
		self.providers.contains_key(&chain_id)
	}

	fn provider(&self, chain_id: u64) -> Result<&Arc<dyn DeliveryInterface>, DeliveryError> {
		self.providers
			.get(&chain_id)
			.ok_or(DeliveryError::NoProviderAvailable(chain_id))
	}

	/// Opens the connection to `chain_id`.
	pub async fn connect(&self, chain_id: u64) -> Result<(), DeliveryError> {
		self.provider(chain_id)?.connect(chain_id).await
	}

	/// Account sending outer transactions on `chain_id`.
	pub fn sender(&self, chain_id: u64) -> Result<Address, DeliveryError> {
		Ok(self.provider(chain_id)?.sender())
	}

	/// Delivers a transaction to the network named by its chain id.
	pub async fn deliver(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError> {
		self.provider(tx.chain_id)?.submit(tx).await
	}

	/// Waits for the configured number of confirmations.
	pub async fn confirm(
		&self,
		hash: &TransactionHash,
		chain_id: u64,
	) -> Result<TransactionReceipt, DeliveryError> {
		self.provider(chain_id)?
			.wait_for_confirmation(hash, chain_id, self.min_confirmations)
			.await
	}

	/// Executes a read-only call.
	pub async fn call(&self, tx: Transaction) -> Result<Vec<u8>, DeliveryError> {
		self.provider(tx.chain_id)?.call(tx).await
	}

	pub async fn get_nonce(&self, chain_id: u64, address: Address) -> Result<u64, DeliveryError> {
		self.provider(chain_id)?.get_nonce(address, chain_id).await
	}

	pub async fn get_chain_id(&self, chain_id: u64) -> Result<u64, DeliveryError> {
		self.provider(chain_id)?.get_chain_id(chain_id).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use xchain_types::{Schema, ValidationError};

	struct NoSchema;

	impl ConfigSchema for NoSchema {
		fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
			Schema::new(vec![], vec![]).validate(config)
		}
	}

	/// Connection that only knows one chain and records what it was asked.
	struct SingleChain {
		chain_id: u64,
		submitted: AtomicUsize,
		connected: AtomicUsize,
	}

	#[async_trait]
	impl DeliveryInterface for SingleChain {
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(NoSchema)
		}

		fn supports(&self, chain_id: u64) -> bool {
			chain_id == self.chain_id
		}

		fn sender(&self) -> Address {
			Address::repeat_byte(0x5d)
		}

		async fn connect(&self, _chain_id: u64) -> Result<(), DeliveryError> {
			self.connected.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}

		async fn submit(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError> {
			self.submitted.fetch_add(1, Ordering::SeqCst);
			Ok(TransactionHash(vec![tx.chain_id as u8; 32]))
		}

		async fn wait_for_confirmation(
			&self,
			hash: &TransactionHash,
			_chain_id: u64,
			confirmations: u64,
		) -> Result<TransactionReceipt, DeliveryError> {
			Ok(TransactionReceipt {
				hash: hash.clone(),
				block_number: confirmations,
				success: true,
				logs: vec![],
			})
		}

		async fn call(&self, _tx: Transaction) -> Result<Vec<u8>, DeliveryError> {
			Ok(vec![])
		}

		async fn get_nonce(&self, _address: Address, _chain_id: u64) -> Result<u64, DeliveryError> {
			Ok(9)
		}

		async fn get_chain_id(&self, _chain_id: u64) -> Result<u64, DeliveryError> {
			Ok(self.chain_id)
		}
	}

	fn service() -> DeliveryService {
		DeliveryService::from_implementation(
			Box::new(SingleChain {
				chain_id: 31337,
				submitted: AtomicUsize::new(0),
				connected: AtomicUsize::new(0),
			}),
			[1, 31337],
			2,
		)
	}

	#[tokio::test]
	async fn test_routes_by_chain_id() {
		let service = service();
		assert!(service.supports(31337));
		assert!(!service.supports(1));

		let hash = service
			.deliver(Transaction::call(31337, Address::ZERO, vec![]))
			.await
			.unwrap();
		let receipt = service.confirm(&hash, 31337).await.unwrap();
		assert_eq!(receipt.block_number, 2);
		assert_eq!(service.get_nonce(31337, Address::ZERO).await.unwrap(), 9);
		assert_eq!(service.sender(31337).unwrap(), Address::repeat_byte(0x5d));
		service.connect(31337).await.unwrap();
	}

	#[tokio::test]
	async fn test_unknown_chain_has_no_provider() {
		let service = service();
		let err = service
			.deliver(Transaction::call(1, Address::ZERO, vec![]))
			.await
			.unwrap_err();
		assert!(matches!(err, DeliveryError::NoProviderAvailable(1)));
		assert!(matches!(
			service.connect(1).await,
			Err(DeliveryError::NoProviderAvailable(1))
		));
		assert!(service.sender(1).is_err());
	}
}
