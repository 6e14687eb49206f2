//! Settlement module for the xchain intent client.
//!
//! This module delivers signed payloads to the origin settler. It defines the
//! settler boundary ([`OriginSettlerInterface`]), the error taxonomy shared by
//! every submission, and the [`client::SettlementClient`] that validates a
//! payload locally, serializes submissions per account and chain, retries
//! transient failures with backoff and publishes lifecycle events.

use async_trait::async_trait;
use thiserror::Error;
use xchain_account::AccountError;
use xchain_delivery::DeliveryError;
use xchain_intent::IntentError;
use xchain_types::origin_settler::AbiError;
use xchain_types::{
	Address, ConfigSchema, ImplementationRegistry, NetworksConfig, SecretString,
	SettlementReceipt, SubmissionPayload, TransactionHash,
};

pub mod client;
pub mod event_bus;
pub mod state;

/// Re-export implementations
pub mod implementations {
	pub mod evm;
	pub mod local;
}

pub use client::{SettlementClient, SubmissionConfig};
pub use event_bus::EventBus;

/// Errors that can occur while submitting a payload.
///
/// Every variant carries the underlying reason. Only [`SettlementError::ConnectionLost`]
/// is retried automatically.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SettlementError {
	/// Malformed or inconsistent input, detected before any network activity.
	#[error("Invalid parameter: {0}")]
	InvalidParameter(String),
	/// The signer could not produce a signature.
	#[error("Signing failure: {0}")]
	SigningFailure(String),
	/// Transient transport failure.
	#[error("Connection lost: {0}")]
	ConnectionLost(String),
	/// The settler refused the payload.
	#[error("Rejected by settler: {0}")]
	Rejected(String),
	/// The contract at the settler address does not speak the expected ABI.
	#[error("ABI mismatch: {0}")]
	AbiMismatch(String),
	/// The submission did not finish within its deadline.
	#[error("Timed out: {0}")]
	Timeout(String),
}

impl SettlementError {
	/// Returns true if the same payload may be submitted again unchanged.
	pub fn is_retryable(&self) -> bool {
		matches!(self, SettlementError::ConnectionLost(_))
	}

	/// Short machine-readable name of the error kind.
	pub fn kind(&self) -> &'static str {
		match self {
			SettlementError::InvalidParameter(_) => "invalid_parameter",
			SettlementError::SigningFailure(_) => "signing_failure",
			SettlementError::ConnectionLost(_) => "connection_lost",
			SettlementError::Rejected(_) => "rejected",
			SettlementError::AbiMismatch(_) => "abi_mismatch",
			SettlementError::Timeout(_) => "timeout",
		}
	}

	/// The underlying reason, without the kind prefix.
	pub fn reason(&self) -> &str {
		match self {
			SettlementError::InvalidParameter(r)
			| SettlementError::SigningFailure(r)
			| SettlementError::ConnectionLost(r)
			| SettlementError::Rejected(r)
			| SettlementError::AbiMismatch(r)
			| SettlementError::Timeout(r) => r,
		}
	}
}

impl From<DeliveryError> for SettlementError {
	fn from(err: DeliveryError) -> Self {
		match err {
			DeliveryError::Network(reason) => SettlementError::ConnectionLost(reason),
			DeliveryError::Rejected(reason) => SettlementError::Rejected(reason),
			DeliveryError::InvalidResponse(reason) => SettlementError::AbiMismatch(reason),
			DeliveryError::NoProviderAvailable(chain_id) => SettlementError::InvalidParameter(
				format!("no connection configured for chain {}", chain_id),
			),
			DeliveryError::InvalidConfig(reason) => SettlementError::InvalidParameter(reason),
		}
	}
}

impl From<IntentError> for SettlementError {
	fn from(err: IntentError) -> Self {
		match err {
			IntentError::InvalidParameter(reason) => SettlementError::InvalidParameter(reason),
			IntentError::SigningFailure(reason) => SettlementError::SigningFailure(reason),
		}
	}
}

impl From<AccountError> for SettlementError {
	fn from(err: AccountError) -> Self {
		SettlementError::SigningFailure(err.to_string())
	}
}

impl From<AbiError> for SettlementError {
	fn from(err: AbiError) -> Self {
		SettlementError::AbiMismatch(err.to_string())
	}
}

/// The settler contract boundary.
///
/// Implementations receive fully signed payloads. They own the encoding onto the
/// wire and the interpretation of the settler's answer; whether execution then
/// happens on the origin chain or is relayed elsewhere is theirs to decide.
#[async_trait]
pub trait OriginSettlerInterface: Send + Sync {
	/// Returns the configuration schema for this settler implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Chains this implementation can submit to.
	fn supported_networks(&self) -> &[u64];

	/// Establishes (or re-checks) the connection to `chain_id` and verifies the
	/// settler's ABI version.
	async fn connect(&self, chain_id: u64) -> Result<(), SettlementError>;

	/// Sends the payload to the settler's `open` entry point.
	///
	/// Returns once the transaction has been accepted for inclusion.
	async fn open(&self, payload: &SubmissionPayload) -> Result<TransactionHash, SettlementError>;

	/// Waits for the transaction carrying a payload to settle.
	async fn await_settlement(
		&self,
		chain_id: u64,
		tx_hash: &TransactionHash,
	) -> Result<SettlementReceipt, SettlementError>;

	/// Next intent nonce for `account` on `chain_id`.
	async fn next_nonce(&self, account: Address, chain_id: u64) -> Result<u64, SettlementError>;

	/// Next EIP-7702 authorization nonce for `account` on `chain_id`.
	async fn delegation_nonce(&self, account: Address, chain_id: u64)
		-> Result<u64, SettlementError>;
}

/// Type alias for settler factory functions.
///
/// Receives the implementation's TOML table, the network definitions and the
/// key used to sign outer transactions.
pub type SettlerFactory = fn(
	&toml::Value,
	&NetworksConfig,
	&SecretString,
) -> Result<Box<dyn OriginSettlerInterface>, SettlementError>;

/// Registry trait for settler implementations.
pub trait SettlerRegistry: ImplementationRegistry<Factory = SettlerFactory> {}

/// Get all registered settler implementations.
///
/// Returns a vector of (name, factory) tuples for all available settler implementations.
pub fn get_all_implementations() -> Vec<(&'static str, SettlerFactory)> {
	use implementations::{evm, local};

	vec![
		(evm::Registry::NAME, evm::Registry::factory()),
		(local::Registry::NAME, local::Registry::factory()),
	]
}
