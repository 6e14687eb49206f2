//! Common types module for the xchain intent client.
//!
//! This module defines the data model shared by every component of the client:
//! assets, calls, delegation authorizations, signed call intents and the payload
//! submitted to the origin settler, together with the settler's ABI bindings and
//! the configuration validation framework used by all pluggable implementations.

/// Transaction delivery types for blockchain interactions.
pub mod delivery;
/// Event types published while a submission moves through its lifecycle.
pub mod events;
/// Authorization, call intent and submission payload types.
pub mod intent;
/// Network configuration types.
pub mod networks;
/// Registry trait for named, factory-built implementations.
pub mod registry;
/// Redacting, zeroizing string wrapper for key material.
pub mod secret_string;
/// Solidity bindings for the settlement contracts.
pub mod standards;
/// Utility functions for common type conversions.
pub mod utils;
/// Configuration validation types for ensuring type-safe configurations.
pub mod validation;

pub use alloy_primitives::{Address, Bytes, PrimitiveSignature as Signature, B256, U256};
pub use delivery::*;
pub use events::*;
pub use intent::*;
pub use networks::{NetworkConfig, NetworksConfig};
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use standards::origin_settler;
pub use utils::{
	parse_address, parse_amount, truncate_id, with_0x_prefix, without_0x_prefix, ConversionError,
};
pub use validation::*;
