//! Utility functions for common type conversions and transformations.
//!
//! Parsing helpers here are the single place where textual input (config
//! files, request files, CLI flags) becomes typed addresses and amounts.

pub mod conversion;
pub mod formatting;

pub use conversion::{parse_address, parse_amount, ConversionError};
pub use formatting::{truncate_id, with_0x_prefix, without_0x_prefix};
