//! Conversion utilities for textual protocol inputs.

use super::formatting::without_0x_prefix;
use alloy_primitives::{Address, U256};
use thiserror::Error;

/// Errors produced when textual input is not a well-formed protocol value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversionError {
	#[error("Invalid address '{0}': expected 20 bytes of hex")]
	InvalidAddress(String),
	#[error("Invalid amount '{0}': expected a non-negative integer")]
	InvalidAmount(String),
}

/// Parses a 0x-prefixed, 40 hex digit account identifier.
///
/// Checksums are not enforced, but length and alphabet are.
pub fn parse_address(input: &str) -> Result<Address, ConversionError> {
	let trimmed = input.trim();
	let body = without_0x_prefix(trimmed);
	if body.len() != 40 || body.len() == trimmed.len() {
		return Err(ConversionError::InvalidAddress(input.to_string()));
	}
	trimmed
		.parse::<Address>()
		.map_err(|_| ConversionError::InvalidAddress(input.to_string()))
}

/// Parses a non-negative integer amount, in decimal or 0x-prefixed hex.
///
/// Signed input such as `-1` or `+1` is rejected rather than clamped.
pub fn parse_amount(input: &str) -> Result<U256, ConversionError> {
	let trimmed = input.trim();
	if trimmed.is_empty() || trimmed.starts_with('-') || trimmed.starts_with('+') {
		return Err(ConversionError::InvalidAmount(input.to_string()));
	}
	trimmed
		.parse::<U256>()
		.map_err(|_| ConversionError::InvalidAmount(input.to_string()))
}
