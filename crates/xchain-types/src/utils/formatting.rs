//! String formatting utilities.
//!
//! Hex prefix management and truncation of long identifiers for log output.

/// Truncates a hex identifier for display, keeping the `0x` prefix and six digits.
pub fn truncate_id(id: &str) -> String {
	let body = without_0x_prefix(id);
	if body.len() <= 8 {
		id.to_string()
	} else {
		format!("0x{}..", &body[..6])
	}
}

/// Adds a "0x" prefix to a hex string if it doesn't already have one.
pub fn with_0x_prefix(hex_str: &str) -> String {
	if hex_str.starts_with("0x") || hex_str.starts_with("0X") {
		hex_str.to_string()
	} else {
		format!("0x{}", hex_str)
	}
}

/// Removes a "0x" or "0X" prefix from a hex string if present.
pub fn without_0x_prefix(hex_str: &str) -> &str {
	hex_str
		.strip_prefix("0x")
		.or_else(|| hex_str.strip_prefix("0X"))
		.unwrap_or(hex_str)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_truncate_id() {
		assert_eq!(truncate_id("0xabcd"), "0xabcd");
		assert_eq!(
			truncate_id("0x5fbdb2315678afecb367f032d93f642f64180aa3"),
			"0x5fbdb2.."
		);
	}

	#[test]
	fn test_prefix_helpers() {
		assert_eq!(with_0x_prefix("ff"), "0xff");
		assert_eq!(with_0x_prefix("0Xff"), "0Xff");
		assert_eq!(without_0x_prefix("0xff"), "ff");
		assert_eq!(without_0x_prefix("ff"), "ff");
	}
}
