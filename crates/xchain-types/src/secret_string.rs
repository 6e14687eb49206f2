//! Redacting wrapper for key material.
//!
//! Private keys travel from configuration to the signer as `SecretString`.
//! The backing buffer is zeroized on drop and neither `Debug`, `Display` nor
//! `Serialize` ever reveal it.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::Zeroizing;

const REDACTED: &str = "***REDACTED***";

/// String holding secret material such as a private key.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(Zeroizing<String>);

impl SecretString {
	pub fn new(secret: String) -> Self {
		Self(Zeroizing::new(secret))
	}

	/// Runs `f` with the secret exposed, keeping the exposure scoped to the closure.
	pub fn with_exposed<F, R>(&self, f: F) -> R
	where
		F: FnOnce(&str) -> R,
	{
		f(self.0.as_str())
	}

	/// Exposes the secret. Prefer [`SecretString::with_exposed`].
	pub fn expose_secret(&self) -> &str {
		self.0.as_str()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "SecretString({})", REDACTED)
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}

impl From<String> for SecretString {
	fn from(secret: String) -> Self {
		Self::new(secret)
	}
}

impl From<&str> for SecretString {
	fn from(secret: &str) -> Self {
		Self::new(secret.to_string())
	}
}

impl Serialize for SecretString {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(REDACTED)
	}
}

impl<'de> Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		String::deserialize(deserializer).map(SecretString::new)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

	#[test]
	fn test_formatting_never_reveals_key() {
		let secret = SecretString::from(ANVIL_KEY);
		assert_eq!(format!("{:?}", secret), "SecretString(***REDACTED***)");
		assert_eq!(secret.to_string(), "***REDACTED***");
	}

	#[test]
	fn test_serialization_is_redacted() {
		let secret = SecretString::from(ANVIL_KEY);
		let json = serde_json::to_string(&secret).unwrap();
		assert_eq!(json, "\"***REDACTED***\"");
	}

	#[test]
	fn test_deserialization_keeps_value() {
		let secret: SecretString = serde_json::from_str(&format!("\"{}\"", ANVIL_KEY)).unwrap();
		let length = secret.with_exposed(|key| key.len());
		assert_eq!(length, 66);
		assert_eq!(secret.expose_secret(), ANVIL_KEY);
	}
}
