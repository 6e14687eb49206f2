//! Registry trait for self-registering implementations.
//!
//! Signers and settlers are selected by name from configuration. Each
//! implementation module exposes a `Registry` type declaring that name and the
//! factory that builds it from its TOML table.

/// Base trait for implementation registries.
pub trait ImplementationRegistry {
	/// The name used in configuration files to reference this implementation,
	/// e.g. `"local"` for `account.primary = "local"` or `"evm_alloy"` for
	/// `[settlement.implementations.evm_alloy]`.
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Get the factory function for this implementation.
	fn factory() -> Self::Factory;
}
