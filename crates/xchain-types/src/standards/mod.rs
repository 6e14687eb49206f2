//! Solidity bindings for the settlement contracts.
//!
//! The client talks to exactly one contract family: the ERC-7683 style
//! `OriginSettler` that accepts a signed `CallByUser` together with an
//! EIP-7702 authorization list. Field order and types are fixed by the
//! deployed contract's ABI.

/// OriginSettler ABI and conversions from the client's data model.
pub mod origin_settler;
