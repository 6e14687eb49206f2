//! EIP-7702 delegation authorizations.

use crate::encoding::authorization_encoding;
use crate::IntentError;
use xchain_account::AccountService;
use xchain_types::{truncate_id, Address, Authorization, Nonce};

/// Builds and signs a delegation of the signer's account to `contract_address`.
///
/// The zero address is refused because delegating to it clears the account's
/// code rather than installing any. A nonce the caller marks as consumed is
/// refused without consulting the signer.
pub async fn build_authorization(
	chain_id: u64,
	contract_address: Address,
	nonce: Nonce,
	signer: &AccountService,
) -> Result<Authorization, IntentError> {
	if contract_address == Address::ZERO {
		return Err(IntentError::InvalidParameter(
			"delegation contract address must not be the zero address".to_string(),
		));
	}
	if nonce.is_consumed() {
		return Err(IntentError::InvalidParameter(format!(
			"authorization nonce {} has already been used",
			nonce.value()
		)));
	}

	let encoding = authorization_encoding(chain_id, contract_address, nonce.value());
	let signature = signer.sign_message(&encoding).await?;

	tracing::debug!(
		chain_id,
		contract = %truncate_id(&contract_address.to_string()),
		nonce = nonce.value(),
		"Signed delegation authorization"
	);

	Ok(Authorization {
		chain_id,
		contract_address,
		nonce: nonce.value(),
		signature,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::encoding::{recover_authority, verify_authorization};
	use crate::test_support::{counting_signer, local_signer};
	use alloy_primitives::address;
	use std::sync::atomic::Ordering;

	const DELEGATE: Address = address!("e7f1725E7734CE288F8367e1Bb143E90bb3F0512");

	#[tokio::test]
	async fn test_signature_verifies_against_signer() {
		let signer = local_signer();
		let expected = signer.get_address().await.unwrap();

		for (chain_id, nonce) in [(1u64, 0u64), (31337, 7), (u64::MAX, u64::MAX)] {
			let auth = build_authorization(chain_id, DELEGATE, Nonce::Reserved(nonce), &signer)
				.await
				.unwrap();
			assert_eq!(auth.chain_id, chain_id);
			assert_eq!(auth.nonce, nonce);
			assert!(verify_authorization(&auth, expected));
			assert_eq!(recover_authority(&auth).unwrap(), expected);
		}
	}

	#[tokio::test]
	async fn test_modified_authorization_fails_verification() {
		let signer = local_signer();
		let expected = signer.get_address().await.unwrap();
		let mut auth = build_authorization(31337, DELEGATE, Nonce::Reserved(0), &signer)
			.await
			.unwrap();

		auth.nonce = 1;
		assert!(!verify_authorization(&auth, expected));
	}

	#[tokio::test]
	async fn test_zero_contract_rejected_without_signing() {
		let (signer, signed) = counting_signer(Address::ZERO, false);
		let err = build_authorization(1, Address::ZERO, Nonce::Reserved(0), &signer)
			.await
			.unwrap_err();
		assert!(matches!(err, IntentError::InvalidParameter(_)));
		assert_eq!(signed.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn test_consumed_nonce_rejected_without_signing() {
		let (signer, signed) = counting_signer(Address::ZERO, false);
		let err = build_authorization(1, DELEGATE, Nonce::Consumed(3), &signer)
			.await
			.unwrap_err();
		assert!(matches!(err, IntentError::InvalidParameter(_)));
		assert_eq!(signed.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn test_signer_failure_propagates() {
		let (signer, signed) = counting_signer(Address::ZERO, true);
		let err = build_authorization(1, DELEGATE, Nonce::Reserved(0), &signer)
			.await
			.unwrap_err();
		assert!(matches!(err, IntentError::SigningFailure(_)));
		assert_eq!(signed.load(Ordering::SeqCst), 1);
	}
}
