//! `CallByUser` intents.

use crate::encoding::call_intent_encoding;
use crate::IntentError;
use xchain_account::AccountService;
use xchain_types::{truncate_id, Address, Asset, Call, CallByUser, Nonce};

/// Builds and signs a call intent for `account`.
///
/// `account` must be the signer's own address. `calls: None` is a malformed
/// request; `Some(vec![])` is an authorization-only intent. Every check runs
/// before the signer is asked for a signature.
pub async fn build_call_intent(
	account: Address,
	nonce: Nonce,
	asset: Asset,
	chain_id: u64,
	calls: Option<Vec<Call>>,
	signer: &AccountService,
) -> Result<CallByUser, IntentError> {
	let signer_address = signer.get_address().await?;
	if account != signer_address {
		return Err(IntentError::InvalidParameter(format!(
			"intent account {} does not match signer {}",
			account, signer_address
		)));
	}
	if nonce.is_consumed() {
		return Err(IntentError::InvalidParameter(format!(
			"intent nonce {} has already been used",
			nonce.value()
		)));
	}
	if let Some(index) = calls
		.iter()
		.flatten()
		.position(|call| call.target == Address::ZERO)
	{
		return Err(IntentError::InvalidParameter(format!(
			"call {} targets the zero address",
			index
		)));
	}

	let encoding =
		call_intent_encoding(account, nonce.value(), &asset, chain_id, calls.as_deref())?;
	let signature = signer.sign_message(&encoding).await?;
	let calls = calls.unwrap_or_default();

	tracing::debug!(
		chain_id,
		account = %truncate_id(&account.to_string()),
		nonce = nonce.value(),
		calls = calls.len(),
		"Signed call intent"
	);

	Ok(CallByUser {
		user: account,
		nonce: nonce.value(),
		asset,
		chain_id,
		signature,
		calls,
	})
}
