//! Command implementations.
//!
//! Each command returns a JSON document; printing is left to `main`.

use alloy_primitives::keccak256;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use xchain_account::AccountService;
use xchain_config::Config;
use xchain_intent::{
	authorization_encoding, build_authorization, build_call_intent, call_intent_encoding,
	IntentParams,
};
use xchain_settlement::SettlementClient;
use xchain_types::origin_settler::{encode_order_data, signature_bytes};
use xchain_types::{
	with_0x_prefix, Address, Authorization, CallByUser, Nonce, SubmissionEvent, SubmissionPayload,
};

type CommandResult = Result<Value, Box<dyn std::error::Error>>;

fn hex_string(bytes: &[u8]) -> String {
	with_0x_prefix(&hex::encode(bytes))
}

/// Where nonces come from when the request leaves them out.
enum Nonces<'a> {
	/// Never touch the network; missing nonces are an error.
	Offline,
	/// Ask the settler.
	Settler(&'a SettlementClient),
}

impl Nonces<'_> {
	async fn intent(
		&self,
		given: Option<u64>,
		account: Address,
		chain_id: u64,
	) -> Result<u64, Box<dyn std::error::Error>> {
		match (given, self) {
			(Some(nonce), _) => Ok(nonce),
			(None, Nonces::Settler(client)) => Ok(client.next_nonce(account, chain_id).await?),
			(None, Nonces::Offline) => Err("request must give \"nonce\" when encoding offline".into()),
		}
	}

	async fn delegation(
		&self,
		given: Option<u64>,
		account: Address,
		chain_id: u64,
	) -> Result<u64, Box<dyn std::error::Error>> {
		match (given, self) {
			(Some(nonce), _) => Ok(nonce),
			(None, Nonces::Settler(client)) => {
				Ok(client.delegation_nonce(account, chain_id).await?)
			},
			(None, Nonces::Offline) => {
				Err("request must give \"delegation.nonce\" when encoding offline".into())
			},
		}
	}
}

/// Signs the request's authorization (when wanted) and intent.
async fn sign_request(
	config: &Config,
	signer: &AccountService,
	params: IntentParams,
	with_delegation: bool,
	nonces: Nonces<'_>,
) -> Result<(Option<Authorization>, CallByUser), Box<dyn std::error::Error>> {
	let account = signer.get_address().await?;
	let chain_id = params.chain_id;

	let authorization = match params.delegation.filter(|_| with_delegation) {
		Some(delegation) => {
			let contract = delegation
				.contract
				.or_else(|| {
					config
						.networks
						.get(&chain_id)
						.and_then(|network| network.delegate_address)
				})
				.ok_or_else(|| {
					format!(
						"no delegation contract in request and no delegate_address for network {}",
						chain_id
					)
				})?;
			let nonce = nonces.delegation(delegation.nonce, account, chain_id).await?;
			let authorization =
				build_authorization(chain_id, contract, Nonce::Reserved(nonce), signer)
					.await?;
			Some(authorization)
		},
		None => None,
	};

	let nonce = nonces.intent(params.nonce, account, chain_id).await?;
	let intent = build_call_intent(
		account,
		Nonce::Reserved(nonce),
		params.asset,
		chain_id,
		params.calls,
		signer,
	)
	.await?;

	Ok((authorization, intent))
}

/// Prints the signer address.
pub async fn address(signer: &AccountService) -> CommandResult {
	let account = signer.get_address().await?;
	Ok(json!({ "address": account.to_string() }))
}

/// Builds and signs a request without contacting any chain and shows the
/// exact bytes that were signed.
pub async fn encode(
	config: &Config,
	signer: &AccountService,
	params: IntentParams,
	with_delegation: bool,
) -> CommandResult {
	let (authorization, intent) =
		sign_request(config, signer, params, with_delegation, Nonces::Offline).await?;

	let authorization_json = authorization.as_ref().map(|auth| {
		let encoding = authorization_encoding(auth.chain_id, auth.contract_address, auth.nonce);
		json!({
			"chain_id": auth.chain_id,
			"contract": auth.contract_address.to_string(),
			"nonce": auth.nonce,
			"encoding": hex_string(&encoding),
			"digest": keccak256(&encoding).to_string(),
			"signature": hex_string(&signature_bytes(&auth.signature)),
		})
	});

	let intent_encoding = call_intent_encoding(
		intent.user,
		intent.nonce,
		&intent.asset,
		intent.chain_id,
		Some(&intent.calls),
	)?;
	let intent_json = json!({
		"user": intent.user.to_string(),
		"nonce": intent.nonce,
		"chain_id": intent.chain_id,
		"calls": intent.calls.len(),
		"encoding": hex_string(&intent_encoding),
		"digest": keccak256(&intent_encoding).to_string(),
		"signature": hex_string(&signature_bytes(&intent.signature)),
	});

	let payload = SubmissionPayload::new(authorization, intent);
	Ok(json!({
		"authorization": authorization_json,
		"intent": intent_json,
		"order_data": hex_string(&encode_order_data(&payload)),
	}))
}

/// Builds, signs and submits a request, returning the settlement reference.
pub async fn submit(
	config: &Config,
	signer: &AccountService,
	client: &SettlementClient,
	params: IntentParams,
	with_delegation: bool,
) -> CommandResult {
	let (authorization, intent) = sign_request(
		config,
		signer,
		params,
		with_delegation,
		Nonces::Settler(client),
	)
	.await?;

	let mut events = client.event_bus().subscribe();
	let watcher = tokio::spawn(async move {
		loop {
			match events.recv().await {
				Ok(SubmissionEvent::StateChanged { state, .. }) => {
					tracing::info!(state = %state, "Submission state");
				},
				Ok(SubmissionEvent::Dispatched { tx_hash, .. }) => {
					tracing::info!(tx_hash = %tx_hash, "Payload dispatched");
				},
				Ok(SubmissionEvent::RetryScheduled {
					attempt, delay_ms, ..
				}) => {
					tracing::info!(attempt, delay_ms, "Retry scheduled");
				},
				Err(RecvError::Lagged(skipped)) => {
					tracing::debug!(skipped, "Event watcher lagged");
				},
				Err(RecvError::Closed) => break,
			}
		}
	});

	let delegated = authorization.is_some();
	let result = client.submit(authorization, intent).await;
	watcher.abort();
	let receipt = result?;

	Ok(json!({
		"chain_id": receipt.chain_id,
		"tx_hash": receipt.tx_hash.to_string(),
		"block_number": receipt.block_number,
		"order_id": receipt.order_id.map(|id| id.to_string()),
		"delegated": delegated,
		"delegated_to": receipt.delegated_to.map(|contract| contract.to_string()),
	}))
}
