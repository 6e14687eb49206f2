//! Settlement client.
//!
//! Takes zero-or-one authorization and one intent, checks that they belong
//! together, and drives the payload through the settler with bounded retries.
//! Submissions for the same account and chain are serialized in arrival order;
//! everything else runs concurrently.

use crate::state::{StateError, SubmissionTracker};
use crate::{EventBus, OriginSettlerInterface, SettlementError};
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::instrument;
use xchain_account::AccountService;
use xchain_intent::recover_authority;
use xchain_types::{
	truncate_id, Address, Authorization, CallByUser, SettlementReceipt, SubmissionEvent,
	SubmissionPayload, SubmissionState, TransactionHash,
};

/// Retry and timeout bounds for submissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionConfig {
	/// Retries after the first attempt before `ConnectionLost` becomes final.
	pub max_retries: u32,
	pub initial_backoff: Duration,
	pub max_backoff: Duration,
	/// Bound on each connection attempt.
	pub connect_timeout: Duration,
	/// Bound on a whole submission, retries included.
	pub submission_timeout: Duration,
	/// How long after submission the order may still be filled.
	pub fill_deadline: Duration,
}

impl Default for SubmissionConfig {
	fn default() -> Self {
		Self {
			max_retries: 3,
			initial_backoff: Duration::from_millis(250),
			max_backoff: Duration::from_secs(5),
			connect_timeout: Duration::from_secs(10),
			submission_timeout: Duration::from_secs(120),
			fill_deadline: Duration::from_secs(3600),
		}
	}
}

impl From<StateError> for SettlementError {
	fn from(err: StateError) -> Self {
		SettlementError::Rejected(format!("submission aborted: {}", err))
	}
}

type SubmissionKey = (Address, u64);

/// What has gone out for one payload so far.
#[derive(Debug, Default)]
struct Dispatch {
	/// Hash handed out by the settler. Retries re-poll it instead of resending.
	tx_hash: Option<TransactionHash>,
	/// An `open` was sent but its answer never arrived, so it may have executed.
	unacknowledged: bool,
}

/// Exclusive right to submit for one account and chain.
///
/// Dropping the slot, including by cancelling the submission holding it,
/// releases the lock and forgets the key once nobody else is waiting on it.
struct SubmissionSlot<'a> {
	locks: &'a DashMap<SubmissionKey, Arc<Mutex<()>>>,
	key: SubmissionKey,
	guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SubmissionSlot<'_> {
	fn drop(&mut self) {
		self.guard.take();
		self.locks
			.remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
	}
}

/// Client submitting signed payloads to an origin settler.
pub struct SettlementClient {
	settler: Arc<dyn OriginSettlerInterface>,
	account: Arc<AccountService>,
	config: SubmissionConfig,
	event_bus: EventBus,
	locks: DashMap<SubmissionKey, Arc<Mutex<()>>>,
}

impl SettlementClient {
	pub fn new(
		settler: Arc<dyn OriginSettlerInterface>,
		account: Arc<AccountService>,
		config: SubmissionConfig,
		event_bus: EventBus,
	) -> Self {
		Self {
			settler,
			account,
			config,
			event_bus,
			locks: DashMap::new(),
		}
	}

	pub fn event_bus(&self) -> &EventBus {
		&self.event_bus
	}

	pub fn config(&self) -> &SubmissionConfig {
		&self.config
	}

	/// Next intent nonce for `account` on `chain_id`, as reported by the settler.
	pub async fn next_nonce(&self, account: Address, chain_id: u64) -> Result<u64, SettlementError> {
		self.bounded("reading intent nonce", self.settler.next_nonce(account, chain_id))
			.await
	}

	/// Next EIP-7702 authorization nonce for `account` on `chain_id`.
	pub async fn delegation_nonce(
		&self,
		account: Address,
		chain_id: u64,
	) -> Result<u64, SettlementError> {
		self.bounded(
			"reading delegation nonce",
			self.settler.delegation_nonce(account, chain_id),
		)
		.await
	}

	/// Submits an optional delegation together with a signed intent.
	///
	/// The payload locks the intent's own asset on the origin chain and may be
	/// filled until the configured fill deadline has passed.
	pub async fn submit(
		&self,
		authorization: Option<Authorization>,
		intent: CallByUser,
	) -> Result<SettlementReceipt, SettlementError> {
		let payload =
			SubmissionPayload::new(authorization, intent).with_fill_deadline(self.fill_deadline());
		self.submit_payload(payload).await
	}

	/// Submits a fully assembled payload.
	///
	/// Local checks run first and never touch the network. The payload is then
	/// sent at most once per connection; a retry after the settler handed out a
	/// transaction hash only re-polls that transaction.
	#[instrument(skip_all, fields(
		account = %truncate_id(&payload.account().to_string()),
		chain_id = payload.chain_id(),
		nonce = payload.intent.nonce,
	))]
	pub async fn submit_payload(
		&self,
		payload: SubmissionPayload,
	) -> Result<SettlementReceipt, SettlementError> {
		self.validate(&payload).await?;

		let key = (payload.account(), payload.chain_id());
		let _slot = self.acquire(key).await;

		let mut tracker = SubmissionTracker::new(
			payload.account(),
			payload.chain_id(),
			payload.intent.nonce,
			self.event_bus.clone(),
		);

		let mut dispatch = Dispatch::default();
		let outcome = tokio::time::timeout(
			self.config.submission_timeout,
			self.drive(&payload, &mut tracker, &mut dispatch),
		)
		.await;

		match outcome {
			Ok(Ok(receipt)) => {
				tracing::info!(
					tx_hash = %receipt.tx_hash,
					block_number = receipt.block_number,
					"Payload settled"
				);
				Ok(receipt)
			},
			Ok(Err(err)) => {
				tracing::warn!(kind = err.kind(), reason = err.reason(), "Submission failed");
				Err(err)
			},
			Err(_) => {
				let mut reason = format!(
					"submission did not settle within {}s",
					self.config.submission_timeout.as_secs()
				);
				if let Some(tx_hash) = &dispatch.tx_hash {
					reason.push_str(&format!("; open transaction {} may still be mined", tx_hash));
				} else if dispatch.unacknowledged {
					reason.push_str("; an unacknowledged open may still be mined");
				}
				tracker.transition(SubmissionState::TimedOut(reason.clone())).ok();
				tracing::warn!(%reason, "Submission timed out");
				Err(SettlementError::Timeout(reason))
			},
		}
	}

	/// Checks the payload's internal consistency.
	async fn validate(&self, payload: &SubmissionPayload) -> Result<(), SettlementError> {
		let intent = &payload.intent;

		let signer = self.account.get_address().await?;
		if intent.user != signer {
			return Err(SettlementError::InvalidParameter(format!(
				"intent user {} is not the client account {}",
				intent.user, signer
			)));
		}

		if let Some(index) = intent
			.calls
			.iter()
			.position(|call| call.target == Address::ZERO)
		{
			return Err(SettlementError::InvalidParameter(format!(
				"call {} targets the zero address",
				index
			)));
		}

		if !self.settler.supported_networks().contains(&intent.chain_id) {
			return Err(SettlementError::InvalidParameter(format!(
				"chain {} is not served by the configured settler",
				intent.chain_id
			)));
		}

		if let Some(authorization) = &payload.authorization {
			if authorization.contract_address == Address::ZERO {
				return Err(SettlementError::InvalidParameter(
					"delegation contract address must not be the zero address".to_string(),
				));
			}
			if authorization.chain_id != intent.chain_id {
				return Err(SettlementError::InvalidParameter(format!(
					"authorization chain {} does not match intent chain {}",
					authorization.chain_id, intent.chain_id
				)));
			}
			let authority = recover_authority(authorization)?;
			if authority != intent.user {
				return Err(SettlementError::InvalidParameter(format!(
					"authorization signed by {} but intent belongs to {}",
					authority, intent.user
				)));
			}
		}

		Ok(())
	}

	async fn acquire(&self, key: SubmissionKey) -> SubmissionSlot<'_> {
		let lock = Arc::clone(self.locks.entry(key).or_default().value());
		// Created before waiting so a cancelled wait still cleans up the entry.
		let mut slot = SubmissionSlot {
			locks: &self.locks,
			key,
			guard: None,
		};
		slot.guard = Some(lock.lock_owned().await);
		slot
	}

	/// Runs attempts until one settles, one fails terminally, or retries run out.
	async fn drive(
		&self,
		payload: &SubmissionPayload,
		tracker: &mut SubmissionTracker,
		dispatch: &mut Dispatch,
	) -> Result<SettlementReceipt, SettlementError> {
		let mut backoff = self.backoff();
		let mut retries = 0u32;

		loop {
			tracker.transition(SubmissionState::Connecting)?;

			match self.attempt(payload, dispatch, tracker).await {
				Ok(receipt) => {
					tracker.transition(SubmissionState::Confirmed(receipt.clone()))?;
					return Ok(receipt);
				},
				Err(err) if err.is_retryable() => {
					tracker.transition(SubmissionState::ConnectionLost(err.reason().to_string()))?;
					if retries >= self.config.max_retries {
						return Err(err);
					}
					retries += 1;

					let delay = backoff.next_backoff().unwrap_or(self.config.max_backoff);
					tracing::debug!(
						attempt = retries,
						delay_ms = delay.as_millis() as u64,
						reason = err.reason(),
						"Retrying submission"
					);
					self.event_bus
						.publish(SubmissionEvent::RetryScheduled {
							account: payload.account(),
							chain_id: payload.chain_id(),
							nonce: payload.intent.nonce,
							attempt: retries,
							delay_ms: delay.as_millis() as u64,
						})
						.ok();
					tokio::time::sleep(delay).await;
				},
				Err(err) => {
					let err = match err {
						// The refusal may be the settler recognising the earlier send.
						SettlementError::Rejected(reason) if dispatch.unacknowledged => {
							SettlementError::Rejected(format!(
								"an earlier unacknowledged send of this payload may already \
								 have executed; settler answered: {}",
								reason
							))
						},
						other => other,
					};
					tracker.transition(SubmissionState::Rejected(err.to_string()))?;
					return Err(err);
				},
			}
		}
	}

	async fn attempt(
		&self,
		payload: &SubmissionPayload,
		dispatch: &mut Dispatch,
		tracker: &mut SubmissionTracker,
	) -> Result<SettlementReceipt, SettlementError> {
		let chain_id = payload.chain_id();

		match tokio::time::timeout(self.config.connect_timeout, self.settler.connect(chain_id)).await
		{
			Ok(connected) => connected?,
			Err(_) => {
				return Err(SettlementError::ConnectionLost(format!(
					"connecting to chain {} timed out after {}s",
					chain_id,
					self.config.connect_timeout.as_secs()
				)))
			},
		}

		tracker.transition(SubmissionState::Submitting)?;

		let tx_hash = match &dispatch.tx_hash {
			Some(hash) => {
				tracing::debug!(tx_hash = %hash, "Re-polling dispatched payload");
				hash.clone()
			},
			None => {
				let hash = match self.settler.open(payload).await {
					Ok(hash) => hash,
					Err(err) => {
						if err.is_retryable() {
							dispatch.unacknowledged = true;
						}
						return Err(err);
					},
				};
				self.event_bus
					.publish(SubmissionEvent::Dispatched {
						account: payload.account(),
						chain_id,
						nonce: payload.intent.nonce,
						tx_hash: hash.clone(),
					})
					.ok();
				dispatch.tx_hash = Some(hash.clone());
				hash
			},
		};

		self.settler.await_settlement(chain_id, &tx_hash).await
	}

	async fn bounded<T, F>(&self, what: &str, future: F) -> Result<T, SettlementError>
	where
		F: std::future::Future<Output = Result<T, SettlementError>>,
	{
		tokio::time::timeout(self.config.connect_timeout, future)
			.await
			.map_err(|_| {
				SettlementError::Timeout(format!(
					"{} timed out after {}s",
					what,
					self.config.connect_timeout.as_secs()
				))
			})?
	}

	fn backoff(&self) -> ExponentialBackoff {
		ExponentialBackoffBuilder::new()
			.with_initial_interval(self.config.initial_backoff)
			.with_max_interval(self.config.max_backoff)
			.with_multiplier(2.0)
			.with_randomization_factor(0.1)
			.with_max_elapsed_time(None)
			.build()
	}

	fn fill_deadline(&self) -> u32 {
		let now = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.unwrap_or_default();
		u32::try_from((now + self.config.fill_deadline).as_secs()).unwrap_or(u32::MAX)
	}
}
