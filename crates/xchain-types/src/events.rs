//! Event types for submission lifecycle notifications.
//!
//! The settlement client publishes these on a broadcast bus so that callers
//! (the CLI, a UI, a nonce sequencer) can follow a submission through
//! `Idle -> Connecting -> Submitting -> {Confirmed | Rejected | ConnectionLost}`,
//! or to `TimedOut` when it runs out of time.

use crate::{Address, SettlementReceipt, TransactionHash};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a single submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionState {
	/// Payload accepted locally, nothing sent yet.
	Idle,
	/// Establishing (or re-establishing) the chain connection.
	Connecting,
	/// Payload dispatched, waiting for the settler to acknowledge it.
	Submitting,
	/// Settler accepted the payload.
	Confirmed(SettlementReceipt),
	/// Settler refused the payload. Terminal for this payload.
	Rejected(String),
	/// Transport failed. Retryable with the same payload.
	ConnectionLost(String),
	/// The submission deadline passed. A dispatched transaction may still be mined.
	TimedOut(String),
}

impl SubmissionState {
	/// Returns true for states that end a submission.
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			SubmissionState::Confirmed(_)
				| SubmissionState::Rejected(_)
				| SubmissionState::TimedOut(_)
		)
	}

	pub fn name(&self) -> &'static str {
		match self {
			SubmissionState::Idle => "idle",
			SubmissionState::Connecting => "connecting",
			SubmissionState::Submitting => "submitting",
			SubmissionState::Confirmed(_) => "confirmed",
			SubmissionState::Rejected(_) => "rejected",
			SubmissionState::ConnectionLost(_) => "connection_lost",
			SubmissionState::TimedOut(_) => "timed_out",
		}
	}
}

impl fmt::Display for SubmissionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

/// Events published by the settlement client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SubmissionEvent {
	/// A submission moved to a new state.
	StateChanged {
		account: Address,
		chain_id: u64,
		nonce: u64,
		state: SubmissionState,
	},
	/// The settler returned a transaction hash for the payload.
	Dispatched {
		account: Address,
		chain_id: u64,
		nonce: u64,
		tx_hash: TransactionHash,
	},
	/// A transient failure will be retried after a delay.
	RetryScheduled {
		account: Address,
		chain_id: u64,
		nonce: u64,
		attempt: u32,
		delay_ms: u64,
	},
}
