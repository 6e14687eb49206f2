//! Submission state machine.
//!
//! A submission moves `Idle -> Connecting -> Submitting` and ends in
//! `Confirmed` or `Rejected`. `ConnectionLost` is re-entered from either
//! in-flight state and leads back to `Connecting` on retry. Running out of
//! time ends any unfinished submission in `TimedOut`. Every accepted
//! transition is published on the event bus.

use crate::EventBus;
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use xchain_types::{Address, SubmissionEvent, SubmissionState};

#[derive(Debug, Error)]
pub enum StateError {
	#[error("Invalid state transition from {from} to {to}")]
	InvalidTransition {
		from: &'static str,
		to: &'static str,
	},
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum StateKind {
	Idle,
	Connecting,
	Submitting,
	Confirmed,
	Rejected,
	ConnectionLost,
	TimedOut,
}

fn kind(state: &SubmissionState) -> StateKind {
	match state {
		SubmissionState::Idle => StateKind::Idle,
		SubmissionState::Connecting => StateKind::Connecting,
		SubmissionState::Submitting => StateKind::Submitting,
		SubmissionState::Confirmed(_) => StateKind::Confirmed,
		SubmissionState::Rejected(_) => StateKind::Rejected,
		SubmissionState::ConnectionLost(_) => StateKind::ConnectionLost,
		SubmissionState::TimedOut(_) => StateKind::TimedOut,
	}
}

/// Allowed successor states.
static TRANSITIONS: Lazy<HashMap<StateKind, HashSet<StateKind>>> = Lazy::new(|| {
	use StateKind::*;

	let mut m = HashMap::new();
	m.insert(Idle, HashSet::from([Connecting, TimedOut]));
	m.insert(
		Connecting,
		HashSet::from([Submitting, ConnectionLost, Rejected, TimedOut]),
	);
	m.insert(
		Submitting,
		HashSet::from([Confirmed, ConnectionLost, Rejected, TimedOut]),
	);
	m.insert(ConnectionLost, HashSet::from([Connecting, TimedOut]));
	m.insert(Confirmed, HashSet::new()); // terminal
	m.insert(Rejected, HashSet::new()); // terminal
	m.insert(TimedOut, HashSet::new()); // terminal
	m
});

/// Checks if a state transition is valid.
pub fn is_valid_transition(from: &SubmissionState, to: &SubmissionState) -> bool {
	TRANSITIONS
		.get(&kind(from))
		.is_some_and(|set| set.contains(&kind(to)))
}

/// Tracks the state of one submission and announces its transitions.
pub struct SubmissionTracker {
	account: Address,
	chain_id: u64,
	nonce: u64,
	state: SubmissionState,
	event_bus: EventBus,
}

impl SubmissionTracker {
	/// Starts tracking a submission in `Idle`.
	pub fn new(account: Address, chain_id: u64, nonce: u64, event_bus: EventBus) -> Self {
		let tracker = Self {
			account,
			chain_id,
			nonce,
			state: SubmissionState::Idle,
			event_bus,
		};
		tracker.announce();
		tracker
	}

	pub fn state(&self) -> &SubmissionState {
		&self.state
	}

	/// Moves to `next` if the transition table allows it.
	pub fn transition(&mut self, next: SubmissionState) -> Result<(), StateError> {
		if !is_valid_transition(&self.state, &next) {
			return Err(StateError::InvalidTransition {
				from: self.state.name(),
				to: next.name(),
			});
		}
		tracing::debug!(
			chain_id = self.chain_id,
			nonce = self.nonce,
			from = self.state.name(),
			to = next.name(),
			"Submission state changed"
		);
		self.state = next;
		self.announce();
		Ok(())
	}

	fn announce(&self) {
		self.event_bus
			.publish(SubmissionEvent::StateChanged {
				account: self.account,
				chain_id: self.chain_id,
				nonce: self.nonce,
				state: self.state.clone(),
			})
			.ok();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use xchain_types::{SettlementReceipt, TransactionHash};

	fn confirmed() -> SubmissionState {
		SubmissionState::Confirmed(SettlementReceipt {
			chain_id: 1,
			tx_hash: TransactionHash(vec![0; 32]),
			block_number: 1,
			order_id: None,
			delegated_to: None,
		})
	}

	#[test]
	fn test_happy_path_and_retry_loop() {
		let bus = EventBus::new(16);
		let mut rx = bus.subscribe();
		let mut tracker = SubmissionTracker::new(Address::ZERO, 1, 0, bus);

		tracker.transition(SubmissionState::Connecting).unwrap();
		tracker
			.transition(SubmissionState::ConnectionLost("reset".into()))
			.unwrap();
		tracker.transition(SubmissionState::Connecting).unwrap();
		tracker.transition(SubmissionState::Submitting).unwrap();
		tracker.transition(confirmed()).unwrap();
		assert!(tracker.state().is_terminal());

		let mut names = Vec::new();
		while let Ok(SubmissionEvent::StateChanged { state, .. }) = rx.try_recv() {
			names.push(state.name());
		}
		assert_eq!(
			names,
			vec![
				"idle",
				"connecting",
				"connection_lost",
				"connecting",
				"submitting",
				"confirmed"
			]
		);
	}

	#[test]
	fn test_terminal_states_are_final() {
		let rejected = SubmissionState::Rejected("nonce used".into());
		for next in [
			SubmissionState::Connecting,
			SubmissionState::Submitting,
			confirmed(),
		] {
			assert!(!is_valid_transition(&rejected, &next));
			assert!(!is_valid_transition(&confirmed(), &next));
		}
	}

	#[test]
	fn test_timeout_ends_any_unfinished_state() {
		let timed_out = SubmissionState::TimedOut("deadline".into());
		for from in [
			SubmissionState::Idle,
			SubmissionState::Connecting,
			SubmissionState::Submitting,
			SubmissionState::ConnectionLost("reset".into()),
		] {
			assert!(is_valid_transition(&from, &timed_out));
		}
		assert!(!is_valid_transition(&confirmed(), &timed_out));
		assert!(!is_valid_transition(
			&timed_out,
			&SubmissionState::Connecting
		));
		assert!(timed_out.is_terminal());
	}

	#[test]
	fn test_cannot_skip_connecting() {
		let mut tracker = SubmissionTracker::new(Address::ZERO, 1, 0, EventBus::new(4));
		assert!(tracker.transition(SubmissionState::Submitting).is_err());
		assert!(!is_valid_transition(
			&SubmissionState::ConnectionLost("x".into()),
			&SubmissionState::Submitting
		));
		assert_eq!(tracker.state(), &SubmissionState::Idle);
	}
}
