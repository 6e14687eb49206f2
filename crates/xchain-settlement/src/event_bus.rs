//! Broadcast bus for submission events.

use tokio::sync::broadcast;
use xchain_types::SubmissionEvent;

/// Fan-out channel for [`SubmissionEvent`]s.
///
/// Publishing never blocks. Slow subscribers lag and lose the oldest events
/// rather than holding up submissions.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<SubmissionEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<SubmissionEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event. Fails only when nobody is subscribed.
	pub fn publish(
		&self,
		event: SubmissionEvent,
	) -> Result<usize, broadcast::error::SendError<SubmissionEvent>> {
		self.sender.send(event)
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(1000)
	}
}
