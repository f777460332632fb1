//! The bounded event channel between the loop and its consumer.

use relay_types::AgentEvent;
use tokio::sync::mpsc;

/// The consumer went away before the sequence finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Sending half of the loop's event sequence.
///
/// Emission awaits channel capacity, so a slow consumer applies
/// back-pressure to the loop instead of losing events. A dropped
/// receiver surfaces as [`SinkClosed`], which the loop treats as
/// cancellation.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<AgentEvent>,
}

impl EventSender {
    /// Create a bounded channel pair.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AgentEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Emit one event, blocking on back-pressure.
    ///
    /// # Errors
    ///
    /// Returns [`SinkClosed`] when the receiver has been dropped.
    pub async fn emit(&self, event: AgentEvent) -> Result<(), SinkClosed> {
        self.tx.send(event).await.map_err(|_| SinkClosed)
    }
}
