//! Event bus between workers and the stats aggregator
//!
//! Every worker holds an [`EventSender`]; exactly one aggregator owns the
//! matching [`EventReceiver`]. Sending never blocks, so it is safe from the
//! broker's delivery callback.

use tokio::sync::mpsc;
use tracing::debug;

/// Completed-action notification from a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    /// A publish was acknowledged by the broker
    MessagePublished { count: u64 },
    /// A message arrived on a worker's subscription
    MessageReceived { count: u64 },
}

impl PoolEvent {
    pub fn published() -> Self {
        PoolEvent::MessagePublished { count: 1 }
    }

    pub fn received() -> Self {
        PoolEvent::MessageReceived { count: 1 }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PoolEvent::MessagePublished { .. } => "MessagePublished",
            PoolEvent::MessageReceived { .. } => "MessageReceived",
        }
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<PoolEvent>;

/// Cloneable write side of the bus
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<PoolEvent>,
}

impl EventSender {
    /// Emit an event; dropped once the aggregator has shut down
    pub fn send(&self, event: PoolEvent) {
        if self.tx.send(event).is_err() {
            debug!(event = event.name(), "event bus closed, dropping event");
        }
    }

    pub fn published(&self) {
        self.send(PoolEvent::published());
    }

    pub fn received(&self) {
        self.send(PoolEvent::received());
    }
}

/// Create the bus shared by all workers of one pool
pub fn event_bus() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_send_order() {
        let (tx, mut rx) = event_bus();
        tx.published();
        tx.received();
        tx.clone().published();

        assert_eq!(rx.recv().await, Some(PoolEvent::MessagePublished { count: 1 }));
        assert_eq!(rx.recv().await, Some(PoolEvent::MessageReceived { count: 1 }));
        assert_eq!(rx.recv().await, Some(PoolEvent::MessagePublished { count: 1 }));
    }

    #[test]
    fn test_send_after_receiver_dropped_is_silent() {
        let (tx, rx) = event_bus();
        drop(rx);
        tx.published();
    }
}
