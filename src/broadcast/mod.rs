//! Event bus for live viewers
//!
//! Thin wrapper around a `tokio::sync::broadcast` channel. Publishing is
//! fire-and-forget: a publish with no subscribers is not an error, slow
//! subscribers lag and drop events, and nothing is persisted or replayed.
//! Viewers that reconnect pull `GET /api/current-state` instead.

use tokio::sync::broadcast;

use crate::types::RelayEvent;

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RelayEvent>,
}

impl EventBus {
    /// `capacity` is the number of events buffered per subscriber before it
    /// starts lagging.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Deliver `event` to every current subscriber.
    ///
    /// Returns the number of subscribers reached (0 when nobody listens).
    pub fn publish(&self, event: RelayEvent) -> usize {
        let name = event.name();
        match self.sender.send(event) {
            Ok(reached) => {
                tracing::debug!(event = name, subscribers = reached, "Published event");
                reached
            }
            Err(_) => {
                tracing::trace!(event = name, "Published event with no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::config::defaults::EVENT_CHANNEL_CAPACITY)
    }
}
