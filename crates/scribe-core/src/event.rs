//! Event bus for scribe using tokio::broadcast
//!
//! Publish-subscribe channel carrying pipeline events to presenters.
//! The CLI subscribes for status lines; a GUI status presenter would
//! subscribe the same way.

use crate::checkout::CreditBundle;
use crate::connectivity::ConnectivityState;
use crate::error::PipelineError;
use crate::orchestrator::PipelineState;
use crate::types::PendingRequest;
use tokio::sync::broadcast;

/// Events emitted by the generation pipeline
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// The orchestrator moved to a new state
    StateChanged(PipelineState),

    /// Connectivity edge observed by the orchestrator
    ConnectivityChanged(ConnectivityState),

    /// A call failed while nominally online; sources may re-verify
    ConnectivitySuspect,

    /// A request was deferred into the single-slot queue
    RequestQueued,

    /// A newer enqueue displaced this request (last-write-wins slot)
    RequestDiscarded(PendingRequest),

    /// The queued request is being replayed after reconnection
    ReplayStarted,

    /// An attempt reached a terminal state
    AttemptFinished(Result<String, PipelineError>),

    /// Credits are exhausted; a purchase of this bundle is offered
    PurchaseOffered(CreditBundle),
}

/// Event bus for broadcasting pipeline events
///
/// Uses tokio::broadcast for multi-consumer support.
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create with default capacity (256 events)
    pub fn default_capacity() -> Self {
        Self::new(256)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: PipelineEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Get current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::default_capacity()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let bus = EventBus::default_capacity();
        let mut rx = bus.subscribe();

        bus.publish(PipelineEvent::RequestQueued);
        bus.publish(PipelineEvent::ReplayStarted);

        assert!(matches!(rx.recv().await.unwrap(), PipelineEvent::RequestQueued));
        assert!(matches!(rx.recv().await.unwrap(), PipelineEvent::ReplayStarted));
    }

    #[tokio::test]
    async fn test_event_bus_multiple_subscribers() {
        let bus = EventBus::default_capacity();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(PipelineEvent::ConnectivityChanged(ConnectivityState::Offline));

        assert!(matches!(
            rx1.recv().await.unwrap(),
            PipelineEvent::ConnectivityChanged(ConnectivityState::Offline)
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            PipelineEvent::ConnectivityChanged(ConnectivityState::Offline)
        ));
    }

    #[test]
    fn test_event_bus_no_subscribers_ok() {
        let bus = EventBus::default_capacity();
        // Should not panic even with no subscribers
        bus.publish(PipelineEvent::ConnectivitySuspect);
    }
}
