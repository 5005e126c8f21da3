//! Broadcast bus for telemetry events.

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::event::TelemetryEvent;

/// A broadcast-based telemetry bus.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Slow
/// subscribers lag and lose the oldest events; the publisher never blocks.
#[derive(Clone)]
pub struct TelemetryBus {
    sender: broadcast::Sender<Arc<TelemetryEvent>>,
}

impl TelemetryBus {
    /// Create a new bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: TelemetryEvent) {
        tracing::debug!(kind = event.kind(), "telemetry");
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<TelemetryEvent>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for TelemetryBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn bus_publish_subscribe() {
        let bus = TelemetryBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(TelemetryEvent::ResetComplete {
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            TelemetryEvent::ResetComplete { .. } => {}
            other => panic!("Expected ResetComplete, got {other:?}"),
        }
    }

    #[test]
    fn bus_no_subscribers_doesnt_panic() {
        let bus = TelemetryBus::new(16);
        bus.publish(TelemetryEvent::InputRearmed {
            timestamp: Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
