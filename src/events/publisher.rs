use tokio::sync::broadcast;
use uuid::Uuid;

use super::types::BridgeEvent;

/// Fan-out publisher for bridge notifications
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event_id: Uuid,
    pub event: BridgeEvent,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to every current subscriber
    ///
    /// Never blocks. Publishing with no subscribers is not an error; slow
    /// subscribers observe `RecvError::Lagged` instead of stalling publishers.
    pub fn publish(&self, event: BridgeEvent) {
        let event = PublishedEvent {
            event_id: Uuid::new_v4(),
            event,
            published_at: chrono::Utc::now(),
        };

        // send() only fails when there are no receivers
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let publisher = EventPublisher::new(4);
        publisher.publish(BridgeEvent::BridgeClosed);
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let publisher = EventPublisher::new(8);
        let mut receiver = publisher.subscribe();

        publisher.publish(BridgeEvent::ConnectionLost {
            task_id: "t-1".to_string(),
            reason: "eof".to_string(),
        });
        publisher.publish(BridgeEvent::BridgeClosed);

        let first = receiver.recv().await.unwrap();
        assert_eq!(first.event.task_id(), Some("t-1"));
        let second = receiver.recv().await.unwrap();
        assert!(matches!(second.event, BridgeEvent::BridgeClosed));
        assert!(second.published_at >= first.published_at);
        assert_ne!(first.event_id, second.event_id);
    }
}
