use agentgrid_core_types::{FeedEvent, FeedTopic};
use log::debug;
use std::sync::Arc;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

/// Topic bus for the shared event feed.
///
/// Publishing never blocks; when the channel buffer fills, the oldest
/// undelivered events are dropped for the lagging subscriber only.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<FeedEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Publish a pre-built event to all subscribers.
    pub fn publish(&self, event: FeedEvent) {
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("Feed event published with no subscribers");
        }
    }

    /// Stamp and publish a payload under the given topic.
    pub fn publish_payload(&self, topic: FeedTopic, payload: serde_json::Value) {
        self.publish(FeedEvent::new(topic, payload));
    }

    pub fn subscribe(&self) -> FeedReceiver {
        FeedReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receiving end of a feed subscription.
pub struct FeedReceiver {
    receiver: broadcast::Receiver<FeedEvent>,
}

impl FeedReceiver {
    /// Receive the next event, waiting until one is available.
    pub async fn recv(&mut self) -> Result<FeedEvent, FeedRecvError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => FeedRecvError::Closed,
            broadcast::error::RecvError::Lagged(n) => FeedRecvError::Lagged(n),
        })
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Result<FeedEvent, FeedRecvError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => FeedRecvError::Empty,
            broadcast::error::TryRecvError::Closed => FeedRecvError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => FeedRecvError::Lagged(n),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeedRecvError {
    #[error("feed channel closed")]
    Closed,
    #[error("no event available")]
    Empty,
    #[error("receiver lagged by {0} events")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let bus = EventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish_payload(FeedTopic::TaskPosted, json!({ "eventId": "t-1" }));

        let ea = a.recv().await.expect("subscriber a");
        let eb = b.recv().await.expect("subscriber b");
        assert_eq!(ea.topic, FeedTopic::TaskPosted);
        assert_eq!(eb.payload["eventId"], "t-1");
    }

    #[tokio::test]
    async fn lagged_subscriber_skips_ahead() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.publish_payload(FeedTopic::TaskProgress, json!({ "eventId": format!("t-{i}") }));
        }

        match rx.recv().await {
            Err(FeedRecvError::Lagged(n)) => assert!(n > 0),
            other => panic!("expected lag, got {other:?}"),
        }
    }
}
