//! Event channel abstraction.
//!
//! The shared pub/sub channel every replica publishes to and consumes from.
//! Implementations:
//! - [`InMemoryChannel`]: tokio broadcast channel for tests and in-process replicas
//! - [`RedisStreamChannel`](super::redis_stream::RedisStreamChannel): Redis Streams with consumer groups

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{PublishError, TransportError};

/// A message received from the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Transport-assigned id, passed back to [`EventSubscription::ack`].
    pub id: String,

    /// Partition key (the user id).
    pub key: String,

    /// Encoded event.
    pub payload: Vec<u8>,
}

/// Producer side of the channel.
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Hand an encoded event to the channel, returning once the channel accepted it.
    async fn publish(&self, key: &str, payload: Vec<u8>) -> Result<(), PublishError>;

    /// Open a subscription for this service.
    async fn subscribe(&self) -> Result<Box<dyn EventSubscription>, TransportError>;

    /// Release connections. Open subscriptions end.
    async fn close(&self);

    /// Get the channel name.
    fn name(&self) -> &'static str;
}

/// Consumer side of the channel.
#[async_trait]
pub trait EventSubscription: Send {
    /// Wait for the next delivery. `Ok(None)` means the channel closed.
    async fn next(&mut self) -> Result<Option<Delivery>, TransportError>;

    /// Confirm a delivery was handled.
    async fn ack(&mut self, id: &str) -> Result<(), TransportError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Channel
// ═══════════════════════════════════════════════════════════════════════════════

const DEFAULT_CAPACITY: usize = 1024;

/// Broadcast channel shared by every replica in the process.
pub struct InMemoryChannel {
    sender: Mutex<Option<broadcast::Sender<Delivery>>>,
    sequence: AtomicU64,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(sender)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Number of deliveries published so far.
    pub fn published(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Number of open subscriptions.
    pub fn subscribers(&self) -> usize {
        self.sender
            .lock()
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventChannel for InMemoryChannel {
    async fn publish(&self, key: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or_else(|| PublishError::ConnectionFailure("channel closed".to_string()))?;

        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let delivery = Delivery {
            id: id.to_string(),
            key: key.to_string(),
            payload,
        };

        // A topic with no subscribers drops the message, like a broker would.
        if sender.send(delivery).is_err() {
            debug!(key, "no subscribers for published event");
        }
        Ok(())
    }

    async fn subscribe(&self) -> Result<Box<dyn EventSubscription>, TransportError> {
        let receiver = self
            .sender
            .lock()
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| TransportError::SubscribeFailure("channel closed".to_string()))?;

        Ok(Box::new(InMemorySubscription { receiver }))
    }

    async fn close(&self) {
        self.sender.lock().take();
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct InMemorySubscription {
    receiver: broadcast::Receiver<Delivery>,
}

#[async_trait]
impl EventSubscription for InMemorySubscription {
    async fn next(&mut self) -> Result<Option<Delivery>, TransportError> {
        loop {
            match self.receiver.recv().await {
                Ok(delivery) => return Ok(Some(delivery)),
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged behind, events skipped");
                }
            }
        }
    }

    async fn ack(&mut self, _id: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_to_every_subscriber() {
        let channel = InMemoryChannel::new();
        let mut first = channel.subscribe().await.unwrap();
        let mut second = channel.subscribe().await.unwrap();

        channel.publish("u1", b"hello".to_vec()).await.unwrap();

        let a = first.next().await.unwrap().unwrap();
        let b = second.next().await.unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.key, "u1");
        assert_eq!(a.payload, b"hello");
        assert_eq!(channel.published(), 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let channel = InMemoryChannel::new();
        assert!(channel.publish("u1", Vec::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let channel = InMemoryChannel::new();
        let mut subscription = channel.subscribe().await.unwrap();

        channel.close().await;

        assert!(channel.is_closed());
        assert!(subscription.next().await.unwrap().is_none());
        assert!(matches!(
            channel.publish("u1", Vec::new()).await,
            Err(PublishError::ConnectionFailure(_))
        ));
        assert!(channel.subscribe().await.is_err());
    }

    #[tokio::test]
    async fn test_lagged_subscriber_skips_ahead() {
        let channel = InMemoryChannel::with_capacity(2);
        let mut subscription = channel.subscribe().await.unwrap();

        for i in 0..5 {
            channel.publish("u1", vec![i]).await.unwrap();
        }

        let delivery = subscription.next().await.unwrap().unwrap();
        assert_eq!(delivery.payload, vec![3]);
    }
}
