//! Redis Streams event channel.
//!
//! Publishing appends to the topic stream:
//!
//! ```text
//! XADD <topic> * key <userId> event <json>
//! ```
//!
//! Every service reads the stream through its own consumer group, so each
//! replica sees every event once (at least once across restarts). A
//! subscription first re-reads entries this consumer was handed but never
//! acknowledged, then follows new entries.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamReadReply};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::channel::{Delivery, EventChannel, EventSubscription};
use crate::config::EventsConfig;
use crate::error::{PublishError, TransportError};

const READ_BATCH: usize = 32;
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Connection settings for [`RedisStreamChannel`].
#[derive(Debug, Clone)]
pub struct RedisStreamConfig {
    pub url: String,
    pub topic: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub read_block: Duration,
    pub max_reconnect_attempts: u32,
}

impl From<&EventsConfig> for RedisStreamConfig {
    fn from(config: &EventsConfig) -> Self {
        Self {
            url: config.broker_url.clone(),
            topic: config.topic.clone(),
            consumer_group: config.consumer_group.clone(),
            consumer_name: config.client_id.clone(),
            read_block: config.read_block,
            max_reconnect_attempts: config.max_reconnect_attempts,
        }
    }
}

/// Event channel on a Redis stream.
pub struct RedisStreamChannel {
    client: redis::Client,
    config: RedisStreamConfig,
    connection: Mutex<Option<ConnectionManager>>,
    closed: Arc<AtomicBool>,
}

impl RedisStreamChannel {
    /// Create the channel. No connection is made until first use.
    pub fn new(config: RedisStreamConfig) -> Result<Self, TransportError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| TransportError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            config,
            connection: Mutex::new(None),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    /// Shared publishing connection, established on first use.
    async fn connection(&self) -> Result<ConnectionManager, redis::RedisError> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = ConnectionManager::new(self.client.clone()).await?;
        info!(topic = %self.config.topic, "connected to event channel");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn ensure_group(&self, conn: &mut ConnectionManager) -> Result<(), redis::RedisError> {
        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.topic)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        match created {
            Ok(()) => {
                info!(
                    topic = %self.config.topic,
                    group = %self.config.consumer_group,
                    "created consumer group"
                );
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl EventChannel for RedisStreamChannel {
    async fn publish(&self, key: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PublishError::ConnectionFailure("channel closed".to_string()));
        }

        let mut conn = self
            .connection()
            .await
            .map_err(|e| PublishError::ConnectionFailure(e.to_string()))?;

        let id: String = redis::cmd("XADD")
            .arg(&self.config.topic)
            .arg("*")
            .arg("key")
            .arg(key)
            .arg("event")
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| PublishError::ConnectionFailure(e.to_string()))?;

        debug!(topic = %self.config.topic, key, id = %id, "event appended");
        Ok(())
    }

    async fn subscribe(&self) -> Result<Box<dyn EventSubscription>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::SubscribeFailure("channel closed".to_string()));
        }

        // Blocking reads get their own connection so they never stall publishes.
        let mut conn = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| TransportError::SubscribeFailure(e.to_string()))?;

        self.ensure_group(&mut conn)
            .await
            .map_err(|e| TransportError::SubscribeFailure(e.to_string()))?;

        info!(
            topic = %self.config.topic,
            group = %self.config.consumer_group,
            consumer = %self.config.consumer_name,
            "subscribed to event channel"
        );

        Ok(Box::new(RedisStreamSubscription {
            conn,
            config: self.config.clone(),
            cursor: ReadCursor::Pending("0".to_string()),
            buffer: VecDeque::new(),
            failures: 0,
            closed: Arc::clone(&self.closed),
        }))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.connection.lock().await.take();
        info!(topic = %self.config.topic, "event channel closed");
    }

    fn name(&self) -> &'static str {
        "redis-streams"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Subscription
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReadCursor {
    /// Replaying our own unacknowledged entries, after the given id.
    Pending(String),
    /// Following entries never delivered to the group.
    New,
}

impl ReadCursor {
    fn start_id(&self) -> &str {
        match self {
            Self::Pending(after) => after,
            Self::New => ">",
        }
    }

    /// Cursor for the read after a batch ending at `last`. An empty pending
    /// batch means the backlog is drained.
    fn advance(&self, last: Option<&str>) -> Self {
        match (self, last) {
            (Self::Pending(_), Some(id)) => Self::Pending(id.to_string()),
            (Self::Pending(_), None) | (Self::New, _) => Self::New,
        }
    }
}

/// Decision after a failed read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadRetry {
    After(Duration),
    GiveUp,
}

/// Exponential backoff from 100ms, capped at [`MAX_BACKOFF`]. `failures`
/// counts consecutive failures including the current one.
fn retry_after(failures: u32, max_attempts: u32) -> ReadRetry {
    if failures > max_attempts {
        return ReadRetry::GiveUp;
    }
    let exp = failures.saturating_sub(1).min(6);
    ReadRetry::After(Duration::from_millis(100 * (1u64 << exp)).min(MAX_BACKOFF))
}

struct RedisStreamSubscription {
    conn: ConnectionManager,
    config: RedisStreamConfig,
    cursor: ReadCursor,
    buffer: VecDeque<Delivery>,
    failures: u32,
    closed: Arc<AtomicBool>,
}

impl RedisStreamSubscription {
    async fn read_batch(&mut self) -> redis::RedisResult<Vec<StreamId>> {
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg("COUNT")
            .arg(READ_BATCH)
            .arg("BLOCK")
            .arg(self.config.read_block.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.topic)
            .arg(self.cursor.start_id())
            .query_async(&mut self.conn)
            .await?;

        Ok(reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default())
    }
}

fn to_delivery(entry: StreamId) -> Delivery {
    let key = entry.get::<String>("key").unwrap_or_default();
    let payload = entry.get::<Vec<u8>>("event").unwrap_or_default();
    Delivery {
        id: entry.id,
        key,
        payload,
    }
}

#[async_trait]
impl EventSubscription for RedisStreamSubscription {
    async fn next(&mut self) -> Result<Option<Delivery>, TransportError> {
        loop {
            if let Some(delivery) = self.buffer.pop_front() {
                return Ok(Some(delivery));
            }
            if self.closed.load(Ordering::Acquire) {
                return Ok(None);
            }

            match self.read_batch().await {
                Ok(entries) => {
                    self.failures = 0;

                    let next = self.cursor.advance(entries.last().map(|e| e.id.as_str()));
                    if next == ReadCursor::New && self.cursor != ReadCursor::New {
                        debug!(topic = %self.config.topic, "pending entries replayed");
                    }
                    self.cursor = next;

                    self.buffer.extend(entries.into_iter().map(to_delivery));
                }
                Err(e) => {
                    self.failures += 1;
                    match retry_after(self.failures, self.config.max_reconnect_attempts) {
                        ReadRetry::GiveUp => {
                            return Err(TransportError::SubscribeFailure(format!(
                                "{} consecutive read failures, last: {}",
                                self.failures, e
                            )));
                        }
                        ReadRetry::After(delay) => {
                            warn!(
                                topic = %self.config.topic,
                                attempt = self.failures,
                                retry_in = ?delay,
                                error = %e,
                                "event channel read failed"
                            );
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }
    }

    async fn ack(&mut self, id: &str) -> Result<(), TransportError> {
        let _: i64 = redis::cmd("XACK")
            .arg(&self.config.topic)
            .arg(&self.config.consumer_group)
            .arg(id)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| TransportError::SubscribeFailure(e.to_string()))?;
        Ok(())
    }
}
