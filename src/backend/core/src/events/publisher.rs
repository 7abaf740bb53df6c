//! Source-tagged event publishing.

use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::channel::EventChannel;
use super::event::{LicenseEvent, LicenseEventType};
use crate::config::EventsConfig;
use crate::error::PublishError;
use crate::store::LicenseUpdate;

/// Publishes license events stamped with this service's identity.
pub struct EventPublisher {
    channel: Arc<dyn EventChannel>,
    source: String,
    publish_timeout: Duration,
}

impl EventPublisher {
    pub fn new(
        channel: Arc<dyn EventChannel>,
        source: impl Into<String>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            channel,
            source: source.into(),
            publish_timeout,
        }
    }

    pub fn from_config(channel: Arc<dyn EventChannel>, config: &EventsConfig) -> Self {
        Self::new(channel, config.source.clone(), config.publish_timeout)
    }

    /// Identity stamped on every event.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Stamp, encode and send an event, waiting at most `publish_timeout`
    /// for the channel to accept it.
    #[instrument(skip(self, payload), fields(user_id = %user_id, event_type = %event_type))]
    pub async fn publish(
        &self,
        event_type: LicenseEventType,
        user_id: &str,
        payload: LicenseUpdate,
    ) -> Result<LicenseEvent, PublishError> {
        let event = LicenseEvent::new(event_type, user_id, payload, &self.source);

        let result = match event.to_bytes() {
            Ok(bytes) => {
                match tokio::time::timeout(self.publish_timeout, self.channel.publish(user_id, bytes))
                    .await
                {
                    Ok(sent) => sent,
                    Err(_) => Err(PublishError::Timeout(self.publish_timeout)),
                }
            }
            Err(e) => Err(PublishError::from(e)),
        };

        match result {
            Ok(()) => {
                counter!("license_events_published_total").increment(1);
                debug!(channel = self.channel.name(), "license event published");
                Ok(event)
            }
            Err(e) => {
                counter!("license_publish_failures_total", "kind" => e.kind()).increment(1);
                warn!(channel = self.channel.name(), error = %e, "license event publish failed");
                Err(e)
            }
        }
    }

    /// Close the underlying channel.
    pub async fn close(&self) {
        self.channel.close().await;
    }
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("channel", &self.channel.name())
            .field("source", &self.source)
            .field("publish_timeout", &self.publish_timeout)
            .finish()
    }
}
