//! Background consumer applying remote license events.
//!
//! For every delivery the consumer:
//! 1. drops events whose `source` is this service (before touching the store),
//! 2. ignores event types it does not understand,
//! 3. merges the payload through [`DurableStore::merge`].
//!
//! The consumer never publishes. A failed merge is logged and the event
//! dropped; only a transport failure ends the loop.

use metrics::counter;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::channel::{Delivery, EventChannel, EventSubscription};
use super::event::{LicenseEvent, LicenseEventType};
use crate::error::{StorageError, TransportError};
use crate::store::DurableStore;

/// Lifecycle of the consumer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Stopped,
    Running,
}

/// What [`EventConsumer::handle`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The event came from this service.
    SkippedOwnEvent,
    /// The event type is not handled here.
    IgnoredEventType,
    /// The payload matched local state.
    Unchanged,
    /// Local state was updated.
    Applied,
}

impl HandleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SkippedOwnEvent => "skipped_own_event",
            Self::IgnoredEventType => "ignored_event_type",
            Self::Unchanged => "unchanged",
            Self::Applied => "applied",
        }
    }
}

impl fmt::Display for HandleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscribes to the shared channel and applies remote changes.
pub struct EventConsumer {
    store: Arc<DurableStore>,
    channel: Arc<dyn EventChannel>,
    source: String,
    state: Mutex<ConsumerState>,
    cancel: Mutex<CancellationToken>,
}

impl EventConsumer {
    /// `source` is this service's own identity, used for the self-filter.
    pub fn new(
        store: Arc<DurableStore>,
        channel: Arc<dyn EventChannel>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            store,
            channel,
            source: source.into(),
            state: Mutex::new(ConsumerState::Stopped),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ConsumerState::Running
    }

    /// Spawn the consumer loop.
    ///
    /// Returns `None` if the loop is already running. The handle resolves when
    /// the loop ends: `Ok` after [`stop`](Self::stop) or channel close, `Err`
    /// on an unrecoverable transport failure.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<Result<(), TransportError>>> {
        {
            let mut state = self.state.lock();
            if *state == ConsumerState::Running {
                debug!("event consumer already running");
                return None;
            }
            *state = ConsumerState::Running;
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();

        let consumer = Arc::clone(self);
        Some(tokio::spawn(async move {
            let result = consumer.run(cancel).await;
            *consumer.state.lock() = ConsumerState::Stopped;
            result
        }))
    }

    /// Ask the loop to stop after the event in hand, if any.
    pub fn stop(&self) {
        self.cancel.lock().cancel();
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), TransportError> {
        let mut subscription = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            subscribed = self.channel.subscribe() => subscribed.map_err(|e| {
                error!(channel = self.channel.name(), error = %e, "event consumer failed to subscribe");
                e
            })?,
        };

        info!(channel = self.channel.name(), source = %self.source, "event consumer started");

        loop {
            // Cancellation is only observed while waiting, never mid-merge.
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("event consumer stopped");
                    return Ok(());
                }
                next = subscription.next() => next,
            };

            match next {
                Ok(Some(delivery)) => self.process(&mut subscription, delivery).await,
                Ok(None) => {
                    info!("event channel closed, event consumer stopping");
                    return Ok(());
                }
                Err(e) => {
                    error!(error = %e, "event consumer lost its subscription");
                    return Err(e);
                }
            }
        }
    }

    async fn process(&self, subscription: &mut Box<dyn EventSubscription>, delivery: Delivery) {
        match LicenseEvent::from_bytes(&delivery.payload) {
            Ok(event) => {
                if let Err(e) = self.handle(&event).await {
                    counter!("license_events_consumed_total", "outcome" => "failed").increment(1);
                    error!(
                        delivery_id = %delivery.id,
                        user_id = %event.user_id,
                        error = %e,
                        "failed to apply license event, dropping"
                    );
                }
            }
            Err(e) => {
                counter!("license_events_consumed_total", "outcome" => "malformed").increment(1);
                warn!(
                    delivery_id = %delivery.id,
                    key = %delivery.key,
                    error = %e,
                    "dropping undecodable event"
                );
            }
        }

        if let Err(e) = subscription.ack(&delivery.id).await {
            warn!(delivery_id = %delivery.id, error = %e, "failed to acknowledge event");
        }
    }

    /// Apply one event to the local store. Never publishes.
    #[instrument(skip(self, event), fields(user_id = %event.user_id, source = %event.source))]
    pub async fn handle(&self, event: &LicenseEvent) -> Result<HandleOutcome, StorageError> {
        let outcome = if event.source == self.source {
            debug!("skipping event from this service");
            HandleOutcome::SkippedOwnEvent
        } else if event.event_type != LicenseEventType::LicenseUpdated {
            debug!(event_type = %event.event_type, "ignoring unhandled event type");
            HandleOutcome::IgnoredEventType
        } else {
            let merged = self.store.merge(&event.user_id, &event.payload).await?;
            if merged.changed {
                info!(fields = ?merged.delta.field_names(), "applied remote license update");
                HandleOutcome::Applied
            } else {
                debug!("remote license update already applied");
                HandleOutcome::Unchanged
            }
        };

        counter!("license_events_consumed_total", "outcome" => outcome.as_str()).increment(1);
        Ok(outcome)
    }
}

impl fmt::Debug for EventConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventConsumer")
            .field("channel", &self.channel.name())
            .field("source", &self.source)
            .field("state", &self.state())
            .finish()
    }
}
