//! Integration tests for event replication between replicas.
//!
//! Tests cover:
//! - Self-filtering of own events
//! - Idempotent application and no re-publication
//! - Two replicas converging over one shared channel
//! - Isolation of per-event failures
//! - Consumer lifecycle

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use license_core::error::{StorageError, StorageErrorKind, TransportError};
use license_core::events::{
    ConsumerState, EventChannel, EventConsumer, EventPublisher, HandleOutcome, InMemoryChannel,
    LicenseEvent, LicenseEventType,
};
use license_core::service::LicenseService;
use license_core::store::{
    DurableStore, InMemoryBackend, LicenseRecord, LicenseStore, LicenseUpdate, StoreBackend,
};

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 5s");
}

async fn wait_for_subscribers(channel: &InMemoryChannel, count: usize) {
    eventually(|| async move { channel.subscribers() >= count }).await;
}

/// One service instance: store, publisher, consumer and service facade.
struct Replica {
    store: Arc<DurableStore>,
    consumer: Arc<EventConsumer>,
    service: LicenseService,
}

impl Replica {
    fn new(source: &str, channel: &Arc<InMemoryChannel>) -> Self {
        let store = Arc::new(DurableStore::in_memory());
        let publisher = Arc::new(EventPublisher::new(
            channel.clone(),
            source,
            Duration::from_secs(1),
        ));
        let consumer = Arc::new(EventConsumer::new(store.clone(), channel.clone(), source));
        let service = LicenseService::new(store.clone(), publisher);
        Self {
            store,
            consumer,
            service,
        }
    }
}

// ============================================================================
// Handling
// ============================================================================

#[tokio::test]
async fn test_own_event_never_applied_regardless_of_payload() {
    let store = Arc::new(DurableStore::in_memory());
    let consumer = EventConsumer::new(store.clone(), Arc::new(InMemoryChannel::new()), "svc-a");

    for payload in [
        LicenseUpdate::default().with_valid_seat(true),
        LicenseUpdate::default().with_seat_type("Premium"),
        LicenseUpdate::default(),
    ] {
        let event = LicenseEvent::license_updated("u1", payload, "svc-a");
        assert_eq!(
            consumer.handle(&event).await.unwrap(),
            HandleOutcome::SkippedOwnEvent
        );
    }

    assert!(store.load().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_delivery_applied_once() {
    let store = Arc::new(DurableStore::in_memory());
    let consumer = EventConsumer::new(store.clone(), Arc::new(InMemoryChannel::new()), "svc-a");
    let event = LicenseEvent::license_updated(
        "u1",
        LicenseUpdate::default()
            .with_valid_seat(true)
            .with_expiration_date("2025-06-30"),
        "svc-b",
    );

    assert_eq!(consumer.handle(&event).await.unwrap(), HandleOutcome::Applied);
    let snapshot = store.load().await.unwrap();
    assert_eq!(consumer.handle(&event).await.unwrap(), HandleOutcome::Unchanged);
    assert_eq!(store.load().await.unwrap(), snapshot);
}

#[tokio::test]
async fn test_event_from_unknown_source_is_applied() {
    let store = Arc::new(DurableStore::in_memory());
    let consumer = EventConsumer::new(store.clone(), Arc::new(InMemoryChannel::new()), "svc-a");
    let event = LicenseEvent::from_bytes(
        br#"{"eventType":"LICENSE_UPDATED","userId":"u1","payload":{"seatType":"Standard"},
            "timestamp":"2024-05-01T12:00:00Z"}"#,
    )
    .unwrap();

    assert_eq!(event.source, "unknown");
    assert_eq!(consumer.handle(&event).await.unwrap(), HandleOutcome::Applied);
}

// ============================================================================
// Replication
// ============================================================================

#[tokio::test]
async fn test_two_replicas_converge_without_echo() {
    let channel = Arc::new(InMemoryChannel::new());
    let a = Replica::new("replica-a", &channel);
    let b = Replica::new("replica-b", &channel);

    let handle_a = a.consumer.start().unwrap();
    let handle_b = b.consumer.start().unwrap();
    wait_for_subscribers(&channel, 2).await;

    a.service
        .update_authorization(
            "42",
            LicenseUpdate::default()
                .with_valid_seat(true)
                .with_seat_type("Premium"),
        )
        .await
        .unwrap();

    let store_b = b.store.clone();
    eventually(|| {
        let store_b = store_b.clone();
        async move { store_b.get("42").await.unwrap().is_some() }
    })
    .await;

    assert_eq!(
        b.service.get_authorization("42").await.unwrap(),
        a.service.get_authorization("42").await.unwrap()
    );

    // Replica b applied silently; only replica a's write was ever published.
    b.service
        .update_authorization("42", LicenseUpdate::default().with_valid_seat(true))
        .await
        .unwrap();
    assert_eq!(channel.published(), 1);

    a.consumer.stop();
    b.consumer.stop();
    handle_a.await.unwrap().unwrap();
    handle_b.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_write_on_either_replica_reaches_the_other() {
    let channel = Arc::new(InMemoryChannel::new());
    let a = Replica::new("replica-a", &channel);
    let b = Replica::new("replica-b", &channel);

    let _ = a.consumer.start().unwrap();
    let _ = b.consumer.start().unwrap();
    wait_for_subscribers(&channel, 2).await;

    a.service
        .update_authorization("u1", LicenseUpdate::default().with_seat_type("Standard"))
        .await
        .unwrap();
    b.service
        .update_authorization("u2", LicenseUpdate::default().with_valid_seat(true))
        .await
        .unwrap();

    let (store_a, store_b) = (a.store.clone(), b.store.clone());
    eventually(|| {
        let (store_a, store_b) = (store_a.clone(), store_b.clone());
        async move { store_a.len().await.unwrap() == 2 && store_b.len().await.unwrap() == 2 }
    })
    .await;

    assert_eq!(a.store.load().await.unwrap(), b.store.load().await.unwrap());
    assert_eq!(channel.published(), 2);

    a.consumer.stop();
    b.consumer.stop();
}

// ============================================================================
// Failure Isolation
// ============================================================================

/// Backend whose first `failures` writes fail.
struct FlakyBackend {
    inner: InMemoryBackend,
    failures: AtomicUsize,
}

#[async_trait]
impl StoreBackend for FlakyBackend {
    async fn read(&self) -> Result<LicenseStore, StorageError> {
        self.inner.read().await
    }

    async fn write(&self, store: &LicenseStore) -> Result<(), StorageError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::new(
                StorageErrorKind::IoFailure,
                "flaky",
                "disk unavailable",
            ));
        }
        self.inner.write(store).await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }

    fn location(&self) -> String {
        "flaky".to_string()
    }
}

#[tokio::test]
async fn test_store_failure_drops_event_and_loop_continues() {
    let backend = Arc::new(FlakyBackend {
        inner: InMemoryBackend::with_store(LicenseStore::new()),
        failures: AtomicUsize::new(1),
    });
    let store = Arc::new(DurableStore::new(backend));
    let channel = Arc::new(InMemoryChannel::new());
    let consumer = Arc::new(EventConsumer::new(store.clone(), channel.clone(), "svc-a"));
    let publisher = EventPublisher::new(channel.clone(), "svc-b", Duration::from_secs(1));

    let handle = consumer.start().unwrap();
    wait_for_subscribers(&channel, 1).await;

    publisher
        .publish(
            LicenseEventType::LicenseUpdated,
            "lost",
            LicenseUpdate::default().with_valid_seat(true),
        )
        .await
        .unwrap();
    publisher
        .publish(
            LicenseEventType::LicenseUpdated,
            "kept",
            LicenseUpdate::default().with_valid_seat(true),
        )
        .await
        .unwrap();

    let reader = store.clone();
    eventually(|| {
        let reader = reader.clone();
        async move { reader.get("kept").await.unwrap().is_some() }
    })
    .await;

    assert!(store.get("lost").await.unwrap().is_none());
    assert!(consumer.is_running());

    consumer.stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_undecodable_and_unknown_events_are_skipped() {
    let store = Arc::new(DurableStore::in_memory());
    let channel = Arc::new(InMemoryChannel::new());
    let consumer = Arc::new(EventConsumer::new(store.clone(), channel.clone(), "svc-a"));

    let handle = consumer.start().unwrap();
    wait_for_subscribers(&channel, 1).await;

    channel.publish("u1", b"{not json".to_vec()).await.unwrap();
    let revoked = LicenseEvent::new(
        LicenseEventType::Other("LICENSE_REVOKED".into()),
        "u1",
        LicenseUpdate::default().with_valid_seat(false),
        "svc-b",
    );
    channel.publish("u1", revoked.to_bytes().unwrap()).await.unwrap();
    let updated = LicenseEvent::license_updated(
        "u2",
        LicenseUpdate::default().with_seat_type("Trial"),
        "svc-b",
    );
    channel.publish("u2", updated.to_bytes().unwrap()).await.unwrap();

    let reader = store.clone();
    eventually(|| {
        let reader = reader.clone();
        async move { reader.get("u2").await.unwrap().is_some() }
    })
    .await;

    assert!(store.get("u1").await.unwrap().is_none());
    assert_eq!(
        store.get("u2").await.unwrap(),
        Some(LicenseRecord {
            seat_type: Some("Trial".into()),
            ..Default::default()
        })
    );

    consumer.stop();
    handle.await.unwrap().unwrap();
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_channel_close_stops_consumer() {
    let channel = Arc::new(InMemoryChannel::new());
    let consumer = Arc::new(EventConsumer::new(
        Arc::new(DurableStore::in_memory()),
        channel.clone(),
        "svc-a",
    ));

    let handle = consumer.start().unwrap();
    wait_for_subscribers(&channel, 1).await;
    channel.close().await;

    handle.await.unwrap().unwrap();
    assert_eq!(consumer.state(), ConsumerState::Stopped);
}

#[tokio::test]
async fn test_subscribe_failure_ends_consumer_with_error() {
    let channel = Arc::new(InMemoryChannel::new());
    channel.close().await;
    let consumer = Arc::new(EventConsumer::new(
        Arc::new(DurableStore::in_memory()),
        channel,
        "svc-a",
    ));

    let result = consumer.start().unwrap().await.unwrap();
    assert!(matches!(result, Err(TransportError::SubscribeFailure(_))));
    assert_eq!(consumer.state(), ConsumerState::Stopped);
}

#[tokio::test]
async fn test_consumer_can_restart_after_stop() {
    let channel = Arc::new(InMemoryChannel::new());
    let consumer = Arc::new(EventConsumer::new(
        Arc::new(DurableStore::in_memory()),
        channel.clone(),
        "svc-a",
    ));

    let first = consumer.start().unwrap();
    consumer.stop();
    first.await.unwrap().unwrap();

    let second = consumer.start().unwrap();
    assert!(consumer.is_running());
    consumer.stop();
    second.await.unwrap().unwrap();
}
