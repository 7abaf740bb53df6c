//! License Server - Main entry point

use std::sync::Arc;

use license_core::{
    api::{self, AppState},
    config::Config,
    events::{
        EventChannel, EventConsumer, EventPublisher, InMemoryChannel, RedisStreamChannel,
        RedisStreamConfig,
    },
    observability,
    service::LicenseService,
    store::DurableStore,
};
use tokio_util::sync::CancellationToken;

const SERVICE_NAME: &str = "license-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = match std::env::var("LICENSE_CONFIG_FILE") {
        Ok(path) => Config::from_file(&path)?,
        Err(_) => Config::load()?,
    };

    // Initialize observability
    observability::init(SERVICE_NAME, &config.observability)?;
    observability::metrics::init()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        source = %config.events.source,
        "Starting License Server"
    );

    // Open the store; first run bootstraps an empty document
    let store = Arc::new(DurableStore::open(&config.store.path));
    let records = store.load().await?.len();
    tracing::info!(path = %config.store.path.display(), records, "License store ready");

    // Event channel shared by the publisher and the consumer
    let channel: Arc<dyn EventChannel> = if config.events.broker_url.starts_with("memory:") {
        tracing::warn!("Using in-process event channel, changes will not replicate");
        Arc::new(InMemoryChannel::new())
    } else {
        Arc::new(RedisStreamChannel::new(RedisStreamConfig::from(&config.events))?)
    };
    tracing::info!(
        channel = channel.name(),
        topic = %config.events.topic,
        group = %config.events.consumer_group,
        "Event channel configured"
    );

    let publisher = Arc::new(EventPublisher::from_config(channel.clone(), &config.events));
    let consumer = Arc::new(EventConsumer::new(
        store.clone(),
        channel,
        config.events.source.clone(),
    ));

    // A consumer that dies takes the server down with it, so a supervisor restarts both
    let shutdown = CancellationToken::new();
    let consumer_handle = consumer
        .start()
        .ok_or_else(|| anyhow::anyhow!("event consumer already running"))?;
    let consumer_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = consumer_handle.await;
            shutdown.cancel();
            result
        })
    };

    // Build router
    let service = Arc::new(LicenseService::new(store, publisher.clone()));
    let app = api::build_router(AppState::new(service, SERVICE_NAME));

    // Start server
    let addr = config.bind_address();
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    // Cleanup: let the in-flight event finish, then release the channel
    consumer.stop();
    let consumer_result = consumer_task.await?;
    publisher.close().await;
    observability::shutdown();
    tracing::info!("Server shutdown complete");

    consumer_result??;
    Ok(())
}

/// Wait for a shutdown signal or an internal shutdown request.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Shutdown signal received"),
        _ = terminate => tracing::info!("Shutdown signal received"),
        _ = shutdown.cancelled() => tracing::error!("Event consumer stopped, shutting down"),
    }
}
