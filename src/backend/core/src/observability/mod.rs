//! Observability: Distributed Tracing, Metrics, and Logging.

use opentelemetry_otlp::WithExportConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Initialize logging and, when an endpoint is configured, OTLP trace export.
pub fn init(service_name: &str, config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let telemetry_layer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint),
                )
                .with_trace_config(
                    opentelemetry_sdk::trace::config()
                        .with_resource(opentelemetry_sdk::Resource::new(vec![
                            opentelemetry::KeyValue::new("service.name", service_name.to_string()),
                        ])),
                )
                .install_batch(opentelemetry_sdk::runtime::Tokio)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let json_layer = config
        .json_logging
        .then(|| tracing_subscriber::fmt::layer().json());
    let text_layer = (!config.json_logging).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(telemetry_layer)
        .with(json_layer)
        .with(text_layer)
        .try_init()?;

    Ok(())
}

/// Shutdown OpenTelemetry.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Prometheus recorder and metric descriptions.
pub mod metrics {
    use metrics::describe_counter;
    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
    use std::sync::OnceLock;

    static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

    /// Install the global Prometheus recorder. Later calls are no-ops.
    pub fn init() -> anyhow::Result<()> {
        if PROMETHEUS_HANDLE.get().is_some() {
            return Ok(());
        }

        let handle = PrometheusBuilder::new().install_recorder()?;
        if PROMETHEUS_HANDLE.set(handle).is_ok() {
            register_metrics();
        }
        Ok(())
    }

    /// Render all metrics in Prometheus text format.
    pub fn render() -> String {
        PROMETHEUS_HANDLE
            .get()
            .map(PrometheusHandle::render)
            .unwrap_or_default()
    }

    /// Register all metric descriptions.
    pub fn register_metrics() {
        describe_counter!(
            "license_store_merges_total",
            "Store merges, labelled by whether a value changed"
        );
        describe_counter!(
            "license_events_published_total",
            "License events accepted by the event channel"
        );
        describe_counter!(
            "license_publish_failures_total",
            "License events that failed to publish, by failure kind"
        );
        describe_counter!(
            "license_events_consumed_total",
            "Consumed license events, by handling outcome"
        );
        describe_counter!(
            "license_errors_total",
            "Service errors, by error code"
        );
    }
}
