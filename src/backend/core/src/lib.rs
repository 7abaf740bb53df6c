//! # License Core
//!
//! Per-user license seat entitlements, kept eventually consistent across
//! every service that holds a copy.
//!
//! ## Architecture
//!
//! - **Store**: Durable user → license mapping with atomic read-modify-write merges
//! - **Events**: Source-tagged publishing and a self-filtering, idempotent consumer
//! - **Service**: Authorization reads and writes; writes commit locally, then replicate
//! - **API**: REST surface compatible with the legacy license service
//! - **Observability**: Structured logging, OTLP tracing, and Prometheus metrics

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod observability;
pub mod service;
pub mod store;

pub use error::{ErrorCode, ErrorSeverity, LicenseError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{
        ErrorCode, LicenseError, PublishError, Result, StorageError, StorageErrorKind,
        TransportError, ValidationError,
    };
    pub use crate::events::{
        EventChannel, EventConsumer, EventPublisher, HandleOutcome, InMemoryChannel,
        LicenseEvent, LicenseEventType, RedisStreamChannel,
    };
    pub use crate::service::LicenseService;
    pub use crate::store::{
        DurableStore, LicenseRecord, LicenseStatus, LicenseStore, LicenseUpdate, MergeOutcome,
    };
}
