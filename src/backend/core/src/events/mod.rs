//! Event replication
//!
//! License changes are shared with every other replica over one pub/sub channel:
//!
//! - **`event`**: The `LicenseEvent` wire model.
//! - **`channel`**: The `EventChannel`/`EventSubscription` seam and the in-memory transport.
//! - **`redis_stream`**: Redis Streams transport with consumer groups.
//! - **`publisher`**: `EventPublisher`, which source-tags outgoing events.
//! - **`consumer`**: `EventConsumer`, which self-filters and idempotently applies incoming events.

pub mod channel;
pub mod consumer;
pub mod event;
pub mod publisher;
pub mod redis_stream;

pub use channel::{Delivery, EventChannel, EventSubscription, InMemoryChannel};
pub use consumer::{ConsumerState, EventConsumer, HandleOutcome};
pub use event::{LicenseEvent, LicenseEventType, UNKNOWN_SOURCE};
pub use publisher::EventPublisher;
pub use redis_stream::{RedisStreamChannel, RedisStreamConfig};
