//! License event wire model.
//!
//! Events are exchanged as camelCase JSON with every service sharing the
//! channel:
//!
//! ```json
//! { "eventType": "LICENSE_UPDATED", "userId": "42",
//!   "payload": {"isValidSeat": true},
//!   "timestamp": "2024-05-01T12:00:00.000000Z", "source": "license-service" }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::store::LicenseUpdate;

/// Source reported for events that carry no `source` field.
pub const UNKNOWN_SOURCE: &str = "unknown";

// =============================================================================
// Event Type
// =============================================================================

/// Kind of license event.
///
/// Unrecognized tags decode into [`LicenseEventType::Other`] so newer
/// producers never break older consumers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LicenseEventType {
    LicenseUpdated,
    Other(String),
}

impl LicenseEventType {
    pub const LICENSE_UPDATED: &'static str = "LICENSE_UPDATED";

    pub fn as_str(&self) -> &str {
        match self {
            Self::LicenseUpdated => Self::LICENSE_UPDATED,
            Self::Other(tag) => tag,
        }
    }
}

impl From<String> for LicenseEventType {
    fn from(tag: String) -> Self {
        if tag == Self::LICENSE_UPDATED {
            Self::LicenseUpdated
        } else {
            Self::Other(tag)
        }
    }
}

impl From<LicenseEventType> for String {
    fn from(event_type: LicenseEventType) -> Self {
        match event_type {
            LicenseEventType::LicenseUpdated => LicenseEventType::LICENSE_UPDATED.to_string(),
            LicenseEventType::Other(tag) => tag,
        }
    }
}

impl fmt::Display for LicenseEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// License Event
// =============================================================================

/// Envelope exchanged over the event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseEvent {
    pub event_type: LicenseEventType,

    pub user_id: String,

    /// Only the fields that changed.
    #[serde(default)]
    pub payload: LicenseUpdate,

    #[serde(default = "Utc::now", with = "timestamp_serde")]
    pub timestamp: DateTime<Utc>,

    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    UNKNOWN_SOURCE.to_string()
}

impl LicenseEvent {
    /// Build an event stamped with the current time.
    pub fn new(
        event_type: LicenseEventType,
        user_id: impl Into<String>,
        payload: LicenseUpdate,
        source: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            user_id: user_id.into(),
            payload,
            timestamp: Utc::now(),
            source: source.into(),
        }
    }

    /// A `LICENSE_UPDATED` event.
    pub fn license_updated(
        user_id: impl Into<String>,
        payload: LicenseUpdate,
        source: impl Into<String>,
    ) -> Self {
        Self::new(LicenseEventType::LicenseUpdated, user_id, payload, source)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Written as RFC 3339 UTC with microseconds and a trailing `Z`.
///
/// Reading is lenient: a timestamp never decides a merge, so an offset-less
/// value is taken as UTC and a null or unparseable one becomes receive time
/// instead of failing the whole event.
mod timestamp_serde {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer};
    use tracing::warn;

    pub fn serialize<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => Ok(parse(&raw)),
            None => {
                warn!("event timestamp is null, using receive time");
                Ok(Utc::now())
            }
        }
    }

    pub(super) fn parse(raw: &str) -> DateTime<Utc> {
        if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
            return timestamp.with_timezone(&Utc);
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
            return Utc.from_utc_datetime(&naive);
        }
        warn!(timestamp = raw, "unparseable event timestamp, using receive time");
        Utc::now()
    }
}
