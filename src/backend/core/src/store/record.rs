//! License record model.
//!
//! - [`LicenseRecord`]: the persisted per-user entitlement
//! - [`LicenseUpdate`]: a partial field mapping, used both as the REST request
//!   body and as the event payload
//! - [`LicenseStatus`]: the read view returned to API callers

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The whole persisted mapping, keyed by user id.
///
/// Ordered so the on-disk document is stable between writes.
pub type LicenseStore = BTreeMap<String, LicenseRecord>;

// ═══════════════════════════════════════════════════════════════════════════════
// License Record
// ═══════════════════════════════════════════════════════════════════════════════

/// Entitlement state for one user.
///
/// Every field is optional so that "never set" survives a save/load cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_valid_seat: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seat_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<String>,
}

impl LicenseRecord {
    /// Whether the seat is authorized. Unset reads as `false`.
    pub fn is_valid_seat(&self) -> bool {
        self.is_valid_seat.unwrap_or(false)
    }

    /// Apply the fields present in `update`, returning the ones whose value changed.
    ///
    /// Comparison is by value: setting a field to its current value is not a change.
    pub fn apply(&mut self, update: &LicenseUpdate) -> LicenseUpdate {
        let mut delta = LicenseUpdate::default();

        assign(&mut self.is_valid_seat, &update.is_valid_seat, &mut delta.is_valid_seat);
        assign(&mut self.seat_type, &update.seat_type, &mut delta.seat_type);
        assign(
            &mut self.expiration_date,
            &update.expiration_date,
            &mut delta.expiration_date,
        );

        delta
    }

    /// Render the read view for `user_id`.
    pub fn to_status(&self, user_id: impl Into<String>) -> LicenseStatus {
        LicenseStatus {
            id: user_id.into(),
            is_valid_seat: self.is_valid_seat(),
            seat_type: self.seat_type.clone(),
            expiration_date: self.expiration_date.clone(),
        }
    }
}

fn assign<T: PartialEq + Clone>(current: &mut Option<T>, incoming: &Option<T>, delta: &mut Option<T>) {
    if let Some(value) = incoming {
        if current.as_ref() != Some(value) {
            *current = Some(value.clone());
            *delta = Some(value.clone());
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// License Update
// ═══════════════════════════════════════════════════════════════════════════════

/// Partial field mapping. `None` (absent or JSON `null`) means "no change".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_valid_seat: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seat_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<String>,
}

impl LicenseUpdate {
    /// True when no field is present.
    pub fn is_empty(&self) -> bool {
        self.is_valid_seat.is_none() && self.seat_type.is_none() && self.expiration_date.is_none()
    }

    pub fn with_valid_seat(mut self, valid: bool) -> Self {
        self.is_valid_seat = Some(valid);
        self
    }

    pub fn with_seat_type(mut self, seat_type: impl Into<String>) -> Self {
        self.seat_type = Some(seat_type.into());
        self
    }

    pub fn with_expiration_date(mut self, date: impl Into<String>) -> Self {
        self.expiration_date = Some(date.into());
        self
    }

    /// Names of the present fields, in wire spelling.
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names = Vec::with_capacity(3);
        if self.is_valid_seat.is_some() {
            names.push("isValidSeat");
        }
        if self.seat_type.is_some() {
            names.push("seatType");
        }
        if self.expiration_date.is_some() {
            names.push("expirationDate");
        }
        names
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// License Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Read view of a user's authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseStatus {
    pub id: String,
    pub is_valid_seat: bool,
    pub seat_type: Option<String>,
    pub expiration_date: Option<String>,
}

impl LicenseStatus {
    /// The status reported for a user with no record.
    pub fn unknown(user_id: impl Into<String>) -> Self {
        LicenseRecord::default().to_status(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_reports_only_changed_fields() {
        let mut record = LicenseRecord {
            is_valid_seat: Some(true),
            seat_type: Some("Premium".into()),
            expiration_date: None,
        };

        let update = LicenseUpdate::default()
            .with_valid_seat(true)
            .with_expiration_date("2025-01-01");
        let delta = record.apply(&update);

        assert_eq!(delta, LicenseUpdate::default().with_expiration_date("2025-01-01"));
        assert_eq!(record.seat_type.as_deref(), Some("Premium"));
        assert_eq!(record.expiration_date.as_deref(), Some("2025-01-01"));
    }

    #[test]
    fn test_apply_same_values_is_noop() {
        let mut record = LicenseRecord::default();
        let update = LicenseUpdate::default().with_valid_seat(false).with_seat_type("Trial");

        assert!(!record.apply(&update).is_empty());
        let before = record.clone();
        assert!(record.apply(&update).is_empty());
        assert_eq!(record, before);
    }

    #[test]
    fn test_setting_false_on_fresh_record_is_a_change() {
        let mut record = LicenseRecord::default();
        let delta = record.apply(&LicenseUpdate::default().with_valid_seat(false));
        assert_eq!(delta.is_valid_seat, Some(false));
        assert_eq!(record.is_valid_seat, Some(false));
    }

    #[test]
    fn test_update_null_means_no_change() {
        let update: LicenseUpdate =
            serde_json::from_str(r#"{"isValidSeat": null, "seatType": "Standard"}"#).unwrap();
        assert_eq!(update.is_valid_seat, None);
        assert_eq!(update.field_names(), vec!["seatType"]);

        let empty: LicenseUpdate = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_record_omits_unset_fields() {
        let record = LicenseRecord {
            is_valid_seat: Some(true),
            ..Default::default()
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"isValidSeat":true}"#);
    }

    #[test]
    fn test_unknown_status_defaults() {
        let status = LicenseStatus::unknown("ghost");
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "ghost",
                "isValidSeat": false,
                "seatType": null,
                "expirationDate": null
            })
        );
    }
}
