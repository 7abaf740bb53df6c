//! License authorization service.
//!
//! The single entry point the REST layer calls. Writes commit locally first,
//! then replicate the changed fields; a failed replication never fails the
//! write.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::error::{Result, ValidationError};
use crate::events::{EventPublisher, LicenseEventType};
use crate::store::{DurableStore, LicenseStatus, LicenseUpdate};

/// Reads and writes license authorizations.
#[derive(Debug, Clone)]
pub struct LicenseService {
    store: Arc<DurableStore>,
    publisher: Arc<EventPublisher>,
}

impl LicenseService {
    pub fn new(store: Arc<DurableStore>, publisher: Arc<EventPublisher>) -> Self {
        Self { store, publisher }
    }

    pub fn store(&self) -> &Arc<DurableStore> {
        &self.store
    }

    pub fn publisher(&self) -> &Arc<EventPublisher> {
        &self.publisher
    }

    /// Current authorization of `user_id`. Unknown users get defaults and no record.
    #[instrument(skip(self))]
    pub async fn get_authorization(&self, user_id: &str) -> Result<LicenseStatus> {
        let status = match self.store.get(user_id).await? {
            Some(record) => record.to_status(user_id),
            None => LicenseStatus::unknown(user_id),
        };
        Ok(status)
    }

    /// Apply a partial update, then publish the fields that changed.
    #[instrument(skip(self, update), fields(fields = ?update.field_names()))]
    pub async fn update_authorization(
        &self,
        user_id: &str,
        update: LicenseUpdate,
    ) -> Result<LicenseStatus> {
        if user_id.trim().is_empty() {
            return Err(ValidationError::BlankUserId.into());
        }
        if update.is_empty() {
            return Err(ValidationError::EmptyUpdate.into());
        }

        let merged = self.store.merge(user_id, &update).await?;

        if merged.changed {
            info!(changed = ?merged.delta.field_names(), "license updated");
            if let Err(e) = self
                .publisher
                .publish(LicenseEventType::LicenseUpdated, user_id, merged.delta)
                .await
            {
                warn!(error = %e, "license change committed locally but not replicated");
            }
        }

        Ok(merged.record.to_status(user_id))
    }
}
