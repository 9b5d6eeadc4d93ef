//! Status updater: the only writer of the status store.

use std::sync::Arc;

use tracing::{debug, info};

use crate::metrics;

use super::{StatusError, StatusStore, StatusUpdate, UpsertOutcome, UpsertResult};

/// Stateless unit that persists workflow results into the status store.
///
/// Every write goes through [`StatusStore::upsert`], so repeating a call with
/// identical input leaves the store exactly as a single call would.
#[derive(Clone)]
pub struct StatusUpdater {
    store: Arc<dyn StatusStore>,
}

impl StatusUpdater {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }

    /// Access the underlying store (read side).
    pub fn store(&self) -> &Arc<dyn StatusStore> {
        &self.store
    }

    /// Record a status write.
    ///
    /// Stale writes are not errors: they are reported through the returned
    /// outcome and leave the stored record untouched.
    pub fn record(&self, update: StatusUpdate) -> Result<UpsertResult, StatusError> {
        if update.asset_id.trim().is_empty() {
            return Err(StatusError::InvalidInput("asset_id is empty".to_string()));
        }

        let result = self.store.upsert(&update)?;

        metrics::STATUS_WRITES
            .with_label_values(&[update.status.as_str(), result.outcome.as_str()])
            .inc();

        match result.outcome {
            UpsertOutcome::Inserted | UpsertOutcome::Updated => {
                info!(
                    asset_id = %result.record.asset_id,
                    feature_type = %result.record.feature_type,
                    status = %result.record.status,
                    attempt = result.record.attempt,
                    execution_id = %update.execution_id,
                    "Status recorded"
                );
            }
            UpsertOutcome::Unchanged => {
                debug!(
                    asset_id = %update.asset_id,
                    feature_type = %update.feature_type,
                    status = %update.status,
                    "Status write repeated, nothing changed"
                );
            }
            UpsertOutcome::Stale => {
                debug!(
                    asset_id = %update.asset_id,
                    feature_type = %update.feature_type,
                    status = %update.status,
                    execution_id = %update.execution_id,
                    current_status = %result.record.status,
                    current_execution = %result.record.execution_id,
                    "Stale status write discarded"
                );
            }
        }

        Ok(result)
    }
}
