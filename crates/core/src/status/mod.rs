//! Per-asset, per-feature processing status.

mod sqlite_store;
mod store;
mod types;
mod updater;

pub use sqlite_store::SqliteStatusStore;
pub use store::{StatusError, StatusFilter, StatusStore, TriggerClaim, TriggerKey};
pub use types::{
    merge, AssetRecord, AssetStatus, MergeDecision, StatusUpdate, UpsertOutcome, UpsertResult,
};
pub use updater::StatusUpdater;
