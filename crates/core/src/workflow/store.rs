//! Execution persistence.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::types::{ExecutionFilter, ExecutionState, WorkflowExecution};

/// Error type for execution store operations.
#[derive(Debug, Error)]
pub enum ExecutionStoreError {
    #[error("execution not found: {0}")]
    NotFound(String),

    #[error("execution already exists: {0}")]
    AlreadyExists(String),

    #[error("execution store database error: {0}")]
    Database(String),

    #[error("execution serialization error: {0}")]
    Serialization(String),

    /// Another engine holds the lease, or the execution is already terminal.
    #[error("execution {0} is no longer owned by this engine")]
    LostOwnership(String),
}

/// Exclusive right of one engine instance to drive an execution.
///
/// Every save renews the lease; a lease that is not renewed within `ttl`
/// can be taken over by another engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub owner: String,
    pub ttl: Duration,
}

impl Lease {
    pub fn new(owner: impl Into<String>, ttl: Duration) -> Self {
        Self {
            owner: owner.into(),
            ttl,
        }
    }

    /// Lease held by a fresh, random owner.
    pub fn random(ttl: Duration) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), ttl)
    }

    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Durable record of every execution, used for status queries and resume.
pub trait ExecutionStore: Send + Sync {
    /// Persist a new execution.
    fn create(&self, execution: &WorkflowExecution) -> Result<(), ExecutionStoreError>;

    fn get(&self, execution_id: &str) -> Result<Option<WorkflowExecution>, ExecutionStoreError>;

    /// Take the lease on a non-terminal execution and return its stored state.
    ///
    /// Returns `None` when the execution is terminal or leased to another
    /// owner whose lease has not expired.
    fn acquire(
        &self,
        execution_id: &str,
        lease: &Lease,
    ) -> Result<Option<WorkflowExecution>, ExecutionStoreError>;

    /// Overwrite an execution held under `lease` and renew the lease.
    ///
    /// Fails with `LostOwnership` when the lease was taken over or the
    /// stored execution is already terminal.
    fn save(&self, execution: &WorkflowExecution, lease: &Lease)
        -> Result<(), ExecutionStoreError>;

    /// Give up the lease so another engine can resume the execution.
    fn release(&self, execution_id: &str, lease: &Lease) -> Result<(), ExecutionStoreError>;

    /// Executions matching the filter, newest first.
    fn list(&self, filter: &ExecutionFilter)
        -> Result<Vec<WorkflowExecution>, ExecutionStoreError>;

    fn count(&self, filter: &ExecutionFilter) -> Result<i64, ExecutionStoreError>;

    /// Non-terminal executions, oldest first.
    fn list_resumable(&self, limit: i64) -> Result<Vec<WorkflowExecution>, ExecutionStoreError>;

    /// Number of executions per state.
    fn count_by_state(&self) -> Result<Vec<(ExecutionState, i64)>, ExecutionStoreError> {
        ExecutionState::ALL
            .into_iter()
            .map(|state| {
                self.count(&ExecutionFilter::new().with_state(state))
                    .map(|n| (state, n))
            })
            .collect()
    }
}
