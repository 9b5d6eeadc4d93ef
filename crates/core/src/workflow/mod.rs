//! Workflow engine: the execution state machine and its persistence.

mod config;
mod engine;
mod sqlite_store;
mod store;
mod types;

pub use config::WorkflowConfig;
pub use engine::WorkflowEngine;
pub use sqlite_store::SqliteExecutionStore;
pub use store::{ExecutionStore, ExecutionStoreError, Lease};
pub use types::{
    ExecutionFilter, ExecutionRequest, ExecutionSource, ExecutionState, FeatureReadyMessage,
    WorkflowError, WorkflowExecution, WorkflowStatus,
};
