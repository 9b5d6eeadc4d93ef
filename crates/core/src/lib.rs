pub mod asset;
pub mod audit;
pub mod config;
mod db;
pub mod extractor;
pub mod metrics;
pub mod queue;
pub mod retry;
pub mod secrets;
pub mod status;
pub mod storage;
pub mod testing;
pub mod trigger;
pub mod workflow;

pub use asset::{asset_id_from_key, asset_type_for_key, AssetType, FeatureType};
pub use audit::{
    create_audit_system, AuditError, AuditEvent, AuditFilter, AuditHandle, AuditRecord,
    AuditStore, AuditWriter, SqliteAuditStore,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use extractor::{
    AssetMetadata, ExtractionError, ExtractionRequest, ExtractionWorker, Extractor,
    ExtractorRegistry,
};
pub use queue::{QueueConfig, QueueError, QueueStats, SqliteWorkQueue, WorkQueue};
pub use retry::{Backoff, Classify, ErrorClass};
pub use secrets::{
    create_parameter_store, ParameterStore, SecretsBackend, SecretsConfig, SecretsError,
    StartupParameters,
};
pub use status::{
    AssetRecord, AssetStatus, SqliteStatusStore, StatusError, StatusFilter, StatusStore,
    StatusUpdate, StatusUpdater,
};
pub use storage::{FsObjectStorage, ObjectStorage, StorageConfig, StorageError};
pub use trigger::{IngestSummary, IngestTrigger, TriggerConfig, TriggerError, WorkflowStarter};
pub use workflow::{
    ExecutionFilter, ExecutionRequest, ExecutionState, ExecutionStore, SqliteExecutionStore,
    WorkflowConfig, WorkflowEngine, WorkflowError, WorkflowExecution,
};
