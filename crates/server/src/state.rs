use std::sync::Arc;

use assetflow_core::{
    AuditStore, Config, IngestTrigger, SanitizedConfig, StatusStore, WorkQueue, WorkflowEngine,
};

/// Shared application state
pub struct AppState {
    config: Config,
    ingest_token: Option<String>,
    audit_store: Arc<dyn AuditStore>,
    status_store: Arc<dyn StatusStore>,
    queue: Arc<dyn WorkQueue>,
    engine: WorkflowEngine,
    trigger: Arc<IngestTrigger>,
}

impl AppState {
    pub fn new(
        config: Config,
        ingest_token: Option<String>,
            audit_store: Arc<dyn AuditStore>,
        status_store: Arc<dyn StatusStore>,
        queue: Arc<dyn WorkQueue>,
        engine: WorkflowEngine,
        trigger: Arc<IngestTrigger>,
    ) -> Self {
        Self {
            config,
            ingest_token,
            audit_store,
            status_store,
            queue,
            engine,
            trigger,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::new(&self.config, self.ingest_token.is_some())
    }

    /// Token required on ingest routes, if one was resolved at startup.
    pub fn ingest_token(&self) -> Option<&str> {
        self.ingest_token.as_deref()
    }

    pub fn audit_store(&self) -> &dyn AuditStore {
        self.audit_store.as_ref()
    }

    pub fn status_store(&self) -> &dyn StatusStore {
        self.status_store.as_ref()
    }

    pub fn queue(&self) -> &dyn WorkQueue {
        self.queue.as_ref()
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    pub fn trigger(&self) -> &IngestTrigger {
        self.trigger.as_ref()
    }
}
