//! Common test utilities for in-process API testing.
//!
//! The fixture wires the real stores, engine and trigger against a temporary
//! SQLite file and a temporary storage root, and drives the router with
//! `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use assetflow_core::{
    create_audit_system, load_config_from_str, AuditStore, Config, ExtractionWorker,
    ExtractorRegistry, FsObjectStorage, IngestTrigger, SqliteAuditStore, SqliteExecutionStore,
    SqliteStatusStore, SqliteWorkQueue, StatusStore, StatusUpdater, WorkQueue, WorkflowEngine,
    WorkflowExecution,
};
use assetflow_server::state::AppState;

/// Re-export fixtures for test convenience
pub use assetflow_core::testing::fixtures;

/// Bucket every fixture object lands in.
pub const BUCKET: &str = "uploads";

/// In-process server with a real engine behind it.
pub struct TestFixture {
    pub router: Router,
    pub engine: WorkflowEngine,
    pub status: Arc<SqliteStatusStore>,
    pub queue: Arc<SqliteWorkQueue>,
    pub storage_root: PathBuf,
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Configuration for test fixture.
#[derive(Debug, Clone, Default)]
pub struct TestConfig {
    /// Token required on ingest routes
    pub ingest_token: Option<String>,
    /// Extra TOML appended to the generated config
    pub extra_toml: String,
}

impl TestConfig {
    pub fn with_ingest_token(token: &str) -> Self {
        Self {
            ingest_token: Some(token.to_string()),
            ..Default::default()
        }
    }

    /// Queue that dead-letters on the second delivery after a one second window.
    pub fn with_fast_redrive() -> Self {
        Self {
            extra_toml: r#"
[queue]
visibility_timeout_secs = 1
max_receive_count = 1
poll_interval_ms = 20
"#
            .to_string(),
            ..Default::default()
        }
    }
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        let storage_root = temp_dir.path().join("storage");
        std::fs::create_dir_all(storage_root.join(BUCKET)).expect("Failed to create bucket");

        let toml = format!(
            r#"
[server]
host = "127.0.0.1"
port = 8080

[database]
path = "{}"

[storage]
root = "{}"

[workflow]
backoff_base_ms = 5
backoff_cap_ms = 20
resume_poll_interval_ms = 50
{}
"#,
            db_path.display(),
            storage_root.display(),
            test_config.extra_toml
        );
        let config: Config = load_config_from_str(&toml).expect("Invalid test config");

        let audit_store: Arc<dyn AuditStore> =
            Arc::new(SqliteAuditStore::new(&db_path).expect("Failed to create audit store"));
        let (audit_handle, audit_writer) = create_audit_system(Arc::clone(&audit_store), 100);
        tokio::spawn(audit_writer.run());

        let status =
            Arc::new(SqliteStatusStore::new(&db_path).expect("Failed to create status store"));
        let executions = Arc::new(
            SqliteExecutionStore::new(&db_path).expect("Failed to create execution store"),
        );
        let queue = Arc::new(
            SqliteWorkQueue::new(&db_path, config.queue.clone())
                .expect("Failed to create work queue")
                .with_audit(audit_handle.clone()),
        );

        let worker = ExtractionWorker::new(
            Arc::new(FsObjectStorage::new(&storage_root)),
            ExtractorRegistry::with_defaults(),
            &config.storage,
        );
        let engine = WorkflowEngine::new(
            config.workflow.clone(),
            executions,
            worker,
            StatusUpdater::new(status.clone()),
            queue.clone(),
            Some(audit_handle.clone()),
        );
        engine.start().await;

        let trigger = Arc::new(IngestTrigger::new(
            config.trigger.clone(),
            Arc::new(engine.clone()),
            status.clone(),
            Some(audit_handle),
        ));

        let state = Arc::new(AppState::new(
            config,
            test_config.ingest_token,
            audit_store,
            status.clone() as Arc<dyn StatusStore>,
            queue.clone() as Arc<dyn WorkQueue>,
            engine.clone(),
            trigger,
        ));

        Self {
            router: assetflow_server::api::create_router(state),
            engine,
            status,
            queue,
            storage_root,
            temp_dir,
        }
    }

    /// Write an object into the fixture bucket.
    pub fn put_object(&self, key: &str, bytes: &[u8]) {
        let path = self.storage_root.join(BUCKET).join(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create object dir");
        }
        std::fs::write(path, bytes).expect("Failed to write object");
    }

    /// Notification body for objects in the fixture bucket.
    pub fn notification(&self, keys: &[&str]) -> String {
        fixtures::notification(BUCKET, keys)
    }

    /// Wait until the execution reaches a terminal state.
    pub async fn wait_terminal(&self, execution_id: &str) -> WorkflowExecution {
        self.engine
            .wait_for_terminal(execution_id, Duration::from_secs(5))
            .await
            .expect("execution should exist")
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a POST request with raw string body and optional extra header.
    pub async fn post_raw(
        &self,
        path: &str,
        body: &str,
        header: Option<(&str, &str)>,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json");
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        let request = builder.body(Body::from(body.to_string())).unwrap();
        self.send(request).await
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body_bytes).into_owned()))
        };

        TestResponse { status, body }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
