use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use assetflow_core::{
    create_audit_system, create_parameter_store, load_config, validate_config, AuditEvent,
    AuditStore, ExecutionStore, ExtractionWorker, ExtractorRegistry, FsObjectStorage,
    IngestTrigger, ObjectStorage, SqliteAuditStore, SqliteExecutionStore, SqliteStatusStore,
    SqliteWorkQueue, StartupParameters, StatusStore, StatusUpdater, WorkQueue, WorkflowEngine,
    WorkflowStarter,
};
use assetflow_server::api::create_router;
use assetflow_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for audit event channel
const AUDIT_BUFFER_SIZE: usize = 1000;

/// Upper bound for flushing buffered audit events on shutdown
const AUDIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let json = std::env::var("ASSETFLOW_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

async fn run() -> Result<()> {
    init_logging();

    let config_path = std::env::var("ASSETFLOW_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let mut config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    validate_config(&config).context("Configuration validation failed")?;

    // Parameters are read once; later changes need a restart
    let parameter_store =
        create_parameter_store(&config.secrets).context("Failed to create parameter store")?;
    info!("Using parameter store: {}", parameter_store.backend_name());
    let params = StartupParameters::fetch(parameter_store.as_ref())
        .context("Failed to fetch startup parameters")?;

    if let Some(db_path) = params.db_path {
        info!("Database path overridden by parameter store");
        config.database.path = db_path;
    }

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);
    info!("Storage root: {:?}", config.storage.root);
    info!(
        "Ingest token: {}",
        if params.ingest_token.is_some() { "required" } else { "not configured" }
    );

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];

    let db_path = config.database.path.clone();

    let audit_store: Arc<dyn AuditStore> =
        Arc::new(SqliteAuditStore::new(&db_path).context("Failed to create audit store")?);
    info!("Audit store initialized");

    let status_store: Arc<dyn StatusStore> =
        Arc::new(SqliteStatusStore::new(&db_path).context("Failed to create status store")?);
    info!("Status store initialized");

    let execution_store: Arc<dyn ExecutionStore> = Arc::new(
        SqliteExecutionStore::new(&db_path).context("Failed to create execution store")?,
    );
    info!("Execution store initialized");

    let (audit_handle, audit_writer) =
        create_audit_system(Arc::clone(&audit_store), AUDIT_BUFFER_SIZE);
    let writer_handle = tokio::spawn(audit_writer.run());

    audit_handle
        .emit(AuditEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash_short.to_string(),
        })
        .await;
    info!("Emitted ServiceStarted audit event");

    let queue: Arc<dyn WorkQueue> = Arc::new(
        SqliteWorkQueue::new(&db_path, config.queue.clone())
            .context("Failed to create work queue")?
            .with_audit(audit_handle.clone()),
    );
    info!("Work queue '{}' initialized", queue.name());

    let storage: Arc<dyn ObjectStorage> = Arc::new(FsObjectStorage::new(&config.storage.root));
    let worker = ExtractionWorker::new(storage, ExtractorRegistry::with_defaults(), &config.storage);

    let engine = WorkflowEngine::new(
        config.workflow.clone(),
        execution_store,
        worker,
        StatusUpdater::new(Arc::clone(&status_store)),
        Arc::clone(&queue),
        Some(audit_handle.clone()),
    );
    engine.start().await;
    info!("Workflow engine started");

    let trigger = Arc::new(IngestTrigger::new(
        config.trigger.clone(),
        Arc::new(engine.clone()) as Arc<dyn WorkflowStarter>,
        Arc::clone(&status_store),
        Some(audit_handle.clone()),
    ));

    let state = Arc::new(AppState::new(
        config.clone(),
        params.ingest_token,
        audit_store,
        status_store,
        queue,
        engine.clone(),
        trigger,
    ));

    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Stopping workflow engine...");
    engine.stop().await;
    info!("Workflow engine stopped");

    info!("Server shutting down...");
    audit_handle
        .emit(AuditEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // The writer exits once every AuditHandle clone is gone. The engine,
    // trigger and queue each hold one.
    drop(engine);
    drop(audit_handle);

    match tokio::time::timeout(AUDIT_DRAIN_TIMEOUT, writer_handle).await {
        Ok(_) => info!("Audit writer stopped"),
        Err(_) => warn!("Audit writer did not drain within {:?}", AUDIT_DRAIN_TIMEOUT),
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
