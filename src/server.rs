//! Server setup and initialization
//!
//! Wires together storage, registry, handlers, executor, queue worker, cron
//! scheduler and HTTP routes.

use crate::{
    api::{self, AppState},
    config::Config,
    credentials::{OAuthRefresher, SqliteCredentialStore},
    db,
    execution::SqliteExecutionStore,
    nodes::{HandlerDeps, NodeHandlerRegistry},
    runtime::{
        executor::WorkflowExecutor,
        progress::{BroadcastPublisher, ProgressEvent, ProgressKind},
        queue::{self, RetryPolicy},
        scheduler::CronSchedulerService,
    },
    workflow::{registry::WorkflowRegistry, storage::WorkflowStorage},
};
use anyhow::Result;
use axum::{routing::get, Router};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast};
use tracing_subscriber::EnvFilter;

/// Open the configured database and build the application
pub async fn create_app(config: &Config) -> Result<Router> {
    let pool = db::connect(&config.database.path).await?;
    build_app(config, pool).await
}

/// Build the application on an existing pool and start its background tasks
///
/// Spawns the queue worker and the cron scheduler; both live as long as the
/// returned router (which owns the last queue handles).
pub async fn build_app(config: &Config, pool: SqlitePool) -> Result<Router> {
    tracing::info!("🗄️ Initializing schema");
    db::init_schema(&pool).await?;

    let storage = WorkflowStorage::new(pool.clone());

    tracing::info!("📊 Initializing workflow registry");
    let registry = Arc::new(WorkflowRegistry::new(storage.clone()));
    registry
        .init_from_storage()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load workflows from storage: {}", e))?;

    let http = reqwest::Client::new();
    let credentials = Arc::new(SqliteCredentialStore::new(
        pool.clone(),
        OAuthRefresher::new(http.clone(), config.integrations.oauth_clients.clone()),
    ));
    let handlers = Arc::new(NodeHandlerRegistry::with_builtins(HandlerDeps {
        http,
        credentials,
        integrations: config.integrations.clone(),
    }));

    let executions = Arc::new(SqliteExecutionStore::new(pool));
    let progress = Arc::new(BroadcastPublisher::default());
    tokio::spawn(log_progress(progress.subscribe()));

    tracing::info!("⚙️ Initializing workflow executor");
    let executor = Arc::new(WorkflowExecutor::new(
        registry.clone(),
        executions.clone(),
        handlers,
        progress,
    ));

    let (job_queue, worker) = queue::channel(
        executor,
        RetryPolicy::from_config(&config.queue),
        config.queue.workers,
    );
    tokio::spawn(worker.run());

    tracing::info!("⏰ Initializing cron scheduler service");
    let scheduler = Arc::new(
        CronSchedulerService::new(Arc::clone(&registry), job_queue.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize cron scheduler: {}", e))?,
    );
    scheduler.start().await?;

    let state = AppState {
        storage,
        registry,
        scheduler,
        queue: job_queue,
        executions,
    };

    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(api::routes())
        .with_state(state);

    tracing::info!("✅ Application initialized successfully");
    Ok(app)
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowrunner=info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting flowrunner server...");

    let app = create_app(&config).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}

/// Mirror run progress into the log until the publisher is dropped
async fn log_progress(mut rx: broadcast::Receiver<ProgressEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match &event.kind {
                ProgressKind::Completed { status, error } => tracing::debug!(
                    "📡 [{}] execution {} {}{}",
                    event.user_id,
                    event.execution_id,
                    status.as_str(),
                    error.as_deref().map(|e| format!(": {}", e)).unwrap_or_default()
                ),
                kind => tracing::trace!("📡 [{}] execution {} {:?}", event.user_id, event.execution_id, kind),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("📡 Progress log lagged, {} events dropped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
