//! SQLite connection management
//!
//! One database file holds workflows, execution history and third-party
//! connections. Each store owns its own `init_schema`; `init_schema` here
//! runs all of them.

use crate::{
    credentials::SqliteCredentialStore, execution::SqliteExecutionStore,
    workflow::storage::WorkflowStorage,
};
use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::{path::Path, str::FromStr};

/// Open (and create if missing) the database at `path`
pub async fn connect(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!("Failed to create data directory '{}': {}", parent.display(), e)
            })?;
        }
    }

    tracing::info!("🗄️ Opening database: {}", path);
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;
    Ok(pool)
}

/// Single-connection in-memory database, used by tests and dry runs
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Create every table the service needs
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    WorkflowStorage::new(pool.clone()).init_schema().await?;
    SqliteExecutionStore::new(pool.clone()).init_schema().await?;
    SqliteCredentialStore::init_schema(pool).await?;
    Ok(())
}
