//! flowrunner server entry point
//!
//! Serves:
//! - Workflow management API at /api/workflows/*
//! - Run history at /api/executions/*
//! - Webhook triggers at /webhook/{workflow_id}
//! - Health check at /healthz

use flowrunner::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
