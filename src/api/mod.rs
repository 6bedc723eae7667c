//! HTTP API layer
//!
//! Workflow CRUD, manual and webhook triggers, and run history. Callers are
//! identified by the `x-user-id` header; verifying that identity is left to
//! whatever sits in front of this service.

pub mod executions;

pub mod webhooks;

pub mod workflows;

use crate::{
    execution::ExecutionLogSink,
    runtime::{queue::JobQueue, scheduler::CronSchedulerService},
    workflow::{registry::WorkflowRegistry, storage::WorkflowStorage},
};
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::Json,
    Router,
};
use serde_json::{json, Value};
use std::{fmt::Display, sync::Arc};

pub const USER_HEADER: &str = "x-user-id";

/// Shared resources for every handler
#[derive(Clone)]
pub struct AppState {
    /// Workflow persistence
    pub storage: WorkflowStorage,
    /// Hot-reload registry the executor and triggers read from
    pub registry: Arc<WorkflowRegistry>,
    pub scheduler: Arc<CronSchedulerService>,
    pub queue: JobQueue,
    pub executions: Arc<dyn ExecutionLogSink>,
}

/// Caller identity taken from the `x-user-id` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| UserId(value.to_string()))
            .ok_or((StatusCode::UNAUTHORIZED, "missing x-user-id header"))
    }
}

/// Error responses carry `{"error": message}`
pub type ApiResult<T> = Result<T, (StatusCode, Json<Value>)>;

pub(crate) fn api_error(status: StatusCode, message: impl Display) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message.to_string() })))
}

/// Log a server-side failure and hide its details from the caller
pub(crate) fn internal_error(context: &str, error: impl Display) -> (StatusCode, Json<Value>) {
    tracing::error!("❌ {}: {}", context, error);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, context)
}

/// All API and trigger routes, without `/healthz`
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(workflows::create_workflow_routes())
        .merge(executions::create_execution_routes())
        .merge(webhooks::create_webhook_routes())
}
