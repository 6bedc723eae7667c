//! Run history endpoints

use crate::{
    api::{api_error, internal_error, ApiResult, AppState, UserId},
    execution::ExecutionRecord,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};

pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows/{id}/executions", get(list_executions))
        .route("/api/executions/{id}", get(get_execution))
}

/// GET /api/workflows/{id}/executions
/// Returns: { "executions": [...] } newest first, node logs included
async fn list_executions(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(workflow_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let executions = state
        .executions
        .list_for_workflow(&workflow_id, &user_id)
        .await
        .map_err(|e| internal_error("Failed to list executions", e))?;
    Ok(Json(json!({ "executions": executions })))
}

/// GET /api/executions/{id}
async fn get_execution(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
) -> ApiResult<Json<ExecutionRecord>> {
    match state.executions.get_record(&id).await {
        Ok(Some(record)) if record.user_id == user_id => Ok(Json(record)),
        Ok(_) => Err(api_error(StatusCode::NOT_FOUND, format!("Execution not found: {}", id))),
        Err(e) => Err(internal_error("Failed to load execution", e)),
    }
}
