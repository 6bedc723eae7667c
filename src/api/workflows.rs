//! Workflow management REST API endpoints
//!
//! CRUD on the caller's workflows plus the manual trigger. Every write
//! hot-reloads the registry and re-syncs the workflow's cron job, so running
//! executions keep their snapshot while new runs see the change.

use crate::{
    api::{api_error, internal_error, ApiResult, AppState, UserId},
    runtime::{graph, queue::RunJob},
    workflow::types::{TriggerSource, Workflow},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Response for workflow creation/update operations
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub message: String,
}

/// Request body for workflow creation and update
#[derive(Debug, Deserialize)]
pub struct WorkflowRequest {
    pub workflow: Workflow,
}

pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(create_workflow).get(list_workflows))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/api/workflows/{id}/execute", post(execute_workflow))
}

/// Reject definitions that could never be ordered
fn validate(workflow: &Workflow) -> ApiResult<()> {
    if workflow.name.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "workflow name is required"));
    }
    graph::order(&workflow.nodes, &workflow.edges)
        .map(|_| ())
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))
}

/// Stored workflow if it exists and belongs to `user_id`
async fn owned_workflow(state: &AppState, id: &str, user_id: &str) -> ApiResult<Workflow> {
    match state.storage.get_workflow(id).await {
        Ok(Some(workflow)) if workflow.user_id == user_id => Ok(workflow),
        Ok(_) => Err(api_error(StatusCode::NOT_FOUND, format!("Workflow not found: {}", id))),
        Err(e) => Err(internal_error("Failed to load workflow", e)),
    }
}

/// Persist, hot-reload and reschedule
async fn publish(state: &AppState, workflow: &Workflow) -> ApiResult<()> {
    state
        .storage
        .save_workflow(workflow)
        .await
        .map_err(|e| internal_error("Failed to save workflow", e))?;
    state
        .registry
        .reload_workflow(&workflow.id)
        .await
        .map_err(|e| internal_error("Failed to reload workflow into registry", e))?;
    state
        .scheduler
        .sync_workflow(workflow)
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid schedule: {}", e)))?;
    Ok(())
}

/// POST /api/workflows
/// Body: { "workflow": { "name": "...", "trigger": {...}, "nodes": [...], "edges": [...] } }
async fn create_workflow(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(payload): Json<WorkflowRequest>,
) -> ApiResult<(StatusCode, Json<WorkflowResponse>)> {
    let mut workflow = payload.workflow;
    if workflow.id.trim().is_empty() {
        workflow.id = Uuid::new_v4().to_string();
    }
    workflow.user_id = user_id;
    validate(&workflow)?;

    match state.storage.get_workflow(&workflow.id).await {
        Ok(Some(_)) => {
            return Err(api_error(
                StatusCode::CONFLICT,
                format!("Workflow already exists: {}", workflow.id),
            ))
        }
        Ok(None) => {}
        Err(e) => return Err(internal_error("Failed to check workflow", e)),
    }

    publish(&state, &workflow).await?;
    tracing::info!("🔥 Created workflow: {} ({})", workflow.id, workflow.name);

    Ok((
        StatusCode::CREATED,
        Json(WorkflowResponse {
            id: workflow.id.clone(),
            message: format!("Workflow '{}' created successfully", workflow.name),
        }),
    ))
}

/// GET /api/workflows
async fn list_workflows(State(state): State<AppState>, UserId(user_id): UserId) -> ApiResult<Json<Value>> {
    let workflows = state
        .storage
        .list_workflows(&user_id)
        .await
        .map_err(|e| internal_error("Failed to list workflows", e))?;
    Ok(Json(json!({ "workflows": workflows })))
}

/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
) -> ApiResult<Json<Workflow>> {
    owned_workflow(&state, &id, &user_id).await.map(Json)
}

/// PUT /api/workflows/{id}
async fn update_workflow(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
    Json(payload): Json<WorkflowRequest>,
) -> ApiResult<Json<WorkflowResponse>> {
    owned_workflow(&state, &id, &user_id).await?;

    let mut workflow = payload.workflow;
    workflow.id = id;
    workflow.user_id = user_id;
    validate(&workflow)?;

    publish(&state, &workflow).await?;
    tracing::info!("🔥 Hot-reloaded workflow: {} ({})", workflow.id, workflow.name);

    Ok(Json(WorkflowResponse {
        id: workflow.id.clone(),
        message: format!("Workflow '{}' updated successfully", workflow.name),
    }))
}

/// DELETE /api/workflows/{id}
async fn delete_workflow(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    owned_workflow(&state, &id, &user_id).await?;

    // Unschedule first; a tick racing the delete finds nothing in the registry
    state.scheduler.remove_workflow_cron_job(&id).await;
    state.registry.remove_workflow(&id);

    match state.storage.delete_workflow(&id).await {
        Ok(true) => {
            tracing::info!("🗑️ Deleted workflow: {}", id);
            Ok(Json(json!({ "message": "Workflow deleted successfully" })))
        }
        Ok(false) => Err(api_error(StatusCode::NOT_FOUND, format!("Workflow not found: {}", id))),
        Err(e) => Err(internal_error("Failed to delete workflow", e)),
    }
}

/// POST /api/workflows/{id}/execute
/// Body: optional JSON trigger payload, `{}` when empty
async fn execute_workflow(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
    body: String,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let payload: Value = if body.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&body)
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid JSON payload: {}", e)))?
    };

    let workflow = state
        .registry
        .get_workflow(&id)
        .filter(|workflow| workflow.user_id == user_id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Workflow not found: {}", id)))?;

    let job_id = state
        .queue
        .enqueue(RunJob::new(workflow.id.clone(), user_id, payload, TriggerSource::Manual))
        .map_err(|e| internal_error("Failed to enqueue run", e))?;
    tracing::info!("▶️ Manual run of {} queued as job {}", workflow.id, job_id);

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "jobId": job_id, "workflowId": workflow.id })),
    ))
}
