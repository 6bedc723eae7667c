//! Webhook trigger endpoint
//!
//! `ANY /webhook/{workflow_id}` queues a run of an active workflow whose
//! trigger is `webhook`. The request is captured as the trigger payload
//! `{body, headers, query, method}`; the caller gets `202` and the job id
//! without waiting for the run.

use crate::{
    api::{api_error, internal_error, ApiResult, AppState},
    runtime::queue::RunJob,
    workflow::types::{TriggerConfig, TriggerSource},
};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::Json,
    routing::any,
    Router,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

pub fn create_webhook_routes() -> Router<AppState> {
    Router::new().route("/webhook/{workflow_id}", any(execute_webhook))
}

async fn execute_webhook(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> ApiResult<(StatusCode, Json<Value>)> {
    tracing::info!("📥 Webhook request received: {} {}", method, workflow_id);

    let workflow = match state.registry.get_workflow(&workflow_id) {
        Some(workflow) if workflow.active && workflow.trigger == TriggerConfig::Webhook => workflow,
        _ => {
            tracing::warn!("❌ Webhook called for unknown or inactive workflow: {}", workflow_id);
            return Err(api_error(
                StatusCode::NOT_FOUND,
                format!("No active webhook workflow: {}", workflow_id),
            ));
        }
    };

    let payload = trigger_payload(&method, &headers, query, &body);
    let job = RunJob::new(
        workflow.id.clone(),
        workflow.user_id.clone(),
        payload,
        TriggerSource::Webhook,
    );
    let job_id = state
        .queue
        .enqueue(job)
        .map_err(|e| internal_error("Failed to enqueue webhook run", e))?;

    tracing::info!("🚀 Webhook run of {} queued as job {}", workflow_id, job_id);
    Ok((StatusCode::ACCEPTED, Json(json!({ "jobId": job_id }))))
}

/// Capture the request; a body that is not JSON is kept as a string
fn trigger_payload(method: &Method, headers: &HeaderMap, query: HashMap<String, String>, body: &str) -> Value {
    let body = if body.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
    };

    let headers: Map<String, Value> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), Value::String(value.to_string())))
        })
        .collect();

    json!({
        "body": body,
        "headers": headers,
        "query": query,
        "method": method.as_str(),
    })
}
