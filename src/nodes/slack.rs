//! Posts a message with the owner's Slack connection

use crate::{
    credentials::{self, CredentialStore},
    error::NodeError,
    nodes::{parse_config, upstream_json, NodeHandler, NodeOutcome},
    runtime::context::ExecutionContext,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const SERVICE: &str = "slack";

#[derive(Debug, Deserialize)]
struct SlackConfig {
    channel: String,
    text: String,
}

pub struct SlackHandler {
    client: reqwest::Client,
    credentials: Arc<dyn CredentialStore>,
    api_base: String,
}

impl SlackHandler {
    pub fn new(client: reqwest::Client, credentials: Arc<dyn CredentialStore>, api_base: String) -> Self {
        Self {
            client,
            credentials,
            api_base,
        }
    }
}

#[async_trait]
impl NodeHandler for SlackHandler {
    async fn execute(&self, config: &Value, ctx: &mut ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let config: SlackConfig = parse_config(config)?;
        let token = credentials::access_token(self.credentials.as_ref(), &ctx.user_id, SERVICE).await?;

        let url = format!("{}/chat.postMessage", self.api_base.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&json!({ "channel": config.channel, "text": config.text }))
            .send()
            .await?;
        let body = upstream_json(SERVICE, response).await?;

        // Slack reports API errors with 200 and `ok: false`
        if body["ok"] != Value::Bool(true) {
            let reason = body["error"].as_str().unwrap_or("unknown error");
            return Err(NodeError::Upstream {
                service: SERVICE.to_string(),
                message: reason.to_string(),
            });
        }

        tracing::info!("💬 Posted Slack message to {}", config.channel);
        Ok(NodeOutcome::success(json!({
            "ok": true,
            "channel": body["channel"],
            "ts": body["ts"],
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        credentials::{Connection, MemoryCredentialStore},
        nodes::test_support::serve,
    };
    use axum::{http::HeaderMap, routing::post, Json, Router};

    async fn slack_stub() -> String {
        let app = Router::new().route(
            "/chat.postMessage",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                if auth != "Bearer xoxb-1" {
                    return Json(json!({ "ok": false, "error": "invalid_auth" }));
                }
                if body["channel"] == "#missing" {
                    return Json(json!({ "ok": false, "error": "channel_not_found" }));
                }
                Json(json!({ "ok": true, "channel": "C123", "ts": "1700000000.0001", "echo": body["text"] }))
            }),
        );
        serve(app).await
    }

    fn handler(base: String, token: &str) -> SlackHandler {
        let store = MemoryCredentialStore::new().with_connection(
            "u1",
            "slack",
            Connection {
                access_token: token.into(),
                refresh_token: None,
                expires_at: None,
            },
        );
        SlackHandler::new(reqwest::Client::new(), Arc::new(store), base)
    }

    #[tokio::test]
    async fn test_posts_message() {
        let base = slack_stub().await;
        let mut ctx = ExecutionContext::new("u1", json!({}));
        let outcome = handler(base, "xoxb-1")
            .execute(&json!({ "channel": "#ops", "text": "deployed" }), &mut ctx)
            .await
            .unwrap();
        assert_eq!(outcome.output["channel"], "C123");
        assert_eq!(outcome.output["ts"], "1700000000.0001");
    }

    #[tokio::test]
    async fn test_ok_false_is_upstream_error() {
        let base = slack_stub().await;
        let mut ctx = ExecutionContext::new("u1", json!({}));
        let err = handler(base, "xoxb-1")
            .execute(&json!({ "channel": "#missing", "text": "hi" }), &mut ctx)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "slack API error: channel_not_found");
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let base = slack_stub().await;
        let mut ctx = ExecutionContext::new("someone-else", json!({}));
        let err = handler(base, "xoxb-1")
            .execute(&json!({ "channel": "#ops", "text": "hi" }), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::MissingConnection { .. }));
    }
}
