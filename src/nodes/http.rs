//! Generic HTTP request node

use crate::{
    error::NodeError,
    nodes::{parse_config, NodeHandler, NodeOutcome},
    runtime::{context::ExecutionContext, resolver::stringify},
};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HttpConfig {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: Map<String, Value>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

fn default_method() -> String {
    "GET".to_string()
}

pub struct HttpHandler {
    client: reqwest::Client,
}

impl HttpHandler {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeHandler for HttpHandler {
    async fn execute(&self, config: &Value, _ctx: &mut ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let config: HttpConfig = parse_config(config)?;
        let method = Method::from_bytes(config.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| NodeError::InvalidConfig(format!("invalid HTTP method '{}'", config.method)))?;

        tracing::debug!("🌐 {} {}", method, config.url);
        let mut request = self.client.request(method, &config.url);
        for (name, value) in &config.headers {
            request = request.header(name.as_str(), stringify(value));
        }
        match &config.body {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) => request = request.body(text.clone()),
            Some(body) => request = request.json(body),
        }
        if let Some(ms) = config.timeout_ms {
            request = request.timeout(Duration::from_millis(ms));
        }

        let response = request.send().await?;
        let status = response.status();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), Value::String(v.to_string())))
            })
            .collect();
        let text = response.text().await?;
        // JSON bodies are exposed structurally so later nodes can index into them
        let data = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        if !status.is_success() {
            let mut outcome = NodeOutcome::failure(format!("HTTP {} from {}", status.as_u16(), config.url));
            outcome.output = json!({ "status": status.as_u16(), "data": data, "ok": false });
            return Ok(outcome);
        }

        Ok(NodeOutcome::success(json!({
            "status": status.as_u16(),
            "headers": headers,
            "data": data,
            "ok": true,
        })))
    }
}
