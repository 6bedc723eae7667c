//! Google Sheets v4 values API: read, append, update

use crate::{
    credentials::{self, CredentialStore},
    error::NodeError,
    nodes::{parse_config, upstream_json, NodeHandler, NodeOutcome},
    runtime::context::ExecutionContext,
};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const SERVICE: &str = "google_sheets";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SheetsOperation {
    Read,
    Append,
    Update,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetsConfig {
    spreadsheet_id: String,
    range: String,
    #[serde(default = "default_operation")]
    operation: SheetsOperation,
    #[serde(default)]
    values: Option<Value>,
}

fn default_operation() -> SheetsOperation {
    SheetsOperation::Read
}

impl SheetsConfig {
    /// Rows for append/update; a flat array is taken as a single row
    fn rows(&self) -> Result<Value, NodeError> {
        match &self.values {
            Some(Value::Array(rows)) if rows.iter().all(Value::is_array) && !rows.is_empty() => {
                Ok(Value::Array(rows.clone()))
            }
            Some(Value::Array(row)) if !row.is_empty() => Ok(json!([row])),
            _ => Err(NodeError::InvalidConfig(
                "sheets append/update needs a non-empty 'values' array".into(),
            )),
        }
    }
}

pub struct SheetsHandler {
    client: reqwest::Client,
    credentials: Arc<dyn CredentialStore>,
    api_base: String,
}

impl SheetsHandler {
    pub fn new(client: reqwest::Client, credentials: Arc<dyn CredentialStore>, api_base: String) -> Self {
        Self {
            client,
            credentials,
            api_base,
        }
    }

    /// `{base}/v4/spreadsheets/{id}/values/{range}{suffix}` with the range escaped
    fn values_url(&self, config: &SheetsConfig, suffix: &str) -> Result<Url, NodeError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| NodeError::InvalidConfig(format!("invalid Sheets API base: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| NodeError::InvalidConfig("Sheets API base cannot be a base URL".into()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", config.spreadsheet_id.as_str(), "values"])
            .push(&format!("{}{}", config.range, suffix));
        Ok(url)
    }
}

#[async_trait]
impl NodeHandler for SheetsHandler {
    async fn execute(&self, config: &Value, ctx: &mut ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let config: SheetsConfig = parse_config(config)?;
        let token = credentials::access_token(self.credentials.as_ref(), &ctx.user_id, SERVICE).await?;

        let request = match config.operation {
            SheetsOperation::Read => self.client.get(self.values_url(&config, "")?),
            SheetsOperation::Append => self
                .client
                .post(self.values_url(&config, ":append")?)
                .query(&[("valueInputOption", "USER_ENTERED")])
                .json(&json!({ "values": config.rows()? })),
            SheetsOperation::Update => self
                .client
                .put(self.values_url(&config, "")?)
                .query(&[("valueInputOption", "USER_ENTERED")])
                .json(&json!({ "range": config.range, "values": config.rows()? })),
        };

        let body = upstream_json(SERVICE, request.bearer_auth(token).send().await?).await?;
        tracing::info!("📊 Sheets {:?} on {} ({})", config.operation, config.spreadsheet_id, config.range);

        let output = match config.operation {
            SheetsOperation::Read => json!({
                "range": body["range"],
                "values": body.get("values").cloned().unwrap_or_else(|| json!([])),
            }),
            SheetsOperation::Append => json!({
                "updatedRange": body["updates"]["updatedRange"],
                "updatedRows": body["updates"]["updatedRows"],
            }),
            SheetsOperation::Update => json!({
                "updatedRange": body["updatedRange"],
                "updatedRows": body["updatedRows"],
            }),
        };
        Ok(NodeOutcome::success(output))
    }
}
