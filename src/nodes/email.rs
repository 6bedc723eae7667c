//! Sends mail through the owner's Gmail connection
//!
//! The message is assembled as RFC 2822 text and submitted base64url-encoded
//! to `users/me/messages/send`.

use crate::{
    credentials::{self, CredentialStore},
    error::NodeError,
    nodes::{parse_config, upstream_json, NodeHandler, NodeOutcome},
    runtime::{context::ExecutionContext, resolver::stringify},
};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const SERVICE: &str = "gmail";

#[derive(Debug, Deserialize)]
struct EmailConfig {
    /// Address or list of addresses
    to: Value,
    subject: String,
    #[serde(default)]
    body: Value,
    #[serde(default)]
    cc: Option<Value>,
    #[serde(default)]
    html: bool,
}

fn address_list(value: &Value) -> String {
    match value {
        Value::Array(items) => items.iter().map(stringify).collect::<Vec<_>>().join(", "),
        other => stringify(other),
    }
}

impl EmailConfig {
    fn to_rfc2822(&self) -> Result<String, NodeError> {
        let to = address_list(&self.to);
        if to.trim().is_empty() || self.to.is_null() {
            return Err(NodeError::InvalidConfig("email needs at least one recipient".into()));
        }

        let content_type = if self.html { "text/html" } else { "text/plain" };
        let body = match &self.body {
            Value::Null => String::new(),
            other => stringify(other),
        };

        let mut message = format!("To: {}\r\n", to);
        if let Some(cc) = self.cc.as_ref().map(address_list).filter(|cc| !cc.trim().is_empty()) {
            message.push_str(&format!("Cc: {}\r\n", cc));
        }
        message.push_str(&format!("Subject: {}\r\n", self.subject));
        message.push_str("MIME-Version: 1.0\r\n");
        message.push_str(&format!("Content-Type: {}; charset=\"UTF-8\"\r\n\r\n", content_type));
        message.push_str(&body);
        Ok(message)
    }
}

pub struct EmailHandler {
    client: reqwest::Client,
    credentials: Arc<dyn CredentialStore>,
    api_base: String,
}

impl EmailHandler {
    pub fn new(client: reqwest::Client, credentials: Arc<dyn CredentialStore>, api_base: String) -> Self {
        Self {
            client,
            credentials,
            api_base,
        }
    }
}

#[async_trait]
impl NodeHandler for EmailHandler {
    async fn execute(&self, config: &Value, ctx: &mut ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let config: EmailConfig = parse_config(config)?;
        let raw = URL_SAFE_NO_PAD.encode(config.to_rfc2822()?);
        let token = credentials::access_token(self.credentials.as_ref(), &ctx.user_id, SERVICE).await?;

        let url = format!(
            "{}/gmail/v1/users/me/messages/send",
            self.api_base.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&json!({ "raw": raw }))
            .send()
            .await?;
        let sent = upstream_json(SERVICE, response).await?;

        tracing::info!("📧 Sent email '{}' to {}", config.subject, address_list(&config.to));
        Ok(NodeOutcome::success(json!({
            "messageId": sent["id"],
            "threadId": sent["threadId"],
            "to": address_list(&config.to),
            "subject": config.subject,
        })))
    }
}
