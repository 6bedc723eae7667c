//! Configuration management
//!
//! Every value has a default and can be overridden through `FLOWRUNNER_*`
//! environment variables for container deployments.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub integrations: IntegrationConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g. "0.0.0.0")
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file holding workflows, executions and connections
    pub path: String,
}

/// Run queue and redelivery policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Runs executed concurrently
    pub workers: usize,
    /// Total deliveries of one run request, first attempt included
    pub max_attempts: u32,
    /// Delay before the first redelivery
    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
}

/// Third-party API endpoints and OAuth refresh clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationConfig {
    pub slack_api_base: String,
    pub gmail_api_base: String,
    pub sheets_api_base: String,
    /// Key: service name ("slack", "gmail", "google_sheets")
    pub oauth_clients: HashMap<String, OAuthClientConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthClientConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Services whose OAuth clients are read from the environment
pub const OAUTH_SERVICES: [&str; 3] = ["slack", "gmail", "google_sheets"];

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: env_or("FLOWRUNNER_HOST", "0.0.0.0"),
                port: env_parse("FLOWRUNNER_PORT", 3004),
            },
            database: DatabaseConfig {
                path: env_or("FLOWRUNNER_DB_PATH", "data/flowrunner.db"),
            },
            queue: QueueConfig {
                workers: env_parse("FLOWRUNNER_QUEUE_WORKERS", 4),
                max_attempts: env_parse("FLOWRUNNER_QUEUE_MAX_ATTEMPTS", 3),
                backoff_base_ms: env_parse("FLOWRUNNER_QUEUE_BACKOFF_MS", 2000),
                backoff_multiplier: env_parse("FLOWRUNNER_QUEUE_BACKOFF_MULTIPLIER", 2.0),
            },
            integrations: IntegrationConfig {
                slack_api_base: env_or("FLOWRUNNER_SLACK_API_BASE", "https://slack.com/api"),
                gmail_api_base: env_or("FLOWRUNNER_GMAIL_API_BASE", "https://gmail.googleapis.com"),
                sheets_api_base: env_or("FLOWRUNNER_SHEETS_API_BASE", "https://sheets.googleapis.com"),
                oauth_clients: oauth_clients_from_env(),
            },
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// `FLOWRUNNER_OAUTH_<SERVICE>_{TOKEN_URL,CLIENT_ID,CLIENT_SECRET}`
fn oauth_clients_from_env() -> HashMap<String, OAuthClientConfig> {
    let mut clients = HashMap::new();
    for service in OAUTH_SERVICES {
        let prefix = format!("FLOWRUNNER_OAUTH_{}", service.to_ascii_uppercase());
        let token_url = std::env::var(format!("{}_TOKEN_URL", prefix));
        let client_id = std::env::var(format!("{}_CLIENT_ID", prefix));
        let client_secret = std::env::var(format!("{}_CLIENT_SECRET", prefix));
        if let (Ok(token_url), Ok(client_id), Ok(client_secret)) = (token_url, client_id, client_secret) {
            clients.insert(
                service.to_string(),
                OAuthClientConfig {
                    token_url,
                    client_id,
                    client_secret,
                },
            );
        }
    }
    clients
}
