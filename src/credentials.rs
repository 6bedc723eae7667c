//! Per-user third-party connections
//!
//! Integration handlers (slack, email, sheets) never see refresh tokens.
//! They ask `access_token` for a usable bearer token and the store refreshes
//! it through the service's OAuth2 token endpoint once `expires_at` passes.

use crate::{config::OAuthClientConfig, error::NodeError};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePool, Row};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Stored OAuth connection of one user to one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Connection {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_connection(&self, user_id: &str, service: &str) -> Result<Option<Connection>>;

    /// Exchange the refresh token for a new access token and persist it
    async fn refresh(&self, user_id: &str, service: &str) -> Result<Connection>;

    async fn save_connection(&self, user_id: &str, service: &str, connection: &Connection) -> Result<()>;
}

/// A valid access token for `service`, refreshed first when expired
pub async fn access_token(
    store: &dyn CredentialStore,
    user_id: &str,
    service: &str,
) -> Result<String, NodeError> {
    let connection = store
        .get_connection(user_id, service)
        .await
        .map_err(|e| NodeError::Credential(e.to_string()))?
        .ok_or_else(|| NodeError::MissingConnection {
            user_id: user_id.to_string(),
            service: service.to_string(),
        })?;

    if !connection.is_expired(Utc::now()) {
        return Ok(connection.access_token);
    }

    tracing::info!("🔑 Refreshing expired {} token for user {}", service, user_id);
    let refreshed = store
        .refresh(user_id, service)
        .await
        .map_err(|e| NodeError::Credential(format!("{} token refresh failed: {}", service, e)))?;
    Ok(refreshed.access_token)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// OAuth2 `refresh_token` grant against the configured token endpoints
#[derive(Debug, Clone)]
pub struct OAuthRefresher {
    http: reqwest::Client,
    /// Key: service name
    clients: HashMap<String, OAuthClientConfig>,
}

impl OAuthRefresher {
    pub fn new(http: reqwest::Client, clients: HashMap<String, OAuthClientConfig>) -> Self {
        Self { http, clients }
    }

    pub async fn refresh(&self, service: &str, connection: &Connection) -> Result<Connection> {
        let client = self
            .clients
            .get(service)
            .ok_or_else(|| anyhow!("No OAuth client configured for '{}'", service))?;
        let refresh_token = connection
            .refresh_token
            .as_deref()
            .ok_or_else(|| anyhow!("Connection to '{}' has no refresh token", service))?;

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client.client_id.as_str()),
            ("client_secret", client.client_secret.as_str()),
        ];
        let response = self.http.post(&client.token_url).form(&params).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Token endpoint returned {}: {}", status, body));
        }
        let token: TokenResponse = response.json().await?;

        Ok(Connection {
            access_token: token.access_token,
            // providers may omit the refresh token when it is unchanged
            refresh_token: token.refresh_token.or_else(|| connection.refresh_token.clone()),
            expires_at: token.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
        })
    }
}

/// Connections table in the service database
#[derive(Debug, Clone)]
pub struct SqliteCredentialStore {
    pool: SqlitePool,
    refresher: OAuthRefresher,
}

impl SqliteCredentialStore {
    pub fn new(pool: SqlitePool, refresher: OAuthRefresher) -> Self {
        Self { pool, refresher }
    }

    pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS connections (
                user_id TEXT NOT NULL,
                service TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                expires_at TEXT,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (user_id, service)
            )
            "#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn get_connection(&self, user_id: &str, service: &str) -> Result<Option<Connection>> {
        let row = sqlx::query(
            "SELECT access_token, refresh_token, expires_at FROM connections WHERE user_id = ? AND service = ?",
        )
        .bind(user_id)
        .bind(service)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let expires_at: Option<String> = row.get("expires_at");
        Ok(Some(Connection {
            access_token: row.get("access_token"),
            refresh_token: row.get("refresh_token"),
            expires_at: expires_at
                .map(|text| DateTime::parse_from_rfc3339(&text).map(|t| t.with_timezone(&Utc)))
                .transpose()?,
        }))
    }

    async fn refresh(&self, user_id: &str, service: &str) -> Result<Connection> {
        let current = self
            .get_connection(user_id, service)
            .await?
            .ok_or_else(|| anyhow!("No '{}' connection for user {}", service, user_id))?;
        let refreshed = self.refresher.refresh(service, &current).await?;
        self.save_connection(user_id, service, &refreshed).await?;
        Ok(refreshed)
    }

    async fn save_connection(&self, user_id: &str, service: &str, connection: &Connection) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO connections (user_id, service, access_token, refresh_token, expires_at, updated_at)
            VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(user_id, service) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(user_id)
        .bind(service)
        .bind(&connection.access_token)
        .bind(&connection.refresh_token)
        .bind(connection.expires_at.map(|at| at.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Connections held in memory, for tests and local runs
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    connections: Arc<Mutex<HashMap<(String, String), Connection>>>,
    refresher: Option<OAuthRefresher>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_refresher(refresher: OAuthRefresher) -> Self {
        Self {
            refresher: Some(refresher),
            ..Self::default()
        }
    }

    /// Builder-style insert
    pub fn with_connection(self, user_id: &str, service: &str, connection: Connection) -> Self {
        if let Ok(mut connections) = self.connections.lock() {
            connections.insert((user_id.to_string(), service.to_string()), connection);
        }
        self
    }

    fn get(&self, user_id: &str, service: &str) -> Result<Option<Connection>> {
        let connections = self
            .connections
            .lock()
            .map_err(|_| anyhow!("connections poisoned"))?;
        Ok(connections
            .get(&(user_id.to_string(), service.to_string()))
            .cloned())
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_connection(&self, user_id: &str, service: &str) -> Result<Option<Connection>> {
        self.get(user_id, service)
    }

    async fn refresh(&self, user_id: &str, service: &str) -> Result<Connection> {
        let refresher = self
            .refresher
            .as_ref()
            .ok_or_else(|| anyhow!("Token refresh is not configured"))?;
        let current = self
            .get(user_id, service)?
            .ok_or_else(|| anyhow!("No '{}' connection for user {}", service, user_id))?;
        let refreshed = refresher.refresh(service, &current).await?;
        self.save_connection(user_id, service, &refreshed).await?;
        Ok(refreshed)
    }

    async fn save_connection(&self, user_id: &str, service: &str, connection: &Connection) -> Result<()> {
        self.connections
            .lock()
            .map_err(|_| anyhow!("connections poisoned"))?
            .insert((user_id.to_string(), service.to_string()), connection.clone());
        Ok(())
    }
}
