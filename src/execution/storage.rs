//! SQLite persistence for execution records and node logs
//!
//! Timestamps are stored as RFC 3339 text. Status changes are
//! compare-and-set on the previous status so two writers can never both
//! move the same run out of `running`.

use crate::execution::{
    ExecutionLogSink, ExecutionRecord, ExecutionStatus, NewExecution, NodeLog,
};
use crate::workflow::types::TriggerSource;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{
    sqlite::{SqlitePool, SqliteRow},
    Row,
};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SqliteExecutionStore {
    pool: SqlitePool,
}

impl SqliteExecutionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL,
                trigger_payload JSON NOT NULL,
                trigger_source TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                error JSON,
                start_time TEXT NOT NULL,
                end_time TEXT,
                duration_ms INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                execution_id TEXT NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
                node_id TEXT NOT NULL,
                node_type TEXT NOT NULL,
                status TEXT NOT NULL,
                input JSON NOT NULL,
                output JSON,
                error TEXT,
                attempt_number INTEGER NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                duration_ms INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_executions_workflow ON executions(workflow_id, user_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_execution_logs_execution ON execution_logs(execution_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn current_status(&self, execution_id: &str) -> Result<ExecutionStatus> {
        let row = sqlx::query("SELECT status FROM executions WHERE id = ?")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| anyhow!("Execution not found: {}", execution_id))?;
        row.get::<String, _>("status").parse()
    }

    async fn load_logs(&self, execution_id: &str) -> Result<Vec<NodeLog>> {
        let rows = sqlx::query(
            r#"
            SELECT node_id, node_type, status, input, output, error, attempt_number,
                   start_time, end_time, duration_ms
            FROM execution_logs WHERE execution_id = ? ORDER BY id ASC
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(log_from_row).collect()
    }
}

#[async_trait]
impl ExecutionLogSink for SqliteExecutionStore {
    async fn create_record(&self, new: NewExecution) -> Result<String> {
        let record = ExecutionRecord::open(Uuid::new_v4().to_string(), new);

        sqlx::query(
            r#"
            INSERT INTO executions
                (id, workflow_id, user_id, status, trigger_payload, trigger_source, attempt, start_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.workflow_id)
        .bind(&record.user_id)
        .bind(record.status.as_str())
        .bind(serde_json::to_string(&record.trigger_payload)?)
        .bind(record.trigger_source.as_str())
        .bind(record.attempt as i64)
        .bind(record.start_time.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(record.id)
    }

    async fn append_log(&self, execution_id: &str, log: &NodeLog) -> Result<()> {
        let output = log.output.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO execution_logs
                (execution_id, node_id, node_type, status, input, output, error,
                 attempt_number, start_time, end_time, duration_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(execution_id)
        .bind(&log.node_id)
        .bind(&log.node_type)
        .bind(log.status.as_str())
        .bind(serde_json::to_string(&log.input)?)
        .bind(output)
        .bind(&log.error)
        .bind(log.attempt_number as i64)
        .bind(log.start_time.to_rfc3339())
        .bind(log.end_time.to_rfc3339())
        .bind(log.duration_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_status(&self, execution_id: &str, status: ExecutionStatus) -> Result<()> {
        let current = self.current_status(execution_id).await?;
        if !current.can_transition_to(status) {
            return Err(anyhow!(
                "Invalid status transition for execution {}: {} -> {}",
                execution_id,
                current.as_str(),
                status.as_str()
            ));
        }

        let result = if status.is_terminal() {
            let row = sqlx::query("SELECT start_time FROM executions WHERE id = ?")
                .bind(execution_id)
                .fetch_one(&self.pool)
                .await?;
            let start = parse_time(&row.get::<String, _>("start_time"))?;
            let end = Utc::now();

            sqlx::query(
                r#"
                UPDATE executions SET status = ?, end_time = ?, duration_ms = ?
                WHERE id = ? AND status = ?
                "#,
            )
            .bind(status.as_str())
            .bind(end.to_rfc3339())
            .bind((end - start).num_milliseconds())
            .bind(execution_id)
            .bind(current.as_str())
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query("UPDATE executions SET status = ? WHERE id = ? AND status = ?")
                .bind(status.as_str())
                .bind(execution_id)
                .bind(current.as_str())
                .execute(&self.pool)
                .await?
        };

        if result.rows_affected() == 0 {
            return Err(anyhow!(
                "Execution {} changed status concurrently, refusing {}",
                execution_id,
                status.as_str()
            ));
        }
        Ok(())
    }

    async fn set_error(&self, execution_id: &str, payload: Value) -> Result<()> {
        let result = sqlx::query("UPDATE executions SET error = ? WHERE id = ?")
            .bind(serde_json::to_string(&payload)?)
            .bind(execution_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("Execution not found: {}", execution_id));
        }
        Ok(())
    }

    async fn get_record(&self, execution_id: &str) -> Result<Option<ExecutionRecord>> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let mut record = record_from_row(&row)?;
                record.logs = self.load_logs(execution_id).await?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn list_for_workflow(&self, workflow_id: &str, user_id: &str) -> Result<Vec<ExecutionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM executions WHERE workflow_id = ? AND user_id = ?
            ORDER BY start_time DESC, rowid DESC
            "#,
        )
        .bind(workflow_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut record = record_from_row(row)?;
            record.logs = self.load_logs(&record.id).await?;
            records.push(record);
        }
        Ok(records)
    }
}

fn parse_time(text: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(text)?.with_timezone(&Utc))
}

fn parse_json(text: Option<String>) -> Result<Option<Value>> {
    Ok(text.map(|t| serde_json::from_str(&t)).transpose()?)
}

fn record_from_row(row: &SqliteRow) -> Result<ExecutionRecord> {
    let end_time: Option<String> = row.get("end_time");
    Ok(ExecutionRecord {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        user_id: row.get("user_id"),
        status: row.get::<String, _>("status").parse()?,
        trigger_payload: serde_json::from_str(&row.get::<String, _>("trigger_payload"))?,
        trigger_source: row.get::<String, _>("trigger_source").parse::<TriggerSource>()?,
        attempt: row.get::<i64, _>("attempt") as u32,
        logs: Vec::new(),
        error: parse_json(row.get("error"))?,
        start_time: parse_time(&row.get::<String, _>("start_time"))?,
        end_time: end_time.as_deref().map(parse_time).transpose()?,
        duration_ms: row.get("duration_ms"),
    })
}

fn log_from_row(row: &SqliteRow) -> Result<NodeLog> {
    Ok(NodeLog {
        node_id: row.get("node_id"),
        node_type: row.get("node_type"),
        status: row.get::<String, _>("status").parse()?,
        input: serde_json::from_str(&row.get::<String, _>("input"))?,
        output: parse_json(row.get("output"))?,
        error: row.get("error"),
        attempt_number: row.get::<i64, _>("attempt_number") as u32,
        start_time: parse_time(&row.get::<String, _>("start_time"))?,
        end_time: parse_time(&row.get::<String, _>("end_time"))?,
        duration_ms: row.get("duration_ms"),
    })
}
