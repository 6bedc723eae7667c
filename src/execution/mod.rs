//! Execution record store
//!
//! Append-only node logs plus the run status machine. The executor writes
//! through `ExecutionLogSink`; the API reads history back through the same
//! trait.

pub mod memory;
pub mod storage;
pub mod types;

pub use memory::MemoryExecutionStore;
pub use storage::SqliteExecutionStore;
pub use types::{ExecutionRecord, ExecutionStatus, NewExecution, NodeLog, NodeStatus};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait ExecutionLogSink: Send + Sync {
    /// Open a `pending` record and return its id
    async fn create_record(&self, new: NewExecution) -> Result<String>;

    async fn append_log(&self, execution_id: &str, log: &NodeLog) -> Result<()>;

    /// Rejects moves the status machine does not allow
    async fn set_status(&self, execution_id: &str, status: ExecutionStatus) -> Result<()>;

    async fn set_error(&self, execution_id: &str, payload: Value) -> Result<()>;

    async fn get_record(&self, execution_id: &str) -> Result<Option<ExecutionRecord>>;

    /// Run history of a workflow owned by `user_id`, newest first
    async fn list_for_workflow(&self, workflow_id: &str, user_id: &str) -> Result<Vec<ExecutionRecord>>;
}
