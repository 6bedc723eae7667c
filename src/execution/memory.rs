//! In-memory execution store for tests and local runs

use crate::execution::{
    ExecutionLogSink, ExecutionRecord, ExecutionStatus, NewExecution, NodeLog,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct MemoryExecutionStore {
    /// Insertion order, oldest first
    records: Arc<Mutex<Vec<ExecutionRecord>>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record, oldest first
    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<ExecutionRecord>>> {
        self.records
            .lock()
            .map_err(|_| anyhow!("execution records poisoned"))
    }

    fn with_record<T>(
        &self,
        execution_id: &str,
        f: impl FnOnce(&mut ExecutionRecord) -> Result<T>,
    ) -> Result<T> {
        let mut records = self.lock()?;
        let record = records
            .iter_mut()
            .find(|record| record.id == execution_id)
            .ok_or_else(|| anyhow!("Execution not found: {}", execution_id))?;
        f(record)
    }
}

#[async_trait]
impl ExecutionLogSink for MemoryExecutionStore {
    async fn create_record(&self, new: NewExecution) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.lock()?.push(ExecutionRecord::open(id.clone(), new));
        Ok(id)
    }

    async fn append_log(&self, execution_id: &str, log: &NodeLog) -> Result<()> {
        self.with_record(execution_id, |record| {
            record.logs.push(log.clone());
            Ok(())
        })
    }

    async fn set_status(&self, execution_id: &str, status: ExecutionStatus) -> Result<()> {
        self.with_record(execution_id, |record| record.transition(status))
    }

    async fn set_error(&self, execution_id: &str, payload: Value) -> Result<()> {
        self.with_record(execution_id, |record| {
            record.error = Some(payload);
            Ok(())
        })
    }

    async fn get_record(&self, execution_id: &str) -> Result<Option<ExecutionRecord>> {
        Ok(self
            .lock()?
            .iter()
            .find(|record| record.id == execution_id)
            .cloned())
    }

    async fn list_for_workflow(&self, workflow_id: &str, user_id: &str) -> Result<Vec<ExecutionRecord>> {
        Ok(self
            .lock()?
            .iter()
            .rev()
            .filter(|record| record.workflow_id == workflow_id && record.user_id == user_id)
            .cloned()
            .collect())
    }
}
