//! Hot-reload workflow registry using ArcSwap
//!
//! Every write swaps the whole map pointer, so runs that already loaded a
//! snapshot keep executing against it while new runs see the update.

use crate::workflow::{
    storage::WorkflowStorage,
    types::{Workflow, WorkflowGraph},
};
use anyhow::Result;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};

/// Read side of workflow persistence used by the executor
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Snapshot of the graph if the workflow exists and belongs to `user_id`
    async fn load_graph(&self, workflow_id: &str, user_id: &str) -> Result<Option<WorkflowGraph>>;
}

/// Lock-free in-memory view of all workflows
#[derive(Debug)]
pub struct WorkflowRegistry {
    /// Key: workflow_id
    workflows: ArcSwap<HashMap<String, Arc<Workflow>>>,
    /// Backing storage for reloads. `None` for a purely in-memory registry
    storage: Option<WorkflowStorage>,
}

impl WorkflowRegistry {
    pub fn new(storage: WorkflowStorage) -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            storage: Some(storage),
        }
    }

    /// Registry without persistent storage
    pub fn detached() -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            storage: None,
        }
    }

    /// Populate the registry from storage at startup
    pub async fn init_from_storage(&self) -> Result<()> {
        let storage = self.storage()?;
        let stored = storage.load_all_workflows().await?;
        let compiled = stored
            .into_iter()
            .map(|(id, workflow)| (id, Arc::new(workflow)))
            .collect::<HashMap<_, _>>();

        self.workflows.store(Arc::new(compiled));
        tracing::info!("📊 Initialized workflow registry with {} workflows", self.workflows.load().len());
        Ok(())
    }

    /// Re-read one workflow from storage and swap it in
    pub async fn reload_workflow(&self, workflow_id: &str) -> Result<Arc<Workflow>> {
        let workflow = self
            .storage()?
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Workflow not found: {}", workflow_id))?;

        let workflow = self.upsert(workflow);
        tracing::info!("🔥 Hot-reloaded workflow: {}", workflow_id);
        Ok(workflow)
    }

    /// Insert or replace a workflow in memory only
    pub fn upsert(&self, workflow: Workflow) -> Arc<Workflow> {
        let workflow = Arc::new(workflow);
        self.workflows.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(workflow.id.clone(), Arc::clone(&workflow));
            next
        });
        workflow
    }

    pub fn get_workflow(&self, workflow_id: &str) -> Option<Arc<Workflow>> {
        self.workflows.load().get(workflow_id).cloned()
    }

    pub fn get_all_workflows(&self) -> Vec<Arc<Workflow>> {
        self.workflows.load().values().cloned().collect()
    }

    pub fn remove_workflow(&self, workflow_id: &str) -> bool {
        let mut removed = false;
        self.workflows.rcu(|current| {
            let mut next = (**current).clone();
            removed = next.remove(workflow_id).is_some();
            next
        });
        if removed {
            tracing::info!("🗑️ Removed workflow from registry: {}", workflow_id);
        }
        removed
    }

    fn storage(&self) -> Result<&WorkflowStorage> {
        self.storage
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Workflow registry has no backing storage"))
    }
}

#[async_trait]
impl WorkflowStore for WorkflowRegistry {
    async fn load_graph(&self, workflow_id: &str, user_id: &str) -> Result<Option<WorkflowGraph>> {
        Ok(self
            .get_workflow(workflow_id)
            .filter(|workflow| workflow.user_id == user_id)
            .map(|workflow| workflow.graph()))
    }
}
