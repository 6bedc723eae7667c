//! Background cron scheduler service
//!
//! One tokio-cron-scheduler job per active workflow with a `schedule`
//! trigger, keyed by workflow id so re-registering a workflow replaces its
//! previous job. Firing does not execute anything directly: it enqueues a
//! `RunJob` with an empty trigger payload and source `schedule`.

use crate::{
    runtime::queue::{JobQueue, RunJob},
    workflow::{
        registry::WorkflowRegistry,
        types::{TriggerSource, Workflow},
    },
};
use anyhow::Result;
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Hot-reload cron scheduler service
pub struct CronSchedulerService {
    scheduler: Arc<RwLock<JobScheduler>>,
    /// Key: workflow_id
    job_uuid_map: Arc<RwLock<HashMap<String, Uuid>>>,
    registry: Arc<WorkflowRegistry>,
    queue: JobQueue,
}

impl CronSchedulerService {
    pub async fn new(registry: Arc<WorkflowRegistry>, queue: JobQueue) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            job_uuid_map: Arc::new(RwLock::new(HashMap::new())),
            registry,
            queue,
        })
    }

    /// Register every scheduled workflow and start ticking
    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting cron scheduler service");

        let workflows = self.registry.get_all_workflows();
        let mut registered = 0;
        for workflow in &workflows {
            match self.sync_workflow(workflow).await {
                Ok(true) => registered += 1,
                Ok(false) => {}
                // one bad expression must not keep the others from running
                Err(e) => tracing::warn!("⚠️ Skipping schedule of workflow {}: {}", workflow.id, e),
            }
        }

        {
            let scheduler = self.scheduler.read().await;
            scheduler.start().await?;
        }

        tracing::info!(
            "📊 Registered {} cron jobs from {} workflows",
            registered,
            workflows.len()
        );
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping cron scheduler service");
        self.job_uuid_map.write().await.clear();
        {
            let mut scheduler = self.scheduler.write().await;
            scheduler.shutdown().await?;
        }
        tracing::info!("✅ Cron scheduler stopped");
        Ok(())
    }

    /// Bring the workflow's cron job in line with its current definition
    ///
    /// Returns whether a job is now scheduled for it.
    pub async fn sync_workflow(&self, workflow: &Workflow) -> Result<bool> {
        match workflow.cron_schedule().filter(|_| workflow.active) {
            Some(schedule) => {
                self.add_or_update_cron_job(&workflow.id, schedule).await?;
                Ok(true)
            }
            None => {
                self.remove_workflow_cron_job(&workflow.id).await;
                Ok(false)
            }
        }
    }

    /// Drop the workflow's cron job, if any
    pub async fn remove_workflow_cron_job(&self, workflow_id: &str) {
        let removed = self.job_uuid_map.write().await.remove(workflow_id);
        if let Some(job_uuid) = removed {
            let scheduler = self.scheduler.read().await;
            if let Err(e) = scheduler.remove(&job_uuid).await {
                tracing::warn!("⚠️ Failed to remove cron job for {}: {}", workflow_id, e);
            } else {
                tracing::info!("🗑️ Removed cron job for workflow: {}", workflow_id);
            }
        }
    }

    /// Workflow ids that currently have a cron job
    pub async fn scheduled_workflows(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.job_uuid_map.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn add_or_update_cron_job(&self, workflow_id: &str, schedule: &str) -> Result<()> {
        // build first so an invalid expression leaves the old job in place
        let workflow_id_owned = workflow_id.to_string();
        let registry = Arc::clone(&self.registry);
        let queue = self.queue.clone();
        let job = Job::new_async(schedule, move |_uuid, _l| {
            let workflow_id = workflow_id_owned.clone();
            let registry = Arc::clone(&registry);
            let queue = queue.clone();
            Box::pin(async move {
                fire(&registry, &queue, &workflow_id);
            })
        })?;

        self.remove_workflow_cron_job(workflow_id).await;

        let job_uuid = {
            let scheduler = self.scheduler.write().await;
            scheduler.add(job).await?
        };
        self.job_uuid_map
            .write()
            .await
            .insert(workflow_id.to_string(), job_uuid);

        tracing::info!("🔥 Scheduled workflow {} ({})", workflow_id, schedule);
        Ok(())
    }
}

/// Cron tick: enqueue a run unless the workflow was deleted or deactivated
pub fn fire(registry: &WorkflowRegistry, queue: &JobQueue, workflow_id: &str) -> Option<String> {
    let workflow = match registry.get_workflow(workflow_id) {
        Some(workflow) if workflow.active => workflow,
        _ => {
            tracing::debug!("⏭️ Skipping cron tick for missing or inactive workflow: {}", workflow_id);
            return None;
        }
    };

    tracing::debug!("🔔 Cron trigger activated for workflow {}", workflow_id);
    let job = RunJob::new(
        workflow.id.clone(),
        workflow.user_id.clone(),
        json!({}),
        TriggerSource::Schedule,
    );
    match queue.enqueue(job) {
        Ok(job_id) => Some(job_id),
        Err(e) => {
            tracing::error!("❌ Could not enqueue scheduled run of {}: {}", workflow_id, e);
            None
        }
    }
}
