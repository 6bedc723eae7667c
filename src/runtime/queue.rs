//! In-process run queue with redelivery
//!
//! Triggers enqueue `RunJob`s; the worker executes up to N of them at once.
//! A run that fails is redelivered with `attempt + 1` after an exponential
//! backoff until the policy's attempt ceiling. Delivery is at-least-once.

use crate::{
    config::QueueConfig,
    runtime::executor::WorkflowExecutor,
    workflow::types::TriggerSource,
};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender},
    Semaphore,
};
use uuid::Uuid;

/// One run request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunJob {
    /// Stable across redeliveries of the same request
    pub job_id: String,
    pub workflow_id: String,
    pub user_id: String,
    pub trigger_payload: Value,
    pub trigger_source: TriggerSource,
    /// 1-based delivery counter
    pub attempt: u32,
}

impl RunJob {
    pub fn new(
        workflow_id: impl Into<String>,
        user_id: impl Into<String>,
        trigger_payload: Value,
        trigger_source: TriggerSource,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            user_id: user_id.into(),
            trigger_payload,
            trigger_source,
            attempt: 1,
        }
    }

    pub fn redelivery(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// Attempt ceiling and exponential backoff between deliveries
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            multiplier: if config.backoff_multiplier > 0.0 {
                config.backoff_multiplier
            } else {
                1.0
            },
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Wait after failed delivery `attempt`: `base * multiplier^(attempt - 1)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.powf((attempt - 1) as f64);
        self.base_delay.mul_f64(factor)
    }
}

/// Producer handle, cheap to clone
#[derive(Clone)]
pub struct JobQueue {
    tx: UnboundedSender<RunJob>,
}

impl JobQueue {
    /// A queue and the raw receiving end, for consumers other than `QueueWorker`
    pub fn with_receiver() -> (Self, UnboundedReceiver<RunJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a run and return its job id
    pub fn enqueue(&self, job: RunJob) -> Result<String> {
        let job_id = job.job_id.clone();
        tracing::debug!("📥 Enqueued job {} for workflow {}", job_id, job.workflow_id);
        self.tx
            .send(job)
            .map_err(|_| anyhow!("Job queue is closed"))?;
        Ok(job_id)
    }
}

/// Consumer side: executes jobs and redelivers failures
pub struct QueueWorker {
    rx: UnboundedReceiver<RunJob>,
    /// Weak so the worker stops once every producer is gone
    redeliver: WeakUnboundedSender<RunJob>,
    executor: Arc<WorkflowExecutor>,
    policy: RetryPolicy,
    permits: Arc<Semaphore>,
}

/// Create a connected queue/worker pair
pub fn channel(executor: Arc<WorkflowExecutor>, policy: RetryPolicy, workers: usize) -> (JobQueue, QueueWorker) {
    let (queue, rx) = JobQueue::with_receiver();
    let worker = QueueWorker {
        rx,
        redeliver: queue.tx.downgrade(),
        executor,
        policy,
        permits: Arc::new(Semaphore::new(workers.max(1))),
    };
    (queue, worker)
}

impl QueueWorker {
    /// Process jobs until every `JobQueue` handle is dropped
    pub async fn run(mut self) {
        tracing::info!(
            "👷 Queue worker started ({} workers, {} max attempts)",
            self.permits.available_permits(),
            self.policy.max_attempts
        );

        while let Some(job) = self.rx.recv().await {
            let permit = match Arc::clone(&self.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let executor = Arc::clone(&self.executor);
            let policy = self.policy.clone();
            let redeliver = self.redeliver.clone();

            tokio::spawn(async move {
                let retry = process_job(&executor, &policy, job).await;
                drop(permit);

                if let Some(next) = retry {
                    tokio::time::sleep(policy.delay_for(next.attempt - 1)).await;
                    match redeliver.upgrade() {
                        Some(tx) => {
                            if tx.send(next).is_err() {
                                tracing::warn!("⚠️ Queue closed before redelivery");
                            }
                        }
                        None => tracing::warn!("⚠️ Queue closed, dropping redelivery of job {}", next.job_id),
                    }
                }
            });
        }

        tracing::info!("👷 Queue worker stopped");
    }
}

/// Execute one delivery; returns the redelivery if the run should be retried
pub async fn process_job(executor: &WorkflowExecutor, policy: &RetryPolicy, job: RunJob) -> Option<RunJob> {
    match executor.execute_workflow(&job).await {
        Ok(execution_id) => {
            tracing::debug!("📤 Job {} finished as execution {}", job.job_id, execution_id);
            None
        }
        Err(failed) if policy.should_retry(job.attempt) => {
            tracing::warn!(
                "🔁 Job {} attempt {}/{} failed, retrying in {:?}: {}",
                job.job_id,
                job.attempt,
                policy.max_attempts,
                policy.delay_for(job.attempt),
                failed
            );
            Some(job.redelivery())
        }
        Err(failed) => {
            tracing::error!(
                "💀 Job {} gave up after {} attempts: {}",
                job.job_id,
                job.attempt,
                failed
            );
            None
        }
    }
}
