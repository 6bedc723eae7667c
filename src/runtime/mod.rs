//! Runtime execution engine
//!
//! Everything a run needs once a workflow snapshot is loaded:
//! - Kahn ordering of the petgraph DAG
//! - `{{...}}` variable resolution and condition evaluation
//! - the per-run context with its loop scope stack
//! - the executor that walks the graph and records node logs
//! - the run queue with redelivery, the cron trigger and progress events

pub mod condition;

pub mod context;

pub mod executor;

pub mod graph;

pub mod progress;

pub mod queue;

pub mod resolver;

pub mod scheduler;

pub use context::{ExecutionContext, LoopFrame};
pub use executor::WorkflowExecutor;
pub use graph::{order, ExecutionGraph};
pub use progress::{BroadcastPublisher, NoopPublisher, ProgressEvent, ProgressKind, ProgressPublisher};
pub use queue::{JobQueue, QueueWorker, RetryPolicy, RunJob};
pub use scheduler::CronSchedulerService;
