//! flowrunner: graph workflow runner
//!
//! Workflows are DAGs of typed nodes started by a webhook, a cron schedule
//! or a manual call. Runs are queued, walked in dependency order with
//! `{{...}}` data flow between nodes, and recorded node by node.

// Configuration from FLOWRUNNER_* environment variables
pub mod config;

pub mod error;

// SQLite pool and schema
pub mod db;

// Workflow definitions, storage and the hot-reload registry
pub mod workflow;

// Execution records and node logs
pub mod execution;

// Per-user third-party connections
pub mod credentials;

// Node handler contract, registry and built-in handlers
pub mod nodes;

// Ordering, resolution, executor, queue, cron and progress
pub mod runtime;

// REST endpoints and webhook trigger
pub mod api;

pub mod server;

pub use error::{EngineError, ExecutionFailed, NodeError};
pub use execution::{ExecutionRecord, ExecutionStatus, NodeLog, NodeStatus};
pub use nodes::{NodeHandler, NodeHandlerRegistry, NodeOutcome};
pub use runtime::{ExecutionContext, RunJob, WorkflowExecutor};
pub use server::start_server;
pub use workflow::{Workflow, WorkflowGraph};
