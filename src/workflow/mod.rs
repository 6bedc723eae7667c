//! Workflow management layer
//!
//! Type definitions, SQLite persistence and the hot-reload registry that the
//! executor reads graph snapshots from.

pub mod types;

pub mod storage;

pub mod registry;

pub use registry::{WorkflowRegistry, WorkflowStore};
pub use storage::WorkflowStorage;
pub use types::{EdgeSpec, NodeSpec, TriggerConfig, TriggerSource, Workflow, WorkflowGraph};
