//! Persistence contract.
//!
//! The orchestrator never talks to a database directly; tasks, workflow
//! definitions, and the task-id counter are reached through these traits.
//! The driver behind them is an external collaborator.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Workflow, WorkflowTask};

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn find(&self, name: &str) -> Result<Workflow>;
    async fn update(&self, workflow: &Workflow) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct TaskListOptions {
    pub workflow_name: String,
    pub skip: usize,
    pub limit: usize,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: &WorkflowTask) -> Result<()>;
    async fn update(&self, task: &WorkflowTask) -> Result<()>;
    async fn find(&self, workflow_name: &str, task_id: i64) -> Result<WorkflowTask>;
    /// Items plus total count for the filter, paging ignored in the total.
    async fn list(&self, opts: &TaskListOptions) -> Result<(Vec<WorkflowTask>, u64)>;
    /// True while any task of the workflow is in a non-terminal status.
    async fn has_incomplete(&self, workflow_name: &str) -> Result<bool>;
}

/// Monotonic sequence per key, backed by the persistence layer. Keys are
/// formatted per workflow so ids are ordered within a workflow name.
#[async_trait]
pub trait SeqCounter: Send + Sync {
    async fn next_seq(&self, key: &str) -> Result<i64>;
}

/// Counter key for a workflow's task ids.
#[must_use]
pub fn task_seq_key(workflow_name: &str) -> String {
    format!("workflow-task:{workflow_name}")
}
