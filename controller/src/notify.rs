//! SCM / webhook notification contract. Invoked best-effort around task
//! creation and settlement; failures are logged and never propagate.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::WorkflowTask;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Called after a task is persisted with status `Created`.
    async fn task_created(&self, task: &WorkflowTask) -> Result<()>;
    /// Called after a task reaches a terminal status.
    async fn task_finished(&self, task: &WorkflowTask) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn task_created(&self, _task: &WorkflowTask) -> Result<()> {
        Ok(())
    }
    async fn task_finished(&self, _task: &WorkflowTask) -> Result<()> {
        Ok(())
    }
}
