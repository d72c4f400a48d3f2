//! Per-task supervision.
//!
//! The [`TaskManager`] owns every running task in the process: it spawns a
//! supervisor per task, tracks its cancellation token, routes approvals, and
//! records who revoked what. The supervisor drives the stage runner across
//! the task, rolls stage statuses up into the task status, and persists and
//! notifies on the way out. Each task is owned by exactly one supervisor for
//! its whole run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::approval::{ApprovalDecision, ApprovalHub, ApprovalKey};
use crate::error::{Error, Result};
use crate::jobs::{now_unix, JobEnv};
use crate::model::{Status, TaskContext, WorkflowTask};
use crate::notify::Notifier;
use crate::stage::{mark_stage_cancelled, StageRunner};
use crate::store::TaskStore;
use crate::vars::VariableContext;

/// Stage approval as submitted by the REST surface.
#[derive(Debug, Clone)]
pub struct StageApprovalRequest {
    pub workflow_name: String,
    pub task_id: i64,
    pub stage_name: String,
    pub user_id: String,
    pub user_name: String,
    pub approve: bool,
    pub comment: String,
}

struct RunningTask {
    cancel: CancellationToken,
    revoker: Arc<Mutex<String>>,
}

pub struct TaskManager {
    tasks: Arc<dyn TaskStore>,
    env: Arc<JobEnv>,
    approvals: Arc<ApprovalHub>,
    notifier: Arc<dyn Notifier>,
    running: Mutex<HashMap<(String, i64), RunningTask>>,
}

impl TaskManager {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        env: Arc<JobEnv>,
        approvals: Arc<ApprovalHub>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { tasks, env, approvals, notifier, running: Mutex::new(HashMap::new()) }
    }

    #[must_use]
    pub fn approvals(&self) -> Arc<ApprovalHub> {
        self.approvals.clone()
    }

    /// Take ownership of a created task and drive it to a terminal status.
    /// The returned handle yields the settled task document.
    pub fn start_task(self: &Arc<Self>, task: WorkflowTask) -> JoinHandle<WorkflowTask> {
        let key = (task.workflow_name.clone(), task.task_id);
        let cancel = CancellationToken::new();
        let revoker = Arc::new(Mutex::new(String::new()));
        self.running.lock().expect("task registry poisoned").insert(
            key.clone(),
            RunningTask { cancel: cancel.clone(), revoker: revoker.clone() },
        );

        let manager = self.clone();
        tokio::spawn(async move {
            let settled = manager.run_task(task, cancel, revoker).await;
            manager.running.lock().expect("task registry poisoned").remove(&key);
            settled
        })
    }

    /// Cancel a running task on behalf of `user`. In-flight jobs observe the
    /// cancellation promptly and still clean up their cluster resources.
    pub fn cancel_task(&self, workflow_name: &str, task_id: i64, user: &str) -> Result<()> {
        let running = self.running.lock().expect("task registry poisoned");
        let Some(entry) = running.get(&(workflow_name.to_string(), task_id)) else {
            return Err(Error::FindTask {
                workflow_name: workflow_name.to_string(),
                task_id,
            });
        };
        *entry.revoker.lock().expect("revoker poisoned") = user.to_string();
        entry.cancel.cancel();
        info!(workflow = workflow_name, task_id, user, "task cancellation requested");
        Ok(())
    }

    /// Route an approve/reject decision to the stage waiting on it.
    pub fn approve_stage(&self, request: &StageApprovalRequest) -> Result<()> {
        if request.workflow_name.is_empty()
            || request.stage_name.is_empty()
            || request.task_id == 0
        {
            return Err(Error::Approval(format!(
                "cannot locate approval target: workflow {}, task {}, stage {}",
                request.workflow_name, request.task_id, request.stage_name
            )));
        }
        let key = ApprovalKey {
            workflow_name: request.workflow_name.clone(),
            task_id: request.task_id,
            stage_name: request.stage_name.clone(),
        };
        self.approvals.submit(
            &key,
            ApprovalDecision {
                user_id: request.user_id.clone(),
                user_name: request.user_name.clone(),
                approve: request.approve,
                comment: request.comment.clone(),
            },
        )
    }

    #[instrument(skip(self, task, cancel, revoker), fields(workflow = %task.workflow_name, task_id = task.task_id))]
    async fn run_task(
        &self,
        mut task: WorkflowTask,
        cancel: CancellationToken,
        revoker: Arc<Mutex<String>>,
    ) -> WorkflowTask {
        task.status = Status::Running;
        task.start_time = now_unix();
        self.persist(&task).await;

        let ctx = Arc::new(TaskContext {
            workflow_name: task.workflow_name.clone(),
            project_name: task.project_name.clone(),
            task_id: task.task_id,
            creator: task.task_creator.clone(),
            workspace: self.env.config.workspace.clone(),
            vars: VariableContext::new(),
        });
        let runner = StageRunner {
            ctx,
            env: self.env.clone(),
            approvals: self.approvals.clone(),
            tasks: self.tasks.clone(),
            cancel: cancel.clone(),
        };

        for idx in 0..task.stages.len() {
            if cancel.is_cancelled() {
                mark_stage_cancelled(&mut task.stages[idx]);
                continue;
            }
            runner.run(&mut task, idx).await;
            match task.stages[idx].status {
                Status::Passed => {}
                // let the loop sweep the remaining stages to Cancelled
                Status::Cancelled => {}
                _ => break,
            }
        }

        task.status = Status::aggregate(task.stages.iter().map(|s| s.status));
        if task.status == Status::Cancelled {
            task.task_revoker = revoker.lock().expect("revoker poisoned").clone();
        }
        task.error = task.collect_error();
        task.end_time = now_unix();
        self.persist(&task).await;
        info!(status = %task.status, "task settled");

        if let Err(err) = self.notifier.task_finished(&task).await {
            warn!(workflow = %task.workflow_name, task_id = task.task_id, "notify failed: {err}");
        }
        task
    }

    async fn persist(&self, task: &WorkflowTask) {
        if let Err(err) = self.tasks.update(task).await {
            warn!(
                workflow = %task.workflow_name,
                task_id = task.task_id,
                "persisting task failed: {err}"
            );
        }
    }
}
