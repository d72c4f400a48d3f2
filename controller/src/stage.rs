//! Stage scheduling.
//!
//! Stages run strictly in declaration order; the runner owns one stage at a
//! time, gates it on approval when asked, fans its jobs out sequentially or
//! in parallel, and settles the stage by aggregating job statuses. The task
//! document is persisted at every stage transition and whenever a job
//! settles, so the stored task always trails the truth by at most one write.

use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::approval::{wait_for_decisions, ApprovalHub, ApprovalKey};
use crate::jobs::{now_unix, run_job, JobEnv};
use crate::model::{StageTask, Status, TaskContext, WorkflowTask};
use crate::store::TaskStore;

pub struct StageRunner {
    pub ctx: Arc<TaskContext>,
    pub env: Arc<JobEnv>,
    pub approvals: Arc<ApprovalHub>,
    pub tasks: Arc<dyn TaskStore>,
    pub cancel: CancellationToken,
}

impl StageRunner {
    /// Drive the stage at `idx` to a terminal status.
    #[instrument(skip(self, task), fields(stage = %task.stages[idx].name, task_id = task.task_id))]
    pub async fn run(&self, task: &mut WorkflowTask, idx: usize) {
        if let Some(approval) = task.stages[idx].approval.clone().filter(|a| a.enabled) {
            let key = ApprovalKey {
                workflow_name: self.ctx.workflow_name.clone(),
                task_id: self.ctx.task_id,
                stage_name: task.stages[idx].name.clone(),
            };
            // open the gate before the waiting state becomes visible
            let rx = self.approvals.register(key.clone());
            task.stages[idx].status = Status::WaitingApproval;
            self.persist(task).await;

            let verdict =
                wait_for_decisions(&self.approvals, key, rx, approval, &self.cancel).await;
            task.stages[idx].approval = Some(verdict.approval);

            if verdict.status != Status::Running {
                let stage = &mut task.stages[idx];
                stage.status = verdict.status;
                let now = now_unix();
                stage.start_time = now;
                stage.end_time = now;
                info!(status = %stage.status, "stage settled at the approval gate");
                self.persist(task).await;
                return;
            }
        }

        {
            let stage = &mut task.stages[idx];
            stage.status = Status::Running;
            stage.start_time = now_unix();
        }
        self.persist(task).await;

        if task.stages[idx].parallel {
            self.run_parallel(task, idx).await;
        } else {
            self.run_sequential(task, idx).await;
        }

        let stage = &mut task.stages[idx];
        stage.status = Status::aggregate(stage.jobs.iter().map(|j| j.status));
        stage.end_time = now_unix();
        info!(status = %stage.status, "stage settled");
        self.persist(task).await;
    }

    /// Jobs in declaration order; a non-passed job short-circuits the rest.
    async fn run_sequential(&self, task: &mut WorkflowTask, idx: usize) {
        let count = task.stages[idx].jobs.len();
        for j in 0..count {
            if self.cancel.is_cancelled() {
                mark_job_cancelled(&mut task.stages[idx].jobs[j]);
                continue;
            }
            let earlier_failed = task.stages[idx].jobs[..j]
                .iter()
                .any(|job| job.status.is_terminal() && job.status != Status::Passed);
            if earlier_failed {
                break;
            }

            task.stages[idx].jobs[j].status = Status::Queued;
            self.persist(task).await;

            let job = task.stages[idx].jobs[j].clone();
            let settled = run_job(
                job,
                self.ctx.clone(),
                self.env.clone(),
                self.cancel.child_token(),
            )
            .await;
            task.stages[idx].jobs[j] = settled;
            self.persist(task).await;
        }
    }

    /// All jobs at once; the stage settles only after every job reached a
    /// terminal status. No ordering among the jobs is implied.
    async fn run_parallel(&self, task: &mut WorkflowTask, idx: usize) {
        let mut join = JoinSet::new();
        let count = task.stages[idx].jobs.len();
        for j in 0..count {
            if self.cancel.is_cancelled() {
                mark_job_cancelled(&mut task.stages[idx].jobs[j]);
                continue;
            }
            task.stages[idx].jobs[j].status = Status::Queued;
            let job = task.stages[idx].jobs[j].clone();
            let ctx = self.ctx.clone();
            let env = self.env.clone();
            let cancel = self.cancel.child_token();
            join.spawn(async move { (j, run_job(job, ctx, env, cancel).await) });
        }
        self.persist(task).await;

        while let Some(joined) = join.join_next().await {
            match joined {
                Ok((j, settled)) => {
                    task.stages[idx].jobs[j] = settled;
                    self.persist(task).await;
                }
                Err(err) => {
                    error!(stage = %task.stages[idx].name, "job task panicked: {err}");
                }
            }
        }
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

/// Mark a stage the scheduler will never run (cancellation arrived first).
pub fn mark_stage_cancelled(stage: &mut StageTask) {
    if stage.status.is_terminal() {
        return;
    }
    stage.status = Status::Cancelled;
    let now = now_unix();
    if stage.start_time == 0 {
        stage.start_time = now;
    }
    stage.end_time = now;
    for job in &mut stage.jobs {
        mark_job_cancelled(job);
    }
}

fn mark_job_cancelled(job: &mut crate::model::JobTask) {
    if job.status.is_terminal() {
        return;
    }
    job.status = Status::Cancelled;
    job.end_time = now_unix();
}
