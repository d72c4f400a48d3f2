//! Per-type job controllers.
//!
//! Every controller owns its [`JobTask`] for the duration of the run and
//! hands it back with status, timestamps, and error filled in. Freestyle and
//! build jobs share the executable-workload controller; plugin jobs run
//! their own image; the deploy family patches images on existing workloads.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::config::OrchestratorConfig;
use crate::dockerhost::DockerHostSelector;
use crate::error::Result;
use crate::logstore::LogStore;
use crate::model::{
    JobTask, JobTaskSpec, ResourceRequest, ResourceRequestSpec, Status, Step, TaskContext,
};
use crate::workload::backend::{SentinelState, WorkloadBackend};
use crate::workload::labels::JobLabel;
use crate::workload::BackendFactory;

pub mod deploy;
pub mod freestyle;
pub mod plugin;

pub use deploy::HelmDeployer;

/// Step preparation and summarization live with the step controller, an
/// external collaborator. `prepare` fills per-step workspace paths before
/// the executor document is built; `summarize` post-processes after the
/// workload settles.
#[async_trait::async_trait]
pub trait StepHandler: Send + Sync {
    async fn prepare(
        &self,
        ctx: &TaskContext,
        paths: &mut String,
        steps: &mut Vec<Step>,
    ) -> Result<()>;

    async fn summarize(&self, ctx: &TaskContext, paths: &str, steps: &[Step]) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct NoopStepHandler;

#[async_trait::async_trait]
impl StepHandler for NoopStepHandler {
    async fn prepare(
        &self,
        _ctx: &TaskContext,
        _paths: &mut String,
        _steps: &mut Vec<Step>,
    ) -> Result<()> {
        Ok(())
    }

    async fn summarize(&self, _ctx: &TaskContext, _paths: &str, _steps: &[Step]) -> Result<()> {
        Ok(())
    }
}

/// Shared collaborators handed to every job controller.
pub struct JobEnv {
    pub config: Arc<OrchestratorConfig>,
    pub backends: Arc<dyn BackendFactory>,
    pub docker_hosts: Arc<dyn DockerHostSelector>,
    pub steps: Arc<dyn StepHandler>,
    pub logs: Arc<dyn LogStore>,
    pub helm: Arc<dyn HelmDeployer>,
}

/// Run one job task to a terminal status.
pub async fn run_job(
    job: JobTask,
    ctx: Arc<TaskContext>,
    env: Arc<JobEnv>,
    cancel: CancellationToken,
) -> JobTask {
    match &job.spec {
        JobTaskSpec::Freestyle(_) => {
            freestyle::FreestyleJobCtl::new(job, ctx, env, cancel).run().await
        }
        JobTaskSpec::Plugin(_) => plugin::PluginJobCtl::new(job, ctx, env, cancel).run().await,
        JobTaskSpec::Deploy(_) | JobTaskSpec::HelmDeploy(_) | JobTaskSpec::CustomDeploy(_) => {
            deploy::run_deploy_job(job, ctx, env, cancel).await
        }
    }
}

pub(crate) fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Outcome of the wait phase.
pub(crate) struct WaitOutcome {
    pub status: Status,
    pub reason: Option<String>,
}

/// Poll the workload until it settles, the timeout elapses, or the task is
/// cancelled. With `require_sentinel` a terminal pod that never produced a
/// sentinel is a failure; without it (plugin images) terminal-and-clean
/// counts as passed.
pub(crate) async fn wait_for_workload(
    backend: &dyn WorkloadBackend,
    namespace: &str,
    label: &JobLabel,
    timeout_secs: i64,
    poll_interval: Duration,
    require_sentinel: bool,
    cancel: &CancellationToken,
) -> WaitOutcome {
    let timeout = u64::try_from(timeout_secs).unwrap_or(0);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout);

    loop {
        let observed = tokio::select! {
            () = cancel.cancelled() => {
                return WaitOutcome { status: Status::Cancelled, reason: None };
            }
            () = tokio::time::sleep_until(deadline) => {
                return WaitOutcome { status: Status::Timeout, reason: None };
            }
            observed = backend.observe(namespace, label) => observed,
        };

        match observed {
            Err(err) => {
                return WaitOutcome { status: Status::Failed, reason: Some(err.to_string()) };
            }
            Ok(observation) if observation.finished => {
                let outcome = match observation.sentinel {
                    Some(SentinelState::Success) => {
                        WaitOutcome { status: Status::Passed, reason: None }
                    }
                    Some(SentinelState::Failure) => WaitOutcome {
                        status: Status::Failed,
                        reason: observation.failure_reason,
                    },
                    None if require_sentinel => WaitOutcome {
                        status: Status::Failed,
                        reason: observation
                            .failure_reason
                            .or_else(|| Some("workload finished without a result".to_string())),
                    },
                    None => match observation.failure_reason {
                        Some(reason) => {
                            WaitOutcome { status: Status::Failed, reason: Some(reason) }
                        }
                        None => WaitOutcome { status: Status::Passed, reason: None },
                    },
                };
                return outcome;
            }
            Ok(_) => {}
        }

        tokio::select! {
            () = cancel.cancelled() => {
                return WaitOutcome { status: Status::Cancelled, reason: None };
            }
            () = tokio::time::sleep_until(deadline) => {
                return WaitOutcome { status: Status::Timeout, reason: None };
            }
            () = tokio::time::sleep(poll_interval) => {}
        }
    }
}

/// Deferred deletion of a job's workload and configmap. Runs off the job's
/// critical path so completion never blocks on cluster API latency;
/// absence of the resources is success.
pub(crate) fn schedule_cleanup(
    backend: Arc<dyn WorkloadBackend>,
    namespace: String,
    label: JobLabel,
) {
    tokio::spawn(async move {
        if let Err(err) = backend.delete_workloads(&namespace, &label).await {
            error!(selector = %label.selector(), "delete workload: {err}");
        }
        if let Err(err) = backend.delete_config_maps(&namespace, &label).await {
            error!(selector = %label.selector(), "delete configmap: {err}");
        }
    });
}

/// Concrete limits for a resource tier.
pub(crate) fn resource_spec(
    request: ResourceRequest,
    custom: ResourceRequestSpec,
) -> ResourceRequestSpec {
    match request {
        ResourceRequest::Define => custom,
        ResourceRequest::Unspecified | ResourceRequest::Min => {
            ResourceRequestSpec { cpu_limit: 100, memory_limit: 512 }
        }
        ResourceRequest::Low => ResourceRequestSpec { cpu_limit: 1000, memory_limit: 2048 },
        ResourceRequest::Medium => ResourceRequestSpec { cpu_limit: 2000, memory_limit: 4096 },
        ResourceRequest::High => ResourceRequestSpec { cpu_limit: 4000, memory_limit: 8192 },
    }
}
