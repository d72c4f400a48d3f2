//! Controllers for the deploy job family.
//!
//! Deploy jobs do not launch workloads of their own; they retarget images on
//! workloads that already exist in the destination namespace and optionally
//! wait for the rollout. Helm releases are upgraded through the
//! [`HelmDeployer`] collaborator.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::{Error, Result};
use crate::jobs::{now_unix, JobEnv};
use crate::model::{JobTask, JobTaskSpec, ServiceAndImage, Status, TaskContext};
use crate::render::resolve_output_refs;
use crate::workload::backend::{DeployTarget, WorkloadBackend};

/// Minutes granted to a rollout when the job does not set its own timeout.
const DEFAULT_DEPLOY_TIMEOUT_MINUTES: u64 = 10;

/// Helm release operations, implemented outside the core.
#[async_trait]
pub trait HelmDeployer: Send + Sync {
    async fn upgrade(
        &self,
        cluster_id: &str,
        namespace: &str,
        release_name: &str,
        images: &[ServiceAndImage],
    ) -> Result<()>;
}

/// Placeholder wired in when no helm integration is configured; helm jobs
/// fail fast instead of silently passing.
#[derive(Debug, Default)]
pub struct UnconfiguredHelmDeployer;

#[async_trait]
impl HelmDeployer for UnconfiguredHelmDeployer {
    async fn upgrade(
        &self,
        _cluster_id: &str,
        _namespace: &str,
        release_name: &str,
        _images: &[ServiceAndImage],
    ) -> Result<()> {
        Err(Error::Config(format!("no helm deployer configured (release {release_name})")))
    }
}

pub async fn run_deploy_job(
    job: JobTask,
    ctx: Arc<TaskContext>,
    env: Arc<JobEnv>,
    cancel: CancellationToken,
) -> JobTask {
    match &job.spec {
        JobTaskSpec::Deploy(_) => DeployJobCtl { job, ctx, env, cancel }.run().await,
        JobTaskSpec::CustomDeploy(_) => CustomDeployJobCtl { job, ctx, env, cancel }.run().await,
        JobTaskSpec::HelmDeploy(_) => HelmDeployJobCtl { job, ctx, env, cancel }.run().await,
        _ => job,
    }
}

/// Parse `workload_type/workload_name/container_name`.
fn parse_target(raw: &str) -> Result<DeployTarget> {
    let parts: Vec<&str> = raw.split('/').collect();
    match parts.as_slice() {
        [workload_type, workload_name, container_name]
            if !workload_type.is_empty() && !workload_name.is_empty() =>
        {
            Ok(DeployTarget {
                workload_type: (*workload_type).to_string(),
                workload_name: (*workload_name).to_string(),
                container_name: (*container_name).to_string(),
            })
        }
        _ => Err(Error::Validation(format!("malformed deploy target: {raw}"))),
    }
}

/// Poll the targets until every rollout completes or time runs out.
async fn wait_for_rollout(
    backend: &dyn WorkloadBackend,
    namespace: &str,
    targets: &[DeployTarget],
    timeout_minutes: u64,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> (Status, Option<String>) {
    let minutes =
        if timeout_minutes == 0 { DEFAULT_DEPLOY_TIMEOUT_MINUTES } else { timeout_minutes };
    let deadline = tokio::time::Instant::now() + Duration::from_secs(minutes * 60);

    loop {
        let mut all_ready = true;
        for target in targets {
            match backend.workload_ready(namespace, target).await {
                Ok(true) => {}
                Ok(false) => {
                    all_ready = false;
                    break;
                }
                Err(err) => return (Status::Failed, Some(err.to_string())),
            }
        }
        if all_ready {
            return (Status::Passed, None);
        }

        tokio::select! {
            () = cancel.cancelled() => return (Status::Cancelled, None),
            () = tokio::time::sleep_until(deadline) => return (Status::Timeout, None),
            () = tokio::time::sleep(poll_interval) => {}
        }
    }
}

struct DeployJobCtl {
    job: JobTask,
    ctx: Arc<TaskContext>,
    env: Arc<JobEnv>,
    cancel: CancellationToken,
}

impl DeployJobCtl {
    #[instrument(skip(self), fields(job = %self.job.name, task_id = self.ctx.task_id))]
    async fn run(mut self) -> JobTask {
        self.job.status = Status::Running;
        self.job.start_time = now_unix();

        let JobTaskSpec::Deploy(spec) = self.job.spec.clone() else {
            return self.job;
        };
        let namespace = if spec.namespace.is_empty() { spec.env.clone() } else { spec.namespace };

        let (status, error) = async {
            let backend = self.env.backends.backend(&spec.cluster_id).await?;
            let mut targets = Vec::new();
            for svc in &spec.service_and_images {
                let target = DeployTarget {
                    workload_type: "deployment".to_string(),
                    workload_name: svc.service_name.clone(),
                    container_name: svc.service_module.clone(),
                };
                let image = resolve_output_refs(&svc.image, &self.ctx.vars);
                backend.set_workload_image(&namespace, &target, &image).await?;
                info!(job = %self.job.name, service = %svc.service_name, %image, "image updated");
                targets.push(target);
            }
            if spec.skip_check_run_status {
                return Ok((Status::Passed, None));
            }
            Ok::<_, Error>(
                wait_for_rollout(
                    backend.as_ref(),
                    &namespace,
                    &targets,
                    spec.timeout,
                    Duration::from_secs(self.env.config.poll_interval_secs),
                    &self.cancel,
                )
                .await,
            )
        }
        .await
        .unwrap_or_else(|err| (Status::Failed, Some(err.to_string())));

        self.settle(status, error);
        self.job
    }

    fn settle(&mut self, status: Status, error: Option<String>) {
        self.job.status = status;
        if let Some(error) = error {
            self.job.error = error;
        }
        self.job.end_time = now_unix();
    }
}

struct CustomDeployJobCtl {
    job: JobTask,
    ctx: Arc<TaskContext>,
    env: Arc<JobEnv>,
    cancel: CancellationToken,
}

impl CustomDeployJobCtl {
    #[instrument(skip(self), fields(job = %self.job.name, task_id = self.ctx.task_id))]
    async fn run(mut self) -> JobTask {
        self.job.status = Status::Running;
        self.job.start_time = now_unix();

        let JobTaskSpec::CustomDeploy(spec) = self.job.spec.clone() else {
            return self.job;
        };

        let (status, error) = async {
            let backend = self.env.backends.backend(&spec.cluster_id).await?;
            let mut targets = Vec::new();
            for arg in &spec.targets {
                let target = parse_target(&arg.target)?;
                let image = resolve_output_refs(&arg.image, &self.ctx.vars);
                backend.set_workload_image(&spec.namespace, &target, &image).await?;
                info!(job = %self.job.name, target = %arg.target, %image, "image updated");
                targets.push(target);
            }
            if spec.skip_check_run_status {
                return Ok((Status::Passed, None));
            }
            Ok::<_, Error>(
                wait_for_rollout(
                    backend.as_ref(),
                    &spec.namespace,
                    &targets,
                    spec.timeout,
                    Duration::from_secs(self.env.config.poll_interval_secs),
                    &self.cancel,
                )
                .await,
            )
        }
        .await
        .unwrap_or_else(|err| (Status::Failed, Some(err.to_string())));

        self.job.status = status;
        if let Some(error) = error {
            self.job.error = error;
        }
        self.job.end_time = now_unix();
        self.job
    }
}

struct HelmDeployJobCtl {
    job: JobTask,
    ctx: Arc<TaskContext>,
    env: Arc<JobEnv>,
    cancel: CancellationToken,
}

impl HelmDeployJobCtl {
    #[instrument(skip(self), fields(job = %self.job.name, task_id = self.ctx.task_id))]
    async fn run(mut self) -> JobTask {
        self.job.status = Status::Running;
        self.job.start_time = now_unix();

        let JobTaskSpec::HelmDeploy(spec) = self.job.spec.clone() else {
            return self.job;
        };
        let namespace = if spec.namespace.is_empty() { spec.env.clone() } else { spec.namespace };
        let release = if spec.release_name.is_empty() {
            spec.service_name.clone()
        } else {
            spec.release_name.clone()
        };
        let images: Vec<ServiceAndImage> = spec
            .image_and_modules
            .iter()
            .map(|entry| ServiceAndImage {
                service_name: entry.service_name.clone(),
                service_module: entry.service_module.clone(),
                image: resolve_output_refs(&entry.image, &self.ctx.vars),
            })
            .collect();

        let helm = self.env.helm.clone();
        let upgrade = helm.upgrade(&spec.cluster_id, &namespace, &release, &images);
        let result = tokio::select! {
            () = self.cancel.cancelled() => {
                self.job.status = Status::Cancelled;
                self.job.end_time = now_unix();
                return self.job;
            }
            result = upgrade => result,
        };

        match result {
            Ok(()) => {
                info!(job = %self.job.name, %release, %namespace, "helm release upgraded");
                self.job.status = Status::Passed;
            }
            Err(err) => {
                warn!(job = %self.job.name, %release, "helm upgrade failed: {err}");
                self.job.status = Status::Failed;
                self.job.error = err.to_string();
            }
        }
        self.job.end_time = now_unix();
        self.job
    }
}
