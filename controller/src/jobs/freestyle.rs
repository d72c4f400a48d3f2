//! Controller for freestyle and build jobs, the executable job path.
//!
//! Serial phases: prepare → run → wait → complete. The first failing phase
//! terminates the job and later phases are skipped, except `complete`, whose
//! cleanup branch always runs once resources may exist.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::cluster::{is_local_cluster, ATTACHED_CLUSTER_NAMESPACE, LOCAL_CLUSTER_ID};
use crate::config::DEFAULT_JOB_TIMEOUT_SECS;
use crate::dockerhost::qualify_dind_host;
use crate::error::Result;
use crate::jobs::{
    now_unix, resource_spec, schedule_cleanup, wait_for_workload, JobEnv, WaitOutcome,
};
use crate::logstore::JobLogEntry;
use crate::model::{
    JobTask, JobTaskFreestyleSpec, JobTaskSpec, ResourceRequest, Status, TaskContext,
};
use crate::vars::output_key;
use crate::workload::backend::{WorkloadBackend, WorkloadSpec};
use crate::workload::context::JobContext;
use crate::workload::labels::{workload_name, JobLabel};

pub struct FreestyleJobCtl {
    job: JobTask,
    spec: JobTaskFreestyleSpec,
    ctx: Arc<TaskContext>,
    env: Arc<JobEnv>,
    cancel: CancellationToken,
    workload: String,
    backend: Option<Arc<dyn WorkloadBackend>>,
}

impl FreestyleJobCtl {
    pub fn new(
        job: JobTask,
        ctx: Arc<TaskContext>,
        env: Arc<JobEnv>,
        cancel: CancellationToken,
    ) -> Self {
        let spec = match &job.spec {
            JobTaskSpec::Freestyle(spec) => spec.clone(),
            _ => JobTaskFreestyleSpec::default(),
        };
        let workload = workload_name(&ctx.workflow_name, ctx.task_id, &job.name);
        Self { job, spec, ctx, env, cancel, workload, backend: None }
    }

    #[instrument(skip(self), fields(job = %self.job.name, task_id = self.ctx.task_id))]
    pub async fn run(mut self) -> JobTask {
        self.job.status = Status::Running;
        self.job.start_time = now_unix();

        if self.prepare().await.is_ok() && self.launch().await.is_ok() {
            self.wait().await;
        }
        self.complete().await;

        if !self.job.status.is_terminal() {
            self.job.status = Status::Failed;
        }
        if self.job.end_time == 0 {
            self.job.end_time = now_unix();
        }
        // carry the effective spec (defaults, namespace, docker host) back
        // into the persisted job
        self.job.spec = JobTaskSpec::Freestyle(self.spec.clone());
        self.job
    }

    fn fail(&mut self, message: impl Into<String>) {
        self.job.status = Status::Failed;
        self.job.error = message.into();
        self.job.end_time = now_unix();
    }

    async fn prepare(&mut self) -> Result<(), ()> {
        let props = &mut self.spec.properties;
        if props.timeout <= 0 {
            props.timeout = DEFAULT_JOB_TIMEOUT_SECS;
        }
        if props.resource_request == ResourceRequest::Unspecified {
            props.resource_request = ResourceRequest::Min;
        }
        if props.cluster_id.is_empty() {
            props.cluster_id = LOCAL_CLUSTER_ID.to_string();
        }

        let mut paths = std::mem::take(&mut self.spec.properties.paths);
        let result = self
            .env
            .steps
            .prepare(&self.ctx, &mut paths, &mut self.spec.steps)
            .await;
        self.spec.properties.paths = paths;
        if let Err(err) = result {
            warn!(job = %self.job.name, "step preparation failed: {err}");
            self.fail(err.to_string());
            return Err(());
        }
        Ok(())
    }

    async fn launch(&mut self) -> Result<(), ()> {
        let cluster_id = self.spec.properties.cluster_id.clone();
        let backend = match self.env.backends.backend(&cluster_id).await {
            Ok(backend) => backend,
            Err(err) => {
                self.fail(err.to_string());
                return Err(());
            }
        };
        self.backend = Some(backend.clone());

        let local = is_local_cluster(&cluster_id);
        let namespace = if local {
            self.env.config.namespace.clone()
        } else {
            ATTACHED_CLUSTER_NAMESPACE.to_string()
        };
        self.spec.properties.namespace = namespace.clone();

        // qualify the DinD endpoint for the namespace the executor runs in
        match self
            .env
            .docker_hosts
            .best_host(&cluster_id, &self.spec.properties.docker_host)
            .await
        {
            Ok(host) => {
                self.spec.properties.docker_host =
                    qualify_dind_host(&host, &self.env.config.namespace, &namespace);
            }
            Err(err) => {
                warn!(job = %self.job.name, "no docker host for cluster {cluster_id}: {err}");
            }
        }

        let payload = match JobContext::build(&self.job, &self.spec, &self.ctx).to_yaml() {
            Ok(payload) => payload,
            Err(err) => {
                self.fail(format!("cannot serialize executor context: {err}"));
                return Err(());
            }
        };

        let label = self.label();
        if let Err(err) = backend.delete_config_maps(&namespace, &label).await {
            self.fail(err.to_string());
            return Err(());
        }
        if let Err(err) = backend
            .create_config_map(&namespace, &self.workload, &label, &payload)
            .await
        {
            self.fail(format!("create configmap: {err}"));
            return Err(());
        }
        info!(job = %self.job.name, configmap = %self.workload, "created executor configmap");

        if let Err(err) = backend.delete_workloads(&namespace, &label).await {
            self.fail(format!("delete stale workload: {err}"));
            return Err(());
        }

        let props = &self.spec.properties;
        let spec = WorkloadSpec {
            namespace: namespace.clone(),
            name: self.workload.clone(),
            labels: label.labels(),
            image: self
                .env
                .config
                .executor_image(&props.build_os, &props.image_from, &props.image_id),
            config_map: Some(self.workload.clone()),
            envs: Vec::new(),
            args: Vec::new(),
            resources: resource_spec(props.resource_request, props.res_req_spec),
        };
        if let Err(err) = backend.create_workload(&spec).await {
            self.fail(format!("create workload: {err}"));
            return Err(());
        }
        info!(job = %self.job.name, workload = %self.workload, %namespace, "launched workload");
        Ok(())
    }

    async fn wait(&mut self) {
        let Some(backend) = self.backend.clone() else { return };
        let WaitOutcome { status, reason } = wait_for_workload(
            backend.as_ref(),
            &self.spec.properties.namespace,
            &self.label(),
            self.spec.properties.timeout,
            Duration::from_secs(self.env.config.poll_interval_secs),
            true,
            &self.cancel,
        )
        .await;
        self.job.status = status;
        if let Some(reason) = reason {
            if self.job.error.is_empty() {
                self.job.error = reason;
            }
        }
        self.job.end_time = now_unix();
    }

    /// Collect outputs and logs, let steps post-process, then hand the
    /// workload and configmap to deferred deletion. Runs for every job that
    /// got far enough to own cluster resources, whatever its outcome.
    async fn complete(&mut self) {
        let Some(backend) = self.backend.clone() else { return };
        let namespace = self.spec.properties.namespace.clone();
        let label = self.label();

        let declared: Vec<String> = self.job.outputs.iter().map(|o| o.name.clone()).collect();
        match backend.job_outputs(&namespace, &label, &declared).await {
            Ok(outputs) => {
                for output in outputs {
                    self.ctx
                        .vars
                        .set(output_key(&self.job.name, &output.name), output.value);
                }
            }
            Err(err) => {
                warn!(job = %self.job.name, "output collection failed: {err}");
                if self.job.error.is_empty() {
                    self.job.error = err.to_string();
                }
            }
        }

        match backend.container_logs(&namespace, &label).await {
            Ok(content) => {
                let entry = JobLogEntry {
                    cluster_id: self.spec.properties.cluster_id.clone(),
                    workflow_name: self.ctx.workflow_name.clone(),
                    job_name: self.job.name.clone(),
                    task_id: self.ctx.task_id,
                    content,
                };
                if let Err(err) = self.env.logs.save(entry).await {
                    warn!(job = %self.job.name, "log shipping failed: {err}");
                }
            }
            Err(err) => warn!(job = %self.job.name, "log collection failed: {err}"),
        }

        if let Err(err) = self
            .env
            .steps
            .summarize(&self.ctx, &self.spec.properties.paths, &self.spec.steps)
            .await
        {
            warn!(job = %self.job.name, "step summarization failed: {err}");
            if self.job.error.is_empty() {
                self.job.error = err.to_string();
            }
        }

        schedule_cleanup(backend, namespace, label);
    }

    fn label(&self) -> JobLabel {
        JobLabel {
            workflow_name: self.ctx.workflow_name.clone(),
            task_id: self.ctx.task_id,
            job_type: self.job.job_type,
            job_name: self.job.name.clone(),
        }
    }
}
