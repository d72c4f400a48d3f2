//! Controller for plugin jobs.
//!
//! A plugin brings its own image and argument list, so no executor document
//! or configmap is involved: env goes straight onto the container and the
//! wait phase settles on pod termination instead of the sentinel file.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::cluster::{is_local_cluster, ATTACHED_CLUSTER_NAMESPACE, LOCAL_CLUSTER_ID};
use crate::config::DEFAULT_JOB_TIMEOUT_SECS;
use crate::jobs::{
    now_unix, resource_spec, schedule_cleanup, wait_for_workload, JobEnv, WaitOutcome,
};
use crate::logstore::JobLogEntry;
use crate::model::{JobTask, JobTaskPluginSpec, JobTaskSpec, Status, TaskContext};
use crate::render::resolve_output_refs;
use crate::vars::output_key;
use crate::workload::backend::{WorkloadBackend, WorkloadSpec};
use crate::workload::labels::{workload_name, JobLabel};

pub struct PluginJobCtl {
    job: JobTask,
    spec: JobTaskPluginSpec,
    ctx: Arc<TaskContext>,
    env: Arc<JobEnv>,
    cancel: CancellationToken,
    workload: String,
    backend: Option<Arc<dyn WorkloadBackend>>,
}

impl PluginJobCtl {
    pub fn new(
        job: JobTask,
        ctx: Arc<TaskContext>,
        env: Arc<JobEnv>,
        cancel: CancellationToken,
    ) -> Self {
        let spec = match &job.spec {
            JobTaskSpec::Plugin(spec) => spec.clone(),
            _ => JobTaskPluginSpec::default(),
        };
        let workload = workload_name(&ctx.workflow_name, ctx.task_id, &job.name);
        Self { job, spec, ctx, env, cancel, workload, backend: None }
    }

    #[instrument(skip(self), fields(job = %self.job.name, task_id = self.ctx.task_id))]
    pub async fn run(mut self) -> JobTask {
        self.job.status = Status::Running;
        self.job.start_time = now_unix();

        if self.launch().await.is_ok() {
            self.wait().await;
        }
        self.complete().await;

        if !self.job.status.is_terminal() {
            self.job.status = Status::Failed;
        }
        if self.job.end_time == 0 {
            self.job.end_time = now_unix();
        }
        self.job.spec = JobTaskSpec::Plugin(self.spec.clone());
        self.job
    }

    fn fail(&mut self, message: impl Into<String>) {
        self.job.status = Status::Failed;
        self.job.error = message.into();
        self.job.end_time = now_unix();
    }

    async fn launch(&mut self) -> Result<(), ()> {
        let props = &mut self.spec.properties;
        if props.timeout <= 0 {
            props.timeout = DEFAULT_JOB_TIMEOUT_SECS;
        }
        if props.cluster_id.is_empty() {
            props.cluster_id = LOCAL_CLUSTER_ID.to_string();
        }
        let cluster_id = props.cluster_id.clone();

        let backend = match self.env.backends.backend(&cluster_id).await {
            Ok(backend) => backend,
            Err(err) => {
                self.fail(err.to_string());
                return Err(());
            }
        };
        self.backend = Some(backend.clone());

        let namespace = if is_local_cluster(&cluster_id) {
            self.env.config.namespace.clone()
        } else {
            ATTACHED_CLUSTER_NAMESPACE.to_string()
        };
        self.spec.properties.namespace = namespace.clone();

        let envs: Vec<(String, String)> = self
            .spec
            .plugin
            .envs
            .iter()
            .map(|kv| (kv.key.clone(), resolve_output_refs(&kv.value, &self.ctx.vars)))
            .collect();

        let label = self.label();
        if let Err(err) = backend.delete_workloads(&namespace, &label).await {
            self.fail(format!("delete stale workload: {err}"));
            return Err(());
        }

        let props = &self.spec.properties;
        let spec = WorkloadSpec {
            namespace: namespace.clone(),
            name: self.workload.clone(),
            labels: label.labels(),
            image: self.spec.plugin.image.clone(),
            config_map: None,
            envs,
            args: self.spec.plugin.args.clone(),
            resources: resource_spec(props.resource_request, props.res_req_spec),
        };
        if let Err(err) = backend.create_workload(&spec).await {
            self.fail(format!("create workload: {err}"));
            return Err(());
        }
        info!(job = %self.job.name, workload = %self.workload, "launched plugin workload");
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
            false,
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
            Err(err) => warn!(job = %self.job.name, "output collection failed: {err}"),
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
