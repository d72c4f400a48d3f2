//! Runtime task documents: the immutable, numbered materialization of a
//! workflow plus the per-stage and per-job state the controllers mutate.

use serde::{Deserialize, Serialize};

use crate::model::status::Status;
use crate::model::workflow::{
    Approval, DeployTargetArg, JobProperties, JobType, KeyVal, Output, Param, PluginTemplate,
    ServiceAndImage, Step, Workflow,
};
use crate::vars::VariableContext;

/// One execution of a workflow, identified by `(workflow_name, task_id)`.
/// Created by the materializer, mutated only by its owning supervisor,
/// frozen once the status turns terminal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub task_id: i64,
    pub workflow_name: String,
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub task_creator: String,
    #[serde(default)]
    pub task_revoker: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub create_time: i64,
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub end_time: i64,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub key_vals: Vec<KeyVal>,
    #[serde(default)]
    pub multi_run: bool,
    #[serde(default)]
    pub stages: Vec<StageTask>,
    /// The rendered workflow the task was built from.
    pub workflow_args: Workflow,
    /// Snapshot taken before any rendering; never mutated, feeds clone-and-rerun.
    pub origin_workflow_args: Workflow,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub is_restart: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageTask {
    pub name: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub end_time: i64,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<Approval>,
    #[serde(default)]
    pub jobs: Vec<JobTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTask {
    pub name: String,
    pub job_type: JobType,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub end_time: i64,
    #[serde(default)]
    pub error: String,
    pub spec: JobTaskSpec,
    #[serde(default)]
    pub outputs: Vec<Output>,
}

/// Runtime job spec. Freestyle and build jobs share the executable variant;
/// the others carry their own deployment parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobTaskSpec {
    Freestyle(JobTaskFreestyleSpec),
    Plugin(JobTaskPluginSpec),
    Deploy(JobTaskDeploySpec),
    HelmDeploy(JobTaskHelmDeploySpec),
    CustomDeploy(JobTaskCustomDeploySpec),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobTaskFreestyleSpec {
    #[serde(default)]
    pub properties: JobProperties,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobTaskPluginSpec {
    #[serde(default)]
    pub properties: JobProperties,
    #[serde(default)]
    pub plugin: PluginTemplate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobTaskDeploySpec {
    pub env: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub skip_check_run_status: bool,
    #[serde(default)]
    pub service_and_images: Vec<ServiceAndImage>,
    #[serde(default)]
    pub timeout: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobTaskHelmDeploySpec {
    pub env: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub skip_check_run_status: bool,
    pub service_name: String,
    #[serde(default)]
    pub release_name: String,
    #[serde(default)]
    pub image_and_modules: Vec<ServiceAndImage>,
    #[serde(default)]
    pub timeout: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobTaskCustomDeploySpec {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub skip_check_run_status: bool,
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub targets: Vec<DeployTargetArg>,
}

/// Per-task runtime handed to stage and job controllers. Cheap to clone;
/// the variable context inside is shared.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub workflow_name: String,
    pub project_name: String,
    pub task_id: i64,
    pub creator: String,
    pub workspace: String,
    pub vars: VariableContext,
}

impl WorkflowTask {
    /// Concatenated errors of failed stages, declaration order.
    #[must_use]
    pub fn collect_error(&self) -> String {
        let mut parts = Vec::new();
        for stage in &self.stages {
            for job in &stage.jobs {
                if !job.error.is_empty() {
                    parts.push(format!("job {}: {}", job.name, job.error.trim()));
                }
            }
        }
        parts.join("; ")
    }
}
