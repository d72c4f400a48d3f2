//! User-editable workflow definitions.
//!
//! A workflow is an ordered list of stages; each stage carries jobs that run
//! sequentially or in parallel and may sit behind an approval gate. Job specs
//! arrive as an untyped yaml envelope next to their declared `type` and are
//! decoded into [`JobSpec`] exactly once, at task materialization.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Workflow definition as stored and edited.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub key_vals: Vec<KeyVal>,
    #[serde(default)]
    pub stages: Vec<WorkflowStage>,
    #[serde(default)]
    pub multi_run: bool,
    #[serde(default)]
    pub hooks: Vec<WorkflowHook>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowStage {
    pub name: String,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<Approval>,
    #[serde(default)]
    pub jobs: Vec<Job>,
}

/// Manual gate in front of a stage. Runtime decisions are recorded on the
/// `approve_users` entries, so a persisted task carries the full audit trail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Approval {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub approve_users: Vec<ApprovalUser>,
    /// Minutes until the gate times out.
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub needed_approvers: usize,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalUser {
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<ApprovalDecisionKind>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub operation_time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecisionKind {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    /// Webhook-triggered runs may skip individual jobs.
    #[serde(default)]
    pub skipped: bool,
    /// Raw spec envelope; decoded against `job_type` by [`JobSpec::decode`].
    #[serde(default)]
    pub spec: serde_yaml::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    #[serde(rename = "freestyle")]
    Freestyle,
    #[serde(rename = "zadig-build")]
    Build,
    #[serde(rename = "zadig-deploy")]
    Deploy,
    #[serde(rename = "zadig-helm-deploy")]
    HelmDeploy,
    #[serde(rename = "plugin")]
    Plugin,
    #[serde(rename = "custom-deploy")]
    CustomDeploy,
}

impl JobType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Freestyle => "freestyle",
            JobType::Build => "zadig-build",
            JobType::Deploy => "zadig-deploy",
            JobType::HelmDeploy => "zadig-helm-deploy",
            JobType::Plugin => "plugin",
            JobType::CustomDeploy => "custom-deploy",
        }
    }
}

/// Decoded job spec, keyed by the job's declared type.
#[derive(Debug, Clone)]
pub enum JobSpec {
    Freestyle(FreestyleJobSpec),
    Build(BuildJobSpec),
    Deploy(DeployJobSpec),
    HelmDeploy(HelmDeployJobSpec),
    Plugin(PluginJobSpec),
    CustomDeploy(CustomDeployJobSpec),
}

impl JobSpec {
    /// Decode the raw envelope of `job` into the variant its `type` declares.
    /// A spec that does not deserialize as its declared variant is a
    /// validation error; there is no fallback.
    pub fn decode(job: &Job) -> Result<JobSpec> {
        fn de<T: serde::de::DeserializeOwned>(job: &Job) -> Result<T> {
            serde_yaml::from_value(job.spec.clone()).map_err(|err| {
                Error::Validation(format!(
                    "job {} spec does not match type {}: {err}",
                    job.name,
                    job.job_type.as_str()
                ))
            })
        }
        Ok(match job.job_type {
            JobType::Freestyle => JobSpec::Freestyle(de(job)?),
            JobType::Build => JobSpec::Build(de(job)?),
            JobType::Deploy => JobSpec::Deploy(de(job)?),
            JobType::HelmDeploy => JobSpec::HelmDeploy(de(job)?),
            JobType::Plugin => JobSpec::Plugin(de(job)?),
            JobType::CustomDeploy => JobSpec::CustomDeploy(de(job)?),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FreestyleJobSpec {
    #[serde(default)]
    pub properties: JobProperties,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub outputs: Vec<Output>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildJobSpec {
    #[serde(default)]
    pub docker_registry_id: String,
    #[serde(default)]
    pub service_and_builds: Vec<ServiceAndBuild>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceAndBuild {
    pub service_name: String,
    #[serde(default)]
    pub service_module: String,
    #[serde(default)]
    pub build_name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub key_vals: Vec<KeyVal>,
    #[serde(default)]
    pub repos: Vec<Repository>,
    #[serde(default)]
    pub properties: JobProperties,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub outputs: Vec<Output>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployJobSpec {
    pub env: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub skip_check_run_status: bool,
    #[serde(default)]
    pub service_and_images: Vec<ServiceAndImage>,
    /// Minutes to wait for the rollout when run status is checked.
    #[serde(default)]
    pub timeout: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceAndImage {
    pub service_name: String,
    #[serde(default)]
    pub service_module: String,
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HelmDeployJobSpec {
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
pub struct PluginJobSpec {
    #[serde(default)]
    pub properties: JobProperties,
    #[serde(default)]
    pub plugin: PluginTemplate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginTemplate {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub envs: Vec<KeyVal>,
    #[serde(default)]
    pub outputs: Vec<Output>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomDeployJobSpec {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub docker_registry_id: String,
    #[serde(default)]
    pub skip_check_run_status: bool,
    /// Minutes to wait for the rollout when run status is checked.
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub targets: Vec<DeployTargetArg>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployTargetArg {
    /// `workload_type/workload_name/container_name`.
    pub target: String,
    #[serde(default)]
    pub image: String,
}

/// Execution knobs shared by every containerized job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobProperties {
    /// Seconds the wait phase is allowed to run; non-positive falls back to
    /// the default at prepare time.
    #[serde(default)]
    pub timeout: i64,
    #[serde(default)]
    pub retry: i64,
    #[serde(default, rename = "res_req")]
    pub resource_request: ResourceRequest,
    #[serde(default, rename = "res_req_spec")]
    pub res_req_spec: ResourceRequestSpec,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub build_os: String,
    #[serde(default)]
    pub image_from: String,
    #[serde(default)]
    pub image_id: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub envs: Vec<KeyVal>,
    /// User-declared variables, echoed in the task detail view.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_envs: Vec<KeyVal>,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default, skip_serializing)]
    pub paths: String,
    #[serde(default)]
    pub log_file_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub docker_host: String,
    #[serde(default)]
    pub registries: Vec<RegistryNamespace>,
    #[serde(default)]
    pub cache_enable: bool,
    #[serde(default)]
    pub cache_dir_type: String,
    #[serde(default)]
    pub cache_user_dir: String,
}

/// Coarse resource tier for the executor pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceRequest {
    /// Nothing chosen in the UI; prepare substitutes `Min`.
    #[default]
    #[serde(rename = "")]
    Unspecified,
    Min,
    Low,
    Medium,
    High,
    /// Use the accompanying [`ResourceRequestSpec`].
    Define,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResourceRequestSpec {
    #[serde(default)]
    pub cpu_limit: i64,
    #[serde(default)]
    pub memory_limit: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyVal {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub is_credential: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub params_type: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub is_credential: bool,
}

/// One executor step. Step semantics live with the executor and the step
/// collaborator; the orchestrator carries them verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(default)]
    pub timeout: i64,
    #[serde(rename = "type", default)]
    pub step_type: String,
    #[serde(default)]
    pub spec: serde_yaml::Value,
}

pub const STEP_TYPE_GIT: &str = "git";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Output {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Repository {
    #[serde(default)]
    pub source: String,
    pub repo_owner: String,
    pub repo_name: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub remote_name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub checkout_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryNamespace {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub reg_addr: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowHook {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub auto_cancel: bool,
    #[serde(default)]
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_spec_decodes_declared_variant() {
        let yaml = r"
name: build
type: freestyle
spec:
  properties:
    timeout: 120
    cluster_id: local
  outputs:
    - name: VERSION
";
        let job: Job = serde_yaml::from_str(yaml).unwrap();
        match JobSpec::decode(&job).unwrap() {
            JobSpec::Freestyle(spec) => {
                assert_eq!(spec.properties.timeout, 120);
                assert_eq!(spec.outputs[0].name, "VERSION");
            }
            other => panic!("decoded wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_job_type_is_rejected_at_parse() {
        let yaml = r"
name: x
type: mystery
spec: {}
";
        assert!(serde_yaml::from_str::<Job>(yaml).is_err());
    }

    #[test]
    fn mismatched_spec_is_a_validation_error() {
        let yaml = r"
name: deploy
type: zadig-deploy
spec:
  service_and_images: not-a-list
";
        let job: Job = serde_yaml::from_str(yaml).unwrap();
        assert!(JobSpec::decode(&job).is_err());
    }
}
