//! Workload backend contract.
//!
//! One backend exists per target cluster and carries every operation the
//! job controllers need: idempotent configmap/workload lifecycle, a single
//! observation step the wait loop polls, output and log collection, and the
//! image patching used by deploy jobs. Splitting observation from the wait
//! loop keeps timeout and cancellation semantics inside the controllers.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::model::ResourceRequestSpec;
use crate::workload::labels::JobLabel;

/// What to launch for one job.
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub image: String,
    /// Name of the configmap to mount as the executor context; `None` for
    /// plugin workloads that run their own image without one.
    pub config_map: Option<String>,
    /// Direct env for workloads that bypass the executor document.
    pub envs: Vec<(String, String)>,
    pub args: Vec<String>,
    pub resources: ResourceRequestSpec,
}

/// One poll of the job's workload.
#[derive(Debug, Clone, Default)]
pub struct WorkloadObservation {
    /// Workload exists and every pod reached a terminal phase.
    pub finished: bool,
    /// Sentinel token read from the pod, when present.
    pub sentinel: Option<SentinelState>,
    /// Failure reason reported by the container/pod status, if any.
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentinelState {
    Success,
    Failure,
}

/// `name: value` pair recovered from the pod termination message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutput {
    pub name: String,
    pub value: String,
}

/// Target of a deploy-style image patch: `workload_type/workload_name/container`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployTarget {
    pub workload_type: String,
    pub workload_name: String,
    pub container_name: String,
}

#[async_trait]
pub trait WorkloadBackend: Send + Sync {
    async fn create_config_map(
        &self,
        namespace: &str,
        name: &str,
        label: &JobLabel,
        payload: &str,
    ) -> Result<()>;

    /// Delete every configmap matching the label set. Absence is success.
    async fn delete_config_maps(&self, namespace: &str, label: &JobLabel) -> Result<()>;

    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<()>;

    /// Delete every workload matching the label set. Absence is success.
    async fn delete_workloads(&self, namespace: &str, label: &JobLabel) -> Result<()>;

    /// Single observation of the job's workload state.
    async fn observe(&self, namespace: &str, label: &JobLabel) -> Result<WorkloadObservation>;

    /// Outputs parsed from the pod termination message, filtered to the
    /// declared names.
    async fn job_outputs(
        &self,
        namespace: &str,
        label: &JobLabel,
        declared: &[String],
    ) -> Result<Vec<JobOutput>>;

    async fn container_logs(&self, namespace: &str, label: &JobLabel) -> Result<String>;

    /// Point a container of an existing workload at a new image.
    async fn set_workload_image(
        &self,
        namespace: &str,
        target: &DeployTarget,
        image: &str,
    ) -> Result<()>;

    /// True once the patched workload's rollout is complete.
    async fn workload_ready(&self, namespace: &str, target: &DeployTarget) -> Result<bool>;
}

/// Produces the backend for a cluster id; the kube implementation resolves
/// clients through the cluster resolver, tests substitute an in-memory one.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn backend(&self, cluster_id: &str) -> Result<Arc<dyn WorkloadBackend>>;
}
