//! Kubernetes implementation of the workload backend.
//!
//! Executor workloads are batch Jobs with `backoffLimit: 0` and a configmap
//! mount carrying the serialized job context. The executor writes its
//! sentinel file before releasing the container, so the observation step can
//! read it with an exec while the pod is still running; a pod that reaches a
//! terminal phase without an observed sentinel counts as infra-killed.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::api::{AttachParams, DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams};
use kube::Api;
use serde_json::json;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::cluster::ClusterResolver;
use crate::error::{Error, Result};
use crate::workload::backend::{
    BackendFactory, DeployTarget, JobOutput, SentinelState, WorkloadBackend, WorkloadObservation,
    WorkloadSpec,
};
use crate::workload::context::CONFIG_MAP_KEY;
use crate::workload::labels::JobLabel;

/// Pod path the executor writes its completion token to.
pub const SENTINEL_FILE: &str = "/var/run/executor/result";
pub const SENTINEL_SUCCESS: &str = "success";
pub const SENTINEL_FAILURE: &str = "failure";

/// Mount point of the job context configmap inside the executor container.
pub const CONFIG_MOUNT_PATH: &str = "/etc/executor";

const EXECUTOR_CONTAINER: &str = "executor";

pub struct KubeBackend {
    cluster_id: String,
    client: kube::Client,
}

impl KubeBackend {
    #[must_use]
    pub fn new(cluster_id: impl Into<String>, client: kube::Client) -> Self {
        Self { cluster_id: cluster_id.into(), client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn first_pod(&self, namespace: &str, label: &JobLabel) -> Result<Option<Pod>> {
        let pods = self
            .pods(namespace)
            .list(&ListParams::default().labels(&label.selector()))
            .await?;
        Ok(pods.items.into_iter().next())
    }

    /// Read the sentinel file out of a running pod. Any exec hiccup (file
    /// not written yet, container just exited) reads as "no sentinel".
    async fn read_sentinel(&self, namespace: &str, pod_name: &str) -> Option<SentinelState> {
        let attach = AttachParams::default().stdout(true).stderr(false);
        let mut proc = match self
            .pods(namespace)
            .exec(pod_name, ["cat", SENTINEL_FILE], &attach)
            .await
        {
            Ok(proc) => proc,
            Err(err) => {
                debug!(pod = pod_name, "sentinel exec unavailable: {err}");
                return None;
            }
        };
        let mut buf = String::new();
        if let Some(mut stdout) = proc.stdout() {
            let _ = stdout.read_to_string(&mut buf).await;
        }
        let _ = proc.join().await;
        parse_sentinel(&buf)
    }
}

fn parse_sentinel(raw: &str) -> Option<SentinelState> {
    match raw.trim() {
        SENTINEL_SUCCESS => Some(SentinelState::Success),
        SENTINEL_FAILURE => Some(SentinelState::Failure),
        _ => None,
    }
}

/// Parse `name: value` lines out of a termination message, keeping declared
/// names only.
pub fn parse_outputs(message: &str, declared: &[String]) -> Vec<JobOutput> {
    let mut outputs = Vec::new();
    for line in message.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if declared.iter().any(|d| d == name) {
            outputs.push(JobOutput { name: name.to_string(), value: value.trim().to_string() });
        }
    }
    outputs
}

fn pod_phase(pod: &Pod) -> &str {
    pod.status.as_ref().and_then(|s| s.phase.as_deref()).unwrap_or("")
}

fn pod_failure_reason(pod: &Pod) -> Option<String> {
    let status = pod.status.as_ref()?;
    if let Some(container_statuses) = &status.container_statuses {
        for cs in container_statuses {
            if let Some(terminated) = cs.state.as_ref().and_then(|s| s.terminated.as_ref()) {
                if terminated.exit_code != 0 {
                    let reason = terminated.reason.clone().unwrap_or_else(|| "Error".to_string());
                    return Some(format!(
                        "container {} exited with code {} ({reason})",
                        cs.name, terminated.exit_code
                    ));
                }
            }
        }
    }
    status.reason.clone()
}

fn termination_message(pod: &Pod) -> Option<String> {
    let statuses = pod.status.as_ref()?.container_statuses.as_ref()?;
    statuses
        .iter()
        .find_map(|cs| cs.state.as_ref()?.terminated.as_ref()?.message.clone())
}

#[async_trait]
impl WorkloadBackend for KubeBackend {
    async fn create_config_map(
        &self,
        namespace: &str,
        name: &str,
        label: &JobLabel,
        payload: &str,
    ) -> Result<()> {
        let configmaps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let cm: ConfigMap = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": name, "labels": label.labels() },
            "data": { CONFIG_MAP_KEY: payload }
        }))
        .map_err(|err| Error::Store(format!("build configmap: {err}")))?;

        match configmaps.create(&PostParams::default(), &cm).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                configmaps.replace(name, &PostParams::default(), &cm).await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_config_maps(&self, namespace: &str, label: &JobLabel) -> Result<()> {
        let configmaps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        configmaps
            .delete_collection(
                &DeleteParams::default(),
                &ListParams::default().labels(&label.selector()),
            )
            .await?;
        Ok(())
    }

    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<()> {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), &spec.namespace);

        let mut volumes = Vec::new();
        let mut volume_mounts = Vec::new();
        if let Some(cm_name) = &spec.config_map {
            volumes.push(json!({
                "name": "job-context",
                "configMap": { "name": cm_name }
            }));
            volume_mounts.push(json!({
                "name": "job-context",
                "mountPath": CONFIG_MOUNT_PATH
            }));
        }

        let envs: Vec<serde_json::Value> = spec
            .envs
            .iter()
            .map(|(k, v)| json!({ "name": k, "value": v }))
            .collect();

        let mut container = json!({
            "name": EXECUTOR_CONTAINER,
            "image": spec.image,
            "imagePullPolicy": "Always",
            "env": envs,
            "volumeMounts": volume_mounts
        });
        if !spec.args.is_empty() {
            container["args"] = json!(spec.args);
        }
        if spec.resources.cpu_limit > 0 || spec.resources.memory_limit > 0 {
            let mut limits = serde_json::Map::new();
            if spec.resources.cpu_limit > 0 {
                limits.insert("cpu".to_string(), json!(format!("{}m", spec.resources.cpu_limit)));
            }
            if spec.resources.memory_limit > 0 {
                limits
                    .insert("memory".to_string(), json!(format!("{}Mi", spec.resources.memory_limit)));
            }
            container["resources"] = json!({ "limits": limits.clone(), "requests": limits });
        }

        let job: Job = serde_json::from_value(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": spec.name,
                "namespace": spec.namespace,
                "labels": spec.labels
            },
            "spec": {
                "backoffLimit": 0,
                "completions": 1,
                "parallelism": 1,
                "template": {
                    "metadata": { "labels": spec.labels },
                    "spec": {
                        "restartPolicy": "Never",
                        "containers": [container],
                        "volumes": volumes
                    }
                }
            }
        }))
        .map_err(|err| Error::Store(format!("build workload: {err}")))?;

        jobs.create(&PostParams::default(), &job).await?;
        Ok(())
    }

    async fn delete_workloads(&self, namespace: &str, label: &JobLabel) -> Result<()> {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        // background propagation still removes the job's pods
        let dp = DeleteParams {
            propagation_policy: Some(kube::api::PropagationPolicy::Background),
            ..DeleteParams::default()
        };
        jobs.delete_collection(&dp, &ListParams::default().labels(&label.selector()))
            .await?;
        Ok(())
    }

    async fn observe(&self, namespace: &str, label: &JobLabel) -> Result<WorkloadObservation> {
        let Some(pod) = self.first_pod(namespace, label).await? else {
            return Ok(WorkloadObservation::default());
        };
        let pod_name = pod.metadata.name.clone().unwrap_or_default();

        match pod_phase(&pod) {
            "Running" => {
                let sentinel = self.read_sentinel(namespace, &pod_name).await;
                Ok(WorkloadObservation { finished: sentinel.is_some(), sentinel, failure_reason: None })
            }
            "Succeeded" | "Failed" => Ok(WorkloadObservation {
                finished: true,
                sentinel: None,
                failure_reason: pod_failure_reason(&pod)
                    .or_else(|| Some("pod terminated before reporting a result".to_string())),
            }),
            _ => Ok(WorkloadObservation::default()),
        }
    }

    async fn job_outputs(
        &self,
        namespace: &str,
        label: &JobLabel,
        declared: &[String],
    ) -> Result<Vec<JobOutput>> {
        let Some(pod) = self.first_pod(namespace, label).await? else {
            return Ok(Vec::new());
        };
        let Some(message) = termination_message(&pod) else {
            return Ok(Vec::new());
        };
        Ok(parse_outputs(&message, declared))
    }

    async fn container_logs(&self, namespace: &str, label: &JobLabel) -> Result<String> {
        let Some(pod) = self.first_pod(namespace, label).await? else {
            return Ok(String::new());
        };
        let pod_name = pod.metadata.name.unwrap_or_default();
        let params = LogParams {
            container: Some(EXECUTOR_CONTAINER.to_string()),
            ..LogParams::default()
        };
        Ok(self.pods(namespace).logs(&pod_name, &params).await?)
    }

    async fn set_workload_image(
        &self,
        namespace: &str,
        target: &DeployTarget,
        image: &str,
    ) -> Result<()> {
        let patch = json!({
            "spec": {
                "template": {
                    "spec": {
                        "containers": [{ "name": target.container_name, "image": image }]
                    }
                }
            }
        });
        match target.workload_type.as_str() {
            "deployment" => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                api.patch(&target.workload_name, &PatchParams::default(), &Patch::Strategic(&patch))
                    .await?;
            }
            "statefulset" => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
                api.patch(&target.workload_name, &PatchParams::default(), &Patch::Strategic(&patch))
                    .await?;
            }
            other => {
                return Err(Error::Validation(format!("unsupported workload type: {other}")));
            }
        }
        Ok(())
    }

    async fn workload_ready(&self, namespace: &str, target: &DeployTarget) -> Result<bool> {
        match target.workload_type.as_str() {
            "deployment" => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                let deployment = api.get(&target.workload_name).await?;
                let wanted = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                let status = deployment.status.unwrap_or_default();
                Ok(status.updated_replicas.unwrap_or(0) >= wanted
                    && status.ready_replicas.unwrap_or(0) >= wanted)
            }
            "statefulset" => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
                let set = api.get(&target.workload_name).await?;
                let wanted = set.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                let status = set.status.unwrap_or_default();
                Ok(status.updated_replicas.unwrap_or(0) >= wanted
                    && status.ready_replicas.unwrap_or(0) >= wanted)
            }
            other => Err(Error::Validation(format!("unsupported workload type: {other}"))),
        }
    }
}

/// Factory wiring backends to resolved cluster clients.
pub struct KubeBackendFactory {
    resolver: Arc<dyn ClusterResolver>,
}

impl KubeBackendFactory {
    #[must_use]
    pub fn new(resolver: Arc<dyn ClusterResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl BackendFactory for KubeBackendFactory {
    async fn backend(&self, cluster_id: &str) -> Result<Arc<dyn WorkloadBackend>> {
        let handle = self.resolver.resolve(cluster_id).await?;
        if handle.cluster_id != cluster_id && !crate::cluster::is_local_cluster(cluster_id) {
            warn!(requested = cluster_id, resolved = %handle.cluster_id, "cluster id mismatch");
        }
        Ok(Arc::new(KubeBackend::new(handle.cluster_id, handle.client)))
    }
}

impl KubeBackend {
    #[must_use]
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_outputs, parse_sentinel};
    use crate::workload::backend::SentinelState;

    #[test]
    fn sentinel_tokens() {
        assert_eq!(parse_sentinel("success\n"), Some(SentinelState::Success));
        assert_eq!(parse_sentinel(" failure "), Some(SentinelState::Failure));
        assert_eq!(parse_sentinel(""), None);
        assert_eq!(parse_sentinel("done"), None);
    }

    #[test]
    fn outputs_filter_to_declared_names() {
        let message = "VERSION: 1.2.3\nnoise line\nIMAGE: repo/app:9\nEXTRA: x\n";
        let declared = vec!["VERSION".to_string(), "IMAGE".to_string()];
        let outputs = parse_outputs(message, &declared);
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].name, "VERSION");
        assert_eq!(outputs[0].value, "1.2.3");
        assert_eq!(outputs[1].value, "repo/app:9");
    }

    #[test]
    fn output_values_may_contain_colons() {
        let declared = vec!["IMAGE".to_string()];
        let outputs = parse_outputs("IMAGE: registry:5000/app:9", &declared);
        assert_eq!(outputs[0].value, "registry:5000/app:9");
    }
}
