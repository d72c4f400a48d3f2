//! Condensed task views for the REST surface.
//!
//! Each job type projects its runtime spec into a small summary: executable
//! jobs surface their image/service envs and git repos, the deploy family
//! surfaces env plus service/image pairs, plugin jobs surface the template.

use serde::{Deserialize, Serialize};

use crate::model::{
    Approval, JobTask, JobTaskSpec, JobType, KeyVal, Param, PluginTemplate, Repository,
    ServiceAndImage, Status, WorkflowTask, STEP_TYPE_GIT,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTaskPreview {
    pub task_id: i64,
    pub workflow_name: String,
    pub project_name: String,
    pub status: Status,
    pub task_creator: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub task_revoker: String,
    pub create_time: i64,
    pub start_time: i64,
    pub end_time: i64,
    pub params: Vec<Param>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub is_restart: bool,
    pub stages: Vec<StageTaskPreview>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTaskPreview {
    pub name: String,
    pub status: Status,
    pub start_time: i64,
    pub end_time: i64,
    pub parallel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<Approval>,
    pub jobs: Vec<JobTaskPreview>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTaskPreview {
    pub name: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: Status,
    pub start_time: i64,
    pub end_time: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub spec: JobPreviewSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobPreviewSpec {
    Build(BuildJobPreview),
    Deploy(DeployJobPreview),
    CustomDeploy(CustomDeployJobPreview),
    Plugin(PluginTemplate),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildJobPreview {
    pub image: String,
    pub service_name: String,
    pub service_module: String,
    pub envs: Vec<KeyVal>,
    pub repos: Vec<Repository>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployJobPreview {
    pub env: String,
    pub skip_check_run_status: bool,
    pub service_and_images: Vec<ServiceAndImage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomDeployJobPreview {
    pub namespace: String,
    pub skip_check_run_status: bool,
    pub targets: Vec<String>,
}

#[must_use]
pub fn task_preview(task: &WorkflowTask) -> WorkflowTaskPreview {
    WorkflowTaskPreview {
        task_id: task.task_id,
        workflow_name: task.workflow_name.clone(),
        project_name: task.project_name.clone(),
        status: task.status,
        task_creator: task.task_creator.clone(),
        task_revoker: task.task_revoker.clone(),
        create_time: task.create_time,
        start_time: task.start_time,
        end_time: task.end_time,
        params: task.params.clone(),
        error: task.error.clone(),
        is_restart: task.is_restart,
        stages: task
            .stages
            .iter()
            .map(|stage| StageTaskPreview {
                name: stage.name.clone(),
                status: stage.status,
                start_time: stage.start_time,
                end_time: stage.end_time,
                parallel: stage.parallel,
                approval: stage.approval.clone(),
                jobs: stage.jobs.iter().map(job_preview).collect(),
            })
            .collect(),
    }
}

fn job_preview(job: &JobTask) -> JobTaskPreview {
    let spec = match &job.spec {
        JobTaskSpec::Freestyle(spec) => {
            let mut preview = BuildJobPreview { envs: spec.properties.custom_envs.clone(), ..Default::default() };
            for env in &spec.properties.envs {
                match env.key.as_str() {
                    "IMAGE" => preview.image = env.value.clone(),
                    "SERVICE" => preview.service_name = env.value.clone(),
                    "SERVICE_MODULE" => preview.service_module = env.value.clone(),
                    _ => {}
                }
            }
            for step in &spec.steps {
                if step.step_type == STEP_TYPE_GIT {
                    if let Some(repos) = step.spec.get("repos") {
                        if let Ok(repos) = serde_yaml::from_value(repos.clone()) {
                            preview.repos = repos;
                        }
                    }
                }
            }
            JobPreviewSpec::Build(preview)
        }
        JobTaskSpec::Deploy(spec) => JobPreviewSpec::Deploy(DeployJobPreview {
            env: spec.env.clone(),
            skip_check_run_status: spec.skip_check_run_status,
            service_and_images: spec.service_and_images.clone(),
        }),
        // helm previews as a plain deploy, service per image module
        JobTaskSpec::HelmDeploy(spec) => JobPreviewSpec::Deploy(DeployJobPreview {
            env: spec.env.clone(),
            skip_check_run_status: spec.skip_check_run_status,
            service_and_images: spec
                .image_and_modules
                .iter()
                .map(|entry| ServiceAndImage {
                    service_name: spec.service_name.clone(),
                    service_module: entry.service_module.clone(),
                    image: entry.image.clone(),
                })
                .collect(),
        }),
        JobTaskSpec::CustomDeploy(spec) => JobPreviewSpec::CustomDeploy(CustomDeployJobPreview {
            namespace: spec.namespace.clone(),
            skip_check_run_status: spec.skip_check_run_status,
            targets: spec.targets.iter().map(|t| t.target.clone()).collect(),
        }),
        JobTaskSpec::Plugin(spec) => JobPreviewSpec::Plugin(spec.plugin.clone()),
    };

    JobTaskPreview {
        name: job.name.clone(),
        job_type: job.job_type,
        status: job.status,
        start_time: job.start_time,
        end_time: job.end_time,
        error: job.error.clone(),
        spec,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobProperties, JobTaskFreestyleSpec, Output};

    #[test]
    fn freestyle_preview_extracts_well_known_envs() {
        let job = JobTask {
            name: "build".to_string(),
            job_type: JobType::Build,
            status: Status::Passed,
            start_time: 1,
            end_time: 2,
            error: String::new(),
            spec: JobTaskSpec::Freestyle(JobTaskFreestyleSpec {
                properties: JobProperties {
                    envs: vec![
                        KeyVal { key: "IMAGE".to_string(), value: "app:1".to_string(), is_credential: false },
                        KeyVal { key: "SERVICE".to_string(), value: "api".to_string(), is_credential: false },
                    ],
                    ..Default::default()
                },
                steps: vec![],
            }),
            outputs: vec![Output { name: "IMAGE".to_string(), description: String::new() }],
        };
        match job_preview(&job).spec {
            JobPreviewSpec::Build(preview) => {
                assert_eq!(preview.image, "app:1");
                assert_eq!(preview.service_name, "api");
            }
            other => panic!("unexpected preview: {other:?}"),
        }
    }
}
