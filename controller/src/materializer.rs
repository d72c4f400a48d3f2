//! Task materialization.
//!
//! Turns a workflow definition into a concrete, numbered, immutable task:
//! lint, origin snapshot, id assignment, marker stripping, global variable
//! rendering, per-type expansion into job tasks, final lint, persistence,
//! and best-effort creation notification.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::error::{Error, Result};
use crate::jobs::now_unix;
use crate::model::{
    Job, JobSpec, JobTask, JobTaskCustomDeploySpec, JobTaskDeploySpec, JobTaskFreestyleSpec,
    JobTaskHelmDeploySpec, JobTaskPluginSpec, JobTaskSpec, KeyVal, Repository, ServiceAndBuild,
    StageTask, Status, Step, Workflow, WorkflowTask, STEP_TYPE_GIT,
};
use crate::notify::Notifier;
use crate::render::{remove_fixed_value_marks, render_global_variables};
use crate::store::{task_seq_key, SeqCounter, TaskStore, WorkflowStore};

/// Fills in clone metadata (address, default branch, credentials reference)
/// for declared repositories. Backed by the SCM integration layer.
#[async_trait]
pub trait RepoRegistry: Send + Sync {
    async fn hydrate(&self, repos: &mut [Repository]) -> Result<()>;
}

/// Leaves repositories exactly as declared.
#[derive(Debug, Default)]
pub struct NoopRepoRegistry;

#[async_trait]
impl RepoRegistry for NoopRepoRegistry {
    async fn hydrate(&self, _repos: &mut [Repository]) -> Result<()> {
        Ok(())
    }
}

pub struct TaskMaterializer {
    workflows: Arc<dyn WorkflowStore>,
    tasks: Arc<dyn TaskStore>,
    counter: Arc<dyn SeqCounter>,
    repos: Arc<dyn RepoRegistry>,
    notifier: Arc<dyn Notifier>,
}

impl TaskMaterializer {
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        tasks: Arc<dyn TaskStore>,
        counter: Arc<dyn SeqCounter>,
        repos: Arc<dyn RepoRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { workflows, tasks, counter, repos, notifier }
    }

    /// Materialize a task from a stored workflow definition.
    pub async fn create_task_by_name(&self, user: &str, workflow_name: &str) -> Result<WorkflowTask> {
        let workflow = self.workflows.find(workflow_name).await?;
        self.create_task(user, workflow).await
    }

    /// Materialize a task from a workflow document (stored definition merged
    /// with the caller's runtime arguments).
    #[instrument(skip(self, workflow), fields(workflow = %workflow.name, user))]
    pub async fn create_task(&self, user: &str, workflow: Workflow) -> Result<WorkflowTask> {
        lint_workflow(&workflow)?;

        if !workflow.multi_run && self.tasks.has_incomplete(&workflow.name).await? {
            return Err(Error::CreateTask(format!(
                "workflow {} has an unfinished task and does not allow concurrent runs",
                workflow.name
            )));
        }

        // snapshot before any rendering touches the document
        let origin = workflow.clone();

        let task_id = self
            .counter
            .next_seq(&task_seq_key(&workflow.name))
            .await
            .map_err(|err| Error::GetCounter(err.to_string()))?;

        let mut rendered = workflow;
        remove_fixed_value_marks(&mut rendered);
        render_global_variables(&mut rendered, task_id, user);

        let mut stages = Vec::new();
        for stage in &rendered.stages {
            let mut stage_task = StageTask {
                name: stage.name.clone(),
                parallel: stage.parallel,
                approval: stage.approval.clone(),
                ..Default::default()
            };
            for job in &stage.jobs {
                if job.skipped {
                    continue;
                }
                let jobs = self
                    .to_job_tasks(job)
                    .await
                    .map_err(|err| Error::CreateTask(err.to_string()))?;
                stage_task.jobs.extend(jobs);
            }
            if !stage_task.jobs.is_empty() {
                stages.push(stage_task);
            }
        }

        let task = WorkflowTask {
            task_id,
            workflow_name: rendered.name.clone(),
            project_name: rendered.project.clone(),
            task_creator: user.to_string(),
            task_revoker: String::new(),
            status: Status::Created,
            create_time: now_unix(),
            start_time: 0,
            end_time: 0,
            params: rendered.params.clone(),
            key_vals: rendered.key_vals.clone(),
            multi_run: rendered.multi_run,
            stages,
            workflow_args: rendered,
            origin_workflow_args: origin,
            error: String::new(),
            is_restart: false,
        };
        lint_task(&task)?;

        self.tasks
            .create(&task)
            .await
            .map_err(|err| Error::CreateTask(err.to_string()))?;
        info!(workflow = %task.workflow_name, task_id, "task created");

        if let Err(err) = self.notifier.task_created(&task).await {
            warn!(workflow = %task.workflow_name, task_id, "creation notify failed: {err}");
        }
        Ok(task)
    }

    /// Origin arguments of a past task, for clone-and-rerun.
    pub async fn clone_task(&self, workflow_name: &str, task_id: i64) -> Result<Workflow> {
        let task = self.tasks.find(workflow_name, task_id).await?;
        Ok(task.origin_workflow_args)
    }

    pub async fn list_tasks(
        &self,
        workflow_name: &str,
        page_num: usize,
        page_size: usize,
    ) -> Result<(Vec<WorkflowTask>, u64)> {
        let opts = crate::store::TaskListOptions {
            workflow_name: workflow_name.to_string(),
            skip: page_num.saturating_sub(1) * page_size,
            limit: page_size,
        };
        self.tasks.list(&opts).await
    }

    pub async fn get_task(&self, workflow_name: &str, task_id: i64) -> Result<WorkflowTask> {
        self.tasks.find(workflow_name, task_id).await
    }

    /// Condensed per-job view of a task for the REST surface.
    pub async fn get_task_preview(
        &self,
        workflow_name: &str,
        task_id: i64,
    ) -> Result<crate::preview::WorkflowTaskPreview> {
        let task = self.tasks.find(workflow_name, task_id).await?;
        Ok(crate::preview::task_preview(&task))
    }

    pub async fn update_task(&self, task: &WorkflowTask) -> Result<()> {
        self.tasks.update(task).await
    }

    /// Expand one definition job into its runtime job tasks. Build jobs fan
    /// out per service; everything else maps one to one.
    async fn to_job_tasks(&self, job: &Job) -> Result<Vec<JobTask>> {
        let spec = JobSpec::decode(job)?;
        Ok(match spec {
            JobSpec::Freestyle(mut spec) => {
                self.hydrate_git_steps(&mut spec.steps).await?;
                vec![JobTask {
                    name: job.name.clone(),
                    job_type: job.job_type,
                    status: Status::Created,
                    start_time: 0,
                    end_time: 0,
                    error: String::new(),
                    spec: JobTaskSpec::Freestyle(JobTaskFreestyleSpec {
                        properties: spec.properties,
                        steps: spec.steps,
                    }),
                    outputs: spec.outputs,
                }]
            }
            JobSpec::Build(spec) => {
                let mut jobs = Vec::new();
                for build in spec.service_and_builds {
                    jobs.push(self.build_to_job_task(job, build).await?);
                }
                jobs
            }
            JobSpec::Plugin(spec) => vec![JobTask {
                name: job.name.clone(),
                job_type: job.job_type,
                status: Status::Created,
                start_time: 0,
                end_time: 0,
                error: String::new(),
                outputs: spec.plugin.outputs.clone(),
                spec: JobTaskSpec::Plugin(JobTaskPluginSpec {
                    properties: spec.properties,
                    plugin: spec.plugin,
                }),
            }],
            JobSpec::Deploy(spec) => vec![JobTask {
                name: job.name.clone(),
                job_type: job.job_type,
                status: Status::Created,
                start_time: 0,
                end_time: 0,
                error: String::new(),
                spec: JobTaskSpec::Deploy(JobTaskDeploySpec {
                    env: spec.env,
                    namespace: spec.namespace,
                    cluster_id: spec.cluster_id,
                    skip_check_run_status: spec.skip_check_run_status,
                    service_and_images: spec.service_and_images,
                    timeout: spec.timeout,
                }),
                outputs: Vec::new(),
            }],
            JobSpec::HelmDeploy(spec) => vec![JobTask {
                name: job.name.clone(),
                job_type: job.job_type,
                status: Status::Created,
                start_time: 0,
                end_time: 0,
                error: String::new(),
                spec: JobTaskSpec::HelmDeploy(JobTaskHelmDeploySpec {
                    env: spec.env,
                    namespace: spec.namespace,
                    cluster_id: spec.cluster_id,
                    skip_check_run_status: spec.skip_check_run_status,
                    service_name: spec.service_name,
                    release_name: spec.release_name,
                    image_and_modules: spec.image_and_modules,
                    timeout: spec.timeout,
                }),
                outputs: Vec::new(),
            }],
            JobSpec::CustomDeploy(spec) => vec![JobTask {
                name: job.name.clone(),
                job_type: job.job_type,
                status: Status::Created,
                start_time: 0,
                end_time: 0,
                error: String::new(),
                spec: JobTaskSpec::CustomDeploy(JobTaskCustomDeploySpec {
                    namespace: spec.namespace,
                    cluster_id: spec.cluster_id,
                    skip_check_run_status: spec.skip_check_run_status,
                    timeout: spec.timeout,
                    targets: spec.targets,
                }),
                outputs: Vec::new(),
            }],
        })
    }

    async fn build_to_job_task(&self, job: &Job, mut build: ServiceAndBuild) -> Result<JobTask> {
        self.repos.hydrate(&mut build.repos).await?;
        self.hydrate_git_steps(&mut build.steps).await?;

        let mut properties = build.properties;
        properties.envs.extend([
            KeyVal { key: "SERVICE".to_string(), value: build.service_name.clone(), is_credential: false },
            KeyVal {
                key: "SERVICE_MODULE".to_string(),
                value: build.service_module.clone(),
                is_credential: false,
            },
            KeyVal { key: "IMAGE".to_string(), value: build.image.clone(), is_credential: false },
        ]);
        properties.envs.extend(build.key_vals.clone());
        properties.custom_envs = build.key_vals;

        let mut steps = build.steps;
        if !build.repos.is_empty() {
            let mut git_map = serde_yaml::Mapping::new();
            git_map.insert(serde_yaml::Value::from("repos"), serde_yaml::to_value(&build.repos)?);
            steps.insert(
                0,
                Step {
                    name: format!("{}-git", job.name),
                    timeout: 0,
                    step_type: STEP_TYPE_GIT.to_string(),
                    spec: serde_yaml::Value::Mapping(git_map),
                },
            );
        }

        Ok(JobTask {
            name: format!("{}-{}-{}", job.name, build.service_name, build.service_module),
            job_type: job.job_type,
            status: Status::Created,
            start_time: 0,
            end_time: 0,
            error: String::new(),
            spec: JobTaskSpec::Freestyle(JobTaskFreestyleSpec { properties, steps }),
            outputs: build.outputs,
        })
    }

    /// Run declared git-step repositories through the registry so executors
    /// receive full clone metadata.
    async fn hydrate_git_steps(&self, steps: &mut [Step]) -> Result<()> {
        for step in steps {
            if step.step_type != STEP_TYPE_GIT {
                continue;
            }
            let Some(repos_value) = step.spec.get("repos") else { continue };
            let mut repos: Vec<Repository> = serde_yaml::from_value(repos_value.clone())?;
            self.repos.hydrate(&mut repos).await?;
            if let serde_yaml::Value::Mapping(map) = &mut step.spec {
                map.insert(serde_yaml::Value::from("repos"), serde_yaml::to_value(&repos)?);
            }
        }
        Ok(())
    }
}

/// Definition-level lint: named stages with at least one runnable job each,
/// workflow-unique job names, and specs that decode as their declared types.
fn lint_workflow(workflow: &Workflow) -> Result<()> {
    if workflow.name.is_empty() {
        return Err(Error::Validation("workflow has no name".to_string()));
    }
    if workflow.stages.is_empty() {
        return Err(Error::Validation(format!("workflow {} has no stages", workflow.name)));
    }
    let mut seen = HashSet::new();
    for stage in &workflow.stages {
        let runnable = stage.jobs.iter().filter(|j| !j.skipped).count();
        if runnable == 0 {
            return Err(Error::Validation(format!(
                "stage {} of workflow {} has no runnable job",
                stage.name, workflow.name
            )));
        }
        for job in &stage.jobs {
            if !seen.insert(job.name.clone()) {
                return Err(Error::Validation(format!(
                    "duplicated job name {} in workflow {}",
                    job.name, workflow.name
                )));
            }
            JobSpec::decode(job)?;
        }
    }
    Ok(())
}

/// Task-level lint mirroring the definition lint after skips and expansion.
fn lint_task(task: &WorkflowTask) -> Result<()> {
    if task.stages.is_empty() {
        return Err(Error::CreateTask(format!(
            "no stage found in task {}/{}",
            task.workflow_name, task.task_id
        )));
    }
    for stage in &task.stages {
        if stage.jobs.is_empty() {
            return Err(Error::CreateTask(format!(
                "no job found in task {}/{} stage {}",
                task.workflow_name, task.task_id, stage.name
            )));
        }
    }
    Ok(())
}
