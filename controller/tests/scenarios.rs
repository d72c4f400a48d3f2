//! End-to-end scenarios for the task lifecycle, driven against in-memory
//! stores and a scripted fake cluster.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use controller::approval::ApprovalHub;
use controller::config::OrchestratorConfig;
use controller::dockerhost::DockerHostSelector;
use controller::error::{Error, Result};
use controller::jobs::{HelmDeployer, JobEnv, NoopStepHandler};
use controller::logstore::{JobLogEntry, LogStore};
use controller::materializer::{NoopRepoRegistry, TaskMaterializer};
use controller::model::{
    Approval, ApprovalUser, FreestyleJobSpec, Job, JobProperties, JobType, KeyVal, Output,
    ServiceAndImage, Status, Workflow, WorkflowStage, WorkflowTask,
};
use controller::notify::NoopNotifier;
use controller::store::{SeqCounter, TaskListOptions, TaskStore, WorkflowStore};
use controller::supervisor::{StageApprovalRequest, TaskManager};
use controller::workload::backend::{
    BackendFactory, DeployTarget, JobOutput, SentinelState, WorkloadBackend, WorkloadObservation,
    WorkloadSpec,
};
use controller::workload::kube::parse_outputs;
use controller::workload::labels::JobLabel;

// ---------------------------------------------------------------------------
// in-memory stores
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemWorkflowStore {
    workflows: Mutex<HashMap<String, Workflow>>,
}

#[async_trait]
impl WorkflowStore for MemWorkflowStore {
    async fn find(&self, name: &str) -> Result<Workflow> {
        self.workflows
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::FindWorkflow(name.to_string()))
    }

    async fn update(&self, workflow: &Workflow) -> Result<()> {
        self.workflows
            .lock()
            .unwrap()
            .insert(workflow.name.clone(), workflow.clone());
        Ok(())
    }
}

#[derive(Default)]
struct MemTaskStore {
    tasks: Mutex<HashMap<(String, i64), WorkflowTask>>,
}

#[async_trait]
impl TaskStore for MemTaskStore {
    async fn create(&self, task: &WorkflowTask) -> Result<()> {
        self.tasks
            .lock()
            .unwrap()
            .insert((task.workflow_name.clone(), task.task_id), task.clone());
        Ok(())
    }

    async fn update(&self, task: &WorkflowTask) -> Result<()> {
        self.create(task).await
    }

    async fn find(&self, workflow_name: &str, task_id: i64) -> Result<WorkflowTask> {
        self.tasks
            .lock()
            .unwrap()
            .get(&(workflow_name.to_string(), task_id))
            .cloned()
            .ok_or(Error::FindTask { workflow_name: workflow_name.to_string(), task_id })
    }

    async fn list(&self, opts: &TaskListOptions) -> Result<(Vec<WorkflowTask>, u64)> {
        let tasks = self.tasks.lock().unwrap();
        let mut matched: Vec<WorkflowTask> = tasks
            .values()
            .filter(|t| t.workflow_name == opts.workflow_name)
            .cloned()
            .collect();
        matched.sort_by_key(|t| std::cmp::Reverse(t.task_id));
        let total = matched.len() as u64;
        let page = matched.into_iter().skip(opts.skip).take(opts.limit).collect();
        Ok((page, total))
    }

    async fn has_incomplete(&self, workflow_name: &str) -> Result<bool> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .any(|t| t.workflow_name == workflow_name && !t.status.is_terminal()))
    }
}

#[derive(Default)]
struct MemCounter {
    next: AtomicI64,
}

#[async_trait]
impl SeqCounter for MemCounter {
    async fn next_seq(&self, _key: &str) -> Result<i64> {
        Ok(self.next.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[derive(Default)]
struct MemLogStore {
    entries: Mutex<Vec<JobLogEntry>>,
}

#[async_trait]
impl LogStore for MemLogStore {
    async fn save(&self, entry: JobLogEntry) -> Result<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// scripted fake cluster
// ---------------------------------------------------------------------------

/// What the fake cluster should do for one job, keyed by the job-name label.
#[derive(Clone)]
struct JobScript {
    /// Observations before the workload reports finished. `None` never
    /// finishes (timeout / cancel scenarios).
    polls_before_finish: Option<u32>,
    sentinel: Option<SentinelState>,
    termination_message: String,
    logs: String,
}

impl Default for JobScript {
    fn default() -> Self {
        Self {
            polls_before_finish: Some(1),
            sentinel: Some(SentinelState::Success),
            termination_message: String::new(),
            logs: "ok\n".to_string(),
        }
    }
}

#[derive(Default)]
struct FakeCluster {
    scripts: Mutex<HashMap<String, JobScript>>,
    polls_left: Mutex<HashMap<String, u32>>,
    configmaps: Mutex<HashMap<String, String>>, // selector -> payload, live
    workloads: Mutex<HashMap<String, WorkloadSpec>>, // selector -> spec, live
    /// Every payload ever written, immune to cleanup, for assertions.
    payload_history: Mutex<HashMap<String, String>>,
    observe_count: AtomicUsize,
    workloads_created: AtomicUsize,
    image_patches: Mutex<Vec<(String, DeployTarget, String)>>,
}

impl FakeCluster {
    fn script(&self, job_label: &str, script: JobScript) {
        if let Some(polls) = script.polls_before_finish {
            self.polls_left.lock().unwrap().insert(job_label.to_string(), polls);
        }
        self.scripts.lock().unwrap().insert(job_label.to_string(), script);
    }

    fn live_resources(&self) -> usize {
        self.configmaps.lock().unwrap().len() + self.workloads.lock().unwrap().len()
    }

    fn configmap_payload(&self, label: &JobLabel) -> Option<String> {
        self.payload_history.lock().unwrap().get(&label.selector()).cloned()
    }
}

struct FakeBackend {
    cluster: Arc<FakeCluster>,
}

fn job_label_of(label: &JobLabel) -> String {
    label.labels()["job-name"].clone()
}

#[async_trait]
impl WorkloadBackend for FakeBackend {
    async fn create_config_map(
        &self,
        _namespace: &str,
        _name: &str,
        label: &JobLabel,
        payload: &str,
    ) -> Result<()> {
        self.cluster
            .configmaps
            .lock()
            .unwrap()
            .insert(label.selector(), payload.to_string());
        self.cluster
            .payload_history
            .lock()
            .unwrap()
            .insert(label.selector(), payload.to_string());
        Ok(())
    }

    async fn delete_config_maps(&self, _namespace: &str, label: &JobLabel) -> Result<()> {
        self.cluster.configmaps.lock().unwrap().remove(&label.selector());
        Ok(())
    }

    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<()> {
        let selector = spec
            .labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        self.cluster.workloads.lock().unwrap().insert(selector, spec.clone());
        self.cluster.workloads_created.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_workloads(&self, _namespace: &str, label: &JobLabel) -> Result<()> {
        self.cluster.workloads.lock().unwrap().remove(&label.selector());
        Ok(())
    }

    async fn observe(&self, _namespace: &str, label: &JobLabel) -> Result<WorkloadObservation> {
        self.cluster.observe_count.fetch_add(1, Ordering::SeqCst);
        let key = job_label_of(label);
        let script = self
            .cluster
            .scripts
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_default();

        if script.polls_before_finish.is_none() {
            return Ok(WorkloadObservation::default());
        }
        let finished = {
            let mut polls = self.cluster.polls_left.lock().unwrap();
            let left = polls.entry(key).or_insert(1);
            *left = left.saturating_sub(1);
            *left == 0
        };
        if !finished {
            return Ok(WorkloadObservation::default());
        }
        Ok(WorkloadObservation {
            finished: true,
            sentinel: script.sentinel,
            failure_reason: match script.sentinel {
                Some(SentinelState::Failure) => Some("executor reported failure".to_string()),
                None => Some("pod terminated before reporting a result".to_string()),
                _ => None,
            },
        })
    }

    async fn job_outputs(
        &self,
        _namespace: &str,
        label: &JobLabel,
        declared: &[String],
    ) -> Result<Vec<JobOutput>> {
        let script = self
            .cluster
            .scripts
            .lock()
            .unwrap()
            .get(&job_label_of(label))
            .cloned()
            .unwrap_or_default();
        Ok(parse_outputs(&script.termination_message, declared))
    }

    async fn container_logs(&self, _namespace: &str, label: &JobLabel) -> Result<String> {
        let script = self
            .cluster
            .scripts
            .lock()
            .unwrap()
            .get(&job_label_of(label))
            .cloned()
            .unwrap_or_default();
        Ok(script.logs)
    }

    async fn set_workload_image(
        &self,
        namespace: &str,
        target: &DeployTarget,
        image: &str,
    ) -> Result<()> {
        self.cluster.image_patches.lock().unwrap().push((
            namespace.to_string(),
            target.clone(),
            image.to_string(),
        ));
        Ok(())
    }

    async fn workload_ready(&self, _namespace: &str, _target: &DeployTarget) -> Result<bool> {
        Ok(true)
    }
}

struct FakeBackendFactory {
    cluster: Arc<FakeCluster>,
}

#[async_trait]
impl BackendFactory for FakeBackendFactory {
    async fn backend(&self, _cluster_id: &str) -> Result<Arc<dyn WorkloadBackend>> {
        Ok(Arc::new(FakeBackend { cluster: self.cluster.clone() }))
    }
}

struct FakeDockerHosts;

#[async_trait]
impl DockerHostSelector for FakeDockerHosts {
    async fn best_host(&self, _cluster_id: &str, _hint: &str) -> Result<String> {
        Ok("tcp://dind-0.dind:2375".to_string())
    }
}

struct FakeHelm;

#[async_trait]
impl HelmDeployer for FakeHelm {
    async fn upgrade(
        &self,
        _cluster_id: &str,
        _namespace: &str,
        _release_name: &str,
        _images: &[ServiceAndImage],
    ) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// harness
// ---------------------------------------------------------------------------

struct Harness {
    cluster: Arc<FakeCluster>,
    tasks: Arc<MemTaskStore>,
    logs: Arc<MemLogStore>,
    manager: Arc<TaskManager>,
    materializer: TaskMaterializer,
}

fn harness() -> Harness {
    let cluster = Arc::new(FakeCluster::default());
    let tasks = Arc::new(MemTaskStore::default());
    let logs = Arc::new(MemLogStore::default());

    let config = Arc::new(OrchestratorConfig {
        namespace: "zadig".to_string(),
        poll_interval_secs: 1,
        ..OrchestratorConfig::default()
    });
    let env = Arc::new(JobEnv {
        config,
        backends: Arc::new(FakeBackendFactory { cluster: cluster.clone() }),
        docker_hosts: Arc::new(FakeDockerHosts),
        steps: Arc::new(NoopStepHandler),
        logs: logs.clone(),
        helm: Arc::new(FakeHelm),
    });

    let manager = Arc::new(TaskManager::new(
        tasks.clone(),
        env,
        Arc::new(ApprovalHub::new()),
        Arc::new(NoopNotifier),
    ));
    let materializer = TaskMaterializer::new(
        Arc::new(MemWorkflowStore::default()),
        tasks.clone(),
        Arc::new(MemCounter::default()),
        Arc::new(NoopRepoRegistry),
        Arc::new(NoopNotifier),
    );

    Harness { cluster, tasks, logs, manager, materializer }
}

fn freestyle_job(name: &str, timeout: i64, envs: Vec<KeyVal>, outputs: Vec<&str>) -> Job {
    let spec = FreestyleJobSpec {
        properties: JobProperties { timeout, envs, ..Default::default() },
        steps: vec![],
        outputs: outputs
            .into_iter()
            .map(|o| Output { name: o.to_string(), description: String::new() })
            .collect(),
    };
    Job {
        name: name.to_string(),
        job_type: JobType::Freestyle,
        skipped: false,
        spec: serde_yaml::to_value(&spec).unwrap(),
    }
}

fn one_stage_workflow(name: &str, parallel: bool, jobs: Vec<Job>) -> Workflow {
    Workflow {
        name: name.to_string(),
        project: "demo".to_string(),
        multi_run: true,
        stages: vec![WorkflowStage {
            name: "stage-1".to_string(),
            parallel,
            approval: None,
            jobs,
        }],
        ..Default::default()
    }
}

async fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

// ---------------------------------------------------------------------------
// scenarios
// ---------------------------------------------------------------------------

/// One freestyle job passes, exports its output, and leaves nothing
/// behind on the cluster.
#[tokio::test(start_paused = true)]
async fn happy_path_single_job() {
    let h = harness();
    h.cluster.script(
        "build",
        JobScript {
            polls_before_finish: Some(2),
            sentinel: Some(SentinelState::Success),
            termination_message: "VERSION: 1.2.3\n".to_string(),
            logs: "building...\n".to_string(),
        },
    );

    let workflow = one_stage_workflow(
        "ci",
        false,
        vec![freestyle_job("build", 60, vec![], vec!["VERSION"])],
    );
    let task = h.materializer.create_task("alice", workflow).await.unwrap();
    assert_eq!(task.status, Status::Created);

    let settled = h.manager.start_task(task).await.unwrap();
    assert_eq!(settled.status, Status::Passed);
    assert_eq!(settled.stages[0].status, Status::Passed);
    assert_eq!(settled.stages[0].jobs[0].status, Status::Passed);
    assert!(settled.stages[0].jobs[0].start_time <= settled.stages[0].jobs[0].end_time);

    // logs shipped with full tags
    wait_until("log shipping", || !h.logs.entries.lock().unwrap().is_empty()).await;
    let entry = h.logs.entries.lock().unwrap()[0].clone();
    assert_eq!(entry.workflow_name, "ci");
    assert_eq!(entry.job_name, "build");
    assert_eq!(entry.task_id, 1);

    // deferred cleanup drains configmap and workload
    wait_until("resource cleanup", || h.cluster.live_resources() == 0).await;

    // persisted document matches the settled one
    let stored = h.tasks.find("ci", 1).await.unwrap();
    assert_eq!(stored.status, Status::Passed);
}

/// Parallel stage where one job fails: stage and task fail, the error
/// carries the failing job's message, resources are cleaned for both.
#[tokio::test(start_paused = true)]
async fn parallel_stage_with_one_failure() {
    let h = harness();
    h.cluster.script(
        "job-a",
        JobScript { sentinel: Some(SentinelState::Failure), ..Default::default() },
    );
    h.cluster.script("job-b", JobScript::default());

    let workflow = one_stage_workflow(
        "ci",
        true,
        vec![
            freestyle_job("job-a", 60, vec![], vec![]),
            freestyle_job("job-b", 60, vec![], vec![]),
        ],
    );
    let task = h.materializer.create_task("alice", workflow).await.unwrap();
    let settled = h.manager.start_task(task).await.unwrap();

    assert_eq!(settled.stages[0].status, Status::Failed);
    assert_eq!(settled.status, Status::Failed);
    let job_a = settled.stages[0].jobs.iter().find(|j| j.name == "job-a").unwrap();
    let job_b = settled.stages[0].jobs.iter().find(|j| j.name == "job-b").unwrap();
    assert_eq!(job_a.status, Status::Failed);
    assert_eq!(job_b.status, Status::Passed);
    assert!(settled.error.contains("job-a"), "error was: {}", settled.error);

    wait_until("resource cleanup", || h.cluster.live_resources() == 0).await;
}

/// A single reject settles the approval stage before any job launches.
#[tokio::test(start_paused = true)]
async fn approval_reject_is_immediate() {
    let h = harness();
    let mut workflow = one_stage_workflow(
        "ci",
        false,
        vec![freestyle_job("build", 60, vec![], vec![])],
    );
    workflow.stages[0].approval = Some(Approval {
        enabled: true,
        needed_approvers: 2,
        timeout: 10,
        approve_users: vec![
            ApprovalUser { user_id: "u1".to_string(), ..Default::default() },
            ApprovalUser { user_id: "u2".to_string(), ..Default::default() },
            ApprovalUser { user_id: "u3".to_string(), ..Default::default() },
        ],
        description: String::new(),
    });

    let task = h.materializer.create_task("alice", workflow).await.unwrap();
    let handle = h.manager.start_task(task);

    let tasks = h.tasks.clone();
    wait_until("stage waiting for approval", move || {
        tasks
            .tasks
            .lock()
            .unwrap()
            .get(&("ci".to_string(), 1))
            .is_some_and(|t| t.stages[0].status == Status::WaitingApproval)
    })
    .await;

    h.manager
        .approve_stage(&StageApprovalRequest {
            workflow_name: "ci".to_string(),
            task_id: 1,
            stage_name: "stage-1".to_string(),
            user_id: "u2".to_string(),
            user_name: "Bea".to_string(),
            approve: false,
            comment: "not like this".to_string(),
        })
        .unwrap();

    let settled = handle.await.unwrap();
    assert_eq!(settled.stages[0].status, Status::Reject);
    assert_eq!(settled.status, Status::Reject);
    assert_eq!(h.cluster.workloads_created.load(Ordering::SeqCst), 0);

    let gate = settled.stages[0].approval.as_ref().unwrap();
    let decided = gate.approve_users.iter().find(|u| u.user_id == "u2").unwrap();
    assert_eq!(decided.comment, "not like this");
}

/// The executor never writes a sentinel; the job, stage, and task time out
/// and the resources are still deleted.
#[tokio::test(start_paused = true)]
async fn job_timeout() {
    let h = harness();
    h.cluster.script(
        "build",
        JobScript { polls_before_finish: None, ..Default::default() },
    );

    let workflow =
        one_stage_workflow("ci", false, vec![freestyle_job("build", 5, vec![], vec![])]);
    let task = h.materializer.create_task("alice", workflow).await.unwrap();
    let settled = h.manager.start_task(task).await.unwrap();

    assert_eq!(settled.stages[0].jobs[0].status, Status::Timeout);
    assert_eq!(settled.stages[0].status, Status::Timeout);
    assert_eq!(settled.status, Status::Timeout);

    wait_until("resource cleanup", || h.cluster.live_resources() == 0).await;
}

/// Cancel during job 1 of a sequential stage: job 1 cancelled, job 2
/// never starts, nothing leaks.
#[tokio::test(start_paused = true)]
async fn cancel_mid_run() {
    let h = harness();
    h.cluster.script(
        "first",
        JobScript { polls_before_finish: None, ..Default::default() },
    );
    h.cluster.script("second", JobScript::default());

    let workflow = one_stage_workflow(
        "ci",
        false,
        vec![
            freestyle_job("first", 600, vec![], vec![]),
            freestyle_job("second", 600, vec![], vec![]),
        ],
    );
    let task = h.materializer.create_task("alice", workflow).await.unwrap();
    let handle = h.manager.start_task(task);

    let cluster = h.cluster.clone();
    wait_until("job one running", move || {
        cluster.observe_count.load(Ordering::SeqCst) > 0
    })
    .await;
    h.manager.cancel_task("ci", 1, "bob").unwrap();

    let settled = handle.await.unwrap();
    assert_eq!(settled.status, Status::Cancelled);
    assert_eq!(settled.task_revoker, "bob");
    assert_eq!(settled.stages[0].jobs[0].status, Status::Cancelled);
    assert_eq!(settled.stages[0].jobs[1].status, Status::Cancelled);
    // the second job never reached the cluster
    assert_eq!(h.cluster.workloads_created.load(Ordering::SeqCst), 1);

    wait_until("resource cleanup", || h.cluster.live_resources() == 0).await;
}

/// An output exported by stage 1 arrives as a concrete env value in stage
/// 2's executor document.
#[tokio::test(start_paused = true)]
async fn cross_stage_output_dependency() {
    let h = harness();
    h.cluster.script(
        "build",
        JobScript {
            termination_message: "IMAGE: foo:1\n".to_string(),
            ..Default::default()
        },
    );
    h.cluster.script("verify", JobScript::default());

    let mut workflow = one_stage_workflow(
        "ci",
        false,
        vec![freestyle_job("build", 60, vec![], vec!["IMAGE"])],
    );
    workflow.stages.push(WorkflowStage {
        name: "stage-2".to_string(),
        parallel: false,
        approval: None,
        jobs: vec![freestyle_job(
            "verify",
            60,
            vec![KeyVal {
                key: "IMAGE".to_string(),
                value: "$(workflow.build.IMAGE)".to_string(),
                is_credential: false,
            }],
            vec![],
        )],
    });

    let task = h.materializer.create_task("alice", workflow).await.unwrap();
    let settled = h.manager.start_task(task).await.unwrap();
    assert_eq!(settled.status, Status::Passed);

    let verify_label = JobLabel {
        workflow_name: "ci".to_string(),
        task_id: 1,
        job_type: JobType::Freestyle,
        job_name: "verify".to_string(),
    };
    let payload = h
        .cluster
        .configmap_payload(&verify_label)
        .expect("verify configmap payload recorded");
    let doc: controller::workload::JobContext = serde_yaml::from_str(&payload).unwrap();
    assert!(doc.envs.contains(&"IMAGE=foo:1".to_string()), "envs: {:?}", doc.envs);
}

// ---------------------------------------------------------------------------
// materializer properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn task_ids_are_monotonic_per_workflow() {
    let h = harness();
    let first = h
        .materializer
        .create_task("alice", one_stage_workflow("ci", false, vec![freestyle_job("b", 60, vec![], vec![])]))
        .await
        .unwrap();
    let second = h
        .materializer
        .create_task("alice", one_stage_workflow("ci", false, vec![freestyle_job("b", 60, vec![], vec![])]))
        .await
        .unwrap();
    assert!(first.task_id < second.task_id);
}

#[tokio::test]
async fn origin_args_survive_rendering_untouched() {
    let h = harness();
    let workflow = one_stage_workflow(
        "ci",
        false,
        vec![freestyle_job(
            "build",
            60,
            vec![KeyVal {
                key: "TAG".to_string(),
                value: "${workflow.name}-${task_id}".to_string(),
                is_credential: false,
            }],
            vec![],
        )],
    );
    let before = serde_yaml::to_string(&workflow).unwrap();
    let task = h.materializer.create_task("alice", workflow).await.unwrap();

    // origin is the pre-render document, bit for bit
    assert_eq!(serde_yaml::to_string(&task.origin_workflow_args).unwrap(), before);

    // while the materialized job saw the rendered value
    let controller::model::JobTaskSpec::Freestyle(spec) = &task.stages[0].jobs[0].spec else {
        panic!("expected freestyle job");
    };
    assert_eq!(spec.properties.envs[0].value, "ci-1");

    // and a clone reproduces the origin exactly
    let cloned = h.materializer.clone_task("ci", task.task_id).await.unwrap();
    assert_eq!(serde_yaml::to_string(&cloned).unwrap(), before);
}

#[tokio::test]
async fn multi_run_false_refuses_concurrent_tasks() {
    let h = harness();
    let mut workflow =
        one_stage_workflow("solo", false, vec![freestyle_job("b", 60, vec![], vec![])]);
    workflow.multi_run = false;

    h.materializer.create_task("alice", workflow.clone()).await.unwrap();
    // first task is still non-terminal in the store
    let err = h.materializer.create_task("alice", workflow).await.unwrap_err();
    assert!(matches!(err, Error::CreateTask(_)));
}

#[tokio::test]
async fn skipped_jobs_and_empty_stages_are_dropped() {
    let h = harness();
    let mut skipped = freestyle_job("skipped", 60, vec![], vec![]);
    skipped.skipped = true;

    let mut workflow = one_stage_workflow(
        "ci",
        false,
        vec![freestyle_job("build", 60, vec![], vec![]), skipped.clone()],
    );
    workflow.stages.push(WorkflowStage {
        name: "all-skipped".to_string(),
        parallel: false,
        approval: None,
        jobs: vec![{
            let mut job = skipped;
            job.name = "other".to_string();
            job
        }],
    });

    // second stage has no runnable job: definition lint rejects the workflow
    assert!(h.materializer.create_task("alice", workflow.clone()).await.is_err());

    workflow.stages[1].jobs[0].skipped = false;
    workflow.stages[1].jobs[0].name = "kept".to_string();
    let task = h.materializer.create_task("alice", workflow).await.unwrap();
    assert_eq!(task.stages.len(), 2);
    assert_eq!(task.stages[0].jobs.len(), 1);
}

#[tokio::test]
async fn custom_deploy_patches_images() {
    let h = harness();
    let spec: serde_yaml::Value = serde_yaml::from_str(
        r"
namespace: prod
cluster_id: remote-1
skip_check_run_status: false
targets:
  - target: deployment/api/api-server
    image: repo/api:42
",
    )
    .unwrap();
    let workflow = one_stage_workflow(
        "deploy",
        false,
        vec![Job {
            name: "rollout".to_string(),
            job_type: JobType::CustomDeploy,
            skipped: false,
            spec,
        }],
    );

    let task = h.materializer.create_task("alice", workflow).await.unwrap();
    let settled = h.manager.start_task(task).await.unwrap();
    assert_eq!(settled.status, Status::Passed);

    let patches = h.cluster.image_patches.lock().unwrap();
    assert_eq!(patches.len(), 1);
    let (namespace, target, image) = &patches[0];
    assert_eq!(namespace, "prod");
    assert_eq!(target.workload_name, "api");
    assert_eq!(target.container_name, "api-server");
    assert_eq!(image, "repo/api:42");
}
