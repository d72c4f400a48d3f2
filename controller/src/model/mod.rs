pub mod status;
pub mod task;
pub mod workflow;

pub use status::Status;
pub use task::{
    JobTask, JobTaskCustomDeploySpec, JobTaskDeploySpec, JobTaskFreestyleSpec,
    JobTaskHelmDeploySpec, JobTaskPluginSpec, JobTaskSpec, StageTask, TaskContext, WorkflowTask,
};
pub use workflow::{
    Approval, ApprovalDecisionKind, ApprovalUser, BuildJobSpec, CustomDeployJobSpec,
    DeployJobSpec, DeployTargetArg, FreestyleJobSpec, HelmDeployJobSpec, Job, JobProperties,
    JobSpec, JobType, KeyVal, Output, Param, PluginJobSpec, PluginTemplate, Repository,
    ResourceRequest, ResourceRequestSpec, ServiceAndBuild, ServiceAndImage, Step, Workflow,
    WorkflowHook, WorkflowStage, STEP_TYPE_GIT,
};
