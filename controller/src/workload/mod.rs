pub mod backend;
pub mod context;
pub mod kube;
pub mod labels;

pub use backend::{
    BackendFactory, DeployTarget, JobOutput, SentinelState, WorkloadBackend, WorkloadObservation,
    WorkloadSpec,
};
pub use context::{JobContext, CONFIG_MAP_KEY};
pub use labels::{workload_name, JobLabel};
