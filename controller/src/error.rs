//! Crate-wide error type and result alias.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("workflow not found: {0}")]
    FindWorkflow(String),

    #[error("task counter: {0}")]
    GetCounter(String),

    #[error("create task: {0}")]
    CreateTask(String),

    #[error("task {workflow_name}/{task_id} not found")]
    FindTask { workflow_name: String, task_id: i64 },

    #[error("validation: {0}")]
    Validation(String),

    #[error("approval: {0}")]
    Approval(String),

    #[error("cluster {cluster_id}: {reason}")]
    Cluster { cluster_id: String, reason: String },

    #[error("kubernetes api: {0}")]
    Kube(#[from] kube::Error),

    #[error("serialization: {0}")]
    Serde(#[from] serde_yaml::Error),

    #[error("store: {0}")]
    Store(String),

    #[error("config: {0}")]
    Config(String),

    #[error("output parse: {0}")]
    OutputParse(String),
}

impl Error {
    /// Cluster-scoped failure with the raw message preserved for the task
    /// error field.
    pub fn cluster(cluster_id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Cluster { cluster_id: cluster_id.into(), reason: reason.to_string() }
    }
}
