//! Log shipping contract. The backend (object store, ELK, ...) is an
//! external collaborator; shipping failures are never fatal to a job.

use async_trait::async_trait;

use crate::error::Result;

/// Container log of one finished job, tagged for retrieval.
#[derive(Debug, Clone)]
pub struct JobLogEntry {
    pub cluster_id: String,
    pub workflow_name: String,
    pub job_name: String,
    pub task_id: i64,
    pub content: String,
}

#[async_trait]
pub trait LogStore: Send + Sync {
    async fn save(&self, entry: JobLogEntry) -> Result<()>;
}

/// Discards logs; used when no store is wired in.
#[derive(Debug, Default)]
pub struct NoopLogStore;

#[async_trait]
impl LogStore for NoopLogStore {
    async fn save(&self, _entry: JobLogEntry) -> Result<()> {
        Ok(())
    }
}
