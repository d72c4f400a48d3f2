//! Task, stage, and job status plus the aggregation rule that rolls child
//! statuses up into their parent.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution status shared by tasks, stages, and jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Created,
    Queued,
    Running,
    #[serde(rename = "waitingapprove")]
    WaitingApproval,
    Passed,
    Failed,
    Cancelled,
    Timeout,
    Reject,
}

impl Status {
    /// Terminal statuses never change again; the owning document is frozen
    /// once it reaches one.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Passed | Status::Failed | Status::Cancelled | Status::Timeout | Status::Reject
        )
    }

    /// Roll child statuses up into a parent status. First rule that matches
    /// wins: Cancelled, Reject, Timeout, Failed, all-Passed, any still in
    /// flight, otherwise Created.
    pub fn aggregate<I>(children: I) -> Status
    where
        I: IntoIterator<Item = Status>,
    {
        let mut saw_any = false;
        let mut all_passed = true;
        let mut in_flight = false;
        let mut failed = false;
        let mut timeout = false;
        let mut reject = false;

        for status in children {
            saw_any = true;
            match status {
                Status::Cancelled => return Status::Cancelled,
                Status::Reject => reject = true,
                Status::Timeout => timeout = true,
                Status::Failed => failed = true,
                Status::Passed => continue,
                Status::Running | Status::Queued | Status::WaitingApproval => in_flight = true,
                Status::Created => {}
            }
            all_passed = false;
        }

        if reject {
            return Status::Reject;
        }
        if timeout {
            return Status::Timeout;
        }
        if failed {
            return Status::Failed;
        }
        if saw_any && all_passed {
            return Status::Passed;
        }
        if in_flight {
            return Status::Running;
        }
        Status::Created
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Created => "created",
            Status::Queued => "queued",
            Status::Running => "running",
            Status::WaitingApproval => "waitingapprove",
            Status::Passed => "passed",
            Status::Failed => "failed",
            Status::Cancelled => "cancelled",
            Status::Timeout => "timeout",
            Status::Reject => "reject",
        };
        f.write_str(s)
    }
}
