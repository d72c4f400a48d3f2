//! Labels and naming for cluster resources owned by a job task.
//!
//! The four-part label set identifies every configmap and workload a job
//! creates and doubles as the deletion selector, so cleanup never needs to
//! remember resource names.

use std::collections::BTreeMap;

use crate::model::JobType;

pub const LABEL_WORKFLOW_NAME: &str = "workflow-name";
pub const LABEL_TASK_ID: &str = "task-id";
pub const LABEL_JOB_TYPE: &str = "job-type";
pub const LABEL_JOB_NAME: &str = "job-name";

const MAX_K8S_NAME_LENGTH: usize = 63;

/// Identity of a job task's cluster resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLabel {
    pub workflow_name: String,
    pub task_id: i64,
    pub job_type: JobType,
    pub job_name: String,
}

impl JobLabel {
    #[must_use]
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_WORKFLOW_NAME.to_string(), sanitize_label_value(&self.workflow_name)),
            (LABEL_TASK_ID.to_string(), self.task_id.to_string()),
            (LABEL_JOB_TYPE.to_string(), sanitize_label_value(self.job_type.as_str())),
            (LABEL_JOB_NAME.to_string(), sanitize_label_value(&self.job_name)),
        ])
    }

    /// Selector string matching exactly this job's resources.
    #[must_use]
    pub fn selector(&self) -> String {
        self.labels()
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Resource name for a job's configmap and workload.
#[must_use]
pub fn workload_name(workflow_name: &str, task_id: i64, job_name: &str) -> String {
    let base = sanitize_label_value(&format!("{workflow_name}-{task_id}-{job_name}"));
    ensure_name_length(&base, task_id)
}

fn ensure_name_length(name: &str, task_id: i64) -> String {
    if name.len() <= MAX_K8S_NAME_LENGTH {
        return name.to_string();
    }
    // keep the tail distinctive: hash of the full name plus the task id
    let digest = fnv1a(name.as_bytes());
    let suffix = format!("-{task_id}-{digest:08x}");
    let keep = MAX_K8S_NAME_LENGTH - suffix.len();
    let mut out: String = name.chars().take(keep).collect();
    out.push_str(&suffix);
    out
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in bytes {
        hash ^= u32::from(*b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Lowercase, swap separators for hyphens, drop anything a label value may
/// not contain, and trim to the 63-character limit.
#[must_use]
pub fn sanitize_label_value(input: &str) -> String {
    let mut sanitized: String = input
        .to_lowercase()
        .replace([' ', '_'], "-")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.'))
        .collect();

    while sanitized.starts_with(|c: char| !c.is_ascii_alphanumeric()) {
        sanitized.remove(0);
    }
    while sanitized.ends_with(|c: char| !c.is_ascii_alphanumeric()) {
        sanitized.pop();
    }
    if sanitized.len() > MAX_K8S_NAME_LENGTH {
        sanitized.truncate(MAX_K8S_NAME_LENGTH);
        while sanitized.ends_with(|c: char| !c.is_ascii_alphanumeric()) {
            sanitized.pop();
        }
    }
    sanitized
}
