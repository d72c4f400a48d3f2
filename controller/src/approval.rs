//! Approval gating.
//!
//! Stages waiting on approval register with the hub; the REST surface feeds
//! decisions in through [`ApprovalHub::submit`]. The waiting stage counts
//! distinct approvals from the allowed user set, treats a single reject as
//! immediately terminal, and gives up when the gate's timeout elapses.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::jobs::now_unix;
use crate::model::{Approval, ApprovalDecisionKind, Status};

/// Minutes granted when a gate declares no timeout of its own.
const DEFAULT_APPROVAL_TIMEOUT_MINUTES: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApprovalKey {
    pub workflow_name: String,
    pub task_id: i64,
    pub stage_name: String,
}

#[derive(Debug, Clone)]
pub struct ApprovalDecision {
    pub user_id: String,
    pub user_name: String,
    pub approve: bool,
    pub comment: String,
}

#[derive(Debug, Default)]
pub struct ApprovalHub {
    waiters: Mutex<HashMap<ApprovalKey, mpsc::UnboundedSender<ApprovalDecision>>>,
}

impl ApprovalHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the gate: decisions for `key` are accepted from this point on.
    /// Register before announcing `WaitingApproval` anywhere, so no decision
    /// can fall between the announcement and the wait.
    pub fn register(&self, key: ApprovalKey) -> mpsc::UnboundedReceiver<ApprovalDecision> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.waiters.lock().expect("approval hub poisoned").insert(key, tx);
        rx
    }

    fn unregister(&self, key: &ApprovalKey) {
        self.waiters.lock().expect("approval hub poisoned").remove(key);
    }

    /// Route a decision to the stage waiting on `key`. Fails when nothing is
    /// waiting: the stage never asked for approval, already settled, or the
    /// gate timed out.
    pub fn submit(&self, key: &ApprovalKey, decision: ApprovalDecision) -> Result<()> {
        let waiters = self.waiters.lock().expect("approval hub poisoned");
        let sender = waiters.get(key).ok_or_else(|| {
            Error::Approval(format!(
                "no approval pending for {}/{} stage {}",
                key.workflow_name, key.task_id, key.stage_name
            ))
        })?;
        sender
            .send(decision)
            .map_err(|_| Error::Approval("approval waiter went away".to_string()))
    }
}

/// Outcome of an approval gate: `Running` when approved, otherwise the
/// terminal stage status, plus the gate with recorded decisions.
pub struct ApprovalVerdict {
    pub status: Status,
    pub approval: Approval,
}

/// Block until the gate settles: enough distinct approvals, one reject, the
/// gate timeout, or task cancellation. `rx` comes from
/// [`ApprovalHub::register`] for the same key.
pub async fn wait_for_decisions(
    hub: &ApprovalHub,
    key: ApprovalKey,
    mut rx: mpsc::UnboundedReceiver<ApprovalDecision>,
    mut approval: Approval,
    cancel: &CancellationToken,
) -> ApprovalVerdict {
    let minutes = if approval.timeout == 0 {
        DEFAULT_APPROVAL_TIMEOUT_MINUTES
    } else {
        approval.timeout
    };
    let deadline = tokio::time::Instant::now() + Duration::from_secs(minutes * 60);
    let needed = approval.needed_approvers.max(1);

    let mut approved: HashSet<String> = HashSet::new();

    let status = loop {
        let decision = tokio::select! {
            () = cancel.cancelled() => break Status::Cancelled,
            () = tokio::time::sleep_until(deadline) => break Status::Timeout,
            decision = rx.recv() => match decision {
                Some(decision) => decision,
                None => break Status::Cancelled,
            },
        };

        let Some(user) = approval
            .approve_users
            .iter_mut()
            .find(|u| u.user_id == decision.user_id)
        else {
            warn!(
                stage = %key.stage_name,
                user = %decision.user_id,
                "approval from user outside the approver set ignored"
            );
            continue;
        };

        user.decision = Some(if decision.approve {
            ApprovalDecisionKind::Approve
        } else {
            ApprovalDecisionKind::Reject
        });
        user.comment = decision.comment;
        user.operation_time = now_unix();
        if !decision.user_name.is_empty() {
            user.user_name = decision.user_name;
        }

        if !decision.approve {
            info!(stage = %key.stage_name, user = %decision.user_id, "stage rejected");
            break Status::Reject;
        }

        approved.insert(decision.user_id);
        if approved.len() >= needed {
            info!(stage = %key.stage_name, approvals = approved.len(), "stage approved");
            break Status::Running;
        }
    };

    hub.unregister(&key);
    ApprovalVerdict { status, approval }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ApprovalUser;

    fn gate(needed: usize) -> Approval {
        Approval {
            enabled: true,
            needed_approvers: needed,
            timeout: 1,
            approve_users: vec![
                ApprovalUser { user_id: "u1".to_string(), ..Default::default() },
                ApprovalUser { user_id: "u2".to_string(), ..Default::default() },
                ApprovalUser { user_id: "u3".to_string(), ..Default::default() },
            ],
            description: String::new(),
        }
    }

    fn key() -> ApprovalKey {
        ApprovalKey {
            workflow_name: "ci".to_string(),
            task_id: 1,
            stage_name: "release".to_string(),
        }
    }

    fn decision(user: &str, approve: bool) -> ApprovalDecision {
        ApprovalDecision {
            user_id: user.to_string(),
            user_name: String::new(),
            approve,
            comment: String::new(),
        }
    }

    #[tokio::test]
    async fn enough_distinct_approvals_pass_the_gate() {
        let hub = ApprovalHub::new();
        let cancel = CancellationToken::new();
        let rx = hub.register(key());

        hub.submit(&key(), decision("u1", true)).unwrap();
        hub.submit(&key(), decision("u1", true)).unwrap(); // duplicate, ignored
        hub.submit(&key(), decision("u2", true)).unwrap();

        let verdict = wait_for_decisions(&hub, key(), rx, gate(2), &cancel).await;
        assert_eq!(verdict.status, Status::Running);
        let decided: Vec<_> = verdict
            .approval
            .approve_users
            .iter()
            .filter(|u| u.decision.is_some())
            .collect();
        assert_eq!(decided.len(), 2);
    }

    #[tokio::test]
    async fn single_reject_is_terminal() {
        let hub = ApprovalHub::new();
        let cancel = CancellationToken::new();
        let rx = hub.register(key());
        hub.submit(&key(), decision("u3", false)).unwrap();
        let verdict = wait_for_decisions(&hub, key(), rx, gate(2), &cancel).await;
        assert_eq!(verdict.status, Status::Reject);
    }

    #[tokio::test]
    async fn outsiders_cannot_decide() {
        let hub = ApprovalHub::new();
        let cancel = CancellationToken::new();
        let rx = hub.register(key());
        hub.submit(&key(), decision("intruder", true)).unwrap();
        hub.submit(&key(), decision("u1", true)).unwrap();
        let verdict = wait_for_decisions(&hub, key(), rx, gate(1), &cancel).await;
        assert_eq!(verdict.status, Status::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn gate_times_out() {
        let hub = ApprovalHub::new();
        let cancel = CancellationToken::new();
        let rx = hub.register(key());
        let verdict = wait_for_decisions(&hub, key(), rx, gate(2), &cancel).await;
        assert_eq!(verdict.status, Status::Timeout);
        // the gate is closed again
        assert!(hub.submit(&key(), decision("u1", true)).is_err());
    }

    #[test]
    fn submit_without_waiter_errors() {
        let hub = ApprovalHub::new();
        assert!(hub.submit(&key(), decision("u1", true)).is_err());
    }
}
