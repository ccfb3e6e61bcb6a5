//! Plan lifecycle: the status state machine and the store that enforces it.
//!
//! ```text
//! pending ──approve──▶ executing ──complete──▶ completed
//!    │                     └──────fail───────▶ failed
//!    └──reject / expire──▶ rejected
//! ```
//!
//! Plans are never deleted; terminal plans stay as an audit trail.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::{ChangePlan, Violation};
use crate::github::RepoRef;
use crate::persistence::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Rejected,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Executing => "executing",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
            PlanStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PlanStatus::Pending),
            "executing" => Some(PlanStatus::Executing),
            "completed" => Some(PlanStatus::Completed),
            "failed" => Some(PlanStatus::Failed),
            "rejected" => Some(PlanStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The only ways a stored plan's status may change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    /// pending → executing
    Approve { approver: String },
    /// executing → completed
    Complete { pr_number: u64 },
    /// executing → failed
    Fail { error: String },
    /// pending → rejected, by a human or by expiry
    Reject { reason: String },
}

impl StatusUpdate {
    /// Status the plan must currently be in.
    pub fn requires(&self) -> PlanStatus {
        match self {
            StatusUpdate::Approve { .. } | StatusUpdate::Reject { .. } => PlanStatus::Pending,
            StatusUpdate::Complete { .. } | StatusUpdate::Fail { .. } => PlanStatus::Executing,
        }
    }

    pub fn target(&self) -> PlanStatus {
        match self {
            StatusUpdate::Approve { .. } => PlanStatus::Executing,
            StatusUpdate::Complete { .. } => PlanStatus::Completed,
            StatusUpdate::Fail { .. } => PlanStatus::Failed,
            StatusUpdate::Reject { .. } => PlanStatus::Rejected,
        }
    }
}

/// A plan plus the audit trail of where it came from and what happened to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChangePlan {
    pub id: String,
    pub owner: String,
    pub repo: String,
    pub pr_number: u64,
    /// Comment the plan was posted under
    pub comment_id: Option<u64>,
    pub triggered_by: String,
    /// Slash command that requested the plan
    pub command: String,
    pub plan: ChangePlan,
    pub violations: Vec<Violation>,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub result_pr_number: Option<u64>,
    /// Failure text, or the rejection reason
    pub error: Option<String>,
}

impl StoredChangePlan {
    /// Wrap a freshly generated plan as `pending`.
    pub fn new(
        repo: &RepoRef,
        pr_number: u64,
        plan: ChangePlan,
        violations: Vec<Violation>,
        triggered_by: &str,
        command: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: plan.id.clone(),
            owner: repo.owner.clone(),
            repo: repo.repo.clone(),
            pr_number,
            comment_id: None,
            triggered_by: triggered_by.to_string(),
            command: command.to_string(),
            plan,
            violations,
            status: PlanStatus::Pending,
            created_at: now,
            updated_at: now,
            approved_by: None,
            approved_at: None,
            result_pr_number: None,
            error: None,
        }
    }

    pub fn repo_ref(&self) -> RepoRef {
        RepoRef::new(&self.owner, &self.repo)
    }

    /// Apply `update` if the current status allows it.
    pub fn apply(&mut self, update: &StatusUpdate, now: DateTime<Utc>) -> Result<(), StoreError> {
        if self.status != update.requires() {
            return Err(StoreError::InvalidTransition {
                id: self.id.clone(),
                status: self.status,
            });
        }
        match update {
            StatusUpdate::Approve { approver } => {
                self.approved_by = Some(approver.clone());
                self.approved_at = Some(now);
            }
            StatusUpdate::Complete { pr_number } => self.result_pr_number = Some(*pr_number),
            StatusUpdate::Fail { error } => self.error = Some(error.clone()),
            StatusUpdate::Reject { reason } => self.error = Some(reason.clone()),
        }
        self.status = update.target();
        self.updated_at = now;
        Ok(())
    }
}

/// Persistence for stored plans. Status changes only through [`PlanStore::update_status`].
#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn create(&self, plan: &StoredChangePlan) -> Result<(), StoreError>;

    async fn get_by_id(&self, id: &str) -> Result<Option<StoredChangePlan>, StoreError>;

    async fn get_by_comment_id(
        &self,
        repo: &RepoRef,
        comment_id: u64,
    ) -> Result<Option<StoredChangePlan>, StoreError>;

    async fn get_pending_for_pr(
        &self,
        repo: &RepoRef,
        pr_number: u64,
    ) -> Result<Vec<StoredChangePlan>, StoreError>;

    /// Record the PR comment the plan was posted under.
    async fn set_comment_id(&self, id: &str, comment_id: u64) -> Result<(), StoreError>;

    /// Apply a state machine transition. Fails with
    /// [`StoreError::InvalidTransition`] when the plan is not in the required
    /// status, which is what stops a duplicate approval from executing twice.
    async fn update_status(
        &self,
        id: &str,
        update: StatusUpdate,
    ) -> Result<StoredChangePlan, StoreError>;

    /// Plans still `pending` that were created before `cutoff`.
    async fn get_expired_plans(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StoredChangePlan>, StoreError>;
}
