use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use super::{format_timestamp, parse_timestamp, StoreError};
use crate::github::RepoRef;
use crate::plan::{PlanStatus, PlanStore, StatusUpdate, StoredChangePlan};

/// `SQLite`-backed [`PlanStore`].
///
/// Status updates are conditional on the status read beforehand
/// (`WHERE status = ?`), so two processes racing to approve the same plan
/// cannot both move it out of `pending`.
#[derive(Clone)]
pub struct SqlitePlanStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct PlanRow {
    id: String,
    owner: String,
    repo: String,
    pr_number: i64,
    comment_id: Option<i64>,
    triggered_by: String,
    command: String,
    plan_json: String,
    violations_json: String,
    status: String,
    created_at: String,
    updated_at: String,
    approved_by: Option<String>,
    approved_at: Option<String>,
    result_pr_number: Option<i64>,
    error: Option<String>,
}

impl PlanRow {
    fn into_plan(self) -> Result<StoredChangePlan, StoreError> {
        let status = PlanStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("invalid plan status: {}", self.status)))?;
        let approved_at = self
            .approved_at
            .as_deref()
            .map(|s| parse_timestamp(s, "approved_at"))
            .transpose()?;

        Ok(StoredChangePlan {
            id: self.id,
            owner: self.owner,
            repo: self.repo,
            pr_number: self.pr_number as u64,
            comment_id: self.comment_id.map(|id| id as u64),
            triggered_by: self.triggered_by,
            command: self.command,
            plan: serde_json::from_str(&self.plan_json)?,
            violations: serde_json::from_str(&self.violations_json)?,
            status,
            created_at: parse_timestamp(&self.created_at, "created_at")?,
            updated_at: parse_timestamp(&self.updated_at, "updated_at")?,
            approved_by: self.approved_by,
            approved_at,
            result_pr_number: self.result_pr_number.map(|n| n as u64),
            error: self.error,
        })
    }
}

impl SqlitePlanStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a transition already applied to `plan`, only if the stored
    /// status is still `expected`. Zero affected rows means another writer
    /// won the race.
    async fn write_transition(
        &self,
        plan: &StoredChangePlan,
        expected: PlanStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE change_plan
             SET status = ?1, updated_at = ?2, approved_by = ?3, approved_at = ?4,
                 result_pr_number = ?5, error = ?6
             WHERE id = ?7 AND status = ?8",
        )
        .bind(plan.status.as_str())
        .bind(format_timestamp(plan.updated_at))
        .bind(&plan.approved_by)
        .bind(plan.approved_at.map(format_timestamp))
        .bind(plan.result_pr_number.map(|n| n as i64))
        .bind(&plan.error)
        .bind(&plan.id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Someone else moved the plan between our read and write.
            let current = self
                .get_by_id(&plan.id)
                .await?
                .ok_or_else(|| StoreError::NotFound(plan.id.clone()))?;
            debug!(status = %current.status, "lost status update race");
            return Err(StoreError::InvalidTransition {
                id: plan.id.clone(),
                status: current.status,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PlanStore for SqlitePlanStore {
    #[instrument(skip(self, plan), fields(plan = %plan.id))]
    async fn create(&self, plan: &StoredChangePlan) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO change_plan (id, owner, repo, pr_number, comment_id, triggered_by,
             command, plan_json, violations_json, status, created_at, updated_at,
             approved_by, approved_at, result_pr_number, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        )
        .bind(&plan.id)
        .bind(&plan.owner)
        .bind(&plan.repo)
        .bind(plan.pr_number as i64)
        .bind(plan.comment_id.map(|id| id as i64))
        .bind(&plan.triggered_by)
        .bind(&plan.command)
        .bind(serde_json::to_string(&plan.plan)?)
        .bind(serde_json::to_string(&plan.violations)?)
        .bind(plan.status.as_str())
        .bind(format_timestamp(plan.created_at))
        .bind(format_timestamp(plan.updated_at))
        .bind(&plan.approved_by)
        .bind(plan.approved_at.map(format_timestamp))
        .bind(plan.result_pr_number.map(|n| n as i64))
        .bind(&plan.error)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::Duplicate(plan.id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<StoredChangePlan>, StoreError> {
        let row: Option<PlanRow> = sqlx::query_as("SELECT * FROM change_plan WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(PlanRow::into_plan).transpose()
    }

    async fn get_by_comment_id(
        &self,
        repo: &RepoRef,
        comment_id: u64,
    ) -> Result<Option<StoredChangePlan>, StoreError> {
        let row: Option<PlanRow> = sqlx::query_as(
            "SELECT * FROM change_plan WHERE owner = ?1 AND repo = ?2 AND comment_id = ?3 LIMIT 1",
        )
        .bind(&repo.owner)
        .bind(&repo.repo)
        .bind(comment_id as i64)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PlanRow::into_plan).transpose()
    }

    async fn get_pending_for_pr(
        &self,
        repo: &RepoRef,
        pr_number: u64,
    ) -> Result<Vec<StoredChangePlan>, StoreError> {
        let rows: Vec<PlanRow> = sqlx::query_as(
            "SELECT * FROM change_plan
             WHERE owner = ?1 AND repo = ?2 AND pr_number = ?3 AND status = 'pending'
             ORDER BY created_at",
        )
        .bind(&repo.owner)
        .bind(&repo.repo)
        .bind(pr_number as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PlanRow::into_plan).collect()
    }

    #[instrument(skip(self))]
    async fn set_comment_id(&self, id: &str, comment_id: u64) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE change_plan SET comment_id = ?1 WHERE id = ?2")
            .bind(comment_id as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(target = %update.target()))]
    async fn update_status(
        &self,
        id: &str,
        update: StatusUpdate,
    ) -> Result<StoredChangePlan, StoreError> {
        let mut plan = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let expected = plan.status;
        plan.apply(&update, Utc::now())?;
        self.write_transition(&plan, expected).await?;
        Ok(plan)
    }

    async fn get_expired_plans(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StoredChangePlan>, StoreError> {
        let rows: Vec<PlanRow> = sqlx::query_as(
            "SELECT * FROM change_plan WHERE status = 'pending' AND created_at < ?1
             ORDER BY created_at",
        )
        .bind(format_timestamp(cutoff))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PlanRow::into_plan).collect()
    }
}
