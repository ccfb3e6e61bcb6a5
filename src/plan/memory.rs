//! Process-local [`PlanStore`] used by unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::store::{PlanStatus, PlanStore, StatusUpdate, StoredChangePlan};
use crate::github::RepoRef;
use crate::persistence::StoreError;

/// Process-local plan store. A single lock covers read-check-write, so
/// concurrent approvals of one plan cannot both win.
#[derive(Default)]
pub struct MemoryPlanStore {
    plans: Mutex<HashMap<String, StoredChangePlan>>,
}

impl MemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StoredChangePlan>> {
        self.plans.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PlanStore for MemoryPlanStore {
    async fn create(&self, plan: &StoredChangePlan) -> Result<(), StoreError> {
        let mut plans = self.lock();
        if plans.contains_key(&plan.id) {
            return Err(StoreError::Duplicate(plan.id.clone()));
        }
        plans.insert(plan.id.clone(), plan.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<StoredChangePlan>, StoreError> {
        Ok(self.lock().get(id).cloned())
    }

    async fn get_by_comment_id(
        &self,
        repo: &RepoRef,
        comment_id: u64,
    ) -> Result<Option<StoredChangePlan>, StoreError> {
        Ok(self
            .lock()
            .values()
            .find(|p| {
                p.owner == repo.owner && p.repo == repo.repo && p.comment_id == Some(comment_id)
            })
            .cloned())
    }

    async fn get_pending_for_pr(
        &self,
        repo: &RepoRef,
        pr_number: u64,
    ) -> Result<Vec<StoredChangePlan>, StoreError> {
        let mut pending: Vec<StoredChangePlan> = self
            .lock()
            .values()
            .filter(|p| {
                p.owner == repo.owner
                    && p.repo == repo.repo
                    && p.pr_number == pr_number
                    && p.status == PlanStatus::Pending
            })
            .cloned()
            .collect();
        pending.sort_by_key(|p| p.created_at);
        Ok(pending)
    }

    async fn set_comment_id(&self, id: &str, comment_id: u64) -> Result<(), StoreError> {
        let mut plans = self.lock();
        let plan = plans
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        plan.comment_id = Some(comment_id);
        Ok(())
    }

    async fn update_status(
        &self,
        id: &str,
        update: StatusUpdate,
    ) -> Result<StoredChangePlan, StoreError> {
        let mut plans = self.lock();
        let plan = plans
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        plan.apply(&update, Utc::now())?;
        Ok(plan.clone())
    }

    async fn get_expired_plans(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<StoredChangePlan>, StoreError> {
        Ok(self
            .lock()
            .values()
            .filter(|p| p.status == PlanStatus::Pending && p.created_at < cutoff)
            .cloned()
            .collect())
    }
}
