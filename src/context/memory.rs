//! Process-local [`ContextCache`] used by unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::cache::{expiry_from, ContextCache};
use super::types::PrContext;
use crate::github::RepoRef;
use crate::persistence::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    owner: String,
    repo: String,
    pr_number: u64,
    commit_sha: String,
}

struct CacheEntry {
    context: PrContext,
    expires_at: DateTime<Utc>,
}

/// Process-local context cache.
#[derive(Default)]
pub struct MemoryContextCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ContextCache for MemoryContextCache {
    async fn get(
        &self,
        repo: &RepoRef,
        pr_number: u64,
        commit_sha: &str,
    ) -> Result<Option<PrContext>, StoreError> {
        let key = CacheKey {
            owner: repo.owner.clone(),
            repo: repo.repo.clone(),
            pr_number,
            commit_sha: commit_sha.to_string(),
        };
        let entries = self.lock();
        Ok(entries
            .get(&key)
            .filter(|entry| entry.expires_at > Utc::now())
            .map(|entry| entry.context.clone()))
    }

    async fn put(&self, context: &PrContext, ttl: Duration) -> Result<(), StoreError> {
        let key = CacheKey {
            owner: context.owner.clone(),
            repo: context.repo.clone(),
            pr_number: context.pr_number,
            commit_sha: context.commit_sha.clone(),
        };
        let mut stored = context.clone();
        stored.from_cache = false;
        self.lock().insert(
            key,
            CacheEntry {
                context: stored,
                expires_at: expiry_from(Utc::now(), ttl),
            },
        );
        Ok(())
    }

    async fn invalidate(&self, repo: &RepoRef, pr_number: u64) -> Result<usize, StoreError> {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| {
            !(key.owner == repo.owner && key.repo == repo.repo && key.pr_number == pr_number)
        });
        Ok(before - entries.len())
    }

    async fn cleanup_expired(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        Ok(before - entries.len())
    }
}
