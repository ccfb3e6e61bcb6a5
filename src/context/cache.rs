use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use super::types::PrContext;
use crate::github::RepoRef;
use crate::persistence::StoreError;

/// Cache of assembled contexts keyed by (owner, repo, pr, head sha).
#[async_trait]
pub trait ContextCache: Send + Sync {
    /// Unexpired context for exactly this head commit.
    async fn get(
        &self,
        repo: &RepoRef,
        pr_number: u64,
        commit_sha: &str,
    ) -> Result<Option<PrContext>, StoreError>;

    async fn put(&self, context: &PrContext, ttl: Duration) -> Result<(), StoreError>;

    /// Drop every cached commit of one pull request. Returns how many entries went.
    async fn invalidate(&self, repo: &RepoRef, pr_number: u64) -> Result<usize, StoreError>;

    async fn cleanup_expired(&self) -> Result<usize, StoreError>;
}

/// Longest TTL honoured. Expiry stays a four-digit year, so stored
/// timestamps keep sorting correctly as text.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

pub(crate) fn expiry_from(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl.min(MAX_TTL))
        .unwrap_or_else(|_| chrono::Duration::zero());
    now.checked_add_signed(ttl).unwrap_or(now)
}
