use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::time::Duration;

use super::{format_timestamp, StoreError};
use crate::context::cache::{expiry_from, ContextCache};
use crate::context::PrContext;
use crate::github::RepoRef;

/// `SQLite`-backed [`ContextCache`], so contexts survive between CLI runs.
#[derive(Clone)]
pub struct SqliteContextCache {
    pool: SqlitePool,
}

impl SqliteContextCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContextCache for SqliteContextCache {
    async fn get(
        &self,
        repo: &RepoRef,
        pr_number: u64,
        commit_sha: &str,
    ) -> Result<Option<PrContext>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT context_json FROM pr_context
             WHERE owner = ?1 AND repo = ?2 AND pr_number = ?3 AND commit_sha = ?4
               AND expires_at > ?5",
        )
        .bind(&repo.owner)
        .bind(&repo.repo)
        .bind(pr_number as i64)
        .bind(commit_sha)
        .bind(format_timestamp(Utc::now()))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((json,)) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, context: &PrContext, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = expiry_from(Utc::now(), ttl);
        sqlx::query(
            "INSERT OR REPLACE INTO pr_context
             (owner, repo, pr_number, commit_sha, context_json, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&context.owner)
        .bind(&context.repo)
        .bind(context.pr_number as i64)
        .bind(&context.commit_sha)
        .bind(serde_json::to_string(context)?)
        .bind(format_timestamp(expires_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn invalidate(&self, repo: &RepoRef, pr_number: u64) -> Result<usize, StoreError> {
        let result =
            sqlx::query("DELETE FROM pr_context WHERE owner = ?1 AND repo = ?2 AND pr_number = ?3")
                .bind(&repo.owner)
                .bind(&repo.repo)
                .bind(pr_number as i64)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn cleanup_expired(&self) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM pr_context WHERE expires_at <= ?1")
            .bind(format_timestamp(Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}
