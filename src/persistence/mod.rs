//! SQLite persistence for plans and cached PR contexts.

pub mod context_repo;
pub mod plan_repo;
pub mod schema;

pub use context_repo::SqliteContextCache;
pub use plan_repo::SqlitePlanStore;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use thiserror::Error;

use crate::plan::PlanStatus;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to (de)serialize stored record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Plan {0} not found")]
    NotFound(String),

    #[error("Plan {0} already exists")]
    Duplicate(String),

    #[error("plan {id} is already {status}")]
    InvalidTransition { id: String, status: PlanStatus },

    #[error("Corrupt stored record: {0}")]
    Corrupt(String),
}

/// Open (creating if needed) the database file and bootstrap the schema.
pub async fn connect(path: &Path) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;
    schema::bootstrap_schema(&pool).await?;
    Ok(pool)
}

/// In-memory database for tests. One connection, so every query sees the same data.
#[cfg(test)]
pub async fn connect_memory() -> Result<SqlitePool, StoreError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    schema::bootstrap_schema(&pool).await?;
    Ok(pool)
}

pub(crate) fn parse_timestamp(
    value: &str,
    field: &str,
) -> Result<chrono::DateTime<chrono::Utc>, StoreError> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid {}: {}", field, e)))
}

/// Fixed-width UTC timestamps so stored values also sort correctly as text.
pub(crate) fn format_timestamp(value: chrono::DateTime<chrono::Utc>) -> String {
    value.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
