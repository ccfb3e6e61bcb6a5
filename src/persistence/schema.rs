use sqlx::SqlitePool;

use super::StoreError;

/// Create all tables idempotently. Safe to run on every startup.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS change_plan (
    id                TEXT PRIMARY KEY NOT NULL,
    owner             TEXT NOT NULL,
    repo              TEXT NOT NULL,
    pr_number         INTEGER NOT NULL,
    comment_id        INTEGER,
    triggered_by      TEXT NOT NULL,
    command           TEXT NOT NULL,
    plan_json         TEXT NOT NULL,
    violations_json   TEXT NOT NULL,
    status            TEXT NOT NULL CHECK(status IN ('pending','executing','completed','failed','rejected')),
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL,
    approved_by       TEXT,
    approved_at       TEXT,
    result_pr_number  INTEGER,
    error             TEXT
);

CREATE TABLE IF NOT EXISTS pr_context (
    owner             TEXT NOT NULL,
    repo              TEXT NOT NULL,
    pr_number         INTEGER NOT NULL,
    commit_sha        TEXT NOT NULL,
    context_json      TEXT NOT NULL,
    expires_at        TEXT NOT NULL,
    PRIMARY KEY (owner, repo, pr_number, commit_sha)
);

CREATE INDEX IF NOT EXISTS idx_plan_pr ON change_plan(owner, repo, pr_number);
CREATE INDEX IF NOT EXISTS idx_plan_comment ON change_plan(owner, repo, comment_id);
CREATE INDEX IF NOT EXISTS idx_plan_status ON change_plan(status, created_at);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
