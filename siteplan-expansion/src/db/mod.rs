//! Database access for siteplan-expansion
//!
//! One SQLite file holds jobs, stage checkpoints, final results, the
//! rationale cache and the site registry. Timestamps are RFC 3339 UTC with
//! microseconds so text comparison orders them.

pub mod cache;
pub mod checkpoints;
pub mod jobs;
pub mod results;
pub mod sites;

use chrono::{DateTime, SecondsFormat, Utc};
use siteplan_common::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Open (creating if needed) the database and its tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let options = SqliteConnectOptions::from_str(&db_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            region_key TEXT NOT NULL,
            status TEXT NOT NULL,
            params TEXT NOT NULL,
            progress_stage TEXT NOT NULL,
            progress_counter INTEGER NOT NULL DEFAULT 0,
            current_operation TEXT NOT NULL DEFAULT '',
            checkpoint TEXT,
            cost_accumulated REAL NOT NULL DEFAULT 0.0,
            demoted_count INTEGER NOT NULL DEFAULT 0,
            idempotency_key TEXT,
            flags TEXT NOT NULL DEFAULT '[]',
            error TEXT,
            retryable INTEGER NOT NULL DEFAULT 0,
            partial_results_available INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            started_at TEXT,
            updated_at TEXT NOT NULL,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one active job per idempotency key
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_active_idempotency
        ON jobs(idempotency_key)
        WHERE idempotency_key IS NOT NULL AND status IN ('queued', 'running')
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, updated_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_checkpoints (
            job_id TEXT NOT NULL,
            stage TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (job_id, stage)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_results (
            job_id TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rationale_cache (
            cache_key TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            model_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sites (
            site_id TEXT PRIMARY KEY,
            region_key TEXT NOT NULL,
            lat REAL NOT NULL,
            lng REAL NOT NULL,
            kind TEXT NOT NULL,
            source_job_id TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sites_region ON sites(region_key)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (jobs, job_checkpoints, job_results, rationale_cache, sites)");

    Ok(())
}

/// Lexically sortable timestamp text
pub fn format_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", field, e)))
}

pub fn parse_opt_ts(field: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_ts(field, &v)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_creates_tables_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("siteplan.db");
        let pool = init_database_pool(&path).await.unwrap();
        init_tables(&pool).await.unwrap();

        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        for expected in ["job_checkpoints", "job_results", "jobs", "rationale_cache", "sites"] {
            assert!(tables.iter().any(|t| t == expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let a = Utc::now();
        let b = a + chrono::Duration::milliseconds(1);
        assert!(format_ts(&a) < format_ts(&b));
        let parsed = parse_ts("t", &format_ts(&a)).unwrap();
        assert_eq!((a - parsed).num_microseconds(), Some(0));
    }
}
