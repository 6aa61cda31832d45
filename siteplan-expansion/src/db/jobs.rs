//! Job persistence

use chrono::{DateTime, Utc};
use siteplan_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{format_ts, parse_opt_ts, parse_ts};
use crate::models::{Job, JobFlag, JobParams, JobProgress, JobStage, JobStatus};
use crate::utils::retry_on_lock;

const DEFAULT_LOCK_WAIT_MS: u64 = 5000;

const JOB_COLUMNS: &str = r#"
    job_id, status, params, progress_stage, progress_counter, current_operation,
    checkpoint, cost_accumulated, demoted_count, idempotency_key, flags, error,
    retryable, partial_results_available, created_at, started_at, updated_at, ended_at
"#;

/// Result of inserting a new job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// An active job already holds the idempotency key
    DuplicateActiveKey,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

/// Insert a new job; a clash on an active idempotency key is not an error
pub async fn insert_job(pool: &SqlitePool, job: &Job) -> Result<InsertOutcome> {
    let params = serde_json::to_string(&job.params)?;
    let flags = serde_json::to_string(&job.flags)?;
    let job_id = job.job_id.to_string();
    let created_at = format_ts(&job.created_at);
    let updated_at = format_ts(&job.updated_at);

    retry_on_lock("insert_job", DEFAULT_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                job_id, region_key, status, params, progress_stage, progress_counter,
                current_operation, checkpoint, cost_accumulated, demoted_count,
                idempotency_key, flags, error, retryable, partial_results_available,
                created_at, started_at, updated_at, ended_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, NULL, 0.0, 0, ?, ?, NULL, 0, 0, ?, NULL, ?, NULL)
            "#,
        )
        .bind(&job_id)
        .bind(&job.params.region_key)
        .bind(job.status.as_str())
        .bind(&params)
        .bind(job.progress.stage.as_str())
        .bind(job.progress.counter as i64)
        .bind(&job.progress.current_operation)
        .bind(&job.idempotency_key)
        .bind(&flags)
        .bind(&created_at)
        .bind(&updated_at)
        .execute(pool)
        .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e) if is_unique_violation(&e) => Ok(InsertOutcome::DuplicateActiveKey),
            Err(e) => Err(Error::Database(e)),
        }
    })
    .await
}

/// Persist the mutable fields of a job
pub async fn save_job(pool: &SqlitePool, job: &Job) -> Result<()> {
    let flags = serde_json::to_string(&job.flags)?;
    let job_id = job.job_id.to_string();
    let checkpoint = job.checkpoint.map(|s| s.as_str().to_string());
    let started_at = job.started_at.as_ref().map(format_ts);
    let updated_at = format_ts(&job.updated_at);
    let ended_at = job.ended_at.as_ref().map(format_ts);

    retry_on_lock("save_job", DEFAULT_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            UPDATE jobs SET
                status = ?, progress_stage = ?, progress_counter = ?, current_operation = ?,
                checkpoint = ?, cost_accumulated = ?, demoted_count = ?, flags = ?, error = ?,
                retryable = ?, partial_results_available = ?, started_at = ?, updated_at = ?,
                ended_at = ?
            WHERE job_id = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(job.progress.stage.as_str())
        .bind(job.progress.counter as i64)
        .bind(&job.progress.current_operation)
        .bind(&checkpoint)
        .bind(job.cost_accumulated)
        .bind(job.demoted_count as i64)
        .bind(&flags)
        .bind(&job.error)
        .bind(job.retryable)
        .bind(job.partial_results_available)
        .bind(&started_at)
        .bind(&updated_at)
        .bind(&ended_at)
        .bind(&job_id)
        .execute(pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    })
    .await
}

pub async fn load_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<Job>> {
    let sql = format!("SELECT {} FROM jobs WHERE job_id = ?", JOB_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;
    row.map(|r| job_from_row(&r)).transpose()
}

/// Active (queued or running) job holding `key`
pub async fn find_active_by_idempotency_key(pool: &SqlitePool, key: &str) -> Result<Option<Job>> {
    let sql = format!(
        "SELECT {} FROM jobs WHERE idempotency_key = ? AND status IN ('queued', 'running')",
        JOB_COLUMNS
    );
    let row = sqlx::query(&sql).bind(key).fetch_optional(pool).await?;
    row.map(|r| job_from_row(&r)).transpose()
}

pub async fn list_by_status(pool: &SqlitePool, status: JobStatus) -> Result<Vec<Job>> {
    let sql = format!(
        "SELECT {} FROM jobs WHERE status = ? ORDER BY created_at",
        JOB_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(status.as_str()).fetch_all(pool).await?;
    rows.iter().map(job_from_row).collect()
}

/// Running jobs not updated since `before`
pub async fn list_stale_running(pool: &SqlitePool, before: DateTime<Utc>) -> Result<Vec<Job>> {
    let sql = format!(
        "SELECT {} FROM jobs WHERE status = 'running' AND updated_at < ? ORDER BY created_at",
        JOB_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(format_ts(&before))
        .fetch_all(pool)
        .await?;
    rows.iter().map(job_from_row).collect()
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let job_id: String = row.get("job_id");
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|e| Error::Internal(format!("Failed to parse job_id: {}", e)))?;

    let status: String = row.get("status");
    let status: JobStatus = status.parse().map_err(Error::Internal)?;

    let params: String = row.get("params");
    let params: JobParams = serde_json::from_str(&params)?;

    let flags: String = row.get("flags");
    let flags: Vec<JobFlag> = serde_json::from_str(&flags)?;

    let stage: String = row.get("progress_stage");
    let stage: JobStage = stage.parse().map_err(Error::Internal)?;

    let checkpoint: Option<String> = row.get("checkpoint");
    let checkpoint = checkpoint
        .map(|s| s.parse::<JobStage>())
        .transpose()
        .map_err(Error::Internal)?;

    Ok(Job {
        job_id,
        params,
        status,
        progress: JobProgress {
            stage,
            counter: row.get::<i64, _>("progress_counter").clamp(0, 100) as u32,
            current_operation: row.get("current_operation"),
        },
        checkpoint,
        cost_accumulated: row.get("cost_accumulated"),
        demoted_count: row.get::<i64, _>("demoted_count").max(0) as usize,
        idempotency_key: row.get("idempotency_key"),
        flags,
        error: row.get("error"),
        retryable: row.get("retryable"),
        partial_results_available: row.get("partial_results_available"),
        created_at: parse_ts("created_at", &row.get::<String, _>("created_at"))?,
        started_at: parse_opt_ts("started_at", row.get("started_at"))?,
        updated_at: parse_ts("updated_at", &row.get::<String, _>("updated_at"))?,
        ended_at: parse_opt_ts("ended_at", row.get("ended_at"))?,
    })
}
