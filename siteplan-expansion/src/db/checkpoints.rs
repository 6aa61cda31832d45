//! Stage checkpoints
//!
//! Each completed stage stores its output as JSON keyed by (job, stage), so
//! a resumed job restarts from the stage after its last checkpoint.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use siteplan_common::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::format_ts;
use crate::models::JobStage;
use crate::utils::retry_on_lock;

pub async fn save_checkpoint<T: Serialize>(
    pool: &SqlitePool,
    job_id: Uuid,
    stage: JobStage,
    payload: &T,
    lock_wait_ms: u64,
) -> Result<()> {
    let json = serde_json::to_string(payload)?;
    let job_id = job_id.to_string();
    let now = format_ts(&Utc::now());

    retry_on_lock("save_checkpoint", lock_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO job_checkpoints (job_id, stage, payload, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(job_id, stage) DO UPDATE SET
                payload = excluded.payload,
                created_at = excluded.created_at
            "#,
        )
        .bind(&job_id)
        .bind(stage.as_str())
        .bind(&json)
        .bind(&now)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

pub async fn load_checkpoint<T: DeserializeOwned>(
    pool: &SqlitePool,
    job_id: Uuid,
    stage: JobStage,
) -> Result<Option<T>> {
    let payload: Option<String> =
        sqlx::query_scalar("SELECT payload FROM job_checkpoints WHERE job_id = ? AND stage = ?")
            .bind(job_id.to_string())
            .bind(stage.as_str())
            .fetch_optional(pool)
            .await?;

    match payload {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

/// Drop all checkpoints of a job (after its result is stored, or on retry)
pub async fn delete_checkpoints(pool: &SqlitePool, job_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM job_checkpoints WHERE job_id = ?")
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
