//! Final job results

use chrono::Utc;
use siteplan_common::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::format_ts;
use crate::models::JobResult;
use crate::utils::retry_on_lock;

pub async fn save_result(pool: &SqlitePool, result: &JobResult, lock_wait_ms: u64) -> Result<()> {
    let json = serde_json::to_string(result)?;
    let job_id = result.job_id.to_string();
    let now = format_ts(&Utc::now());

    retry_on_lock("save_result", lock_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO job_results (job_id, payload, created_at) VALUES (?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET payload = excluded.payload, created_at = excluded.created_at
            "#,
        )
        .bind(&job_id)
        .bind(&json)
        .bind(&now)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

pub async fn load_result(pool: &SqlitePool, job_id: Uuid) -> Result<Option<JobResult>> {
    let payload: Option<String> = sqlx::query_scalar("SELECT payload FROM job_results WHERE job_id = ?")
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;

    match payload {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database_pool;
    use crate::models::{JobStatus, RunMetadata};

    #[tokio::test]
    async fn test_result_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database_pool(&dir.path().join("r.db")).await.unwrap();

        let result = JobResult {
            job_id: Uuid::new_v4(),
            status: JobStatus::Partial,
            suggestions: vec![],
            metadata: RunMetadata {
                total_candidates: 30,
                demoted_count: 4,
                ..Default::default()
            },
        };
        save_result(&pool, &result, 1000).await.unwrap();

        let loaded = load_result(&pool, result.job_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Partial);
        assert_eq!(loaded.metadata, result.metadata);
        assert!(load_result(&pool, Uuid::new_v4()).await.unwrap().is_none());
    }
}
