//! SQLite-backed rationale cache store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use super::{format_ts, parse_ts};
use crate::error::PipelineResult;
use crate::services::result_cache::{CacheEntry, CacheKey, CacheStore};
use crate::utils::retry_on_lock;

pub struct SqliteCacheStore {
    pool: SqlitePool,
    lock_wait_ms: u64,
}

impl SqliteCacheStore {
    pub fn new(pool: SqlitePool, lock_wait_ms: u64) -> Self {
        Self { pool, lock_wait_ms }
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &CacheKey) -> PipelineResult<Option<CacheEntry>> {
        let row = sqlx::query(
            "SELECT payload, model_id, created_at, expires_at FROM rationale_cache WHERE cache_key = ?",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(CacheEntry {
            key: key.clone(),
            payload: row.get("payload"),
            model_id: row.get("model_id"),
            created_at: parse_ts("created_at", &row.get::<String, _>("created_at"))?,
            expires_at: parse_ts("expires_at", &row.get::<String, _>("expires_at"))?,
        }))
    }

    async fn put(&self, entry: CacheEntry) -> PipelineResult<()> {
        let created_at = format_ts(&entry.created_at);
        let expires_at = format_ts(&entry.expires_at);

        // Last write wins
        retry_on_lock("cache_put", self.lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO rationale_cache (cache_key, payload, model_id, created_at, expires_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(cache_key) DO UPDATE SET
                    payload = excluded.payload,
                    model_id = excluded.model_id,
                    created_at = excluded.created_at,
                    expires_at = excluded.expires_at
                "#,
            )
            .bind(entry.key.as_str())
            .bind(&entry.payload)
            .bind(&entry.model_id)
            .bind(&created_at)
            .bind(&expires_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> PipelineResult<u64> {
        let result = sqlx::query("DELETE FROM rationale_cache WHERE expires_at <= ?")
            .bind(format_ts(&now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database_pool;
    use crate::services::result_cache::ResultCache;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_put_get_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database_pool(&dir.path().join("c.db")).await.unwrap();
        let cache = ResultCache::new(Arc::new(SqliteCacheStore::new(pool, 1000)), 90);

        let key = CacheKey::from("abc".to_string());
        assert!(cache.get(&key).await.is_none());

        cache.put(key.clone(), "first".to_string(), "m1").await;
        assert_eq!(cache.get(&key).await.as_deref(), Some("first"));

        cache.put(key.clone(), "second".to_string(), "m1").await;
        assert_eq!(cache.get(&key).await.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_expired_rows_are_misses_and_purged() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database_pool(&dir.path().join("c.db")).await.unwrap();
        let store = Arc::new(SqliteCacheStore::new(pool, 1000));
        let cache = ResultCache::new(store.clone(), 90);

        let written = Utc::now() - chrono::Duration::days(91);
        let key = CacheKey::from("old".to_string());
        cache.put_at(key.clone(), "stale".to_string(), "m1", written).await;

        assert!(cache.get(&key).await.is_none());
        assert_eq!(store.purge_expired(Utc::now()).await.unwrap(), 1);
        assert!(store.get(&key).await.unwrap().is_none());
    }
}
