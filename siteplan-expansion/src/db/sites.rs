//! Site registry (existing stores and promoted planned sites)

use async_trait::async_trait;
use chrono::Utc;
use siteplan_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::format_ts;
use crate::error::PipelineResult;
use crate::models::{ExclusionSite, GeoPoint, SiteKind};
use crate::services::providers::StoreRegistry;
use crate::utils::retry_on_lock;

/// Record a site; returns false if `site.id` is already registered
pub async fn add_site(
    pool: &SqlitePool,
    region_key: &str,
    site: &ExclusionSite,
    source_job_id: Option<Uuid>,
    lock_wait_ms: u64,
) -> Result<bool> {
    if !site.location.is_finite() {
        return Err(Error::InvalidInput(format!(
            "site {} has a non-finite location",
            site.id
        )));
    }
    let source_job_id = source_job_id.map(|id| id.to_string());
    let now = format_ts(&Utc::now());

    retry_on_lock("add_site", lock_wait_ms, || async {
        let result = sqlx::query(
            r#"
            INSERT INTO sites (site_id, region_key, lat, lng, kind, source_job_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(site_id) DO NOTHING
            "#,
        )
        .bind(&site.id)
        .bind(region_key)
        .bind(site.location.lat)
        .bind(site.location.lng)
        .bind(site.kind.as_str())
        .bind(&source_job_id)
        .bind(&now)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    })
    .await
}

pub async fn list_sites(pool: &SqlitePool, region_key: &str) -> Result<Vec<ExclusionSite>> {
    let rows = sqlx::query("SELECT site_id, lat, lng, kind FROM sites WHERE region_key = ? ORDER BY site_id")
        .bind(region_key)
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| {
            let kind: String = row.get("kind");
            Ok(ExclusionSite {
                id: row.get("site_id"),
                location: GeoPoint::new(row.get("lat"), row.get("lng")),
                kind: kind.parse::<SiteKind>().map_err(Error::Internal)?,
            })
        })
        .collect()
}

/// [`StoreRegistry`] over the `sites` table
#[derive(Clone)]
pub struct SqliteStoreRegistry {
    pool: SqlitePool,
}

impl SqliteStoreRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StoreRegistry for SqliteStoreRegistry {
    async fn exclusion_sites(&self, region_key: &str) -> PipelineResult<Vec<ExclusionSite>> {
        Ok(list_sites(&self.pool, region_key).await?)
    }
}
