//! Result Cache
//!
//! Memoizes AI rationale by a SHA-256 key over every input that affects the
//! output: model id, rounded coordinates and every score component shown to
//! the provider. Entries expire after a TTL; an expired entry is a miss.
//!
//! Reads and writes never fail the caller. A failed read is a miss and a
//! failed write is logged. Two jobs racing on the same key may both call
//! the provider; the last write wins.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::models::ScoredCandidate;

/// Hex-encoded SHA-256 cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key over every rationale-relevant input
    pub fn for_rationale(model_id: &str, candidate: &ScoredCandidate, coordinate_decimals: u32) -> Self {
        let location = candidate.location();
        let components: Vec<serde_json::Value> = candidate
            .breakdown
            .iter()
            .map(|c| {
                serde_json::json!({
                    "kind": c.kind.as_str(),
                    "raw": c.raw_value.map(|v| fixed(v, 4)),
                    "score": fixed(c.score, 6),
                    "quality": c.quality.as_str(),
                    "weight": fixed(c.effective_weight, 6),
                })
            })
            .collect();

        let canonical = serde_json::json!({
            "model": model_id,
            "lat": fixed(location.lat, coordinate_decimals),
            "lng": fixed(location.lng, coordinate_decimals),
            "total_score": fixed(candidate.total_score, 6),
            "components": components,
        });

        let digest = Sha256::digest(canonical.to_string().as_bytes());
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        CacheKey(hex)
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        CacheKey(value)
    }
}

/// Fixed-point text with negative zero folded into zero
fn fixed(value: f64, decimals: u32) -> String {
    let scale = 10f64.powi(decimals as i32);
    let rounded = (value * scale).round() / scale + 0.0;
    format!("{:.*}", decimals as usize, rounded)
}

/// Stored cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: String,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Backing store for the cache
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> PipelineResult<Option<CacheEntry>>;
    async fn put(&self, entry: CacheEntry) -> PipelineResult<()>;
    /// Delete entries expired at `now`; returns rows removed
    async fn purge_expired(&self, now: DateTime<Utc>) -> PipelineResult<u64>;
}

/// In-process store
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> PipelineResult<Option<CacheEntry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, entry: CacheEntry) -> PipelineResult<()> {
        self.entries.write().await.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> PipelineResult<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired_at(now));
        Ok((before - entries.len()) as u64)
    }
}

/// TTL cache over a [`CacheStore`]
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl_days: i64) -> Self {
        Self {
            store,
            ttl: Duration::days(ttl_days),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &CacheKey) -> Option<String> {
        self.get_at(key, Utc::now()).await
    }

    /// Payload for `key` if present and unexpired at `now`
    pub async fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<String> {
        match self.store.get(key).await {
            Ok(Some(entry)) if !entry.is_expired_at(now) => Some(entry.payload),
            Ok(Some(_)) => {
                debug!(key = key.as_str(), "Cache entry expired");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = key.as_str(), error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store `payload`; failures are logged, never returned
    pub async fn put(&self, key: CacheKey, payload: String, model_id: &str) {
        self.put_at(key, payload, model_id, Utc::now()).await
    }

    pub async fn put_at(&self, key: CacheKey, payload: String, model_id: &str, now: DateTime<Utc>) {
        if let Err(e) = self.try_put_at(key.clone(), payload, model_id, now).await {
            warn!(key = key.as_str(), error = %e, "Rationale cache write failed");
        }
    }

    async fn try_put_at(
        &self,
        key: CacheKey,
        payload: String,
        model_id: &str,
        now: DateTime<Utc>,
    ) -> PipelineResult<()> {
        let entry = CacheEntry {
            key,
            payload,
            model_id: model_id.to_string(),
            created_at: now,
            expires_at: now + self.ttl,
        };
        self.store
            .put(entry)
            .await
            .map_err(|e| PipelineError::CacheWriteFailed(e.to_string()))
    }

    pub async fn purge_expired(&self) -> PipelineResult<u64> {
        self.store.purge_expired(Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AttributeQuality, Candidate, ComponentScore, DataQuality, GeoPoint, ScoreComponentKind,
        SourceType,
    };
    use std::collections::BTreeMap;

    fn scored(lat: f64, lng: f64, score: f64) -> ScoredCandidate {
        ScoredCandidate {
            candidate: Candidate {
                id: "c".to_string(),
                location: GeoPoint::new(lat, lng),
                source_type: SourceType::Grid,
                sub_region_key: "r".to_string(),
                estimated_population: 100,
                urban_density_index: 0.1,
                anchor_counts: BTreeMap::new(),
                data_quality: AttributeQuality {
                    location: DataQuality::Measured,
                    population: DataQuality::Measured,
                    urban_density: DataQuality::Measured,
                    anchors: DataQuality::Measured,
                },
            },
            total_score: score,
            breakdown: vec![ComponentScore {
                kind: ScoreComponentKind::Population,
                raw_value: Some(100.0),
                score,
                quality: DataQuality::Measured,
                nominal_weight: 1.0,
                effective_weight: 1.0,
                contribution: score,
            }],
            completeness_score: 1.0,
            region_key: "r".to_string(),
        }
    }

    /// Store whose writes always fail
    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _key: &CacheKey) -> PipelineResult<Option<CacheEntry>> {
            Err(PipelineError::CacheWriteFailed("read".to_string()))
        }
        async fn put(&self, _entry: CacheEntry) -> PipelineResult<()> {
            Err(PipelineError::CacheWriteFailed("disk full".to_string()))
        }
        async fn purge_expired(&self, _now: DateTime<Utc>) -> PipelineResult<u64> {
            Ok(0)
        }
    }

    #[test]
    fn test_key_stable_under_coordinate_noise() {
        let a = CacheKey::for_rationale("m1", &scored(45.123_41, 7.0, 0.5), 4);
        let b = CacheKey::for_rationale("m1", &scored(45.123_44, 7.0, 0.5), 4);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_key_changes_with_model_and_components() {
        let base = CacheKey::for_rationale("m1", &scored(45.0, 7.0, 0.5), 4);
        assert_ne!(base, CacheKey::for_rationale("m2", &scored(45.0, 7.0, 0.5), 4));
        assert_ne!(base, CacheKey::for_rationale("m1", &scored(45.0, 7.0, 0.6), 4));
        assert_ne!(base, CacheKey::for_rationale("m1", &scored(45.01, 7.0, 0.5), 4));
    }

    #[test]
    fn test_negative_zero_folds() {
        assert_eq!(fixed(-0.000_01, 4), "0.0000");
        assert_eq!(fixed(1.23456, 2), "1.23");
    }

    #[tokio::test]
    async fn test_round_trip_before_ttl_and_miss_after() {
        let cache = ResultCache::new(Arc::new(MemoryCacheStore::new()), 90);
        let key = CacheKey::for_rationale("m1", &scored(45.0, 7.0, 0.5), 4);
        let now = Utc::now();
        let payload = r#"{"text":"Strong catchment","tokens_used":120}"#.to_string();

        cache.put_at(key.clone(), payload.clone(), "m1", now).await;
        assert_eq!(cache.get_at(&key, now + Duration::days(89)).await, Some(payload));
        assert_eq!(cache.get_at(&key, now + Duration::days(90)).await, None);
    }

    #[tokio::test]
    async fn test_store_failures_never_surface() {
        let cache = ResultCache::new(Arc::new(BrokenStore), 90);
        let key = CacheKey::from("k".to_string());
        cache.put(key.clone(), "x".to_string(), "m1").await;
        assert_eq!(cache.get(&key).await, None);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = Arc::new(MemoryCacheStore::new());
        let cache = ResultCache::new(store.clone(), 1);
        let old = Utc::now() - Duration::days(2);
        cache.put_at(CacheKey::from("old".to_string()), "a".to_string(), "m", old).await;
        cache.put(CacheKey::from("new".to_string()), "b".to_string(), "m").await;
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert!(store.get(&CacheKey::from("new".to_string())).await.unwrap().is_some());
    }
}
