//! Collaborator contracts consumed read-only by the pipeline
//!
//! - [`RegionDataProvider`]: boundary, settlements and anchor POIs
//! - [`StoreRegistry`]: existing and planned sites (the exclusion set)
//! - [`DriveTimeModel`]: optional routing estimate for deduplication

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::models::{ExclusionSite, GeoPoint, RegionSnapshot};

/// Source of region boundary, demographic and POI data
#[async_trait]
pub trait RegionDataProvider: Send + Sync {
    /// Load a region snapshot
    ///
    /// Fails with `BoundaryDataUnavailable` when the region cannot be loaded
    /// at all; missing data for individual sub-regions is not an error.
    async fn load_region(&self, region_key: &str) -> PipelineResult<RegionSnapshot>;
}

/// Reads `<data_dir>/<region_key>.json`
pub struct FileRegionProvider {
    data_dir: PathBuf,
}

impl FileRegionProvider {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn region_path(&self, region_key: &str) -> PipelineResult<PathBuf> {
        let valid = !region_key.is_empty()
            && region_key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(PipelineError::InvalidParams(format!(
                "invalid region key '{}'",
                region_key
            )));
        }
        Ok(self.data_dir.join(format!("{}.json", region_key)))
    }
}

#[async_trait]
impl RegionDataProvider for FileRegionProvider {
    async fn load_region(&self, region_key: &str) -> PipelineResult<RegionSnapshot> {
        let path = self.region_path(region_key)?;
        debug!(region = region_key, path = %path.display(), "Loading region snapshot");

        let unavailable = |reason: String| PipelineError::BoundaryDataUnavailable {
            region: region_key.to_string(),
            reason,
        };

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| unavailable(format!("{}: {}", path.display(), e)))?;
        let snapshot: RegionSnapshot = serde_json::from_str(&content)
            .map_err(|e| unavailable(format!("malformed snapshot: {}", e)))?;

        if !snapshot.bounds.is_valid() {
            return Err(unavailable("region bounds are invalid".to_string()));
        }
        Ok(snapshot)
    }
}

/// Existing and planned sites
#[async_trait]
pub trait StoreRegistry: Send + Sync {
    /// Exclusion set for a region (existing and planned sites)
    async fn exclusion_sites(&self, region_key: &str) -> PipelineResult<Vec<ExclusionSite>>;
}

/// Drive-time estimate between two points
pub trait DriveTimeModel: Send + Sync {
    /// Minutes by road, or `None` when routing data is unavailable
    fn drive_minutes(&self, from: &GeoPoint, to: &GeoPoint) -> Option<f64>;
}

/// No routing data; deduplication falls back to geodesic distance
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRouting;

impl DriveTimeModel for NoRouting {
    fn drive_minutes(&self, _from: &GeoPoint, _to: &GeoPoint) -> Option<f64> {
        None
    }
}
