//! Scripted collaborators

use async_trait::async_trait;
use siteplan_expansion::models::RegionSnapshot;
use siteplan_expansion::services::{
    RationaleError, RationaleProvider, RationaleRequest, RationaleResponse, RegionDataProvider,
};
use siteplan_expansion::{PipelineError, PipelineResult};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// In-memory regions keyed by region key
pub struct StaticRegionProvider {
    regions: HashMap<String, RegionSnapshot>,
}

impl StaticRegionProvider {
    pub fn new(regions: Vec<RegionSnapshot>) -> Self {
        Self {
            regions: regions.into_iter().map(|r| (r.key.clone(), r)).collect(),
        }
    }
}

#[async_trait]
impl RegionDataProvider for StaticRegionProvider {
    async fn load_region(&self, region_key: &str) -> PipelineResult<RegionSnapshot> {
        self.regions
            .get(region_key)
            .cloned()
            .ok_or_else(|| PipelineError::BoundaryDataUnavailable {
                region: region_key.to_string(),
                reason: "no fixture for region".to_string(),
            })
    }
}

/// Rationale provider with a fixed price, optional latency and scripted failures
pub struct ScriptedRationaleProvider {
    cost: f64,
    delay: Duration,
    failing: HashSet<String>,
    calls: AtomicUsize,
}

impl ScriptedRationaleProvider {
    pub fn new(cost: f64) -> Self {
        Self {
            cost,
            delay: Duration::ZERO,
            failing: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Calls for these candidate ids return an upstream error
    pub fn failing_for(mut self, ids: &[&str]) -> Self {
        self.failing = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    /// Calls that reached the provider
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RationaleProvider for ScriptedRationaleProvider {
    fn model_id(&self) -> &str {
        "scripted-v1"
    }

    async fn generate(&self, request: &RationaleRequest) -> Result<RationaleResponse, RationaleError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.failing.contains(&request.candidate_id) {
            return Err(RationaleError::Api(503, "scripted failure".to_string()));
        }
        Ok(RationaleResponse {
            text: format!(
                "AI rationale for {} (score {:.2})",
                request.candidate_id, request.total_score
            ),
            tokens_used: 120,
            cost: self.cost,
        })
    }
}
