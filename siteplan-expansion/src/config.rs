//! Service configuration
//!
//! One explicit [`ExpansionConfig`] is loaded at startup, validated once and
//! handed to the orchestrator. Nothing else reads environment variables.
//!
//! Resolution: `--config` → `SITEPLAN_CONFIG` → platform config dir →
//! compiled defaults, then the `SITEPLAN_*` overrides listed in
//! [`ExpansionConfig::apply_env_overrides`].

use serde::{Deserialize, Serialize};
use siteplan_common::config::{env_override, load_toml_file, resolve_config_path};
use siteplan_common::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const CONFIG_ENV_VAR: &str = "SITEPLAN_CONFIG";
pub const CONFIG_FILE_NAME: &str = "siteplan-expansion.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    pub server: ServerConfig,
    pub generation: GenerationConfig,
    pub scoring: ScoringConfig,
    pub dedup: DedupConfig,
    pub enhancement: EnhancementConfig,
    pub rate_limit: RateLimitConfig,
    pub cost: CostConfig,
    pub cache: CacheConfig,
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// SQLite database file
    pub database_path: PathBuf,
    /// Directory holding `<region_key>.json` snapshots
    pub data_dir: PathBuf,
    /// EventBus channel capacity
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let data_dir = siteplan_common::config::default_data_dir();
        Self {
            bind: "127.0.0.1:5740".to_string(),
            database_path: data_dir.join("siteplan.db"),
            data_dir: data_dir.join("regions"),
            event_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Share of candidate slots anchored on settlements (rest is grid exploration)
    pub settlement_mix: f64,
    /// Minimum distance from any existing or planned site
    pub min_clearance_km: f64,
    /// Maximum share of raw candidates one sub-region may take
    pub sub_region_cap_share: f64,
    /// Raw candidates requested per target slot, so NMS can still fill the target
    pub oversample_factor: f64,
    /// Radius used to sum catchment population and count anchors
    pub catchment_radius_km: f64,
    /// Settlements below this population do not anchor candidates
    pub min_settlement_population: u64,
    /// Random offset of grid points as a fraction of the cell size
    pub grid_jitter: f64,
    /// Catchment density (residents per km²) at which the density index is 0.5
    pub density_half_saturation: f64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            settlement_mix: 0.6,
            min_clearance_km: 2.0,
            sub_region_cap_share: 0.4,
            oversample_factor: 3.0,
            catchment_radius_km: 3.0,
            min_settlement_population: 500,
            grid_jitter: 0.35,
            density_half_saturation: 500.0,
        }
    }
}

/// Nominal component weights (normalized before use)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub population: f64,
    pub proximity_gap: f64,
    pub anchor_density: f64,
    pub performance_potential: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            population: 0.35,
            proximity_gap: 0.25,
            anchor_density: 0.25,
            performance_potential: 0.15,
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.population + self.proximity_gap + self.anchor_density + self.performance_potential
    }

    fn all(&self) -> [f64; 4] {
        [
            self.population,
            self.proximity_gap,
            self.anchor_density,
            self.performance_potential,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoreWeights,
    /// Maximum share of total weight an estimated component may carry
    pub estimated_weight_cap: f64,
    /// Same-category anchors closer than this are one place
    pub poi_coincidence_radius_m: f64,
    /// Catchment population scoring 0.5
    pub population_half_saturation: f64,
    /// Gap to the nearest site that scores 1.0
    pub proximity_saturation_km: f64,
    /// Distinct anchors scoring 0.5
    pub anchor_half_saturation: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            estimated_weight_cap: 0.25,
            poi_coincidence_radius_m: 75.0,
            population_half_saturation: 20_000.0,
            proximity_saturation_km: 25.0,
            anchor_half_saturation: 8.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub suppression_radius_km: f64,
    /// Share of target slots one fairness region may hold in pass one
    pub fairness_share: f64,
    /// Converts drive minutes into km-equivalent distance
    pub reference_speed_kmh: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            suppression_radius_km: 5.0,
            fairness_share: 0.3,
            reference_speed_kmh: 40.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancementConfig {
    pub default_ai_fraction: f64,
    pub ai_hard_cap: usize,
    /// Concurrent in-flight AI calls per job
    pub worker_pool_size: usize,
    pub model_id: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub call_timeout_secs: u64,
    /// Budget reserved before each call; actual cost settles at or below it
    pub max_cost_per_call: f64,
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            default_ai_fraction: 0.2,
            ai_hard_cap: 25,
            worker_pool_size: 10,
            model_id: "rationale-v1".to_string(),
            endpoint: "http://127.0.0.1:8089/v1/rationale".to_string(),
            api_key: None,
            call_timeout_secs: 30,
            max_cost_per_call: 0.05,
        }
    }
}

impl EnhancementConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Global AI dispatch limits, shared by all jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_concurrent_calls: usize,
    pub hourly_call_limit: u32,
    /// Longest wait a dispatch accepts before demoting the candidate
    pub max_retry_wait_ms: u64,
    pub max_dispatch_retries: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 10,
            hourly_call_limit: 1000,
            max_retry_wait_ms: 2000,
            max_dispatch_retries: 3,
        }
    }
}

impl RateLimitConfig {
    pub fn max_retry_wait(&self) -> Duration {
        Duration::from_millis(self.max_retry_wait_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub default_job_cost_cap: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            default_job_cost_cap: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_days: i64,
    /// Decimal places kept when coordinates enter the cache key
    pub coordinate_decimals: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_days: 90,
            coordinate_decimals: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// A running job not updated for this long is considered abandoned
    pub staleness_threshold_secs: u64,
    pub default_seed: u64,
    /// Jobs executing at once; further jobs wait in `queued`
    pub max_concurrent_jobs: usize,
    /// Upper bound on total wait for SQLite lock retries
    pub db_lock_wait_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            staleness_threshold_secs: 900,
            default_seed: 42,
            max_concurrent_jobs: 2,
            db_lock_wait_ms: 5000,
        }
    }
}

impl ExpansionConfig {
    /// Resolve, load, override and validate
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_path(cli_path, CONFIG_ENV_VAR, CONFIG_FILE_NAME) {
            Some(path) => {
                info!("Loading config from {}", path.display());
                load_toml_file::<ExpansionConfig>(&path)?
            }
            None => {
                info!("No config file found, using compiled defaults");
                ExpansionConfig::default()
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `SITEPLAN_BIND`, `SITEPLAN_DATABASE`, `SITEPLAN_DATA_DIR`,
    /// `SITEPLAN_AI_ENDPOINT` and `SITEPLAN_AI_API_KEY`
    pub fn apply_env_overrides(&mut self) {
        if let Some(bind) = env_override("SITEPLAN_BIND") {
            self.server.bind = bind;
        }
        if let Some(db) = env_override("SITEPLAN_DATABASE") {
            self.server.database_path = PathBuf::from(db);
        }
        if let Some(dir) = env_override("SITEPLAN_DATA_DIR") {
            self.server.data_dir = PathBuf::from(dir);
        }
        if let Some(endpoint) = env_override("SITEPLAN_AI_ENDPOINT") {
            self.enhancement.endpoint = endpoint;
        }
        if let Some(key) = env_override("SITEPLAN_AI_API_KEY") {
            self.enhancement.api_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let weights = self.scoring.weights.all();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(invalid("scoring.weights must be finite and non-negative"));
        }
        if self.scoring.weights.sum() <= 0.0 {
            return Err(invalid("scoring.weights must not sum to zero"));
        }
        if !(self.scoring.estimated_weight_cap > 0.0 && self.scoring.estimated_weight_cap <= 1.0) {
            return Err(invalid("scoring.estimated_weight_cap must be in (0, 1]"));
        }
        if self.scoring.population_half_saturation <= 0.0
            || self.scoring.proximity_saturation_km <= 0.0
            || self.scoring.anchor_half_saturation <= 0.0
        {
            return Err(invalid("scoring saturation constants must be positive"));
        }
        if self.scoring.poi_coincidence_radius_m < 0.0 {
            return Err(invalid("scoring.poi_coincidence_radius_m must not be negative"));
        }
        if !(0.0..=1.0).contains(&self.enhancement.default_ai_fraction) {
            return Err(invalid("enhancement.default_ai_fraction must be in [0, 1]"));
        }
        if self.enhancement.worker_pool_size == 0 {
            return Err(invalid("enhancement.worker_pool_size must be at least 1"));
        }
        if !(self.enhancement.max_cost_per_call > 0.0) {
            return Err(invalid("enhancement.max_cost_per_call must be positive"));
        }
        if self.rate_limit.max_concurrent_calls == 0 {
            return Err(invalid("rate_limit.max_concurrent_calls must be at least 1"));
        }
        if self.rate_limit.hourly_call_limit == 0 {
            return Err(invalid("rate_limit.hourly_call_limit must be at least 1"));
        }
        if !(self.dedup.suppression_radius_km > 0.0) {
            return Err(invalid("dedup.suppression_radius_km must be positive"));
        }
        if !(self.dedup.fairness_share > 0.0 && self.dedup.fairness_share <= 1.0) {
            return Err(invalid("dedup.fairness_share must be in (0, 1]"));
        }
        if !(self.dedup.reference_speed_kmh > 0.0) {
            return Err(invalid("dedup.reference_speed_kmh must be positive"));
        }
        if !(0.0..=1.0).contains(&self.generation.settlement_mix) {
            return Err(invalid("generation.settlement_mix must be in [0, 1]"));
        }
        if !(self.generation.sub_region_cap_share > 0.0 && self.generation.sub_region_cap_share <= 1.0) {
            return Err(invalid("generation.sub_region_cap_share must be in (0, 1]"));
        }
        if self.generation.oversample_factor < 1.0 {
            return Err(invalid("generation.oversample_factor must be at least 1"));
        }
        if !(self.generation.catchment_radius_km > 0.0) || !(self.generation.density_half_saturation > 0.0) {
            return Err(invalid("generation catchment radius and density saturation must be positive"));
        }
        if !(0.0..0.5).contains(&self.generation.grid_jitter) {
            return Err(invalid("generation.grid_jitter must be in [0, 0.5)"));
        }
        if self.generation.min_clearance_km < 0.0 {
            return Err(invalid("generation.min_clearance_km must not be negative"));
        }
        if !(self.cost.default_job_cost_cap >= 0.0) {
            return Err(invalid("cost.default_job_cost_cap must not be negative"));
        }
        if self.cache.ttl_days <= 0 {
            return Err(invalid("cache.ttl_days must be positive"));
        }
        if self.jobs.max_concurrent_jobs == 0 {
            return Err(invalid("jobs.max_concurrent_jobs must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> Error {
    Error::Config(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_validate() {
        ExpansionConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ExpansionConfig = toml::from_str(
            r#"
            [dedup]
            suppression_radius_km = 8.0

            [enhancement]
            worker_pool_size = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.dedup.suppression_radius_km, 8.0);
        assert_eq!(config.dedup.fairness_share, 0.3);
        assert_eq!(config.enhancement.worker_pool_size, 4);
        assert_eq!(config.enhancement.ai_hard_cap, 25);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = ExpansionConfig::default();
        config.scoring.weights = ScoreWeights {
            population: 0.0,
            proximity_gap: 0.0,
            anchor_density: 0.0,
            performance_potential: 0.0,
        };
        assert!(config.validate().is_err());

        let mut config = ExpansionConfig::default();
        config.scoring.estimated_weight_cap = 1.5;
        assert!(config.validate().is_err());

        let mut config = ExpansionConfig::default();
        config.enhancement.worker_pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = ExpansionConfig::default();
        config.dedup.fairness_share = 0.0;
        assert!(config.validate().is_err());

        let mut config = ExpansionConfig::default();
        config.cache.ttl_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides_apply() {
        std::env::set_var("SITEPLAN_BIND", "0.0.0.0:9000");
        std::env::set_var("SITEPLAN_AI_API_KEY", "secret");
        let mut config = ExpansionConfig::default();
        config.apply_env_overrides();
        std::env::remove_var("SITEPLAN_BIND");
        std::env::remove_var("SITEPLAN_AI_API_KEY");

        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.enhancement.api_key.as_deref(), Some("secret"));
    }

    #[test]
    #[serial]
    fn test_load_from_cli_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[jobs]\nstaleness_threshold_secs = 60\n").unwrap();

        let config = ExpansionConfig::load(Some(&path)).unwrap();
        assert_eq!(config.jobs.staleness_threshold_secs, 60);
    }

    #[test]
    #[serial]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[dedup]\nsuppression_radius_km = -1.0\n").unwrap();

        assert!(matches!(ExpansionConfig::load(Some(&path)), Err(Error::Config(_))));
    }
}
