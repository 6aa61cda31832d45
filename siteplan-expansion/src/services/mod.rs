//! Pipeline services
//!
//! - Generation, scoring and spatial deduplication (pure, synchronous)
//! - AI enhancement: rationale provider, result cache, dispatch limiter,
//!   cost ledger and the cost-tiered enhancer
//! - Collaborator contracts and the job orchestrator

pub mod anchor_index;
pub mod candidate_generator;
pub mod cost_ledger;
pub mod cost_tiered_enhancer;
pub mod job_orchestrator;
pub mod providers;
pub mod rate_limiter;
pub mod rationale_provider;
pub mod result_cache;
pub mod scoring_engine;
pub mod spatial_deduplicator;

pub use anchor_index::{AnchorCluster, AnchorIndex};
pub use candidate_generator::{CandidateGenerator, GenerationReport};
pub use cost_ledger::{CostLedger, Reservation};
pub use cost_tiered_enhancer::{
    ai_tier_size, deterministic_rationale, CostTieredEnhancer, EnhanceParams, EnhancementOutcome,
    EnhancementProgress,
};
pub use job_orchestrator::{
    Collaborators, JobOrchestrator, PromoteOutcome, RecoveryReport, ResultAvailability,
    RetryOutcome, SubmitOutcome, SubmitRequest,
};
pub use providers::{DriveTimeModel, FileRegionProvider, NoRouting, RegionDataProvider, StoreRegistry};
pub use rate_limiter::{AiDispatchLimiter, DispatchDenied};
pub use rationale_provider::{
    HttpRationaleProvider, RationaleError, RationaleProvider, RationaleRequest, RationaleResponse,
};
pub use result_cache::{CacheEntry, CacheKey, CacheStore, MemoryCacheStore, ResultCache};
pub use scoring_engine::{effective_weights, ScoringEngine};
pub use spatial_deduplicator::{rank_order, SpatialDeduplicator};
