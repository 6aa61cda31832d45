//! Data models for the expansion pipeline
//!
//! - Region snapshots and the exclusion set
//! - Raw and scored candidates
//! - Survivors, suppression records and enhanced suggestions
//! - Job state machine and results

pub mod candidate;
pub mod job;
pub mod region;
pub mod suggestion;

pub use candidate::{
    AttributeQuality, Candidate, ComponentScore, DataQuality, ScoreComponentKind, ScoredCandidate,
    SourceType,
};
pub use job::{
    Aggression, CostCaps, Job, JobFlag, JobParams, JobProgress, JobResult, JobStage, JobStatus,
    RunMetadata,
};
pub use region::{
    AnchorCategory, AnchorPoi, BoundingBox, ExclusionSite, GeoPoint, LandCheck, Polygon,
    RegionSnapshot, Settlement, SiteKind, SubRegion,
};
pub use suggestion::{
    AiUsage, DedupOutcome, DemotionReason, EnhancedSuggestion, EnhancementTier, SuppressedCandidate,
    SuppressionReason, Survivor,
};
