//! Expansion job state machine
//!
//! QUEUED → RUNNING → {COMPLETED | PARTIAL | FAILED | CANCELLED}
//!
//! RUNNING walks through the pipeline stages
//! GENERATING → SCORING → DEDUPLICATING → ENHANCING → FINALIZING.
//! The last stage whose output was persisted is the job's checkpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::suggestion::EnhancedSuggestion;

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    /// Usable results exist but the run stopped early or a sub-step failed
    Partial,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Partial | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    /// Ordering used to report the most severe unresolved condition
    pub fn severity(&self) -> u8 {
        match self {
            JobStatus::Queued | JobStatus::Running => 0,
            JobStatus::Completed => 1,
            JobStatus::Partial => 2,
            JobStatus::Cancelled => 3,
            JobStatus::Failed => 4,
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "partial" => Ok(JobStatus::Partial),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStage {
    Pending,
    Generating,
    Scoring,
    Deduplicating,
    Enhancing,
    Finalizing,
    Done,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Pending => "pending",
            JobStage::Generating => "generating",
            JobStage::Scoring => "scoring",
            JobStage::Deduplicating => "deduplicating",
            JobStage::Enhancing => "enhancing",
            JobStage::Finalizing => "finalizing",
            JobStage::Done => "done",
        }
    }

    /// Progress counter value when the stage starts and ends
    pub fn progress_span(&self) -> (u32, u32) {
        match self {
            JobStage::Pending => (0, 0),
            JobStage::Generating => (0, 20),
            JobStage::Scoring => (20, 40),
            JobStage::Deduplicating => (40, 55),
            JobStage::Enhancing => (55, 95),
            JobStage::Finalizing => (95, 100),
            JobStage::Done => (100, 100),
        }
    }
}

impl std::str::FromStr for JobStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStage::Pending),
            "generating" => Ok(JobStage::Generating),
            "scoring" => Ok(JobStage::Scoring),
            "deduplicating" => Ok(JobStage::Deduplicating),
            "enhancing" => Ok(JobStage::Enhancing),
            "finalizing" => Ok(JobStage::Finalizing),
            "done" => Ok(JobStage::Done),
            other => Err(format!("unknown job stage: {}", other)),
        }
    }
}

/// Aggression level, mapped to a target count when none is given
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggression {
    Conservative,
    Balanced,
    Aggressive,
}

impl Aggression {
    pub fn target_count(&self) -> usize {
        match self {
            Aggression::Conservative => 10,
            Aggression::Balanced => 25,
            Aggression::Aggressive => 50,
        }
    }
}

/// Per-job caps on AI spend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostCaps {
    /// Hard ceiling on the job's accumulated AI cost
    pub job_cost_cap: f64,
    /// Hard ceiling on the AI tier size
    pub ai_hard_cap: usize,
}

/// Resolved job parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    pub region_key: String,
    pub target_count: usize,
    pub ai_enabled: bool,
    /// Fraction of survivors eligible for the AI tier
    pub ai_fraction: f64,
    pub cost_caps: CostCaps,
    /// Seed for grid exploration (keeps generation reproducible)
    pub seed: u64,
}

/// Non-fatal condition recorded on a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobFlag {
    /// Generator produced fewer raw candidates than requested
    UnderProduction { generated: usize, requested: usize },
    /// Fewer survivors than the target count
    InsufficientCandidates { survivors: usize, target: usize },
    /// Cost cap reached, remaining AI tier demoted
    CostCapExceeded { demoted: usize },
    /// AI dispatch stayed rate-limited past the retry budget
    RateLimitExceeded { demoted: usize },
    /// Isolated AI call failures
    AiCallFailures { count: usize },
    /// Cancellation arrived while AI work was outstanding
    CancelledDuringEnhancement { demoted: usize },
}

impl JobFlag {
    /// Status this condition implies on its own
    pub fn implied_status(&self) -> JobStatus {
        match self {
            JobFlag::UnderProduction { .. } | JobFlag::InsufficientCandidates { .. } => {
                JobStatus::Completed
            }
            JobFlag::CostCapExceeded { .. }
            | JobFlag::RateLimitExceeded { .. }
            | JobFlag::AiCallFailures { .. }
            | JobFlag::CancelledDuringEnhancement { .. } => JobStatus::Partial,
        }
    }
}

/// Monotonic progress across generate → score → dedup → enhance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub stage: JobStage,
    /// 0..=100, never decreases
    pub counter: u32,
    pub current_operation: String,
}

impl Default for JobProgress {
    fn default() -> Self {
        Self {
            stage: JobStage::Pending,
            counter: 0,
            current_operation: String::from("Queued"),
        }
    }
}

impl JobProgress {
    /// Move the counter forward; lower values are ignored
    pub fn advance(&mut self, counter: u32) {
        self.counter = self.counter.max(counter.min(100));
    }

    /// Position `done / total` inside the current stage's span
    pub fn advance_within_stage(&mut self, done: usize, total: usize) {
        let (start, end) = self.stage.progress_span();
        let fraction = if total == 0 {
            1.0
        } else {
            (done as f64 / total as f64).clamp(0.0, 1.0)
        };
        let value = start as f64 + (end - start) as f64 * fraction;
        self.advance(value.floor() as u32);
    }
}

/// Expansion job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub params: JobParams,
    pub status: JobStatus,
    pub progress: JobProgress,
    /// Last stage whose output is persisted
    pub checkpoint: Option<JobStage>,
    /// Accumulated AI cost charged to this job
    pub cost_accumulated: f64,
    pub demoted_count: usize,
    pub idempotency_key: Option<String>,
    pub flags: Vec<JobFlag>,
    pub error: Option<String>,
    /// Failed jobs that may be re-queued
    pub retryable: bool,
    pub partial_results_available: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create new queued job
    pub fn new(params: JobParams, idempotency_key: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            params,
            status: JobStatus::Queued,
            progress: JobProgress::default(),
            checkpoint: None,
            cost_accumulated: 0.0,
            demoted_count: 0,
            idempotency_key,
            flags: Vec::new(),
            error: None,
            retryable: false,
            partial_results_available: false,
            created_at: now,
            started_at: None,
            updated_at: now,
            ended_at: None,
        }
    }

    /// Transition to new status
    pub fn transition_to(&mut self, status: JobStatus) {
        let now = Utc::now();
        if status == JobStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if status.is_terminal() {
            self.ended_at = Some(now);
        } else {
            self.ended_at = None;
        }
        self.status = status;
        self.updated_at = now;
    }

    /// Enter a pipeline stage (counter jumps to the stage's start)
    pub fn enter_stage(&mut self, stage: JobStage, operation: impl Into<String>) {
        self.progress.stage = stage;
        self.progress.advance(stage.progress_span().0);
        self.progress.current_operation = operation.into();
        self.updated_at = Utc::now();
    }

    /// Mark a stage's output as persisted
    pub fn complete_stage(&mut self, stage: JobStage) {
        self.checkpoint = Some(stage);
        self.progress.advance(stage.progress_span().1);
        if stage >= JobStage::Deduplicating {
            self.partial_results_available = true;
        }
        self.updated_at = Utc::now();
    }

    pub fn record_flag(&mut self, flag: JobFlag) {
        self.flags.push(flag);
    }

    /// Most severe status implied by the recorded flags (Completed if none)
    pub fn status_from_flags(&self) -> JobStatus {
        self.flags
            .iter()
            .map(JobFlag::implied_status)
            .fold(JobStatus::Completed, |worst, s| {
                if s.severity() > worst.severity() {
                    s
                } else {
                    worst
                }
            })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn elapsed_ms(&self) -> i64 {
        let start = self.started_at.unwrap_or(self.created_at);
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - start).num_milliseconds().max(0)
    }
}

/// Run summary returned with the result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Raw candidates generated
    pub total_candidates: usize,
    pub survivor_count: usize,
    pub suppressed_count: usize,
    /// Planned AI tier size before demotion
    pub intended_ai_tier: usize,
    /// Suggestions that carry AI rationale
    pub ai_tier_count: usize,
    pub deterministic_count: usize,
    pub total_cost: f64,
    pub demoted_count: usize,
    pub cache_hits: usize,
    pub ai_failures: usize,
    pub elapsed_ms: i64,
    pub flags: Vec<JobFlag>,
}

/// Ordered suggestions plus run metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub suggestions: Vec<EnhancedSuggestion>,
    pub metadata: RunMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> JobParams {
        JobParams {
            region_key: "small-country".to_string(),
            target_count: 50,
            ai_enabled: true,
            ai_fraction: 0.2,
            cost_caps: CostCaps {
                job_cost_cap: 5.0,
                ai_hard_cap: 25,
            },
            seed: 42,
        }
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut job = Job::new(params(), None);
        job.enter_stage(JobStage::Scoring, "Scoring");
        assert_eq!(job.progress.counter, 20);
        job.progress.advance(10);
        assert_eq!(job.progress.counter, 20);
        job.complete_stage(JobStage::Scoring);
        assert_eq!(job.progress.counter, 40);
        // Re-entering an earlier stage after resume keeps the counter
        job.enter_stage(JobStage::Generating, "Generating");
        assert_eq!(job.progress.counter, 40);
    }

    #[test]
    fn test_advance_within_enhancing_stage() {
        let mut progress = JobProgress {
            stage: JobStage::Enhancing,
            counter: 55,
            current_operation: String::new(),
        };
        progress.advance_within_stage(5, 10);
        assert_eq!(progress.counter, 75);
        progress.advance_within_stage(10, 10);
        assert_eq!(progress.counter, 95);
        progress.advance_within_stage(0, 0);
        assert_eq!(progress.counter, 95);
    }

    #[test]
    fn test_partial_results_after_dedup_checkpoint() {
        let mut job = Job::new(params(), None);
        job.complete_stage(JobStage::Scoring);
        assert!(!job.partial_results_available);
        job.complete_stage(JobStage::Deduplicating);
        assert!(job.partial_results_available);
        assert_eq!(job.checkpoint, Some(JobStage::Deduplicating));
    }

    #[test]
    fn test_status_from_flags_picks_most_severe() {
        let mut job = Job::new(params(), None);
        assert_eq!(job.status_from_flags(), JobStatus::Completed);
        job.record_flag(JobFlag::InsufficientCandidates {
            survivors: 30,
            target: 50,
        });
        assert_eq!(job.status_from_flags(), JobStatus::Completed);
        job.record_flag(JobFlag::CostCapExceeded { demoted: 4 });
        assert_eq!(job.status_from_flags(), JobStatus::Partial);
    }

    #[test]
    fn test_terminal_transition_sets_end_time() {
        let mut job = Job::new(params(), Some("key-1".to_string()));
        job.transition_to(JobStatus::Running);
        assert!(job.started_at.is_some());
        assert!(job.ended_at.is_none());
        job.transition_to(JobStatus::Partial);
        assert!(job.is_terminal());
        assert!(job.ended_at.is_some());
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Partial,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert_eq!("enhancing".parse::<JobStage>().unwrap(), JobStage::Enhancing);
    }

    #[test]
    fn test_aggression_targets() {
        assert_eq!(Aggression::Conservative.target_count(), 10);
        assert_eq!(Aggression::Aggressive.target_count(), 50);
    }
}
