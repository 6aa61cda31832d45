//! Event types and the EventBus for siteplan services
//!
//! Events are broadcast via [`EventBus`] and can be serialized for SSE transmission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Expansion job events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExpansionEvent {
    /// Job accepted and waiting for a worker
    JobQueued {
        job_id: Uuid,
        region_key: String,
        target_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Job entered a new pipeline stage
    JobStageChanged {
        job_id: Uuid,
        stage: String,
        timestamp: DateTime<Utc>,
    },

    /// Progress counter advanced
    JobProgress {
        job_id: Uuid,
        stage: String,
        progress: u32,
        timestamp: DateTime<Utc>,
    },

    /// An AI-tier candidate fell back to deterministic rationale
    SuggestionDemoted {
        job_id: Uuid,
        candidate_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Job reached a terminal state
    JobFinished {
        job_id: Uuid,
        status: String,
        survivor_count: usize,
        total_cost: f64,
        timestamp: DateTime<Utc>,
    },
}

impl ExpansionEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &str {
        match self {
            ExpansionEvent::JobQueued { .. } => "JobQueued",
            ExpansionEvent::JobStageChanged { .. } => "JobStageChanged",
            ExpansionEvent::JobProgress { .. } => "JobProgress",
            ExpansionEvent::SuggestionDemoted { .. } => "SuggestionDemoted",
            ExpansionEvent::JobFinished { .. } => "JobFinished",
        }
    }

    /// Job the event belongs to
    pub fn job_id(&self) -> Uuid {
        match self {
            ExpansionEvent::JobQueued { job_id, .. }
            | ExpansionEvent::JobStageChanged { job_id, .. }
            | ExpansionEvent::JobProgress { job_id, .. }
            | ExpansionEvent::SuggestionDemoted { job_id, .. }
            | ExpansionEvent::JobFinished { job_id, .. } => *job_id,
        }
    }
}

/// Central event distribution bus
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ExpansionEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ExpansionEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ExpansionEvent,
    ) -> Result<usize, broadcast::error::SendError<ExpansionEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ExpansionEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_emitted_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let job_id = Uuid::new_v4();

        bus.emit(ExpansionEvent::JobStageChanged {
            job_id,
            stage: "scoring".to_string(),
            timestamp: Utc::now(),
        })
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id(), job_id);
        assert_eq!(event.event_type(), "JobStageChanged");
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        let event = ExpansionEvent::JobProgress {
            job_id: Uuid::new_v4(),
            stage: "generating".to_string(),
            progress: 5,
            timestamp: Utc::now(),
        };
        assert!(bus.emit(event.clone()).is_err());
        // Lossy emit never fails
        bus.emit_lossy(event);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.capacity(), 4);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ExpansionEvent::JobFinished {
            job_id: Uuid::nil(),
            status: "partial".to_string(),
            survivor_count: 12,
            total_cost: 0.42,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "JobFinished");
        assert_eq!(json["status"], "partial");
    }
}
