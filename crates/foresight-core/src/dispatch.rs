//! Push events and the live dispatcher contract

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ForesightError, Result};
use crate::rate_budget::RateBudgetStatus;
use crate::types::{FactId, Suggestion, SuggestionBatch};

/// Payload of a `suggestion_batch` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPayload {
    pub suggestions: Vec<Suggestion>,
    pub trigger_id: Option<FactId>,
    pub generated_at: DateTime<Utc>,
    pub processing_time_seconds: f64,
    pub batch_id: Uuid,
}

impl From<&SuggestionBatch> for BatchPayload {
    fn from(batch: &SuggestionBatch) -> Self {
        Self {
            suggestions: batch.suggestions().to_vec(),
            trigger_id: batch.trigger_id(),
            generated_at: batch.generated_at(),
            processing_time_seconds: batch.processing_time().as_secs_f64(),
            batch_id: batch.batch_id(),
        }
    }
}

/// Events pushed to live subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    /// A ranked batch was persisted
    SuggestionBatch(BatchPayload),

    /// A trigger was denied by the rate budget
    RateLimited {
        wait_time_seconds: f64,
        next_available_at: DateTime<Utc>,
        message: String,
    },

    /// An invocation failed or degraded visibly
    Error {
        error_type: String,
        message: String,
        timestamp: DateTime<Utc>,
        trigger_id: Option<FactId>,
    },

    /// Periodic liveness signal
    Heartbeat {
        timestamp: DateTime<Utc>,
        active_connections: usize,
    },
}

impl PushEvent {
    pub fn batch(batch: &SuggestionBatch) -> Self {
        Self::SuggestionBatch(BatchPayload::from(batch))
    }

    pub fn rate_limited(status: &RateBudgetStatus) -> Self {
        let next_available_at = Utc::now()
            + chrono::Duration::milliseconds((status.wait_time_seconds * 1000.0).ceil() as i64);
        Self::RateLimited {
            wait_time_seconds: status.wait_time_seconds,
            next_available_at,
            message: format!(
                "Rate limit reached. Next suggestion available in {:.0} seconds.",
                status.wait_time_seconds.ceil()
            ),
        }
    }

    pub fn error(err: &ForesightError, trigger_id: Option<FactId>) -> Self {
        Self::Error {
            error_type: err.error_type().to_string(),
            message: err.to_string(),
            timestamp: Utc::now(),
            trigger_id,
        }
    }

    pub fn heartbeat(active_connections: usize) -> Self {
        Self::Heartbeat {
            timestamp: Utc::now(),
            active_connections,
        }
    }

    /// Wire name of the event
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SuggestionBatch(_) => "suggestion_batch",
            Self::RateLimited { .. } => "rate_limited",
            Self::Error { .. } => "error",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }

    /// JSON of the payload alone, for transports that carry the name separately
    pub fn payload_json(&self) -> Result<String> {
        let value = serde_json::to_value(self)?;
        Ok(value
            .get("data")
            .map(|d| d.to_string())
            .unwrap_or_else(|| "{}".to_string()))
    }
}

/// Fan-out push channel to connected clients
///
/// Delivery is best-effort. Having no subscribers is not an error; a closed
/// dispatcher is.
#[async_trait]
pub trait LiveDispatcher: Send + Sync {
    /// Publish an event; returns how many subscribers it reached
    async fn broadcast(&self, event: PushEvent) -> Result<usize>;

    fn active_connections(&self) -> usize;

    /// Stop accepting events
    fn close(&self) {}
}
