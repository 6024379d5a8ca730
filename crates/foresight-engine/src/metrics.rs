//! Engine metrics and health reporting

use chrono::{DateTime, Utc};
use foresight_core::rate_budget::RateBudgetStatus;
use serde::Serialize;
use std::time::Duration;

/// Average processing time above which the engine reports `degraded`
pub const DEGRADED_AVERAGE_PROCESSING: Duration = Duration::from_secs(10);

/// Engine statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineMetrics {
    pub total_suggestions: u64,
    pub total_batches: u64,
    pub total_processing_time: Duration,
    pub last_batch_at: Option<DateTime<Utc>>,
    pub rate_limit_hits: u64,
    pub failures: u64,
    pub fallbacks: u64,
}

impl EngineMetrics {
    pub fn record_batch(&mut self, suggestions: usize, processing_time: Duration) {
        self.total_suggestions += suggestions as u64;
        self.total_batches += 1;
        self.total_processing_time += processing_time;
        self.last_batch_at = Some(Utc::now());
    }

    pub fn average_processing_time(&self) -> Duration {
        if self.total_batches == 0 {
            return Duration::ZERO;
        }
        self.total_processing_time.div_f64(self.total_batches as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Stopped,
    Healthy,
    Degraded,
}

impl HealthStatus {
    pub fn evaluate(running: bool, metrics: &EngineMetrics) -> Self {
        if !running {
            Self::Stopped
        } else if metrics.average_processing_time() > DEGRADED_AVERAGE_PROCESSING {
            Self::Degraded
        } else {
            Self::Healthy
        }
    }
}

/// Point-in-time health report
#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    pub status: HealthStatus,
    pub uptime_seconds: f64,
    pub metrics: EngineMetrics,
    pub average_processing_time_seconds: f64,
    pub active_connections: usize,
    pub rate_budget: RateBudgetStatus,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_and_status() {
        let mut metrics = EngineMetrics::default();
        assert_eq!(metrics.average_processing_time(), Duration::ZERO);
        assert_eq!(HealthStatus::evaluate(true, &metrics), HealthStatus::Healthy);

        metrics.record_batch(5, Duration::from_secs(4));
        metrics.record_batch(3, Duration::from_secs(20));
        assert_eq!(metrics.total_suggestions, 8);
        assert_eq!(metrics.average_processing_time(), Duration::from_secs(12));
        assert_eq!(HealthStatus::evaluate(true, &metrics), HealthStatus::Degraded);
        assert_eq!(HealthStatus::evaluate(false, &metrics), HealthStatus::Stopped);
    }

    #[test]
    fn test_average_past_u32_batches() {
        let metrics = EngineMetrics {
            total_batches: u64::from(u32::MAX) + 1,
            total_processing_time: Duration::from_secs(u64::from(u32::MAX) + 1),
            ..EngineMetrics::default()
        };
        assert_eq!(metrics.average_processing_time(), Duration::from_secs(1));
    }
}
