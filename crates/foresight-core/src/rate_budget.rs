//! Shared rate budget
//!
//! A token bucket with fixed capacity and a steady refill rate. Refill is lazy:
//! every call first credits `elapsed * rate` tokens (capped at capacity) using
//! the monotonic clock, then answers. `can_proceed` checks and consumes under
//! a single lock so concurrent triggers never overdraw the bucket.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Snapshot of the bucket, as exposed on status endpoints and events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateBudgetStatus {
    pub tokens_available: f64,
    pub tokens_capacity: u32,
    pub is_rate_limited: bool,
    pub wait_time_seconds: f64,
    pub next_refill_at: DateTime<Utc>,
    pub refill_rate_per_second: f64,
}

/// Admission control shared by every trigger
pub trait RateBudget: Send + Sync {
    /// Atomically check for a whole token and consume it
    fn can_proceed(&self) -> bool;

    /// Time until the next whole token (zero when one is available)
    fn wait_time(&self) -> Duration;

    fn status(&self) -> RateBudgetStatus;

    /// Refill to capacity
    fn reset(&self);

    /// Empty the bucket so no new trigger proceeds
    fn drain(&self);
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket implementation of [`RateBudget`]
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// A full bucket that regains one token every `refill_interval`
    pub fn new(capacity: u32, refill_interval: Duration) -> Self {
        Self::with_tokens(capacity, refill_interval, capacity as f64)
    }

    /// A bucket starting with `tokens` (clamped to `[0, capacity]`)
    pub fn with_tokens(capacity: u32, refill_interval: Duration, tokens: f64) -> Self {
        let secs = refill_interval.as_secs_f64();
        let refill_rate = if secs > 0.0 { 1.0 / secs } else { f64::INFINITY };
        Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: tokens.clamp(0.0, capacity as f64),
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Tokens per second
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            let credited = state.tokens + elapsed * self.refill_rate;
            state.tokens = credited.min(self.capacity as f64);
            state.last_refill = now;
        }
    }

    fn wait_for(&self, tokens: f64) -> Duration {
        if tokens >= 1.0 || !self.refill_rate.is_finite() {
            return Duration::ZERO;
        }
        if self.refill_rate <= 0.0 {
            return Duration::MAX;
        }
        Duration::from_secs_f64((1.0 - tokens) / self.refill_rate)
    }
}

impl RateBudget for TokenBucket {
    fn can_proceed(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn wait_time(&self) -> Duration {
        let mut state = self.state.lock();
        self.refill(&mut state);
        self.wait_for(state.tokens)
    }

    fn status(&self) -> RateBudgetStatus {
        let mut state = self.state.lock();
        self.refill(&mut state);
        let tokens = state.tokens;
        drop(state);

        let wait = self.wait_for(tokens);
        // Time until the next fractional token is credited toward a whole one.
        let until_refill = if tokens >= self.capacity as f64 {
            Duration::ZERO
        } else {
            self.wait_for(tokens.fract())
        };
        let next_refill_at = Utc::now()
            + chrono::Duration::from_std(until_refill).unwrap_or_else(|_| chrono::Duration::zero());

        RateBudgetStatus {
            tokens_available: tokens,
            tokens_capacity: self.capacity,
            is_rate_limited: tokens < 1.0,
            wait_time_seconds: wait.as_secs_f64(),
            next_refill_at,
            refill_rate_per_second: self.refill_rate,
        }
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.tokens = self.capacity as f64;
        state.last_refill = Instant::now();
    }

    fn drain(&self) {
        let mut state = self.state.lock();
        state.tokens = 0.0;
        state.last_refill = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(45);

    #[tokio::test(start_paused = true)]
    async fn test_consumes_until_empty() {
        let bucket = TokenBucket::new(3, INTERVAL);
        assert!(bucket.can_proceed());
        assert!(bucket.can_proceed());
        assert!(bucket.can_proceed());
        assert!(!bucket.can_proceed());
        assert!(bucket.status().is_rate_limited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_refill() {
        let bucket = TokenBucket::with_tokens(3, INTERVAL, 0.0);
        assert!(!bucket.can_proceed());
        assert!((bucket.wait_time().as_secs_f64() - 45.0).abs() < 1e-6);

        tokio::time::advance(Duration::from_secs(30)).await;
        let wait = bucket.wait_time();
        assert!((wait.as_secs_f64() - 15.0).abs() < 1e-6, "wait {wait:?}");

        tokio::time::advance(Duration::from_secs(16)).await;
        assert_eq!(bucket.wait_time(), Duration::ZERO);
        assert!(bucket.can_proceed());
        assert!(!bucket.can_proceed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_capped_at_capacity() {
        let bucket = TokenBucket::with_tokens(2, INTERVAL, 0.0);
        tokio::time::advance(Duration::from_secs(3600)).await;
        let status = bucket.status();
        assert_eq!(status.tokens_available, 2.0);
        assert!(!status.is_rate_limited);
        assert_eq!(status.wait_time_seconds, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_and_drain() {
        let bucket = TokenBucket::new(3, INTERVAL);
        bucket.drain();
        assert!(!bucket.can_proceed());
        assert!(bucket.status().wait_time_seconds > 0.0);

        bucket.reset();
        assert_eq!(bucket.status().tokens_available, 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_fields() {
        let bucket = TokenBucket::with_tokens(1, INTERVAL, 0.0);
        let status = bucket.status();
        assert_eq!(status.tokens_capacity, 1);
        assert!((status.refill_rate_per_second - 1.0 / 45.0).abs() < 1e-12);
        assert!(status.next_refill_at > Utc::now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_triggers_never_overdraw() {
        let bucket = std::sync::Arc::new(TokenBucket::new(3, INTERVAL));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let bucket = bucket.clone();
                tokio::spawn(async move { bucket.can_proceed() })
            })
            .collect();

        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 3);
    }
}
