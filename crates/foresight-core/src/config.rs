//! Engine configuration
//!
//! Loaded from TOML, then overridden by `FORESIGHT_*` environment variables.
//! Every section has defaults, so an empty file (or no file) is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ForesightError, Result};

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Shared rate budget
    pub rate: RateSettings,

    /// Per-stage timeouts
    pub timeouts: TimeoutSettings,

    /// Context retrieval limits
    pub retrieval: RetrievalSettings,

    /// Generation call parameters
    pub generation: GenerationSettings,
}

/// Token-bucket parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateSettings {
    /// Bucket capacity
    pub capacity: u32,

    /// Seconds to regain one token
    pub refill_interval_secs: f64,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            capacity: 3,
            refill_interval_secs: 45.0,
        }
    }
}

impl RateSettings {
    pub fn refill_interval(&self) -> Duration {
        Duration::from_secs_f64(self.refill_interval_secs)
    }
}

/// Timeouts in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub generation_secs: f64,
    pub content_synthesis_secs: f64,
    pub search_secs: f64,
    pub snapshot_secs: f64,
    pub store_secs: f64,
    pub dispatch_secs: f64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            generation_secs: 30.0,
            content_synthesis_secs: 45.0,
            search_secs: 10.0,
            snapshot_secs: 5.0,
            store_secs: 5.0,
            dispatch_secs: 2.0,
        }
    }
}

impl TimeoutSettings {
    pub fn generation(&self) -> Duration {
        Duration::from_secs_f64(self.generation_secs)
    }

    pub fn content_synthesis(&self) -> Duration {
        Duration::from_secs_f64(self.content_synthesis_secs)
    }

    pub fn search(&self) -> Duration {
        Duration::from_secs_f64(self.search_secs)
    }

    pub fn snapshot(&self) -> Duration {
        Duration::from_secs_f64(self.snapshot_secs)
    }

    pub fn store(&self) -> Duration {
        Duration::from_secs_f64(self.store_secs)
    }

    pub fn dispatch(&self) -> Duration {
        Duration::from_secs_f64(self.dispatch_secs)
    }

    /// Upper bound for retrieval as a whole (search path and snapshot path)
    pub fn retrieval_budget(&self) -> Duration {
        self.generation() + self.search() * 2 + self.store()
    }
}

/// Retrieval limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Ranked search result limit
    pub search_limit: usize,

    /// Limit for each of the two fallback queries
    pub fallback_limit: usize,

    /// Related facts kept in the bundle
    pub max_related_facts: usize,

    /// Characters of trigger reasoning sent to the query call
    pub reasoning_chars: usize,

    /// Snapshot look-back window
    pub snapshot_window_secs: u64,

    /// Snapshot item limit
    pub snapshot_max_items: usize,

    /// Snapshot character limit
    pub snapshot_max_chars: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            search_limit: 20,
            fallback_limit: 10,
            max_related_facts: 10,
            reasoning_chars: 300,
            snapshot_window_secs: 300,
            snapshot_max_items: 3,
            snapshot_max_chars: 1000,
        }
    }
}

impl RetrievalSettings {
    pub fn snapshot_window(&self) -> Duration {
        Duration::from_secs(self.snapshot_window_secs)
    }
}

/// Generation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// Candidates requested per trigger
    pub candidate_count: usize,

    pub temperature: f32,

    pub query_max_tokens: u32,
    pub candidate_max_tokens: u32,
    pub scoring_max_tokens: u32,
    pub chain_max_tokens: u32,
    pub content_max_tokens: u32,

    /// Retries after a malformed candidate reply
    pub max_retries: u32,

    /// Base delay between retries (doubled per attempt, jittered)
    pub retry_delay_secs: f64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            candidate_count: 5,
            temperature: 0.05,
            query_max_tokens: 50,
            candidate_max_tokens: 1000,
            scoring_max_tokens: 800,
            chain_max_tokens: 600,
            content_max_tokens: 1500,
            max_retries: 1,
            retry_delay_secs: 1.0,
        }
    }
}

impl GenerationSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_secs)
    }
}

impl EngineConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ForesightError::InvalidConfig(e.to_string()))
    }

    /// Load from a TOML file, apply environment overrides and validate
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ForesightError::InvalidConfig(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup; unparsable values are ignored
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(
            lookup: &dyn Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "Ignoring unparsable config override");
                    None
                }
            }
        }

        if let Some(v) = parsed(&lookup, "FORESIGHT_RATE_CAPACITY") {
            self.rate.capacity = v;
        }
        if let Some(v) = parsed(&lookup, "FORESIGHT_RATE_REFILL_SECS") {
            self.rate.refill_interval_secs = v;
        }
        if let Some(v) = parsed(&lookup, "FORESIGHT_GENERATION_TIMEOUT_SECS") {
            self.timeouts.generation_secs = v;
        }
        if let Some(v) = parsed(&lookup, "FORESIGHT_CANDIDATE_COUNT") {
            self.generation.candidate_count = v;
        }
        if let Some(v) = parsed(&lookup, "FORESIGHT_TEMPERATURE") {
            self.generation.temperature = v;
        }
        if let Some(v) = parsed(&lookup, "FORESIGHT_MAX_RETRIES") {
            self.generation.max_retries = v;
        }
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ForesightError::InvalidConfig(msg.to_string()));

        if self.rate.capacity == 0 {
            return invalid("rate.capacity must be at least 1");
        }
        if !(self.rate.refill_interval_secs.is_finite() && self.rate.refill_interval_secs > 0.0) {
            return invalid("rate.refill_interval_secs must be positive");
        }
        let t = &self.timeouts;
        for (name, secs) in [
            ("generation_secs", t.generation_secs),
            ("content_synthesis_secs", t.content_synthesis_secs),
            ("search_secs", t.search_secs),
            ("snapshot_secs", t.snapshot_secs),
            ("store_secs", t.store_secs),
            ("dispatch_secs", t.dispatch_secs),
        ] {
            if !(secs.is_finite() && secs > 0.0) {
                return Err(ForesightError::InvalidConfig(format!(
                    "timeouts.{name} must be positive"
                )));
            }
        }
        if self.generation.candidate_count == 0 {
            return invalid("generation.candidate_count must be at least 1");
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return invalid("generation.temperature must be within [0, 2]");
        }
        if self.generation.retry_delay_secs < 0.0 || !self.generation.retry_delay_secs.is_finite() {
            return invalid("generation.retry_delay_secs must not be negative");
        }
        if self.retrieval.max_related_facts == 0 || self.retrieval.search_limit == 0 {
            return invalid("retrieval limits must be at least 1");
        }
        Ok(())
    }
}
