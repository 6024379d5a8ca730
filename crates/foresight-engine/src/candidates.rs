//! Candidate generation
//!
//! One generation call per attempt. A failed or unusable reply is retried
//! with jittered exponential backoff up to `generation.max_retries` times;
//! after that the stage degrades to a single neutral candidate, so the
//! pipeline always has something to score.

use foresight_core::config::EngineConfig;
use foresight_core::types::{Candidate, ContextBundle, Priority, Trigger};
use foresight_core::{ForesightError, Result};
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::llm::{CompletionRequest, GenerationService};
use crate::parse::{parse_as, Shape};
use crate::prompts;

/// Reply shape: `{"suggestions": [{...}, ...]}`
pub const CANDIDATE_SHAPE: Shape<'static> = Shape::list(
    "suggestions",
    &["title", "description", "category", "rationale", "priority"],
);

#[derive(Debug, Deserialize)]
struct CandidateReply {
    suggestions: Vec<RawCandidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCandidate {
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    rationale: Option<String>,
    priority: Option<serde_json::Value>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl RawCandidate {
    fn into_candidate(self) -> Option<Candidate> {
        let title = non_blank(self.title);
        let description = non_blank(self.description);
        if title.is_none() && description.is_none() {
            return None;
        }
        let priority = match self.priority {
            Some(serde_json::Value::String(s)) => Priority::parse_lenient(&s),
            _ => Priority::Medium,
        };
        Some(Candidate {
            title: title.unwrap_or_else(|| "Untitled Suggestion".to_string()),
            description: description.unwrap_or_else(|| "No description provided".to_string()),
            category: non_blank(self.category).unwrap_or_else(|| "general".to_string()),
            rationale: non_blank(self.rationale).unwrap_or_else(|| "No rationale provided".to_string()),
            priority,
        })
    }
}

/// Parse a candidate reply; `GenerationMalformed` when nothing usable is in it
pub fn parse_candidates(reply: &str, limit: usize) -> Result<Vec<Candidate>> {
    let (parsed, strategy) = parse_as::<CandidateReply>(reply, &CANDIDATE_SHAPE)
        .ok_or_else(|| ForesightError::GenerationMalformed("no candidate structure in reply".into()))?;

    let candidates: Vec<Candidate> = parsed
        .suggestions
        .into_iter()
        .filter_map(RawCandidate::into_candidate)
        .take(limit)
        .collect();

    if candidates.is_empty() {
        return Err(ForesightError::GenerationMalformed("reply contained no usable candidates".into()));
    }
    debug!(?strategy, count = candidates.len(), "Candidates parsed");
    Ok(candidates)
}

/// Produces candidate suggestions for a trigger
pub struct CandidateGenerator {
    generation: Arc<dyn GenerationService>,
    config: EngineConfig,
}

impl CandidateGenerator {
    pub fn new(generation: Arc<dyn GenerationService>, config: EngineConfig) -> Self {
        Self { generation, config }
    }

    /// Generate candidates; never empty
    pub async fn generate(&self, trigger: &Trigger, bundle: &ContextBundle) -> Vec<Candidate> {
        let settings = &self.config.generation;
        let attempts = settings.max_retries + 1;

        for attempt in 0..attempts {
            match self.attempt(trigger, bundle).await {
                Ok(candidates) => {
                    info!(trigger_id = trigger.id, count = candidates.len(), attempt, "Candidates generated");
                    return candidates;
                }
                Err(e) => {
                    warn!(trigger_id = trigger.id, attempt, error = %e, "Candidate generation failed");
                    if attempt + 1 < attempts {
                        tokio::time::sleep(backoff(settings.retry_delay(), attempt)).await;
                    }
                }
            }
        }

        warn!(trigger_id = trigger.id, "Using neutral fallback candidate");
        vec![Candidate::neutral_fallback()]
    }

    async fn attempt(&self, trigger: &Trigger, bundle: &ContextBundle) -> Result<Vec<Candidate>> {
        let settings = &self.config.generation;
        let request = CompletionRequest::new(
            prompts::candidates(trigger, bundle, settings.candidate_count),
            settings.candidate_max_tokens,
            settings.temperature,
        );
        let after = self.config.timeouts.generation();
        let reply = tokio::time::timeout(after, self.generation.complete(request))
            .await
            .map_err(|_| ForesightError::Timeout {
                stage: "candidate_generation",
                after,
            })??;
        parse_candidates(&reply, settings.candidate_count)
    }
}

/// `base * 2^attempt`, jittered by up to ±20%
fn backoff(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt));
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    exp.mul_f64(jitter)
}
