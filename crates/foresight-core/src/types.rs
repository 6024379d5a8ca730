//! Core domain types for Foresight
//!
//! Facts and evidence come from the upstream corpus and are read-only here.
//! Candidates are ephemeral generation output; suggestions and batches are
//! what the pipeline persists and pushes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::sanitize::{
    sanitize_text, CATEGORY_MAX_CHARS, DESCRIPTION_MAX_CHARS, RATIONALE_MAX_CHARS,
    TITLE_MAX_CHARS,
};
use crate::utility::{
    rank_by_utility, UtilityScore, FALLBACK_EXPECTED_UTILITY, FALLBACK_PROBABILITY_USEFUL,
};

/// Corpus identifier of a fact
pub type FactId = i64;

/// Corpus identifier of a piece of evidence
pub type EvidenceId = i64;

/// A derived fact about the user (confidence 0-10)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: FactId,
    pub text: String,
    pub reasoning: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// A raw observation attached to facts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub id: EvidenceId,
    pub content: String,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

/// The fact that caused a suggestion run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: FactId,
    pub confidence: f64,
    pub text: String,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}

impl From<Fact> for Trigger {
    fn from(fact: Fact) -> Self {
        Self {
            id: fact.id,
            confidence: fact.confidence,
            text: fact.text,
            reasoning: fact.reasoning,
            timestamp: fact.created_at,
        }
    }
}

/// A fact selected as context, with its search score and evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedFact {
    pub fact: Fact,
    pub similarity_score: f64,
    pub evidence: Vec<Evidence>,
}

/// Supporting context assembled for one trigger. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct ContextBundle {
    pub related_facts: Vec<RelatedFact>,
    pub raw_evidence: Vec<Evidence>,
    pub current_snapshot: Option<String>,
    pub retrieval_latency: Duration,
    pub semantic_query: String,
    pub total_found: usize,
}

impl ContextBundle {
    /// Query recorded when retrieval could not run at all
    pub const FALLBACK_QUERY: &'static str = "fallback_query";

    /// An empty bundle carrying only the query that produced it
    pub fn empty(semantic_query: impl Into<String>) -> Self {
        Self {
            semantic_query: semantic_query.into(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.related_facts.is_empty() && self.raw_evidence.is_empty()
    }
}

/// Candidate priority as reported by generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Lenient parse; anything unrecognised is `Medium`
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }
}

/// An unscored suggestion produced by generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub title: String,
    pub description: String,
    pub category: String,
    pub rationale: String,
    #[serde(default)]
    pub priority: Priority,
}

impl Candidate {
    /// Candidate used when generation stays malformed after retries
    pub fn neutral_fallback() -> Self {
        Self {
            title: "Review recent behavioral patterns".to_string(),
            description: "Take a moment to look over what you have been working on recently \
                          and decide on the next step."
                .to_string(),
            category: "productivity".to_string(),
            rationale: "Generated as a fallback when no specific suggestion could be produced."
                .to_string(),
            priority: Priority::Medium,
        }
    }
}

/// Outcome of scoring a single candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scored {
    /// Scored by the formula over this (already resolved) score
    Utility(UtilityScore),
    /// The scoring pass failed; fixed fallback values apply
    Fallback,
}

impl Scored {
    pub fn expected_utility(&self) -> f64 {
        match self {
            Self::Utility(score) => score.expected_utility(),
            Self::Fallback => FALLBACK_EXPECTED_UTILITY,
        }
    }

    pub fn probability_useful(&self) -> f64 {
        match self {
            Self::Utility(score) => score.clamped().probability_useful,
            Self::Fallback => FALLBACK_PROBABILITY_USEFUL,
        }
    }

    pub fn score(&self) -> Option<UtilityScore> {
        match self {
            Self::Utility(score) => Some(score.clamped()),
            Self::Fallback => None,
        }
    }
}

/// A scored, sanitized suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub rationale: String,
    pub expected_utility: f64,
    pub probability_useful: f64,
    pub utility: Option<UtilityScore>,
    pub trigger_id: Option<FactId>,
    pub batch_id: Uuid,
    pub delivered: bool,
    pub created_at: DateTime<Utc>,
}

impl Suggestion {
    /// Build a suggestion from a candidate and its score.
    ///
    /// Text is sanitized and cut to column limits. The batch id is assigned
    /// when the suggestion joins a [`SuggestionBatch`].
    pub fn from_candidate(candidate: &Candidate, scored: Scored) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: sanitize_text(&candidate.title, TITLE_MAX_CHARS),
            description: sanitize_text(&candidate.description, DESCRIPTION_MAX_CHARS),
            category: sanitize_text(&candidate.category, CATEGORY_MAX_CHARS),
            rationale: sanitize_text(&candidate.rationale, RATIONALE_MAX_CHARS),
            expected_utility: scored.expected_utility(),
            probability_useful: scored.probability_useful(),
            utility: scored.score(),
            trigger_id: None,
            batch_id: Uuid::nil(),
            delivered: false,
            created_at: Utc::now(),
        }
    }
}

/// An ordered group of at most five suggestions for one trigger
#[derive(Debug, Clone, PartialEq)]
pub struct SuggestionBatch {
    batch_id: Uuid,
    suggestions: Vec<Suggestion>,
    trigger_id: Option<FactId>,
    generated_at: DateTime<Utc>,
    processing_time: Duration,
    context_fact_count: usize,
}

impl SuggestionBatch {
    /// Rank, bound and stamp `suggestions` into a batch.
    ///
    /// Suggestions are stably sorted by expected utility descending and cut
    /// to five. Each one receives the new batch id and `trigger_id`.
    pub fn new(
        trigger_id: Option<FactId>,
        suggestions: Vec<Suggestion>,
        processing_time: Duration,
        context_fact_count: usize,
    ) -> Self {
        let batch_id = Uuid::new_v4();
        let suggestions = rank_by_utility(suggestions, |s| s.expected_utility)
            .into_iter()
            .map(|mut s| {
                s.batch_id = batch_id;
                s.trigger_id = trigger_id;
                s.delivered = false;
                s
            })
            .collect();

        Self {
            batch_id,
            suggestions,
            trigger_id,
            generated_at: Utc::now(),
            processing_time,
            context_fact_count,
        }
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn suggestions(&self) -> &[Suggestion] {
        &self.suggestions
    }

    pub fn trigger_id(&self) -> Option<FactId> {
        self.trigger_id
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn processing_time(&self) -> Duration {
        self.processing_time
    }

    pub fn context_fact_count(&self) -> usize {
        self.context_fact_count
    }

    pub fn len(&self) -> usize {
        self.suggestions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suggestions.is_empty()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.suggestions.iter().map(|s| s.id).collect()
    }

    /// Flip `delivered` on the listed suggestions that are still undelivered.
    pub fn mark_delivered(&mut self, ids: &[Uuid]) {
        for s in self.suggestions.iter_mut().filter(|s| !s.delivered) {
            if ids.contains(&s.id) {
                s.delivered = true;
            }
        }
    }
}
