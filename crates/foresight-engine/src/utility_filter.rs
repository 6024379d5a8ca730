//! Utility filter: score candidates, rank, keep the best five
//!
//! A single scoring call covers the whole candidate set. Candidates the reply
//! leaves out get [`UtilityScore::NEUTRAL`]; fields it leaves out get the
//! neutral value of that field. When the pass fails outright every candidate
//! is marked [`Scored::Fallback`] and input order is kept.

use foresight_core::config::EngineConfig;
use foresight_core::types::{Candidate, ContextBundle, Scored, Suggestion, Trigger};
use foresight_core::utility::{rank_by_utility, UtilityScore};
use foresight_core::{ForesightError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::llm::{CompletionRequest, GenerationService};
use crate::parse::{parse_as, Shape};
use crate::prompts;

/// Reply shape: `{"scored_suggestions": [{"index": 0, ...}, ...]}`
pub const SCORING_SHAPE: Shape<'static> = Shape::list(
    "scored_suggestions",
    &[
        "index",
        "benefit",
        "false_positive_cost",
        "false_negative_cost",
        "decay",
        "probability_useful",
        "probability_false_positive",
        "probability_false_negative",
    ],
);

#[derive(Debug, Deserialize)]
struct ScoringReply {
    scored_suggestions: Vec<RawScore>,
}

/// Lenient per-record view; models sometimes quote numbers
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawScore {
    index: Option<Value>,
    benefit: Option<Value>,
    false_positive_cost: Option<Value>,
    false_negative_cost: Option<Value>,
    decay: Option<Value>,
    probability_useful: Option<Value>,
    probability_false_positive: Option<Value>,
    probability_false_negative: Option<Value>,
}

fn number(value: &Option<Value>) -> Option<f64> {
    match value.as_ref()? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl RawScore {
    fn index(&self) -> Option<usize> {
        number(&self.index)
            .filter(|i| *i >= 0.0 && i.fract() == 0.0)
            .map(|i| i as usize)
    }

    fn resolve(&self) -> UtilityScore {
        let n = UtilityScore::NEUTRAL;
        UtilityScore {
            benefit: number(&self.benefit).unwrap_or(n.benefit),
            false_positive_cost: number(&self.false_positive_cost).unwrap_or(n.false_positive_cost),
            false_negative_cost: number(&self.false_negative_cost).unwrap_or(n.false_negative_cost),
            decay: number(&self.decay).unwrap_or(n.decay),
            probability_useful: number(&self.probability_useful).unwrap_or(n.probability_useful),
            probability_false_positive: number(&self.probability_false_positive)
                .unwrap_or(n.probability_false_positive),
            probability_false_negative: number(&self.probability_false_negative)
                .unwrap_or(n.probability_false_negative),
        }
        .clamped()
    }
}

/// Map a scoring reply onto `count` candidates.
///
/// Records with a valid `index` land on that candidate; records without one
/// fill by position. The first record for a candidate wins.
pub fn parse_scores(reply: &str, count: usize) -> Result<Vec<UtilityScore>> {
    let (parsed, strategy) = parse_as::<ScoringReply>(reply, &SCORING_SHAPE)
        .ok_or_else(|| ForesightError::ScoringFailed("no scoring structure in reply".into()))?;
    debug!(?strategy, records = parsed.scored_suggestions.len(), "Scores parsed");

    let mut by_index: HashMap<usize, UtilityScore> = HashMap::new();
    for (position, raw) in parsed.scored_suggestions.iter().enumerate() {
        let index = raw.index().unwrap_or(position);
        if index < count {
            by_index.entry(index).or_insert_with(|| raw.resolve());
        }
    }

    if by_index.len() < count {
        debug!(scored = by_index.len(), count, "Some candidates unscored; using neutral score");
    }
    Ok((0..count)
        .map(|i| by_index.remove(&i).unwrap_or(UtilityScore::NEUTRAL))
        .collect())
}

/// Scores and ranks candidates
pub struct UtilityFilter {
    generation: Arc<dyn GenerationService>,
    config: EngineConfig,
}

/// Ranked suggestions and whether the whole-pass fallback was used
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub suggestions: Vec<Suggestion>,
    pub fell_back: bool,
}

impl UtilityFilter {
    pub fn new(generation: Arc<dyn GenerationService>, config: EngineConfig) -> Self {
        Self { generation, config }
    }

    /// Score, sort descending and keep at most five
    pub async fn filter(
        &self,
        trigger: &Trigger,
        candidates: &[Candidate],
        bundle: &ContextBundle,
    ) -> FilterOutcome {
        if candidates.is_empty() {
            return FilterOutcome {
                suggestions: Vec::new(),
                fell_back: false,
            };
        }

        let (scored, fell_back): (Vec<Scored>, bool) =
            match self.score(trigger, candidates, bundle).await {
                Ok(scores) => (scores.into_iter().map(Scored::Utility).collect(), false),
                Err(e) => {
                    warn!(trigger_id = trigger.id, error = %e, "Scoring pass failed; using fallback utility");
                    (vec![Scored::Fallback; candidates.len()], true)
                }
            };

        let suggestions: Vec<Suggestion> = candidates
            .iter()
            .zip(scored)
            .map(|(candidate, scored)| Suggestion::from_candidate(candidate, scored))
            .collect();
        let suggestions = rank_by_utility(suggestions, |s| s.expected_utility);

        info!(
            trigger_id = trigger.id,
            kept = suggestions.len(),
            top = suggestions.first().map(|s| s.expected_utility),
            "Candidates scored"
        );
        FilterOutcome {
            suggestions,
            fell_back,
        }
    }

    async fn score(
        &self,
        trigger: &Trigger,
        candidates: &[Candidate],
        bundle: &ContextBundle,
    ) -> Result<Vec<UtilityScore>> {
        let settings = &self.config.generation;
        let request = CompletionRequest::new(
            prompts::scoring(trigger, candidates, bundle),
            settings.scoring_max_tokens,
            settings.temperature,
        );
        let after = self.config.timeouts.generation();
        let reply = tokio::time::timeout(after, self.generation.complete(request))
            .await
            .map_err(|_| ForesightError::Timeout {
                stage: "scoring",
                after,
            })?
            .map_err(|e| ForesightError::ScoringFailed(e.to_string()))?;
        parse_scores(&reply, candidates.len())
    }
}
