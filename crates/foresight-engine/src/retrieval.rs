//! Context retrieval
//!
//! Two paths run concurrently and are jointly awaited:
//!
//! ```text
//! trigger ──┬─> semantic query ─> ranked search ─┬─> related facts + evidence
//!           │                    (or fallback) ──┘
//!           └─> current snapshot (recent input_text)
//! ```
//!
//! Each path has its own timeout and neither can fail the stage: the worst
//! case is an empty bundle carrying the `fallback_query` marker. Evidence is
//! fetched for all selected facts at once; if that step overruns the
//! retrieval budget, the facts already found are kept without it.

use chrono::{DateTime, Local, Utc};
use futures::future::join_all;
use foresight_core::config::EngineConfig;
use foresight_core::corpus::{FactCorpus, SearchHit, SearchRequest, SearchService};
use foresight_core::sanitize::truncate_chars;
use foresight_core::types::{ContextBundle, Evidence, Fact, FactId, RelatedFact, Trigger};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::llm::{CompletionRequest, GenerationService};
use crate::prompts;

/// Content type of textual screen observations
pub const SNAPSHOT_CONTENT_TYPE: &str = "input_text";

const KEY_LINE_MARKERS: [&str; 4] = ["Visible Text:", "Text Content:", "Browsing:", "Window Viewing:"];
const APP_MARKER: &str = "Application Name:";

/// Run `fut` with a deadline; `None` on timeout
pub(crate) async fn bounded<T>(
    stage: &'static str,
    after: Duration,
    fut: impl Future<Output = T>,
) -> Option<T> {
    match tokio::time::timeout(after, fut).await {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(stage, after = ?after, "Stage timed out");
            None
        }
    }
}

/// Assembles a [`ContextBundle`] for a trigger
pub struct ContextRetriever {
    corpus: Arc<dyn FactCorpus>,
    search: Arc<dyn SearchService>,
    generation: Arc<dyn GenerationService>,
    config: EngineConfig,
}

impl ContextRetriever {
    pub fn new(
        corpus: Arc<dyn FactCorpus>,
        search: Arc<dyn SearchService>,
        generation: Arc<dyn GenerationService>,
        config: EngineConfig,
    ) -> Self {
        Self {
            corpus,
            search,
            generation,
            config,
        }
    }

    /// Load the trigger fact and retrieve its context. A missing or
    /// unreadable trigger yields an empty bundle.
    pub async fn retrieve_by_id(&self, trigger_id: FactId) -> ContextBundle {
        let started = Instant::now();
        let lookup = bounded("trigger_lookup", self.config.timeouts.store(), self.corpus.fact(trigger_id)).await;
        match lookup {
            Some(Ok(Some(fact))) => self.retrieve(&Trigger::from(fact)).await,
            Some(Ok(None)) => {
                warn!(trigger_id, "Trigger fact not found; returning empty context");
                self.empty(started)
            }
            Some(Err(e)) => {
                warn!(trigger_id, error = %e, "Trigger lookup failed; returning empty context");
                self.empty(started)
            }
            None => self.empty(started),
        }
    }

    fn empty(&self, started: Instant) -> ContextBundle {
        let mut bundle = ContextBundle::empty(ContextBundle::FALLBACK_QUERY);
        bundle.retrieval_latency = started.elapsed();
        bundle
    }

    /// Retrieve context for an already loaded trigger. Never fails.
    pub async fn retrieve(&self, trigger: &Trigger) -> ContextBundle {
        let started = Instant::now();
        let timeouts = &self.config.timeouts;

        let (mut bundle, snapshot) = tokio::join!(
            self.related_path(trigger, started + timeouts.retrieval_budget()),
            bounded("snapshot", timeouts.snapshot(), self.current_snapshot()),
        );
        bundle.current_snapshot = snapshot.flatten();
        bundle.retrieval_latency = started.elapsed();

        info!(
            trigger_id = trigger.id,
            related = bundle.related_facts.len(),
            evidence = bundle.raw_evidence.len(),
            snapshot = bundle.current_snapshot.is_some(),
            latency_ms = bundle.retrieval_latency.as_millis() as u64,
            query = %bundle.semantic_query,
            "Context retrieved"
        );
        bundle
    }

    /// Steps 1-3 and 5: query, search (or fallback), evidence, cap
    async fn related_path(&self, trigger: &Trigger, deadline: Instant) -> ContextBundle {
        let (query, hits, total_found) =
            match tokio::time::timeout_at(deadline, self.select_hits(trigger)).await {
                Ok(found) => found,
                Err(_) => {
                    warn!(trigger_id = trigger.id, "Related-fact search exceeded the retrieval budget");
                    return ContextBundle::empty(ContextBundle::FALLBACK_QUERY);
                }
            };

        let attached = tokio::time::timeout_at(deadline, self.attach_evidence(&hits)).await;
        let related_facts = match attached {
            Ok(related) => related,
            Err(_) => {
                warn!(
                    trigger_id = trigger.id,
                    facts = hits.len(),
                    "Evidence fetch exceeded the retrieval budget; keeping facts without it"
                );
                hits.into_iter().map(RelatedFact::from).collect()
            }
        };

        let mut seen = HashSet::new();
        let raw_evidence: Vec<Evidence> = related_facts
            .iter()
            .flat_map(|r| r.evidence.iter())
            .filter(|e| seen.insert(e.id))
            .cloned()
            .collect();

        ContextBundle {
            related_facts,
            raw_evidence,
            current_snapshot: None,
            retrieval_latency: Duration::ZERO,
            semantic_query: query,
            total_found,
        }
    }

    /// Steps 1, 2 and 5: the query, the capped hits and how many were found
    async fn select_hits(&self, trigger: &Trigger) -> (String, Vec<SearchHit>, usize) {
        let query = self.semantic_query(trigger).await;
        let settings = &self.config.retrieval;

        let mut hits = match self.ranked_search(&query).await {
            Some(hits) if hits.iter().any(|h| !h.evidence.is_empty()) => hits,
            Some(_) => {
                info!(trigger_id = trigger.id, "Ranked search found no evidenced facts; using fallback");
                self.fallback_hits().await
            }
            None => self.fallback_hits().await,
        };

        hits.retain(|h| h.fact.id != trigger.id);
        let total_found = hits.len();
        hits.truncate(settings.max_related_facts);
        (query, hits, total_found)
    }

    /// Step 3, all facts concurrently, each fetch under its own timeout
    async fn attach_evidence(&self, hits: &[SearchHit]) -> Vec<RelatedFact> {
        join_all(hits.iter().map(|hit| async move {
            let mut related = RelatedFact::from(hit.clone());
            if related.evidence.is_empty() {
                related.evidence = self.evidence_for(hit.fact.id).await;
            }
            related
        }))
        .await
    }

    /// Step 1. Falls back to the trigger text verbatim.
    async fn semantic_query(&self, trigger: &Trigger) -> String {
        let gen = &self.config.generation;
        let request = CompletionRequest::new(
            prompts::semantic_query(trigger, self.config.retrieval.reasoning_chars),
            gen.query_max_tokens,
            gen.temperature,
        );

        match bounded("semantic_query", self.config.timeouts.generation(), self.generation.complete(request)).await {
            Some(Ok(reply)) => {
                let query = clean_query(&reply);
                if query.is_empty() {
                    trigger.text.clone()
                } else {
                    debug!(trigger_id = trigger.id, %query, "Semantic query generated");
                    query
                }
            }
            Some(Err(e)) => {
                warn!(trigger_id = trigger.id, error = %e, "Semantic query failed; using trigger text");
                trigger.text.clone()
            }
            None => trigger.text.clone(),
        }
    }

    /// Step 2, primary strategy. `None` when the search failed.
    async fn ranked_search(&self, query: &str) -> Option<Vec<SearchHit>> {
        let request = SearchRequest::new(query, self.config.retrieval.search_limit);
        match bounded("search", self.config.timeouts.search(), self.search.search(&request)).await? {
            Ok(hits) => Some(hits),
            Err(e) => {
                warn!(error = %e, "Ranked search failed; using fallback");
                None
            }
        }
    }

    /// Step 2, deterministic fallback: most-evidenced then most-recent,
    /// merged and deduplicated by id
    async fn fallback_hits(&self) -> Vec<SearchHit> {
        let limit = self.config.retrieval.fallback_limit;
        let after = self.config.timeouts.search();

        let (evidenced, recent) = tokio::join!(
            bounded("fallback_evidenced", after, self.corpus.most_evidenced_facts(limit)),
            bounded("fallback_recent", after, self.corpus.recent_facts(limit)),
        );

        let unwrap_facts = |label: &str, result: Option<foresight_core::Result<Vec<Fact>>>| match result {
            Some(Ok(facts)) => facts,
            Some(Err(e)) => {
                warn!(query = label, error = %e, "Fallback query failed");
                Vec::new()
            }
            None => Vec::new(),
        };

        merge_fallback(
            unwrap_facts("most_evidenced", evidenced),
            unwrap_facts("most_recent", recent),
        )
    }

    /// Step 3, per fact. Failures are logged and skipped.
    async fn evidence_for(&self, fact_id: FactId) -> Vec<Evidence> {
        match bounded("evidence", self.config.timeouts.store(), self.corpus.evidence_for(fact_id)).await {
            Some(Ok(evidence)) => evidence,
            Some(Err(e)) => {
                warn!(fact_id, error = %e, "Evidence fetch failed; skipping");
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// Step 4
    async fn current_snapshot(&self) -> Option<String> {
        let settings = &self.config.retrieval;
        let window = chrono::Duration::from_std(settings.snapshot_window()).unwrap_or_else(|_| chrono::Duration::minutes(5));
        let since = Utc::now() - window;

        match self
            .corpus
            .recent_evidence(SNAPSHOT_CONTENT_TYPE, since, settings.snapshot_max_items)
            .await
        {
            Ok(observations) => format_snapshot(&observations, settings.snapshot_max_chars),
            Err(e) => {
                warn!(error = %e, "Snapshot fetch failed");
                None
            }
        }
    }
}

/// Strip surrounding whitespace and quotes from a query reply
fn clean_query(reply: &str) -> String {
    reply
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim()
        .to_string()
}

/// Evidenced facts first, then recent ones not already present
fn merge_fallback(evidenced: Vec<Fact>, recent: Vec<Fact>) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    let evidenced_len = evidenced.len();
    evidenced
        .into_iter()
        .chain(recent)
        .enumerate()
        .filter(|(_, fact)| seen.insert(fact.id))
        .map(|(i, fact)| SearchHit {
            fact,
            // Evidenced facts rank above recent ones; order within each is kept.
            score: if i < evidenced_len { 1.0 } else { 0.5 },
            evidence: Vec::new(),
        })
        .collect()
}

fn time_label(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%I:%M %p").to_string()
}

/// One snapshot line for an observation, or `None` for blank content
fn snapshot_line(observation: &Evidence) -> Option<String> {
    let content = observation.content.trim();
    if content.is_empty() {
        return None;
    }
    let time = time_label(observation.created_at);

    if !content.contains(APP_MARKER) {
        return Some(format!("[{time}] {}...", truncate_chars(content, 150)));
    }

    let mut app_line = None;
    let mut key_line = None;
    for line in content.lines().map(str::trim) {
        if line.contains(APP_MARKER) {
            app_line = Some(line);
        } else if KEY_LINE_MARKERS.iter().any(|m| line.contains(m)) {
            key_line = Some(line);
            break;
        }
    }

    Some(match (app_line, key_line) {
        (Some(app), Some(key)) => format!("[{time}] {app} | {key}"),
        (Some(app), None) => format!("[{time}] {app}"),
        _ => format!("[{time}] {}...", truncate_chars(content, 100)),
    })
}

/// Format recent observations into the current-snapshot string
pub fn format_snapshot(observations: &[Evidence], max_chars: usize) -> Option<String> {
    let mut parts = Vec::new();
    let mut total = 0;

    for observation in observations {
        let Some(line) = snapshot_line(observation) else {
            continue;
        };
        let len = line.chars().count();
        if total + len > max_chars {
            parts.push(format!(
                "[{}] {}... (truncated)",
                time_label(observation.created_at),
                truncate_chars(observation.content.trim(), 100)
            ));
            break;
        }
        total += len;
        parts.push(line);
    }

    if parts.is_empty() {
        None
    } else {
        Some(truncate_chars(&parts.join("\n"), max_chars))
    }
}
