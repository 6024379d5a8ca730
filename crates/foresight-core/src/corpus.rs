//! Read-only fact corpus and ranked search contracts
//!
//! The corpus (facts, evidence and their links) is owned upstream; the
//! pipeline only reads it. Search relevance is a black box to the pipeline,
//! but the reference implementations here share one ranking: keyword overlap,
//! scaled by exponential recency decay, with near-duplicate texts filtered
//! out when diversity is requested.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::types::{Evidence, EvidenceId, Fact, FactId, RelatedFact};

/// Read access to facts and evidence
#[async_trait]
pub trait FactCorpus: Send + Sync {
    async fn fact(&self, id: FactId) -> Result<Option<Fact>>;

    /// Evidence attached to a fact, newest first
    async fn evidence_for(&self, fact_id: FactId) -> Result<Vec<Evidence>>;

    /// Facts with attached evidence, most-evidenced first
    async fn most_evidenced_facts(&self, limit: usize) -> Result<Vec<Fact>>;

    /// Facts ordered by creation time, newest first
    async fn recent_facts(&self, limit: usize) -> Result<Vec<Fact>>;

    /// Evidence of one content type created at or after `since`, newest first
    async fn recent_evidence(
        &self,
        content_type: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Evidence>>;
}

/// How query terms combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SearchMode {
    And,
    #[default]
    Or,
}

/// Parameters of one ranked search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub mode: SearchMode,
    pub limit: usize,
    pub include_evidence: bool,
    pub diversify: bool,
    pub decay: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            mode: SearchMode::Or,
            limit,
            include_evidence: true,
            diversify: true,
            decay: true,
        }
    }
}

/// One ranked search result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub fact: Fact,
    pub score: f64,
    pub evidence: Vec<Evidence>,
}

impl From<SearchHit> for RelatedFact {
    fn from(hit: SearchHit) -> Self {
        Self {
            fact: hit.fact,
            similarity_score: hit.score,
            evidence: hit.evidence,
        }
    }
}

/// Ranked search over the fact corpus
#[async_trait]
pub trait SearchService: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>>;
}

/// Recency half-life used by the reference ranking
pub const RECENCY_HALF_LIFE_DAYS: f64 = 30.0;

/// Token overlap above which two hits count as duplicates
pub const DIVERSITY_THRESHOLD: f64 = 0.8;

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Keyword score of `text` for `query`, or `None` when it does not match
pub fn keyword_score(query: &str, text: &str, mode: SearchMode) -> Option<f64> {
    let terms = tokens(query);
    if terms.is_empty() {
        return None;
    }
    let words = tokens(text);
    let matched = terms.iter().filter(|t| words.contains(*t)).count();
    let matches = match mode {
        SearchMode::And => matched == terms.len(),
        SearchMode::Or => matched > 0,
    };
    matches.then(|| matched as f64 / terms.len() as f64)
}

/// Exponential decay factor for an item created at `created_at`
pub fn recency_factor(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_days = (now - created_at).num_seconds().max(0) as f64 / 86_400.0;
    0.5f64.powf(age_days / RECENCY_HALF_LIFE_DAYS)
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Score, sort and filter `facts` for `request`. Evidence is not attached.
pub fn rank_facts(facts: Vec<Fact>, request: &SearchRequest, now: DateTime<Utc>) -> Vec<(Fact, f64)> {
    let mut scored: Vec<(Fact, f64)> = facts
        .into_iter()
        .filter_map(|fact| {
            let base = keyword_score(&request.query, &fact.text, request.mode)?;
            let score = if request.decay {
                base * recency_factor(fact.created_at, now)
            } else {
                base
            };
            Some((fact, score))
        })
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.created_at.cmp(&a.0.created_at)));

    if request.diversify {
        let mut kept: Vec<((Fact, f64), HashSet<String>)> = Vec::new();
        for hit in scored {
            let words = tokens(&hit.0.text);
            if kept.iter().all(|(_, seen)| jaccard(seen, &words) < DIVERSITY_THRESHOLD) {
                kept.push((hit, words));
            }
            if kept.len() >= request.limit {
                break;
            }
        }
        kept.into_iter().map(|(hit, _)| hit).collect()
    } else {
        scored.truncate(request.limit);
        scored
    }
}

/// In-memory corpus and search, for tests and demos
#[derive(Debug, Default)]
pub struct InMemoryCorpus {
    facts: RwLock<HashMap<FactId, Fact>>,
    evidence: RwLock<HashMap<EvidenceId, Evidence>>,
    links: RwLock<Vec<(FactId, EvidenceId)>>,
}

impl InMemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_fact(&self, fact: Fact) {
        self.facts.write().insert(fact.id, fact);
    }

    pub fn insert_evidence(&self, evidence: Evidence) {
        self.evidence.write().insert(evidence.id, evidence);
    }

    pub fn link(&self, fact_id: FactId, evidence_id: EvidenceId) {
        self.links.write().push((fact_id, evidence_id));
    }

    fn evidence_count(&self, fact_id: FactId) -> usize {
        self.links.read().iter().filter(|(f, _)| *f == fact_id).count()
    }

    fn attached(&self, fact_id: FactId) -> Vec<Evidence> {
        let links = self.links.read();
        let evidence = self.evidence.read();
        let mut out: Vec<Evidence> = links
            .iter()
            .filter(|(f, _)| *f == fact_id)
            .filter_map(|(_, e)| evidence.get(e).cloned())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }
}

#[async_trait]
impl FactCorpus for InMemoryCorpus {
    async fn fact(&self, id: FactId) -> Result<Option<Fact>> {
        Ok(self.facts.read().get(&id).cloned())
    }

    async fn evidence_for(&self, fact_id: FactId) -> Result<Vec<Evidence>> {
        Ok(self.attached(fact_id))
    }

    async fn most_evidenced_facts(&self, limit: usize) -> Result<Vec<Fact>> {
        let mut facts: Vec<(usize, Fact)> = self
            .facts
            .read()
            .values()
            .map(|f| (self.evidence_count(f.id), f.clone()))
            .filter(|(n, _)| *n > 0)
            .collect();
        facts.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        Ok(facts.into_iter().take(limit).map(|(_, f)| f).collect())
    }

    async fn recent_facts(&self, limit: usize) -> Result<Vec<Fact>> {
        let mut facts: Vec<Fact> = self.facts.read().values().cloned().collect();
        facts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        facts.truncate(limit);
        Ok(facts)
    }

    async fn recent_evidence(
        &self,
        content_type: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Evidence>> {
        let mut out: Vec<Evidence> = self
            .evidence
            .read()
            .values()
            .filter(|e| e.content_type == content_type && e.created_at >= since)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        Ok(out)
    }
}

#[async_trait]
impl SearchService for InMemoryCorpus {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let facts: Vec<Fact> = self.facts.read().values().cloned().collect();
        let ranked = rank_facts(facts, request, Utc::now());
        Ok(ranked
            .into_iter()
            .map(|(fact, score)| {
                let evidence = if request.include_evidence {
                    self.attached(fact.id)
                } else {
                    Vec::new()
                };
                SearchHit { fact, score, evidence }
            })
            .collect())
    }
}
