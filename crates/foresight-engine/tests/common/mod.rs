//! Shared fakes for the engine integration suites

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use foresight_core::config::EngineConfig;
use foresight_core::corpus::{FactCorpus, InMemoryCorpus, SearchHit, SearchRequest, SearchService};
use foresight_core::dispatch::{LiveDispatcher, PushEvent};
use foresight_core::rate_budget::{RateBudget, TokenBucket};
use foresight_core::storage::{InMemorySuggestionStore, SuggestionStore};
use foresight_core::types::{Evidence, Fact, FactId, SuggestionBatch};
use foresight_core::{ForesightError, Result};
use foresight_engine::llm::{CompletionRequest, GenerationService};
use foresight_engine::pipeline::{Collaborators, SuggestionPipeline};
use foresight_engine::reasoning_chain::ChainStage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const TRIGGER_ID: FactId = 42;

/// Which prompt a completion request carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Query,
    Candidates,
    Scoring,
    Chain(ChainStage),
}

const CHAIN_STAGES: [ChainStage; 6] = [
    ChainStage::ScenarioUnderstanding,
    ChainStage::GoalReasoning,
    ChainStage::NextMovePrediction,
    ChainStage::DeliveryStrategy,
    ChainStage::ContentGeneration,
    ChainStage::UiProjection,
];

pub fn classify(request: &CompletionRequest) -> PromptKind {
    let text: String = request
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    if text.contains("PREVIOUS ANALYSIS") {
        let stage = CHAIN_STAGES
            .iter()
            .copied()
            .find(|s| text.contains(&format!("fields: {}.", s.required_fields().join(", "))))
            .unwrap_or(ChainStage::ScenarioUnderstanding);
        PromptKind::Chain(stage)
    } else if text.contains("scored_suggestions") {
        PromptKind::Scoring
    } else if text.contains("\"suggestions\"") {
        PromptKind::Candidates
    } else {
        PromptKind::Query
    }
}

type Responder = dyn Fn(PromptKind, usize) -> Result<String> + Send + Sync;

/// Generation fake answering by prompt kind; the second argument is how many
/// earlier calls of the same kind there were
pub struct ScriptedGeneration {
    responder: Box<Responder>,
    calls: Mutex<Vec<PromptKind>>,
    delays: Mutex<Vec<(PromptKind, Duration)>>,
}

impl ScriptedGeneration {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(PromptKind, usize) -> Result<String> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
            delays: Mutex::new(Vec::new()),
        })
    }

    /// Sleep `by` before answering every prompt of `kind`
    pub fn delay(&self, kind: PromptKind, by: Duration) {
        self.delays.lock().push((kind, by));
    }

    /// Well-formed replies everywhere, chain stages included
    pub fn well_formed(candidates: usize) -> Arc<Self> {
        Self::new(move |kind, _| Ok(standard_reply(kind, candidates)))
    }

    pub fn calls_of(&self, kind: PromptKind) -> usize {
        self.calls.lock().iter().filter(|k| **k == kind).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl GenerationService for ScriptedGeneration {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let kind = classify(&request);
        let previous = {
            let mut calls = self.calls.lock();
            let previous = calls.iter().filter(|k| **k == kind).count();
            calls.push(kind);
            previous
        };
        let delay = self.delays.lock().iter().find(|(k, _)| *k == kind).map(|(_, d)| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        (self.responder)(kind, previous)
    }
}

pub fn standard_reply(kind: PromptKind, candidates: usize) -> String {
    match kind {
        PromptKind::Query => "rust parser tests".to_string(),
        PromptKind::Candidates => candidates_json(candidates),
        PromptKind::Scoring => uniform_scores_json(candidates),
        PromptKind::Chain(stage) => chain_reply(stage),
    }
}

pub fn candidates_json(n: usize) -> String {
    let items: Vec<serde_json::Value> = (0..n)
        .map(|i| {
            serde_json::json!({
                "title": format!("Suggestion {i}"),
                "description": format!("Do thing {i} next"),
                "category": "coding",
                "rationale": "The parser changed recently",
                "priority": "high",
            })
        })
        .collect();
    serde_json::json!({ "suggestions": items }).to_string()
}

/// benefit 8, pU 0.8, fp 2 @ 0.1, fn 4 @ 0.2, decay 7 (EU 3.78) for every index
pub fn uniform_scores_json(n: usize) -> String {
    let items: Vec<serde_json::Value> = (0..n)
        .map(|i| {
            serde_json::json!({
                "index": i,
                "benefit": 8.0,
                "false_positive_cost": 2.0,
                "false_negative_cost": 4.0,
                "decay": 7.0,
                "probability_useful": 0.8,
                "probability_false_positive": 0.1,
                "probability_false_negative": 0.2,
            })
        })
        .collect();
    serde_json::json!({ "scored_suggestions": items }).to_string()
}

pub fn chain_reply(stage: ChainStage) -> String {
    let value = match stage {
        ChainStage::ScenarioUnderstanding => serde_json::json!({
            "current_activity": "Editing the JSON parser",
            "immediate_context": "Tests are failing",
            "accomplishment_goal": "Make the parser tolerant",
            "challenges": ["trailing commas"],
        }),
        ChainStage::GoalReasoning => serde_json::json!({
            "primary_goal": "Green test suite",
            "timeline": "Today",
            "most_helpful": "A failing-case checklist",
        }),
        ChainStage::NextMovePrediction => serde_json::json!({
            "predicted_action": "Run the tests again",
            "useful_preparation": "The exact test command",
            "content_format": "command",
        }),
        ChainStage::DeliveryStrategy => serde_json::json!({
            "delivery_type": "prepared_content",
            "message": "Here is the command",
            "content_type": "command",
            "tone": "brief",
            "helpfulness_score": 8,
            "timing_score": 7,
        }),
        ChainStage::ContentGeneration => serde_json::json!({
            "content": "cargo test -p parser",
            "content_type": "command",
            "help_text": "Runs the parser suite",
        }),
        ChainStage::UiProjection => serde_json::json!({
            "title": "Re-run the parser tests",
            "message": "You just touched the parser.",
            "action_type": "command",
            "confidence": 0.8,
            "helpfulness": 8.0,
            "timing": 7.0,
            "rationale": "Recent edits to the parser",
        }),
    };
    format!("```json\n{value}\n```")
}

/// Dispatcher fake recording every event
#[derive(Default)]
pub struct RecordingDispatcher {
    events: Mutex<Vec<PushEvent>>,
    fail_batches: AtomicBool,
    closed: AtomicBool,
}

impl RecordingDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reject `suggestion_batch` events; other events still go through
    pub fn failing_batches() -> Arc<Self> {
        let d = Self::default();
        d.fail_batches.store(true, Ordering::SeqCst);
        Arc::new(d)
    }

    pub fn events(&self) -> Vec<PushEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    pub fn error_types(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                PushEvent::Error { error_type, .. } => Some(error_type.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LiveDispatcher for RecordingDispatcher {
    async fn broadcast(&self, event: PushEvent) -> Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ForesightError::DispatchFailed("dispatcher closed".into()));
        }
        if self.fail_batches.load(Ordering::SeqCst) && event.event_type() == "suggestion_batch" {
            return Err(ForesightError::DispatchFailed("push channel unavailable".into()));
        }
        self.events.lock().push(event);
        Ok(1)
    }

    fn active_connections(&self) -> usize {
        1
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Store whose saves always fail
#[derive(Default)]
pub struct FailingStore;

#[async_trait]
impl SuggestionStore for FailingStore {
    async fn save(&self, _batch: &SuggestionBatch) -> Result<Vec<Uuid>> {
        Err(ForesightError::PersistenceFailed("disk full".into()))
    }

    async fn mark_delivered(&self, _ids: &[Uuid]) -> Result<usize> {
        Ok(0)
    }

    async fn batch(&self, _batch_id: Uuid) -> Result<Vec<foresight_core::types::Suggestion>> {
        Ok(Vec::new())
    }

    async fn recent(&self, _limit: usize) -> Result<Vec<foresight_core::types::Suggestion>> {
        Ok(Vec::new())
    }
}

/// Store that answers only after `delay`, then behaves like `inner`
pub struct SlowStore {
    pub inner: Arc<InMemorySuggestionStore>,
    pub delay: Duration,
}

#[async_trait]
impl SuggestionStore for SlowStore {
    async fn save(&self, batch: &SuggestionBatch) -> Result<Vec<Uuid>> {
        tokio::time::sleep(self.delay).await;
        self.inner.save(batch).await
    }

    async fn mark_delivered(&self, ids: &[Uuid]) -> Result<usize> {
        self.inner.mark_delivered(ids).await
    }

    async fn batch(&self, batch_id: Uuid) -> Result<Vec<foresight_core::types::Suggestion>> {
        self.inner.batch(batch_id).await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<foresight_core::types::Suggestion>> {
        self.inner.recent(limit).await
    }
}

/// Search that always errors
pub struct FailingSearch;

#[async_trait]
impl SearchService for FailingSearch {
    async fn search(&self, _request: &SearchRequest) -> Result<Vec<SearchHit>> {
        Err(ForesightError::RetrievalDegraded("index offline".into()))
    }
}

/// Search that never answers in time
pub struct StalledSearch;

#[async_trait]
impl SearchService for StalledSearch {
    async fn search(&self, _request: &SearchRequest) -> Result<Vec<SearchHit>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }
}

/// How a [`DegradedCorpus`] answers one kind of call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degrade {
    Healthy,
    Stall,
    Fail,
}

impl Degrade {
    async fn apply(self, what: &str) -> Result<()> {
        match self {
            Degrade::Healthy => Ok(()),
            Degrade::Stall => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            Degrade::Fail => Err(ForesightError::RetrievalDegraded(format!("{what} unavailable"))),
        }
    }
}

/// Corpus whose evidence and snapshot reads can stall or fail
pub struct DegradedCorpus {
    inner: Arc<InMemoryCorpus>,
    evidence: Degrade,
    snapshot: Degrade,
}

impl DegradedCorpus {
    pub fn new(inner: Arc<InMemoryCorpus>, evidence: Degrade, snapshot: Degrade) -> Arc<Self> {
        Arc::new(Self {
            inner,
            evidence,
            snapshot,
        })
    }
}

#[async_trait]
impl FactCorpus for DegradedCorpus {
    async fn fact(&self, id: FactId) -> Result<Option<Fact>> {
        self.inner.fact(id).await
    }

    async fn evidence_for(&self, fact_id: FactId) -> Result<Vec<Evidence>> {
        self.evidence.apply("evidence").await?;
        self.inner.evidence_for(fact_id).await
    }

    async fn most_evidenced_facts(&self, limit: usize) -> Result<Vec<Fact>> {
        self.inner.most_evidenced_facts(limit).await
    }

    async fn recent_facts(&self, limit: usize) -> Result<Vec<Fact>> {
        self.inner.recent_facts(limit).await
    }

    async fn recent_evidence(
        &self,
        content_type: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Evidence>> {
        self.snapshot.apply("snapshot").await?;
        self.inner.recent_evidence(content_type, since, limit).await
    }
}

pub fn fact(id: FactId, text: &str, confidence: f64) -> Fact {
    Fact {
        id,
        text: text.to_string(),
        reasoning: format!("Observed repeatedly ({id})"),
        confidence,
        created_at: Utc::now() - ChronoDuration::hours(id),
    }
}

pub fn evidence(id: i64, content: &str, content_type: &str) -> Evidence {
    Evidence {
        id,
        content: content.to_string(),
        content_type: content_type.to_string(),
        created_at: Utc::now() - ChronoDuration::seconds(30),
    }
}

/// Trigger 42 plus three related, evidenced facts and one screen observation
pub fn seeded_corpus() -> Arc<InMemoryCorpus> {
    let corpus = InMemoryCorpus::new();
    corpus.insert_fact(fact(TRIGGER_ID, "Works on a Rust parser with failing tests", 9.0));
    corpus.insert_fact(fact(1, "Prefers writing tests before fixing a parser", 8.5));
    corpus.insert_fact(fact(2, "Uses Rust for side projects", 6.0));
    corpus.insert_fact(fact(3, "Keeps a tests checklist", 3.0));

    corpus.insert_evidence(evidence(100, "cargo test output: 3 failed", "input_text_log"));
    corpus.insert_evidence(evidence(101, "Opened parser.rs in the editor", "input_text_log"));
    corpus.insert_evidence(evidence(
        102,
        "Application Name: Code\nWindow Title: parser.rs\nVisible Text: fn parse()",
        "input_text",
    ));
    corpus.link(TRIGGER_ID, 100);
    corpus.link(1, 100);
    corpus.link(2, 101);
    corpus.link(3, 101);
    Arc::new(corpus)
}

/// Test configuration: short retry delay, defaults otherwise
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.generation.retry_delay_secs = 0.01;
    config
}

pub struct Harness {
    pub pipeline: Arc<SuggestionPipeline>,
    pub generation: Arc<ScriptedGeneration>,
    pub store: Arc<InMemorySuggestionStore>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub budget: Arc<TokenBucket>,
}

pub struct HarnessBuilder {
    generation: Arc<ScriptedGeneration>,
    dispatcher: Arc<RecordingDispatcher>,
    budget: Arc<TokenBucket>,
    store: Option<Arc<dyn SuggestionStore>>,
    search: Option<Arc<dyn SearchService>>,
    config: EngineConfig,
}

impl HarnessBuilder {
    pub fn new(generation: Arc<ScriptedGeneration>) -> Self {
        Self {
            generation,
            dispatcher: RecordingDispatcher::new(),
            budget: Arc::new(TokenBucket::new(3, Duration::from_secs(45))),
            store: None,
            search: None,
            config: test_config(),
        }
    }

    pub fn budget(mut self, budget: TokenBucket) -> Self {
        self.budget = Arc::new(budget);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<RecordingDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn store(mut self, store: Arc<dyn SuggestionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn search(mut self, search: Arc<dyn SearchService>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn build(self) -> Harness {
        let corpus = seeded_corpus();
        let memory_store = Arc::new(InMemorySuggestionStore::new());
        let store: Arc<dyn SuggestionStore> = self.store
            .unwrap_or_else(|| memory_store.clone() as Arc<dyn SuggestionStore>);
        let search: Arc<dyn SearchService> = self.search
            .unwrap_or_else(|| corpus.clone() as Arc<dyn SearchService>);
        let budget: Arc<dyn RateBudget> = self.budget.clone();

        let pipeline = SuggestionPipeline::new(
            Collaborators {
                corpus,
                search,
                generation: self.generation.clone(),
                store,
                dispatcher: self.dispatcher.clone(),
                budget,
            },
            self.config,
        );
        pipeline.start().unwrap();

        Harness {
            pipeline: Arc::new(pipeline),
            generation: self.generation,
            store: memory_store,
            dispatcher: self.dispatcher,
            budget: self.budget,
        }
    }
}
