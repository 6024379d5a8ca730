//! Suggestion pipeline
//!
//! One invocation per trigger, strictly in order:
//!
//! ```text
//! Idle -> RateChecked -> ContextRetrieved -> CandidatesGenerated -> Scored
//!      -> Persisted -> Dispatched -> Done
//! ```
//!
//! `Failed` is reachable from every state. The rate check is the only gate
//! shared across triggers. Retrieval, generation and scoring degrade instead
//! of failing; only a missing trigger or a failed save ends an invocation
//! without a batch. Dispatch is best-effort: a persisted batch is returned
//! even when nobody could be told about it.

use foresight_core::config::EngineConfig;
use foresight_core::corpus::{FactCorpus, SearchService};
use foresight_core::dispatch::{LiveDispatcher, PushEvent};
use foresight_core::rate_budget::{RateBudget, TokenBucket};
use foresight_core::storage::SuggestionStore;
use foresight_core::types::{ContextBundle, FactId, Suggestion, SuggestionBatch, Trigger};
use foresight_core::{ForesightError, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::candidates::CandidateGenerator;
use crate::llm::GenerationService;
use crate::metrics::{EngineHealth, EngineMetrics, HealthStatus};
use crate::reasoning_chain::{ChainOutcome, ChainSession, ReasoningChain};
use crate::retrieval::{bounded, ContextRetriever};
use crate::utility_filter::UtilityFilter;

/// Where an invocation is (or ended)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    RateChecked,
    ContextRetrieved,
    CandidatesGenerated,
    Scored,
    Persisted,
    Dispatched,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::RateChecked => "rate_checked",
            Self::ContextRetrieved => "context_retrieved",
            Self::CandidatesGenerated => "candidates_generated",
            Self::Scored => "scored",
            Self::Persisted => "persisted",
            Self::Dispatched => "dispatched",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Everything the pipeline talks to
#[derive(Clone)]
pub struct Collaborators {
    pub corpus: Arc<dyn FactCorpus>,
    pub search: Arc<dyn SearchService>,
    pub generation: Arc<dyn GenerationService>,
    pub store: Arc<dyn SuggestionStore>,
    pub dispatcher: Arc<dyn LiveDispatcher>,
    pub budget: Arc<dyn RateBudget>,
}

impl Collaborators {
    /// Token bucket sized from `config.rate`
    pub fn budget_from(config: &EngineConfig) -> Arc<dyn RateBudget> {
        Arc::new(TokenBucket::new(
            config.rate.capacity,
            config.rate.refill_interval(),
        ))
    }
}

/// Outcome of one invocation
#[derive(Debug, Clone)]
pub struct TriggerReport {
    pub trigger_id: FactId,
    pub state: PipelineState,
    pub batch: Option<SuggestionBatch>,
    pub chain_session: Option<ChainSession>,
    pub error: Option<String>,
    /// `error_type()` label of the error, when there was one
    pub error_type: Option<&'static str>,
}

impl TriggerReport {
    fn new(trigger_id: FactId) -> Self {
        Self {
            trigger_id,
            state: PipelineState::Idle,
            batch: None,
            chain_session: None,
            error: None,
            error_type: None,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug!(trigger_id = self.trigger_id, from = %self.state, to = %next, "Pipeline transition");
        self.state = next;
    }
}

/// The suggestion engine
pub struct SuggestionPipeline {
    collaborators: Collaborators,
    config: EngineConfig,
    retriever: ContextRetriever,
    generator: CandidateGenerator,
    filter: UtilityFilter,
    chain: ReasoningChain,
    running: AtomicBool,
    stopped: AtomicBool,
    started_at: Mutex<Option<Instant>>,
    metrics: Mutex<EngineMetrics>,
    last_error: Mutex<Option<String>>,
}

impl SuggestionPipeline {
    pub fn new(collaborators: Collaborators, config: EngineConfig) -> Self {
        let retriever = ContextRetriever::new(
            collaborators.corpus.clone(),
            collaborators.search.clone(),
            collaborators.generation.clone(),
            config.clone(),
        );
        let generator = CandidateGenerator::new(collaborators.generation.clone(), config.clone());
        let filter = UtilityFilter::new(collaborators.generation.clone(), config.clone());
        let chain = ReasoningChain::new(collaborators.generation.clone(), config.clone());

        info!(
            generation = collaborators.generation.name(),
            capacity = config.rate.capacity,
            "Initializing suggestion pipeline"
        );

        Self {
            collaborators,
            config,
            retriever,
            generator,
            filter,
            chain,
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            started_at: Mutex::new(None),
            metrics: Mutex::new(EngineMetrics::default()),
            last_error: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Start accepting triggers. Starting a running engine is a no-op; a
    /// stopped engine cannot be restarted.
    pub fn start(&self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            warn!("Refusing to restart a stopped suggestion pipeline");
            return Err(ForesightError::NotRunning);
        }
        if !self.running.swap(true, Ordering::SeqCst) {
            *self.started_at.lock() = Some(Instant::now());
            info!("Suggestion pipeline started");
        }
        Ok(())
    }

    /// Drain the rate budget and close the dispatcher. Terminal: the
    /// dispatcher stays closed, so the engine cannot be started again.
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(ForesightError::NotRunning);
        }
        self.stopped.store(true, Ordering::SeqCst);
        self.collaborators.budget.drain();
        self.collaborators.dispatcher.close();
        *self.started_at.lock() = None;
        info!("Suggestion pipeline stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Generate, persist and push suggestions for one trigger.
    ///
    /// `None` when rate limited, when the trigger does not exist, or when the
    /// batch could not be saved.
    pub async fn trigger_suggestions(
        &self,
        trigger_id: FactId,
        use_reasoning_chain: bool,
    ) -> Option<SuggestionBatch> {
        self.run_trigger(trigger_id, use_reasoning_chain).await.batch
    }

    /// Like [`Self::trigger_suggestions`], returning the full report
    pub async fn run_trigger(&self, trigger_id: FactId, use_reasoning_chain: bool) -> TriggerReport {
        let started = Instant::now();
        let mut report = TriggerReport::new(trigger_id);

        if !self.is_running() {
            warn!(trigger_id, "Trigger received while the pipeline is stopped");
            return self.fail(report, ForesightError::NotRunning, false).await;
        }

        if !self.collaborators.budget.can_proceed() {
            let status = self.collaborators.budget.status();
            self.metrics.lock().rate_limit_hits += 1;
            info!(
                trigger_id,
                wait_time_seconds = status.wait_time_seconds,
                "Rate limited; skipping trigger"
            );
            self.emit(PushEvent::rate_limited(&status)).await;
            let e = ForesightError::RateLimited(self.collaborators.budget.wait_time());
            report.error = Some(e.to_string());
            report.error_type = Some(e.error_type());
            report.advance(PipelineState::Failed);
            return report;
        }
        report.advance(PipelineState::RateChecked);

        let trigger = match self.load_trigger(trigger_id).await {
            Ok(trigger) => trigger,
            Err(e) => return self.fail(report, e, true).await,
        };

        let bundle = self.retriever.retrieve(&trigger).await;
        report.advance(PipelineState::ContextRetrieved);

        let suggestions = if use_reasoning_chain {
            match self.chain.run(&trigger, &bundle).await {
                ChainOutcome::Completed {
                    session,
                    suggestion,
                } => {
                    report.chain_session = Some(session);
                    report.advance(PipelineState::CandidatesGenerated);
                    report.advance(PipelineState::Scored);
                    vec![suggestion]
                }
                ChainOutcome::FellBack { session } => {
                    self.metrics.lock().fallbacks += 1;
                    report.chain_session = Some(session);
                    self.plain(&trigger, &bundle, &mut report).await
                }
            }
        } else {
            self.plain(&trigger, &bundle, &mut report).await
        };

        let batch = SuggestionBatch::new(
            Some(trigger_id),
            suggestions,
            started.elapsed(),
            bundle.related_facts.len(),
        );

        match self.deliver(batch, &mut report).await {
            Ok(batch) => {
                self.metrics
                    .lock()
                    .record_batch(batch.len(), batch.processing_time());
                info!(
                    trigger_id,
                    batch_id = %batch.batch_id(),
                    suggestions = batch.len(),
                    delivered = batch.suggestions().iter().all(|s| s.delivered),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Suggestion batch complete"
                );
                report.batch = Some(batch);
                report
            }
            Err(e) => self.fail(report, e, true).await,
        }
    }

    async fn load_trigger(&self, trigger_id: FactId) -> Result<Trigger> {
        let after = self.config.timeouts.store();
        match bounded("trigger_lookup", after, self.collaborators.corpus.fact(trigger_id)).await {
            Some(Ok(Some(fact))) => Ok(Trigger::from(fact)),
            Some(Ok(None)) => Err(ForesightError::TriggerNotFound(trigger_id)),
            Some(Err(e)) => Err(e.context(format!("loading trigger {trigger_id}"))),
            None => Err(ForesightError::Timeout {
                stage: "trigger_lookup",
                after,
            }),
        }
    }

    async fn plain(
        &self,
        trigger: &Trigger,
        bundle: &ContextBundle,
        report: &mut TriggerReport,
    ) -> Vec<Suggestion> {
        let candidates = self.generator.generate(trigger, bundle).await;
        report.advance(PipelineState::CandidatesGenerated);

        let outcome = self.filter.filter(trigger, &candidates, bundle).await;
        if outcome.fell_back {
            self.metrics.lock().fallbacks += 1;
        }
        report.advance(PipelineState::Scored);
        outcome.suggestions
    }

    /// Persist, push, then mark delivered
    async fn deliver(
        &self,
        mut batch: SuggestionBatch,
        report: &mut TriggerReport,
    ) -> Result<SuggestionBatch> {
        let timeouts = &self.config.timeouts;
        let trigger_id = batch.trigger_id();

        // The store bounds its own write time; its answer is final.
        let ids = match self.collaborators.store.save(&batch).await {
            Ok(ids) => ids,
            Err(e) => {
                return Err(match e {
                    ForesightError::PersistenceFailed(_) => e,
                    other => ForesightError::PersistenceFailed(other.to_string()),
                })
            }
        };
        report.advance(PipelineState::Persisted);

        let event = PushEvent::batch(&batch);
        let pushed = bounded("dispatch", timeouts.dispatch(), self.collaborators.dispatcher.broadcast(event)).await;
        let dispatch_error = match pushed {
            Some(Ok(receivers)) => {
                debug!(batch_id = %batch.batch_id(), receivers, "Batch dispatched");
                None
            }
            Some(Err(e)) => Some(match e {
                ForesightError::DispatchFailed(_) => e,
                other => ForesightError::DispatchFailed(other.to_string()),
            }),
            None => Some(ForesightError::Timeout {
                stage: "dispatch",
                after: timeouts.dispatch(),
            }),
        };

        if let Some(e) = dispatch_error {
            warn!(batch_id = %batch.batch_id(), error = %e, "Dispatch failed; batch stays undelivered");
            self.record_error(&e);
            self.emit(PushEvent::error(&e, trigger_id)).await;
            report.error = Some(e.to_string());
            report.error_type = Some(e.error_type());
            report.advance(PipelineState::Done);
            return Ok(batch);
        }
        report.advance(PipelineState::Dispatched);

        match bounded("mark_delivered", timeouts.store(), self.collaborators.store.mark_delivered(&ids)).await {
            Some(Ok(flipped)) => {
                batch.mark_delivered(&ids);
                debug!(batch_id = %batch.batch_id(), flipped, "Marked delivered");
            }
            Some(Err(e)) => {
                warn!(batch_id = %batch.batch_id(), error = %e, "Failed to mark suggestions delivered")
            }
            None => warn!(batch_id = %batch.batch_id(), "Marking suggestions delivered timed out"),
        }
        report.advance(PipelineState::Done);
        Ok(batch)
    }

    async fn fail(&self, mut report: TriggerReport, e: ForesightError, notify: bool) -> TriggerReport {
        error!(trigger_id = report.trigger_id, state = %report.state, error = %e, "Trigger failed");
        self.metrics.lock().failures += 1;
        self.record_error(&e);
        if notify {
            self.emit(PushEvent::error(&e, Some(report.trigger_id))).await;
        }
        report.error = Some(e.to_string());
        report.error_type = Some(e.error_type());
        report.advance(PipelineState::Failed);
        report
    }

    fn record_error(&self, e: &ForesightError) {
        *self.last_error.lock() = Some(e.to_string());
    }

    /// Best-effort push; failures are logged only
    async fn emit(&self, event: PushEvent) {
        let kind = event.event_type();
        match bounded(
            "emit",
            self.config.timeouts.dispatch(),
            self.collaborators.dispatcher.broadcast(event),
        )
        .await
        {
            Some(Ok(_)) => {}
            Some(Err(e)) => warn!(event = kind, error = %e, "Could not push event"),
            None => warn!(event = kind, "Pushing event timed out"),
        }
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.metrics.lock().clone()
    }

    pub fn health(&self) -> EngineHealth {
        let running = self.is_running();
        let metrics = self.metrics();
        let uptime = self
            .started_at
            .lock()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        EngineHealth {
            status: HealthStatus::evaluate(running, &metrics),
            uptime_seconds: uptime,
            average_processing_time_seconds: metrics.average_processing_time().as_secs_f64(),
            metrics,
            active_connections: self.collaborators.dispatcher.active_connections(),
            rate_budget: self.collaborators.budget.status(),
            last_error: self.last_error.lock().clone(),
        }
    }
}
