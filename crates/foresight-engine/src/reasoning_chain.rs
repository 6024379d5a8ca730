//! Six-stage reasoning chain
//!
//! ```text
//! ScenarioUnderstanding -> GoalReasoning -> NextMovePrediction
//!     -> DeliveryStrategy -> ContentGeneration -> UiProjection -> Completed
//!            \__________________ any failure __________________/ -> FellBack
//! ```
//!
//! Every stage is one generation call that sees the structured output of all
//! earlier stages. A stage fails on timeout, service error, an unparseable
//! reply, or a missing/blank required field; the first failure moves the
//! machine to the absorbing `FellBack` state and the caller runs the plain
//! pipeline instead. On completion the last two stages are folded into a
//! single [`Suggestion`].

use chrono::{DateTime, Utc};
use foresight_core::config::EngineConfig;
use foresight_core::types::{Candidate, ContextBundle, Priority, Scored, Suggestion, Trigger};
use foresight_core::utility::UtilityScore;
use foresight_core::{ForesightError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::llm::{CompletionRequest, GenerationService};
use crate::parse::{extract_structured, Shape};
use crate::prompts;

/// Stages of the chain, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStage {
    ScenarioUnderstanding,
    GoalReasoning,
    NextMovePrediction,
    DeliveryStrategy,
    ContentGeneration,
    UiProjection,
}

impl ChainStage {
    pub const FIRST: ChainStage = ChainStage::ScenarioUnderstanding;

    pub fn next(self) -> Option<ChainStage> {
        match self {
            Self::ScenarioUnderstanding => Some(Self::GoalReasoning),
            Self::GoalReasoning => Some(Self::NextMovePrediction),
            Self::NextMovePrediction => Some(Self::DeliveryStrategy),
            Self::DeliveryStrategy => Some(Self::ContentGeneration),
            Self::ContentGeneration => Some(Self::UiProjection),
            Self::UiProjection => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ScenarioUnderstanding => "scenario_understanding",
            Self::GoalReasoning => "goal_reasoning",
            Self::NextMovePrediction => "next_move_prediction",
            Self::DeliveryStrategy => "delivery_strategy",
            Self::ContentGeneration => "content_generation",
            Self::UiProjection => "ui_projection",
        }
    }

    /// Fields a reply must carry, non-blank, for the stage to complete
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::ScenarioUnderstanding => &["current_activity", "immediate_context", "accomplishment_goal"],
            Self::GoalReasoning => &["primary_goal", "timeline", "most_helpful"],
            Self::NextMovePrediction => &["predicted_action", "useful_preparation", "content_format"],
            Self::DeliveryStrategy => &[
                "delivery_type",
                "message",
                "content_type",
                "tone",
                "helpfulness_score",
                "timing_score",
            ],
            Self::ContentGeneration => &["content", "content_type", "help_text"],
            Self::UiProjection => &[
                "title",
                "message",
                "action_type",
                "confidence",
                "helpfulness",
                "timing",
                "rationale",
            ],
        }
    }

    fn instruction(self) -> &'static str {
        match self {
            Self::ScenarioUnderstanding => {
                "Describe the user's current scenario: what they are doing (current_activity), \
                 the immediate context (immediate_context), what they are trying to accomplish \
                 (accomplishment_goal) and any challenges (challenges, a list)."
            }
            Self::GoalReasoning => {
                "Reason about the user's goals: the primary goal (primary_goal), timeline and \
                 urgency (timeline), what would help most right now (most_helpful) and the \
                 immediate next steps (immediate_next_steps, a list)."
            }
            Self::NextMovePrediction => {
                "Predict the user's next action (predicted_action), what would be useful to \
                 prepare for it (useful_preparation) and the best format for it (content_format)."
            }
            Self::DeliveryStrategy => {
                "Decide how to deliver help: delivery_type, a short message, the content_type to \
                 prepare, the tone, and helpfulness_score and timing_score from 1 to 10."
            }
            Self::ContentGeneration => {
                "Prepare the content itself (content), its content_type and a one-line help_text \
                 describing what it provides."
            }
            Self::UiProjection => {
                "Project the result for display: title, message, action_type, confidence (0-1), \
                 helpfulness (1-10), timing (1-10) and rationale."
            }
        }
    }

    fn max_tokens(self, config: &EngineConfig) -> u32 {
        match self {
            Self::ContentGeneration => config.generation.content_max_tokens,
            _ => config.generation.chain_max_tokens,
        }
    }

    fn timeout(self, config: &EngineConfig) -> Duration {
        match self {
            Self::ContentGeneration => config.timeouts.content_synthesis(),
            _ => config.timeouts.generation(),
        }
    }
}

impl fmt::Display for ChainStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioUnderstanding {
    pub current_activity: String,
    pub immediate_context: String,
    pub accomplishment_goal: String,
    #[serde(default)]
    pub challenges: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalReasoning {
    pub primary_goal: String,
    pub timeline: String,
    pub most_helpful: String,
    #[serde(default)]
    pub immediate_next_steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextMovePrediction {
    pub predicted_action: String,
    pub useful_preparation: String,
    pub content_format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryStrategy {
    pub delivery_type: String,
    pub message: String,
    pub content_type: String,
    pub tone: String,
    pub helpfulness_score: f64,
    pub timing_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedContent {
    pub content: String,
    pub content_type: String,
    pub help_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiProjection {
    pub title: String,
    pub message: String,
    pub action_type: String,
    pub confidence: f64,
    pub helpfulness: f64,
    pub timing: f64,
    pub rationale: String,
}

impl UiProjection {
    /// Helpfulness as benefit, timing as decay, confidence as pU; neutral
    /// cost terms
    pub fn utility(&self) -> UtilityScore {
        UtilityScore {
            benefit: self.helpfulness,
            decay: self.timing,
            probability_useful: self.confidence,
            ..UtilityScore::NEUTRAL
        }
    }
}

/// Structured outputs collected so far
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageOutputs {
    pub scenario: Option<ScenarioUnderstanding>,
    pub goals: Option<GoalReasoning>,
    pub next_move: Option<NextMovePrediction>,
    pub delivery: Option<DeliveryStrategy>,
    pub content: Option<PreparedContent>,
    pub ui: Option<UiProjection>,
}

/// Machine state
#[derive(Debug, Clone, PartialEq)]
pub enum ChainState {
    Running(ChainStage),
    Completed,
    FellBack { at: ChainStage, reason: String },
}

impl ChainState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running(_))
    }
}

/// Record of one chain run
#[derive(Debug, Clone, Serialize)]
pub struct ChainSession {
    pub id: Uuid,
    pub trigger_id: i64,
    pub created_at: DateTime<Utc>,
    pub processing_time: Duration,
    pub completed_stages: Vec<ChainStage>,
    pub outputs: StageOutputs,
    pub errors: Vec<String>,
    pub fell_back: bool,
}

impl ChainSession {
    fn new(trigger_id: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger_id,
            created_at: Utc::now(),
            processing_time: Duration::ZERO,
            completed_stages: Vec::new(),
            outputs: StageOutputs::default(),
            errors: Vec::new(),
            fell_back: false,
        }
    }
}

/// Result of running the chain
#[derive(Debug, Clone)]
pub enum ChainOutcome {
    /// All six stages completed; one suggestion was synthesized
    Completed {
        session: ChainSession,
        suggestion: Suggestion,
    },
    /// The chain aborted; the caller runs the plain pipeline
    FellBack { session: ChainSession },
}

impl ChainOutcome {
    pub fn session(&self) -> &ChainSession {
        match self {
            Self::Completed { session, .. } | Self::FellBack { session } => session,
        }
    }
}

/// Check that every required field is present and non-blank
pub fn check_required(stage: ChainStage, value: &Value) -> Result<()> {
    let object = value.as_object().ok_or(ForesightError::StageIncomplete {
        stage: stage.as_str(),
        field: "<object>",
    })?;
    for field in stage.required_fields().iter().copied() {
        let present = match object.get(field) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(_) => true,
        };
        if !present {
            return Err(ForesightError::StageIncomplete {
                stage: stage.as_str(),
                field,
            });
        }
    }
    Ok(())
}

/// Runs the chain for one trigger
pub struct ReasoningChain {
    generation: Arc<dyn GenerationService>,
    config: EngineConfig,
}

impl ReasoningChain {
    pub fn new(generation: Arc<dyn GenerationService>, config: EngineConfig) -> Self {
        Self { generation, config }
    }

    pub async fn run(&self, trigger: &Trigger, bundle: &ContextBundle) -> ChainOutcome {
        let started = Instant::now();
        let context = prompts::format_context(bundle);
        let mut session = ChainSession::new(trigger.id);
        let mut prior = Map::new();
        let mut state = ChainState::Running(ChainStage::FIRST);

        while let ChainState::Running(stage) = state {
            debug!(trigger_id = trigger.id, %stage, "Chain stage starting");
            state = match self.step(stage, trigger, &context, &mut prior, &mut session.outputs).await {
                Ok(()) => {
                    session.completed_stages.push(stage);
                    stage.next().map_or(ChainState::Completed, ChainState::Running)
                }
                Err(e) => ChainState::FellBack {
                    at: stage,
                    reason: e.to_string(),
                },
            };
        }

        session.processing_time = started.elapsed();

        if let ChainState::FellBack { at, reason } = state {
            return self.fall_back(session, at, reason);
        }

        let finals = session.outputs.content.clone().zip(session.outputs.ui.clone());
        let Some((content, ui)) = finals else {
            return self.fall_back(session, ChainStage::UiProjection, "missing final outputs".into());
        };
        let suggestion = synthesize(&content, &ui);
        info!(
            trigger_id = trigger.id,
            session_id = %session.id,
            expected_utility = suggestion.expected_utility,
            elapsed_ms = session.processing_time.as_millis() as u64,
            "Reasoning chain completed"
        );
        ChainOutcome::Completed {
            session,
            suggestion,
        }
    }

    fn fall_back(&self, mut session: ChainSession, at: ChainStage, reason: String) -> ChainOutcome {
        warn!(
            trigger_id = session.trigger_id,
            session_id = %session.id,
            stage = %at,
            reason = %reason,
            "Reasoning chain aborted; falling back to plain pipeline"
        );
        session.errors.push(format!("{at}: {reason}"));
        session.fell_back = true;
        ChainOutcome::FellBack { session }
    }

    async fn step(
        &self,
        stage: ChainStage,
        trigger: &Trigger,
        context: &str,
        prior: &mut Map<String, Value>,
        outputs: &mut StageOutputs,
    ) -> Result<()> {
        let value = self.call(stage, trigger, context, prior).await?;
        match stage {
            ChainStage::ScenarioUnderstanding => outputs.scenario = Some(typed(stage, &value)?),
            ChainStage::GoalReasoning => outputs.goals = Some(typed(stage, &value)?),
            ChainStage::NextMovePrediction => outputs.next_move = Some(typed(stage, &value)?),
            ChainStage::DeliveryStrategy => outputs.delivery = Some(typed(stage, &value)?),
            ChainStage::ContentGeneration => outputs.content = Some(typed(stage, &value)?),
            ChainStage::UiProjection => outputs.ui = Some(typed(stage, &value)?),
        }
        prior.insert(stage.as_str().to_string(), value);
        Ok(())
    }

    async fn call(
        &self,
        stage: ChainStage,
        trigger: &Trigger,
        context: &str,
        prior: &Map<String, Value>,
    ) -> Result<Value> {
        let fields = stage.required_fields();
        let request = CompletionRequest::new(
            prompts::chain_stage(
                stage.instruction(),
                trigger,
                context,
                &Value::Object(prior.clone()),
                fields,
            ),
            stage.max_tokens(&self.config),
            self.config.generation.temperature,
        );
        let after = stage.timeout(&self.config);
        let reply = tokio::time::timeout(after, self.generation.complete(request))
            .await
            .map_err(|_| ForesightError::Timeout {
                stage: stage.as_str(),
                after,
            })??;

        let extracted = extract_structured(&reply, &Shape::object(fields)).ok_or_else(|| {
            ForesightError::GenerationMalformed(format!("{stage}: no structured output"))
        })?;
        check_required(stage, &extracted.value)?;
        Ok(extracted.value)
    }
}

fn typed<T: DeserializeOwned>(stage: ChainStage, value: &Value) -> Result<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| ForesightError::GenerationMalformed(format!("{stage}: {e}")))
}

/// Fold the content and projection stages into one suggestion
pub fn synthesize(content: &PreparedContent, ui: &UiProjection) -> Suggestion {
    let candidate = Candidate {
        title: ui.title.clone(),
        description: format!("{}\n\n{}", ui.message.trim(), content.content.trim()),
        category: content.content_type.clone(),
        rationale: ui.rationale.clone(),
        priority: Priority::Medium,
    };
    Suggestion::from_candidate(&candidate, Scored::Utility(ui.utility()))
}
