//! Foresight Engine - turns a newly derived fact into ranked, pushed suggestions
//!
//! The engine wires the core contracts together:
//!
//! 1. **Admission**: a shared [`RateBudget`](foresight_core::RateBudget) gates
//!    every trigger.
//! 2. **Retrieval**: [`ContextRetriever`] runs ranked search and a screen
//!    snapshot concurrently and never fails.
//! 3. **Generation**: [`CandidateGenerator`] asks for candidates, retrying
//!    malformed replies before degrading to a neutral candidate.
//! 4. **Scoring**: [`UtilityFilter`] applies the Expected Utility formula and
//!    keeps the best five.
//! 5. **Delivery**: [`SuggestionPipeline`] persists the batch, pushes it to
//!    live subscribers and marks it delivered.
//!
//! [`ReasoningChain`] is an optional six-stage alternative to steps 3 and 4
//! that falls back to them on the first failing stage.
//!
//! # Example
//!
//! ```rust,ignore
//! use foresight_engine::{Collaborators, SuggestionPipeline};
//!
//! let pipeline = SuggestionPipeline::new(collaborators, config);
//! pipeline.start()?;
//! if let Some(batch) = pipeline.trigger_suggestions(42, false).await {
//!     println!("{} suggestions", batch.len());
//! }
//! ```

#![warn(rust_2018_idioms, clippy::all)]

pub mod candidates;
pub mod llm;
pub mod metrics;
pub mod parse;
pub mod pipeline;
pub mod prompts;
pub mod reasoning_chain;
pub mod retrieval;
pub mod utility_filter;

pub use candidates::CandidateGenerator;
pub use llm::{CompletionRequest, GenerationService, Message, MessageRole, OpenAICompatibleClient};
pub use metrics::{EngineHealth, EngineMetrics, HealthStatus};
pub use parse::{extract_structured, parse_as, Shape, Strategy};
pub use pipeline::{Collaborators, PipelineState, SuggestionPipeline, TriggerReport};
pub use reasoning_chain::{ChainOutcome, ChainSession, ChainStage, ReasoningChain};
pub use retrieval::{format_snapshot, ContextRetriever};
pub use utility_filter::{FilterOutcome, UtilityFilter};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
