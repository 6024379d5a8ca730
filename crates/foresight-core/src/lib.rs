//! Foresight Core - contracts and data model of the proactive suggestion pipeline
//!
//! Foresight watches a corpus of facts derived from user activity and, when a
//! new high-confidence fact arrives, produces a small ranked batch of
//! suggestions. This crate holds everything the pipeline stages agree on:
//!
//! 1. **Domain types** (`types`): facts, evidence, triggers, candidates,
//!    suggestions and bounded, ranked batches
//! 2. **Expected Utility** (`utility`): the scoring contract and ranking
//! 3. **Rate Budget** (`rate_budget`): the shared token bucket
//! 4. **Collaborator contracts** (`corpus`, `dispatch`, `storage`): the
//!    read-only corpus, ranked search, live push and suggestion persistence
//! 5. **Configuration** (`config`): engine settings from TOML and environment
//!
//! # Quick Start
//!
//! ```
//! use foresight_core::types::{Candidate, Priority, Scored, Suggestion, SuggestionBatch};
//! use foresight_core::utility::UtilityScore;
//! use std::time::Duration;
//!
//! let score = UtilityScore {
//!     benefit: 8.0,
//!     false_positive_cost: 2.0,
//!     false_negative_cost: 4.0,
//!     decay: 7.0,
//!     probability_useful: 0.8,
//!     probability_false_positive: 0.1,
//!     probability_false_negative: 0.2,
//! };
//! assert!((score.expected_utility() - 3.78).abs() < 1e-9);
//!
//! let candidate = Candidate {
//!     title: "Extract the retry loop".into(),
//!     description: "The same backoff appears in three handlers.".into(),
//!     category: "coding".into(),
//!     rationale: "Recent edits touched all three.".into(),
//!     priority: Priority::High,
//! };
//! let suggestion = Suggestion::from_candidate(&candidate, Scored::Utility(score));
//! let batch = SuggestionBatch::new(Some(42), vec![suggestion], Duration::from_millis(900), 3);
//! assert_eq!(batch.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, clippy::all)]

pub mod config;
pub mod corpus;
pub mod dispatch;
pub mod error;
pub mod rate_budget;
pub mod sanitize;
pub mod storage;
pub mod types;
pub mod utility;

// Re-export commonly used types
pub use config::EngineConfig;
pub use corpus::{FactCorpus, InMemoryCorpus, SearchHit, SearchMode, SearchRequest, SearchService};
pub use dispatch::{BatchPayload, LiveDispatcher, PushEvent};
pub use error::{ForesightError, Result, ResultExt};
pub use rate_budget::{RateBudget, RateBudgetStatus, TokenBucket};
pub use storage::{InMemorySuggestionStore, SqliteCorpus, SqliteSuggestionStore, SuggestionStore};
pub use types::{
    Candidate, ContextBundle, Evidence, Fact, FactId, Priority, RelatedFact, Scored, Suggestion,
    SuggestionBatch, Trigger,
};
pub use utility::{expected_utility, UtilityScore, MAX_BATCH_SIZE};

/// Version of Foresight Core
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the crate
pub const NAME: &str = env!("CARGO_PKG_NAME");
