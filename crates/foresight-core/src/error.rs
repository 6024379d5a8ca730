//! Error types for Foresight Core
//!
//! This module defines the error taxonomy shared by every stage of the
//! suggestion pipeline. We use `thiserror` for ergonomic error definitions
//! with automatic Display/Error implementations.
//!
//! Most variants are recoverable below the orchestrator: retrieval, generation
//! and scoring failures are absorbed and downgraded to safe defaults. Only
//! persistence failures and a missing trigger fail a whole invocation.

use std::time::Duration;
use thiserror::Error;

use crate::types::FactId;

/// Result type alias for Foresight operations
pub type Result<T> = std::result::Result<T, ForesightError>;

/// Main error type for Foresight operations
#[derive(Error, Debug)]
pub enum ForesightError {
    /// The shared rate budget denied the trigger
    #[error("Rate limited, next token in {0:?}")]
    RateLimited(Duration),

    /// The trigger fact does not exist in the corpus
    #[error("Trigger fact not found: {0}")]
    TriggerNotFound(FactId),

    /// Context retrieval could not use its primary strategy
    #[error("Retrieval degraded: {0}")]
    RetrievalDegraded(String),

    /// The generation service failed or returned an error status
    #[error("Generation failed: {0}")]
    Generation(String),

    /// The generation service replied, but the reply was unusable
    #[error("Generation output malformed: {0}")]
    GenerationMalformed(String),

    /// The scoring pass failed as a whole
    #[error("Scoring failed: {0}")]
    ScoringFailed(String),

    /// A reasoning-chain stage returned an incomplete result
    #[error("Stage {stage} incomplete: missing '{field}'")]
    StageIncomplete {
        stage: &'static str,
        field: &'static str,
    },

    /// Writing a batch failed; nothing was persisted
    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    /// Pushing an event to subscribers failed
    #[error("Dispatch failed: {0}")]
    DispatchFailed(String),

    /// An external call exceeded its stage budget
    #[error("{stage} timed out after {after:?}")]
    Timeout {
        stage: &'static str,
        after: Duration,
    },

    /// The engine is not accepting triggers
    #[error("Engine is not running")]
    NotRunning,

    /// Invalid configuration values
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// SQLite errors
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        source: Box<ForesightError>,
    },
}

impl ForesightError {
    /// Add context to an error
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Stable label used as `error_type` in pushed error events
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate_limited",
            Self::TriggerNotFound(_) => "trigger_not_found",
            Self::RetrievalDegraded(_) => "retrieval_degraded",
            Self::Generation(_) | Self::GenerationMalformed(_) => "generation_failed",
            Self::ScoringFailed(_) => "scoring_failed",
            Self::StageIncomplete { .. } => "stage_incomplete",
            Self::PersistenceFailed(_) | Self::Storage(_) => "persistence_failed",
            Self::DispatchFailed(_) => "dispatch_failed",
            Self::Timeout { .. } => "timeout",
            Self::NotRunning => "engine_not_running",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Serialization(_) | Self::Io(_) => "suggestion_generation_failed",
            Self::WithContext { source, .. } => source.error_type(),
        }
    }

    /// Whether a caller may retry the same operation later
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited(_) | Self::Timeout { .. } | Self::Generation(_) => true,
            Self::WithContext { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add lazy context to a Result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.context(f()))
    }
}
