//! Text-generation service contract
//!
//! The pipeline treats generation as an opaque completion call: a list of
//! chat messages in, text out. Structure is recovered afterwards by
//! [`crate::parse`].

pub mod openai_compatible;

use async_trait::async_trait;
use foresight_core::Result;
use serde::{Deserialize, Serialize};

pub use openai_compatible::OpenAICompatibleClient;

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// One completion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>, max_tokens: u32, temperature: f32) -> Self {
        Self {
            messages,
            max_tokens,
            temperature,
        }
    }
}

/// Opaque text-generation service
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Provider name, for logs
    fn name(&self) -> &str;

    /// Complete the conversation and return the reply text
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}
