use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::{CompletionRequest, GenerationService, Message};
use foresight_core::{ForesightError, Result};

/// Environment variable holding the API base URL
pub const ENV_BASE_URL: &str = "FORESIGHT_LLM_BASE_URL";
/// Environment variable holding the API key
pub const ENV_API_KEY: &str = "FORESIGHT_LLM_API_KEY";
/// Environment variable holding the model name
pub const ENV_MODEL: &str = "FORESIGHT_LLM_MODEL";

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

/// Client for any `/chat/completions` endpoint speaking the OpenAI format
#[derive(Debug, Clone)]
pub struct OpenAICompatibleClient {
    pub name: String,
    api_key: Option<String>,
    base_url: String,
    model: String,
    headers: HashMap<String, String>,
    http_client: reqwest::Client,
}

impl OpenAICompatibleClient {
    pub fn new(
        name: impl Into<String>,
        api_key: Option<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            headers: HashMap::new(),
            http_client: reqwest::Client::new(),
        }
    }

    /// Build from `FORESIGHT_LLM_BASE_URL`, `FORESIGHT_LLM_API_KEY` and
    /// `FORESIGHT_LLM_MODEL`, with defaults for the URL and model
    pub fn from_env() -> Self {
        let base_url = std::env::var(ENV_BASE_URL).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var(ENV_MODEL).unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let api_key = std::env::var(ENV_API_KEY).ok().filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!("{} is not set; generation requests will be unauthenticated", ENV_API_KEY);
        }
        Self::new("openai-compatible", api_key, base_url, model)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set a client-level request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ForesightError::Generation(format!("building HTTP client: {e}")))?;
        Ok(self)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn request_completion(&self, request: &CompletionRequest) -> Result<(String, u32)> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: &request.messages,
            max_tokens: Some(request.max_tokens),
            temperature: Some(request.temperature),
        };

        let mut builder = self
            .http_client
            .post(self.endpoint())
            .header("Content-Type", "application/json");

        if let Some(api_key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", api_key));
        }

        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }

        let response = builder
            .json(&body)
            .send()
            .await
            .map_err(|e| ForesightError::Generation(format!("sending request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ForesightError::Generation(format!(
                "API error ({}): {}",
                status, error_text
            )));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ForesightError::GenerationMalformed(format!("response body: {e}")))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let tokens = completion
            .usage
            .as_ref()
            .and_then(|u| u.total_tokens)
            .unwrap_or(0);

        Ok((content, tokens))
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    total_tokens: Option<u32>,
}

#[async_trait]
impl GenerationService for OpenAICompatibleClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let (content, tokens) = self.request_completion(&request).await?;
        tracing::debug!(provider = %self.name, model = %self.model, tokens, "Completion received");
        if content.trim().is_empty() {
            return Err(ForesightError::GenerationMalformed("empty completion".into()));
        }
        Ok(content)
    }
}
