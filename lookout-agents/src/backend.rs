//! LLM backend abstraction
//!
//! Supports OpenAI-compatible APIs and Anthropic Claude. Provider failures
//! are classified into retryable and terminal kinds so the extractor can
//! decide between backoff and giving up.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// LLM backend errors
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Empty response")]
    EmptyResponse,
}

impl LlmError {
    /// Whether the same request may succeed after a backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::RateLimited | LlmError::Transient(_))
    }
}

/// Generic LLM backend trait
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Generate a completion with system prompt
    async fn generate(&self, system: &str, user: &str) -> Result<String, LlmError>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// OpenAI-compatible backend configuration
#[derive(Debug, Clone)]
pub struct OpenAIBackendConfig {
    /// API key
    pub api_key: String,
    /// Base URL (for OpenRouter, local servers, etc.)
    pub base_url: Option<String>,
    /// Model name
    pub model: String,
    /// Temperature (0.0 - 2.0)
    pub temperature: f32,
    /// Max tokens
    pub max_tokens: u16,
}

impl Default for OpenAIBackendConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 4096,
        }
    }
}

impl OpenAIBackendConfig {
    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            ..Default::default()
        }
    }

    pub fn openrouter(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: Some("https://openrouter.ai/api/v1".to_string()),
            model: model.to_string(),
            ..Default::default()
        }
    }

    pub fn local(base_url: &str, model: &str) -> Self {
        Self {
            api_key: "sk-local".to_string(),
            base_url: Some(base_url.to_string()),
            model: model.to_string(),
            ..Default::default()
        }
    }
}

/// Map an async-openai failure onto the extraction fault kinds
fn classify_openai_error(err: OpenAIError) -> LlmError {
    match err {
        OpenAIError::ApiError(api) => {
            let code = api.code.as_ref().map(|c| c.to_string()).unwrap_or_default();
            let kind = api.r#type.clone().unwrap_or_default();
            let message = api.message.to_lowercase();

            if code.contains("insufficient_quota") || kind.contains("insufficient_quota") {
                LlmError::QuotaExhausted(api.message)
            } else if code.contains("rate_limit") || kind.contains("rate_limit") || message.contains("rate limit") {
                LlmError::RateLimited
            } else if kind.contains("server_error") || message.contains("overloaded") {
                LlmError::Transient(api.message)
            } else {
                LlmError::Api(api.message)
            }
        }
        OpenAIError::Reqwest(e) => LlmError::Transient(e.to_string()),
        OpenAIError::InvalidArgument(msg) => LlmError::Config(msg),
        other => LlmError::Api(other.to_string()),
    }
}

/// Backoff policy that makes the async-openai client give up after the first
/// attempt. Rate limits surface as [`LlmError::RateLimited`]; the extractor
/// owns the retry policy.
pub fn no_client_retries() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_max_elapsed_time(Some(Duration::ZERO))
        .build()
}

/// OpenAI-compatible LLM backend
pub struct OpenAIBackend {
    client: Client<OpenAIConfig>,
    config: OpenAIBackendConfig,
}

impl OpenAIBackend {
    pub fn new(config: OpenAIBackendConfig) -> Result<Self, LlmError> {
        if config.api_key.trim().is_empty() {
            return Err(LlmError::Config("missing API key".to_string()));
        }

        let mut openai_config = OpenAIConfig::new().with_api_key(&config.api_key);

        if let Some(base_url) = &config.base_url {
            openai_config = openai_config.with_api_base(base_url);
        }

        let client = Client::with_config(openai_config).with_backoff(no_client_retries());

        Ok(Self { client, config })
    }
}

#[async_trait]
impl LlmBackend for OpenAIBackend {
    async fn generate(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system)
                    .build()
                    .map_err(|e| LlmError::Config(e.to_string()))?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user)
                    .build()
                    .map_err(|e| LlmError::Config(e.to_string()))?,
            ),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.model)
            .messages(messages)
            .temperature(self.config.temperature)
            .max_tokens(self.config.max_tokens)
            .build()
            .map_err(|e| LlmError::Config(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(classify_openai_error)?;

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .filter(|content| !content.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Anthropic Claude backend configuration
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// API key
    pub api_key: String,
    /// Model name (e.g., claude-3-5-sonnet-20241022)
    pub model: String,
    /// Max tokens
    pub max_tokens: u32,
    /// Per-request timeout
    pub timeout: Duration,
}

impl AnthropicConfig {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens: 4096,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Classify a non-success Anthropic response
fn classify_anthropic_status(status: u16, body: &str) -> LlmError {
    let lowered = body.to_lowercase();
    match status {
        429 => LlmError::RateLimited,
        500..=599 => LlmError::Transient(format!("Anthropic API error {}", status)),
        _ if lowered.contains("credit balance") || lowered.contains("billing") => {
            LlmError::QuotaExhausted(body.to_string())
        }
        401 | 403 => LlmError::Config(format!("Anthropic API rejected credentials ({})", status)),
        _ => LlmError::Api(format!("Anthropic API error {}: {}", status, body)),
    }
}

/// Anthropic Claude backend
pub struct AnthropicBackend {
    client: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicBackend {
    pub fn new(config: AnthropicConfig) -> Result<Self, LlmError> {
        if config.api_key.trim().is_empty() {
            return Err(LlmError::Config("missing API key".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Config(e.to_string()))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    async fn generate(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let request_body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "system": system,
            "messages": [
                {"role": "user", "content": user}
            ]
        });

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| LlmError::Transient(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(classify_anthropic_status(status, &text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Transient(e.to_string()))?;

        json["content"]
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|block| block["text"].as_str())
            .map(|s| s.to_string())
            .ok_or(LlmError::EmptyResponse)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Thread-safe reference to an LLM backend
pub type SharedBackend = Arc<dyn LlmBackend>;

/// Create a shared OpenAI-compatible backend
pub fn create_backend(config: OpenAIBackendConfig) -> Result<SharedBackend, LlmError> {
    Ok(Arc::new(OpenAIBackend::new(config)?))
}

/// Create a shared Anthropic backend
pub fn create_anthropic_backend(config: AnthropicConfig) -> Result<SharedBackend, LlmError> {
    Ok(Arc::new(AnthropicBackend::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anthropic_status_classification() {
        assert!(matches!(classify_anthropic_status(429, ""), LlmError::RateLimited));
        assert!(matches!(classify_anthropic_status(529, "overloaded"), LlmError::Transient(_)));
        assert!(matches!(
            classify_anthropic_status(400, r#"{"error":{"message":"Your credit balance is too low"}}"#),
            LlmError::QuotaExhausted(_)
        ));
        assert!(matches!(classify_anthropic_status(401, ""), LlmError::Config(_)));
        assert!(matches!(classify_anthropic_status(400, "bad request"), LlmError::Api(_)));
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(LlmError::RateLimited.is_retryable());
        assert!(LlmError::Transient("reset".into()).is_retryable());
        assert!(!LlmError::QuotaExhausted("out".into()).is_retryable());
        assert!(!LlmError::EmptyResponse.is_retryable());
    }

    #[test]
    fn test_openai_client_never_retries_internally() {
        use backoff::backoff::Backoff;

        let mut policy = no_client_retries();
        assert!(policy.next_backoff().is_none());
    }

    #[test]
    fn test_missing_key_is_config_error() {
        assert!(matches!(
            OpenAIBackend::new(OpenAIBackendConfig::default()),
            Err(LlmError::Config(_))
        ));
        assert!(matches!(
            AnthropicBackend::new(AnthropicConfig::new("", "claude-3-5-haiku-latest")),
            Err(LlmError::Config(_))
        ));
    }
}
