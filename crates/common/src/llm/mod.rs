//! Text generation backends
//!
//! Provides:
//! - [`LlmGateway`] trait used by the retrieval engine, the orchestrator and
//!   the plain-generation safety net
//! - OpenAI chat-completions and Anthropic messages clients
//! - A canned mock backend for offline runs and tests

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling options for a single generation call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4000,
        }
    }
}

impl GenerationOptions {
    pub fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature,
            max_tokens,
        }
    }
}

/// A generation backend
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Produce a completion for an ordered list of messages
    async fn generate(&self, messages: &[ChatMessage], options: GenerationOptions)
        -> Result<String>;

    /// Backend identifier for logs and metrics
    fn name(&self) -> &str;
}

// ============================================================================
// OpenAI
// ============================================================================

#[derive(Serialize)]
struct OpenAIChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
}

/// OpenAI chat-completions client
pub struct OpenAiGateway {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiGateway {
    pub fn new(
        api_key: String,
        model: String,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            timeout,
        })
    }
}

#[async_trait]
impl LlmGateway for OpenAiGateway {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        options: GenerationOptions,
    ) -> Result<String> {
        let start = Instant::now();
        let request = OpenAIChatRequest {
            model: &self.model,
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_send_error(e, "openai", self.timeout))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Generation {
                message: format!("OpenAI API error {}: {}", status, body),
            });
        }

        let parsed: OpenAIChatResponse =
            response.json().await.map_err(|e| AppError::Generation {
                message: format!("Failed to parse OpenAI response: {}", e),
            })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        tracing::debug!(
            model = %self.model,
            latency_ms = start.elapsed().as_millis() as u64,
            "OpenAI generation complete"
        );

        Ok(content)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// ============================================================================
// Anthropic
// ============================================================================

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<&'a ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Anthropic messages client. System turns are lifted into the top-level
/// `system` field.
pub struct AnthropicGateway {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl AnthropicGateway {
    pub fn new(
        api_key: String,
        model: String,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com/v1".to_string()),
            timeout,
        })
    }
}

#[async_trait]
impl LlmGateway for AnthropicGateway {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        options: GenerationOptions,
    ) -> Result<String> {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let request = AnthropicRequest {
            model: &self.model,
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages: messages.iter().filter(|m| m.role != Role::System).collect(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_send_error(e, "anthropic", self.timeout))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Generation {
                message: format!("Anthropic API error {}: {}", status, body),
            });
        }

        let parsed: AnthropicResponse =
            response.json().await.map_err(|e| AppError::Generation {
                message: format!("Failed to parse Anthropic response: {}", e),
            })?;

        Ok(parsed
            .content
            .into_iter()
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join(""))
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

fn map_send_error(err: reqwest::Error, service: &str, timeout: Duration) -> AppError {
    if err.is_timeout() {
        AppError::UpstreamTimeout {
            service: service.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        AppError::Generation {
            message: format!("{} request failed: {}", service, err),
        }
    }
}

// ============================================================================
// Mock
// ============================================================================

/// Offline backend. Echoes a short summary of the last user turn.
#[derive(Default)]
pub struct MockLlmGateway;

#[async_trait]
impl LlmGateway for MockLlmGateway {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        _options: GenerationOptions,
    ) -> Result<String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let preview: String = last_user.chars().take(160).collect();
        Ok(format!(
            "Based on the available financial information: {}",
            preview.trim()
        ))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Run `generate` under an overall deadline.
pub async fn generate_bounded(
    gateway: &dyn LlmGateway,
    messages: &[ChatMessage],
    options: GenerationOptions,
    limit: Duration,
) -> Result<String> {
    tokio::time::timeout(limit, gateway.generate(messages, options))
        .await
        .map_err(|_| AppError::UpstreamTimeout {
            service: gateway.name().to_string(),
            timeout_ms: limit.as_millis() as u64,
        })?
}

/// Create a generation backend based on configuration.
pub fn create_llm_gateway(config: &LlmConfig) -> Result<Arc<dyn LlmGateway>> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let key = || {
        config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                AppError::configuration(format!("{} API key required", config.provider))
            })
    };

    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiGateway::new(
            key()?,
            config.model.clone(),
            config.api_base.clone(),
            timeout,
        )?)),
        "anthropic" => Ok(Arc::new(AnthropicGateway::new(
            key()?,
            config.model.clone(),
            config.api_base.clone(),
            timeout,
        )?)),
        "mock" => Ok(Arc::new(MockLlmGateway)),
        other => Err(AppError::configuration(format!(
            "Unknown LLM provider: {}",
            other
        ))),
    }
}

/// System prompt for ungrounded financial answers.
pub const FINANCIAL_INSIGHT_PROMPT: &str = "You are an AI CFO assistant specializing in financial analysis. \
You help business leaders understand their financial data and make informed decisions.

Guidelines:
- Provide clear, actionable insights
- Use financial terminology appropriately and explain complex concepts in plain business language
- Cite specific data points when they are available
- Suggest concrete next steps when appropriate
- Be concise but comprehensive";

/// Sampling used for ungrounded financial answers.
pub const FINANCIAL_INSIGHT_OPTIONS: GenerationOptions = GenerationOptions {
    temperature: 0.3,
    max_tokens: 2000,
};

/// Build the message pair for a financial insight request.
///
/// `context` is the caller's conversation history; `data` is rendered as a
/// pretty-printed JSON payload when present.
pub fn financial_insight_messages(
    context: &str,
    question: &str,
    data: Option<&serde_json::Value>,
) -> Vec<ChatMessage> {
    let mut user = format!("Context: {}\n\nQuestion: {}", context, question);
    if let Some(data) = data {
        let rendered = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
        user.push_str("\n\nData: ");
        user.push_str(&rendered);
    }

    vec![
        ChatMessage::system(FINANCIAL_INSIGHT_PROMPT),
        ChatMessage::user(user),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_gateway_echoes_question() {
        let gateway = MockLlmGateway;
        let messages = vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("What was Q1 revenue?"),
        ];
        let answer = gateway
            .generate(&messages, GenerationOptions::default())
            .await
            .unwrap();
        assert!(answer.contains("What was Q1 revenue?"));
    }

    #[test]
    fn test_create_gateway_requires_key() {
        let config = LlmConfig {
            provider: "anthropic".to_string(),
            api_key: None,
            ..LlmConfig::default()
        };
        let err = create_llm_gateway(&config).err().unwrap();
        assert!(matches!(err, AppError::Configuration { .. }));

        let config = LlmConfig::default();
        let gateway = create_llm_gateway(&config).unwrap();
        assert_eq!(gateway.name(), "mock");
    }

    #[test]
    fn test_unknown_provider() {
        let config = LlmConfig {
            provider: "cohere".to_string(),
            ..LlmConfig::default()
        };
        assert!(create_llm_gateway(&config).is_err());
    }

    #[test]
    fn test_financial_insight_messages() {
        let data = serde_json::json!({"revenue": 2400000});
        let messages =
            financial_insight_messages("user: hi\nassistant: hello", "How is revenue?", Some(&data));

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, FINANCIAL_INSIGHT_PROMPT);
        assert!(messages[1].content.starts_with("Context: user: hi"));
        assert!(messages[1].content.contains("Question: How is revenue?"));
        assert!(messages[1].content.contains("2400000"));

        let bare = financial_insight_messages("", "Hello", None);
        assert!(!bare[1].content.contains("Data:"));
    }

    struct StalledGateway;

    #[async_trait]
    impl LlmGateway for StalledGateway {
        async fn generate(&self, _: &[ChatMessage], _: GenerationOptions) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(String::new())
        }

        fn name(&self) -> &str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn test_generate_bounded_times_out() {
        let messages = vec![ChatMessage::user("hi")];
        let err = generate_bounded(
            &StalledGateway,
            &messages,
            GenerationOptions::default(),
            Duration::from_millis(10),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::UpstreamTimeout { ref service, .. } if service == "stalled"));
    }

    #[test]
    fn test_role_serialization() {
        let msg = ChatMessage::assistant("ok");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
    }
}
