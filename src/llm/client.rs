use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ModelError, PipelineError};

/// What a model call is for; used for logging and by the offline model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTask {
    ReduceNoise,
    ExtractPoints,
    MarkVideo,
    IdentifyTopics,
    MergeTopics,
    BuildStructure,
    ConfirmMerge,
    ConsolidateGroup,
    WriteTransition,
}

/// Expected shape of the model's answer
#[derive(Debug, Clone)]
pub enum ResponseShape {
    /// Free text
    Text,
    /// A JSON object matching `schema`
    Json { schema: serde_json::Value },
}

/// A single "ask the model for X given Y" request
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub task: ModelTask,
    pub system: String,
    pub prompt: String,
    pub shape: ResponseShape,
    /// Structured input the prompt was rendered from
    pub payload: serde_json::Value,
}

/// Narrow contract the pipeline has with any language model
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete a request, returning raw text (JSON text for JSON shapes)
    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError>;

    fn name(&self) -> &str {
        "model"
    }
}

/// Wire protocol spoken by the configured endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Anthropic Messages API
    Anthropic,
    /// Any `/chat/completions` endpoint (OpenAI, Moonshot, OpenRouter, ...)
    OpenAiCompatible,
}

/// Built-in endpoint presets: (name, provider, base url, default model)
const PRESETS: &[(&str, Provider, &str, &str)] = &[
    ("anthropic", Provider::Anthropic, "https://api.anthropic.com/v1", "claude-sonnet-4-20250514"),
    ("openai", Provider::OpenAiCompatible, "https://api.openai.com/v1", "gpt-4o-mini"),
    ("kimi", Provider::OpenAiCompatible, "https://api.moonshot.cn/v1", "moonshot-v1-8k"),
    ("openrouter", Provider::OpenAiCompatible, "https://openrouter.ai/api/v1", "moonshotai/kimi-k2"),
];

/// Configuration for the HTTP model client
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub provider: Provider,
    /// API key (from KL_API_KEY or ANTHROPIC_API_KEY)
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// Temperature (0-1, lower = more deterministic)
    pub temperature: f64,
    /// Maximum tokens in response
    pub max_tokens: u32,
    /// Per-request timeout
    pub timeout: Duration,
}

impl ModelConfig {
    /// Create config from environment variables
    ///
    /// `KL_PROVIDER` selects a preset (default `anthropic`); `KL_BASE_URL` and
    /// `KL_MODEL` override the preset's endpoint and model.
    pub fn from_env() -> Result<Self, PipelineError> {
        let preset = std::env::var("KL_PROVIDER").unwrap_or_else(|_| "anthropic".to_string());
        let api_key = std::env::var("KL_API_KEY")
            .or_else(|_| std::env::var("ANTHROPIC_API_KEY"))
            .map_err(|_| {
                PipelineError::Config("KL_API_KEY environment variable not set".to_string())
            })?;

        let mut config = Self::preset(&preset, api_key)?;
        if let Ok(base_url) = std::env::var("KL_BASE_URL") {
            config.base_url = base_url;
        }
        if let Ok(model) = std::env::var("KL_MODEL") {
            config.model = model;
        }
        Ok(config)
    }

    /// Create from a named preset
    pub fn preset(name: &str, api_key: String) -> Result<Self, PipelineError> {
        let (_, provider, base_url, model) = PRESETS
            .iter()
            .find(|(preset, ..)| preset.eq_ignore_ascii_case(name))
            .ok_or_else(|| PipelineError::Config(format!("unknown model provider: {}", name)))?;

        Ok(Self {
            provider: *provider,
            api_key,
            base_url: base_url.to_string(),
            model: model.to_string(),
            temperature: 0.3,
            max_tokens: 4096,
            timeout: Duration::from_secs(120),
        })
    }
}

/// HTTP language-model client
pub struct HttpModelClient {
    client: Client,
    config: ModelConfig,
}

impl HttpModelClient {
    pub fn new(config: ModelConfig) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn send_anthropic(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let (tools, tool_choice) = match &request.shape {
            ResponseShape::Text => (None, None),
            ResponseShape::Json { schema } => (
                Some(vec![Tool {
                    name: TOOL_NAME.to_string(),
                    description: "Submit the structured result".to_string(),
                    input_schema: schema.clone(),
                }]),
                Some(ToolChoice {
                    choice_type: "tool".to_string(),
                    name: TOOL_NAME.to_string(),
                }),
            ),
        };

        let body = AnthropicRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: Some(self.config.temperature),
            system: Some(request.system.clone()),
            messages: vec![Message {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            tools,
            tool_choice,
        };

        let response = self
            .client
            .post(self.endpoint("messages"))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let response: AnthropicResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ModelError::Malformed(format!("failed to parse Anthropic response: {}", e)))?;

        match &request.shape {
            ResponseShape::Text => response
                .content
                .iter()
                .find(|c| c.content_type == "text")
                .map(|c| c.text.clone())
                .ok_or_else(|| ModelError::Malformed("no text content in response".to_string())),
            ResponseShape::Json { .. } => {
                // Find the tool_use content block
                let input = response
                    .content
                    .iter()
                    .filter(|c| c.content_type == "tool_use" && c.name.as_deref() == Some(TOOL_NAME))
                    .find_map(|c| c.input.as_ref())
                    .ok_or_else(|| ModelError::Malformed("no tool_use response found".to_string()))?;
                serde_json::to_string(input).map_err(|e| ModelError::Malformed(e.to_string()))
            }
        }
    }

    async fn send_openai(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let response_format = match request.shape {
            ResponseShape::Text => None,
            ResponseShape::Json { .. } => Some(serde_json::json!({"type": "json_object"})),
        };

        let body = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: request.system.clone(),
                },
                Message {
                    role: "user".to_string(),
                    content: request.prompt.clone(),
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_format,
        };

        let response = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let response: ChatResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ModelError::Malformed(format!("failed to parse chat response: {}", e)))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ModelError::Malformed("no choices in response".to_string()))
    }
}

#[async_trait]
impl LanguageModel for HttpModelClient {
    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        debug!(
            task = ?request.task,
            prompt_chars = request.prompt.len(),
            "Sending model request"
        );
        match self.config.provider {
            Provider::Anthropic => self.send_anthropic(request).await,
            Provider::OpenAiCompatible => self.send_openai(request).await,
        }
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

const TOOL_NAME: &str = "submit_result";

fn map_reqwest_error(e: reqwest::Error) -> ModelError {
    if e.is_timeout() {
        ModelError::Timeout
    } else if e.is_decode() {
        ModelError::Malformed(e.to_string())
    } else {
        ModelError::Transport(e.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, ModelError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(ModelError::RateLimited { retry_after });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ModelError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct Tool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ToolChoice {
    #[serde(rename = "type")]
    choice_type: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_lookup() {
        let config = ModelConfig::preset("Kimi", "key".to_string()).unwrap();
        assert_eq!(config.provider, Provider::OpenAiCompatible);
        assert_eq!(config.base_url, "https://api.moonshot.cn/v1");

        assert!(ModelConfig::preset("nope", "key".to_string()).is_err());
    }

    #[test]
    fn test_endpoint_join() {
        let mut config = ModelConfig::preset("openai", "key".to_string()).unwrap();
        config.base_url = "http://localhost:8080/v1/".to_string();
        let client = HttpModelClient::new(config).unwrap();
        assert_eq!(client.endpoint("chat/completions"), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn test_chat_response_parse() {
        let json = r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}]}"#;
        let response: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("hello"));
    }
}
