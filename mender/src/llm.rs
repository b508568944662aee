//! LLM provider abstraction.
//!
//! This module provides the chat-completion layer the synthesizers run on:
//! a single capability (`complete`) implemented by an OpenAI-compatible
//! provider (which also covers OpenRouter with its two identification
//! headers) and a deterministic stub for tests. Completions are constrained
//! to a JSON schema via the `response_format` field, and the raw completion
//! string is surfaced so retry loops can quote it back to the model.

use crate::error::{MenderError, MenderResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Instant;

/// A single conversation turn. The message log is owned by the synthesis
/// call and is the source of truth for repair-loop state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Supported provider modes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LlmProviderType {
    /// OpenAI-compatible endpoint (the default provider).
    OpenAi,
    /// OpenRouter-compatible endpoint; sends `HTTP-Referer` and `X-Title`.
    OpenRouter,
    /// Deterministic responses for testing.
    Stub,
}

/// Configuration for LLM providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    pub provider_type: LlmProviderType,
    pub model: String,
    /// Model used for schema-generation calls; falls back to `model`.
    pub schema_model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_seconds: Option<u64>,
    /// OpenRouter identification headers.
    pub http_referer: Option<String>,
    pub x_title: Option<String>,
}

impl LlmProviderConfig {
    pub fn schema_model(&self) -> &str {
        self.schema_model.as_deref().unwrap_or(&self.model)
    }
}

/// Reasoning models reject the `temperature` parameter; the synthesizers
/// omit it entirely for them.
pub fn is_reasoning_model(name: &str) -> bool {
    name.contains("gpt-4o") || name.contains("o3")
}

/// One structured completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// JSON Schema the completion must conform to.
    pub response_schema: Value,
    /// Name reported to the provider for the schema.
    pub schema_name: String,
    /// Ignored (and omitted on the wire) for reasoning models.
    pub temperature: Option<f64>,
    /// Route to the schema-generation model instead of the default.
    pub use_schema_model: bool,
}

/// Captures one completion, including the raw string for retry loops.
#[derive(Debug, Clone)]
pub struct LlmCompletion {
    pub content: String,
    pub json: Value,
    pub prompt_hash: String,
    pub response_hash: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub latency_ms: u128,
}

/// Abstract interface for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> MenderResult<LlmCompletion>;
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

// OpenAI API types
#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchemaFormat,
}

#[derive(Serialize)]
struct JsonSchemaFormat {
    name: String,
    schema: Value,
    strict: bool,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIChoiceMessage,
}

#[derive(Deserialize)]
struct OpenAIChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Default, Deserialize)]
struct OpenAIUsage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
}

/// OpenAI-compatible provider (works with OpenAI and OpenRouter).
pub struct OpenAiLlmProvider {
    config: LlmProviderConfig,
    client: reqwest::Client,
}

impl OpenAiLlmProvider {
    pub fn new(config: LlmProviderConfig) -> MenderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(
                config.timeout_seconds.unwrap_or(120),
            ))
            .build()
            .map_err(|e| MenderError::Llm(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn model_for(&self, request: &CompletionRequest) -> String {
        if request.use_schema_model {
            self.config.schema_model().to_string()
        } else {
            self.config.model.clone()
        }
    }
}

/// Strip a markdown code fence if the model wrapped its JSON in one.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim();
        }
    }
    trimmed
}

#[async_trait]
impl LlmProvider for OpenAiLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> MenderResult<LlmCompletion> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| MenderError::Llm("API key required for LLM provider".to_string()))?;

        let base_url = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1");
        let url = format!("{}/chat/completions", base_url);

        let model = self.model_for(&request);
        let temperature = if is_reasoning_model(&model) {
            None
        } else {
            request.temperature
        };

        let request_body = OpenAIRequest {
            model,
            messages: request.messages,
            temperature,
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: request.schema_name,
                    schema: request.response_schema,
                    strict: true,
                },
            },
        };
        let payload_bytes = serde_json::to_vec(&request_body)
            .map_err(|e| MenderError::Llm(format!("failed to serialize request body: {}", e)))?;
        let prompt_hash = sha256_hex(&payload_bytes);

        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json");

        let is_openrouter = self.config.provider_type == LlmProviderType::OpenRouter
            || base_url.contains("openrouter.ai");
        if is_openrouter {
            let referer = self
                .config
                .http_referer
                .clone()
                .unwrap_or_else(|| "https://github.com/mandubian/mender".to_string());
            let title = self
                .config
                .x_title
                .clone()
                .unwrap_or_else(|| "mender".to_string());
            builder = builder.header("HTTP-Referer", referer).header("X-Title", title);
        }

        let start = Instant::now();
        let response = builder
            .body(payload_bytes)
            .send()
            .await
            .map_err(|e| MenderError::Llm(format!("LLM request failed: {}", e)))?;
        let status = response.status();
        let raw_body = response
            .text()
            .await
            .map_err(|e| MenderError::Llm(format!("failed to read LLM response: {}", e)))?;

        if !status.is_success() {
            return Err(MenderError::Llm(format!(
                "LLM API request failed (HTTP {}): {}",
                status.as_u16(),
                raw_body
            )));
        }

        let response_body: OpenAIResponse = serde_json::from_str(&raw_body)
            .map_err(|e| MenderError::Llm(format!("unparseable LLM response ({}): {}", e, raw_body)))?;
        let content = response_body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| MenderError::Llm("LLM response contained no choices".to_string()))?;

        let json: Value = serde_json::from_str(strip_code_fence(&content)).map_err(|e| {
            MenderError::Llm(format!(
                "completion is not the requested JSON object ({}): {}",
                e, content
            ))
        })?;

        let usage = response_body.usage.unwrap_or_default();
        log::debug!(
            "llm completion: prompt_hash={} latency_ms={}",
            prompt_hash,
            start.elapsed().as_millis()
        );

        Ok(LlmCompletion {
            response_hash: sha256_hex(content.as_bytes()),
            content,
            json,
            prompt_hash,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            latency_ms: start.elapsed().as_millis(),
        })
    }
}

/// Deterministic provider for tests: pops pre-scripted JSON completions.
pub struct StubLlmProvider {
    responses: std::sync::Mutex<std::collections::VecDeque<Value>>,
    pub requests: std::sync::Mutex<Vec<CompletionRequest>>,
}

impl StubLlmProvider {
    pub fn new(responses: Vec<Value>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into()),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LlmProvider for StubLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> MenderResult<LlmCompletion> {
        self.requests.lock().unwrap().push(request);
        let json = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| MenderError::Llm("stub provider exhausted".to_string()))?;
        let content = json.to_string();
        Ok(LlmCompletion {
            prompt_hash: String::new(),
            response_hash: sha256_hex(content.as_bytes()),
            content,
            json,
            prompt_tokens: None,
            completion_tokens: None,
            latency_ms: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_reasoning_model_detection() {
        assert!(is_reasoning_model("gpt-4o"));
        assert!(is_reasoning_model("gpt-4o-mini"));
        assert!(is_reasoning_model("o3-mini"));
        assert!(!is_reasoning_model("gpt-4.1"));
        assert!(!is_reasoning_model("claude-sonnet"));
    }

    #[test]
    fn test_temperature_omitted_from_wire_format_when_none() {
        let req = OpenAIRequest {
            model: "gpt-4o".to_string(),
            messages: vec![ChatMessage::user("hi")],
            temperature: None,
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: "out".to_string(),
                    schema: json!({"type": "object"}),
                    strict: true,
                },
            },
        };
        let wire = serde_json::to_value(&req).unwrap();
        assert!(wire.get("temperature").is_none());
        assert_eq!(wire["response_format"]["type"], "json_schema");
        assert_eq!(wire["messages"][0]["role"], "user");
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }

    #[tokio::test]
    async fn test_stub_provider_pops_scripted_responses() {
        let stub = StubLlmProvider::new(vec![json!({"x": 1}), json!({"x": 2})]);
        let req = CompletionRequest {
            messages: vec![ChatMessage::user("go")],
            response_schema: json!({"type": "object"}),
            schema_name: "out".to_string(),
            temperature: None,
            use_schema_model: false,
        };
        let first = stub.complete(req.clone()).await.unwrap();
        assert_eq!(first.json, json!({"x": 1}));
        let second = stub.complete(req.clone()).await.unwrap();
        assert_eq!(second.json, json!({"x": 2}));
        assert!(stub.complete(req).await.is_err());
    }
}
