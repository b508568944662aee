//! Endpoint synthesizer: instruction + documentation → `ApiConfig`.

use super::prompts;
use super::{temperature_for, truncate_chars, MAX_DOC_CHARS};
use crate::docs::DocumentationFetcher;
use crate::error::{MenderError, MenderResult};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::schema::config_fingerprint;
use crate::types::ApiConfig;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

/// Outcome of one synthesis turn: the generated config plus the full message
/// log, which the caller feeds back in to continue the repair loop.
#[derive(Debug, Clone)]
pub struct PreparedEndpoint {
    pub config: ApiConfig,
    pub messages: Vec<ChatMessage>,
}

/// Context for a repair turn: what failed and the config (serialized) that
/// caused it.
#[derive(Debug, Clone)]
pub struct RepairContext {
    pub error: String,
    pub previous: Value,
}

impl RepairContext {
    pub fn new<T: serde::Serialize>(error: impl Into<String>, previous: &T) -> Self {
        Self {
            error: error.into(),
            previous: serde_json::to_value(previous).unwrap_or(Value::Null),
        }
    }
}

pub struct EndpointSynthesizer {
    llm: Arc<dyn LlmProvider>,
    docs: Arc<DocumentationFetcher>,
}

/// JSON Schema constraining the completion to an `ApiConfig` document.
pub(crate) fn api_config_response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "urlHost": {"type": "string"},
            "urlPath": {"type": ["string", "null"]},
            "method": {
                "type": "string",
                "enum": ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"]
            },
            "headers": {"type": ["object", "null"], "additionalProperties": {"type": "string"}},
            "queryParams": {"type": ["object", "null"], "additionalProperties": {"type": "string"}},
            "body": {"type": ["string", "null"]},
            "authentication": {
                "type": "string",
                "enum": ["NONE", "HEADER", "QUERY_PARAM", "OAUTH2"]
            },
            "pagination": {
                "type": ["object", "null"],
                "properties": {
                    "type": {
                        "type": "string",
                        "enum": ["OFFSET_BASED", "PAGE_BASED", "DISABLED"]
                    },
                    "pageSize": {"type": "integer"}
                },
                "required": ["type"]
            },
            "dataPath": {"type": ["string", "null"]},
            "documentationUrl": {"type": ["string", "null"]}
        },
        "required": ["urlHost", "method", "authentication"]
    })
}

/// Variable names the model may reference: payload keys plus credentials.
pub(crate) fn available_vars(payload: &Value, credentials: &Value) -> Vec<String> {
    let mut vars = Vec::new();
    for source in [payload, credentials] {
        if let Value::Object(map) = source {
            for key in map.keys() {
                if !vars.contains(key) {
                    vars.push(key.clone());
                }
            }
        }
    }
    vars
}

impl EndpointSynthesizer {
    pub fn new(llm: Arc<dyn LlmProvider>, docs: Arc<DocumentationFetcher>) -> Self {
        Self { llm, docs }
    }

    /// Generate (or repair) a request configuration.
    ///
    /// With empty `prior_messages` the conversation is seeded from the
    /// instruction and documentation; otherwise a repair turn built from
    /// `repair` is appended. The caller owns the returned message log and
    /// passes it back on the next iteration. `retry_count` drives the
    /// sampling temperature.
    pub async fn prepare_endpoint(
        &self,
        input: &ApiConfig,
        payload: &Value,
        credentials: &Value,
        repair: Option<&RepairContext>,
        prior_messages: Vec<ChatMessage>,
        retry_count: u32,
    ) -> MenderResult<PreparedEndpoint> {
        let id = config_fingerprint(&input.instruction, payload);
        let vars = available_vars(payload, credentials);

        let mut messages = if prior_messages.is_empty() {
            let documentation = self
                .docs
                .fetch_for(input.documentation_url.as_deref(), &input.url_host)
                .await;
            let documentation = truncate_chars(&documentation, MAX_DOC_CHARS);
            let mut messages = vec![
                ChatMessage::system(prompts::ENDPOINT_SYSTEM_PROMPT),
                ChatMessage::user(prompts::endpoint_user_prompt(input, &vars, &documentation)),
            ];
            // A fresh conversation can still carry an error, e.g. when a
            // cached config failed and synthesis starts from scratch.
            if let Some(ctx) = repair {
                messages.push(ChatMessage::user(prompts::repair_user_prompt(
                    &ctx.error,
                    &ctx.previous,
                )));
            }
            messages
        } else {
            let mut messages = prior_messages;
            match repair {
                Some(ctx) => {
                    messages.push(ChatMessage::user(prompts::repair_user_prompt(
                        &ctx.error,
                        &ctx.previous,
                    )));
                }
                None => {
                    return Err(MenderError::Configuration(
                        "resumed endpoint synthesis requires a repair context".to_string(),
                    ))
                }
            }
            messages
        };

        let completion = self
            .llm
            .complete(CompletionRequest {
                messages: messages.clone(),
                response_schema: api_config_response_schema(),
                schema_name: "api_config".to_string(),
                temperature: Some(temperature_for(retry_count)),
                use_schema_model: false,
            })
            .await?;

        let mut config: ApiConfig =
            serde_json::from_value(completion.json.clone()).map_err(|e| {
                MenderError::Llm(format!(
                    "completion does not describe a request configuration ({}): {}",
                    e, completion.content
                ))
            })?;

        // The model's output is authoritative for the request shape, but
        // caller-specified fields win where the caller provided them.
        config.id = id;
        let now = Utc::now();
        config.created_at = now;
        config.updated_at = now;
        config.instruction = input.instruction.clone();
        if config.url_host.is_empty() {
            config.url_host = input.url_host.clone();
        }
        if input.pagination.is_some() {
            config.pagination = input.pagination.clone();
        }
        if input.data_path.is_some() {
            config.data_path = input.data_path.clone();
        }
        if input.documentation_url.is_some() {
            config.documentation_url = input.documentation_url.clone();
        }
        config.response_schema = input
            .response_schema
            .clone()
            .or(config.response_schema.take());
        config.response_mapping = input
            .response_mapping
            .clone()
            .or(config.response_mapping.take());

        messages.push(ChatMessage::assistant(completion.content));
        log::info!(
            "synthesized endpoint config {} for '{}'",
            config.id,
            config.instruction
        );

        Ok(PreparedEndpoint { config, messages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StubLlmProvider;
    use crate::types::{HttpMethod, Pagination, PaginationType};
    use pretty_assertions::assert_eq;

    fn generated_config() -> Value {
        json!({
            "urlHost": "https://api.example.com",
            "urlPath": "/v1/users",
            "method": "GET",
            "headers": {"Authorization": "Bearer {apikey}"},
            "authentication": "HEADER",
            "dataPath": "data.users",
            "pagination": {"type": "PAGE_BASED", "pageSize": 20}
        })
    }

    fn synthesizer(responses: Vec<Value>) -> (EndpointSynthesizer, Arc<StubLlmProvider>) {
        let llm = Arc::new(StubLlmProvider::new(responses));
        let synth = EndpointSynthesizer::new(
            llm.clone(),
            Arc::new(DocumentationFetcher::new()),
        );
        (synth, llm)
    }

    fn input() -> ApiConfig {
        let mut input = ApiConfig::new("", "https://api.example.com");
        input.instruction = "get all users".to_string();
        input.documentation_url = Some(String::new());
        input
    }

    #[tokio::test]
    async fn test_seed_turn_builds_system_plus_user_log() {
        let (synth, llm) = synthesizer(vec![generated_config()]);
        let prepared = synth
            .prepare_endpoint(
                &input(),
                &json!({"org": "acme"}),
                &json!({"apikey": "k"}),
                None,
                Vec::new(),
                0,
            )
            .await
            .unwrap();

        // system + user seed, plus the assistant completion.
        assert_eq!(prepared.messages.len(), 3);
        assert_eq!(prepared.config.method, HttpMethod::GET);
        assert_eq!(prepared.config.url_path.as_deref(), Some("/v1/users"));
        assert_eq!(prepared.config.data_path.as_deref(), Some("data.users"));
        assert_eq!(prepared.config.instruction, "get all users");
        assert!(!prepared.config.id.is_empty());

        // The prompt advertised the available variable names.
        let requests = llm.requests.lock().unwrap();
        let seed = &requests[0].messages[1].content;
        assert!(seed.contains("org"));
        assert!(seed.contains("apikey"));
    }

    #[tokio::test]
    async fn test_caller_specified_fields_override_llm_output() {
        let (synth, _) = synthesizer(vec![generated_config()]);
        let mut caller_input = input();
        caller_input.pagination = Some(Pagination {
            pagination_type: PaginationType::Disabled,
            page_size: 50,
        });
        caller_input.data_path = Some("results".to_string());
        caller_input.response_schema = Some(json!({"type": "array"}));

        let prepared = synth
            .prepare_endpoint(
                &caller_input,
                &json!({}),
                &json!({}),
                None,
                Vec::new(),
                0,
            )
            .await
            .unwrap();
        assert_eq!(
            prepared.config.pagination.as_ref().unwrap().pagination_type,
            PaginationType::Disabled
        );
        assert_eq!(prepared.config.data_path.as_deref(), Some("results"));
        assert_eq!(
            prepared.config.response_schema,
            Some(json!({"type": "array"}))
        );
    }

    #[tokio::test]
    async fn test_repair_turn_appends_error_context() {
        let (synth, llm) = synthesizer(vec![generated_config(), generated_config()]);
        let first = synth
            .prepare_endpoint(&input(), &json!({}), &json!({}), None, Vec::new(), 0)
            .await
            .unwrap();

        let repair = RepairContext::new("unresolved variables: apikey", &first.config);
        let second = synth
            .prepare_endpoint(
                &input(),
                &json!({}),
                &json!({}),
                Some(&repair),
                first.messages.clone(),
                1,
            )
            .await
            .unwrap();

        // prior log + repair user turn + new assistant turn.
        assert_eq!(second.messages.len(), first.messages.len() + 2);
        let requests = llm.requests.lock().unwrap();
        let repair_turn = &requests[1].messages.last().unwrap().content;
        assert!(repair_turn.contains("unresolved variables: apikey"));
        // Escalating temperature on retries.
        assert_eq!(requests[1].temperature, Some(0.1));
    }

    #[tokio::test]
    async fn test_id_is_stable_for_identical_input_and_payload_shape() {
        let (synth, _) = synthesizer(vec![generated_config(), generated_config()]);
        let a = synth
            .prepare_endpoint(
                &input(),
                &json!({"org": "acme"}),
                &json!({}),
                None,
                Vec::new(),
                0,
            )
            .await
            .unwrap();
        let b = synth
            .prepare_endpoint(
                &input(),
                &json!({"org": "zeta"}),
                &json!({}),
                None,
                Vec::new(),
                0,
            )
            .await
            .unwrap();
        assert_eq!(a.config.id, b.config.id);
    }
}
