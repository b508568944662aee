//! Transform synthesizer: schema + data → validated JSONata mapping.

use super::prompts;
use super::{temperature_for, MAX_SAMPLE_CHARS, MAX_SAMPLE_ITEMS};
use crate::error::{MenderError, MenderResult};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::schema::{infer_schema, sample_data, transform_cache_id, validate_and_apply};
use crate::store::Datastore;
use crate::types::TransformConfig;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Mapping-generation attempts before giving up.
const MAX_MAPPING_RETRIES: u32 = 5;

/// Caller-side description of the desired transform.
#[derive(Debug, Clone, Default)]
pub struct TransformInput {
    pub instruction: String,
    pub response_schema: Value,
    /// When set, accepted as-is without calling the model.
    pub response_mapping: Option<String>,
}

/// Shape of the model's mapping completion.
#[derive(Debug, Deserialize)]
struct MappingCompletion {
    jsonata: String,
    #[serde(default)]
    confidence: Option<u8>,
    #[serde(default)]
    confidence_reasoning: Option<String>,
}

fn mapping_response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "jsonata": {"type": "string"},
            "confidence": {"type": "integer", "minimum": 0, "maximum": 100},
            "confidence_reasoning": {"type": "string"}
        },
        "required": ["jsonata", "confidence", "confidence_reasoning"]
    })
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

pub struct TransformSynthesizer {
    llm: Arc<dyn LlmProvider>,
}

impl TransformSynthesizer {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Produce a transform config whose mapping output validates against the
    /// response schema, or `None` when there is nothing to transform (empty
    /// schema or data) or every generation attempt failed.
    pub async fn prepare_transform(
        &self,
        store: &dyn Datastore,
        from_cache: bool,
        input: &TransformInput,
        data: &Value,
    ) -> MenderResult<Option<TransformConfig>> {
        if is_empty_value(&input.response_schema) || is_empty_value(data) {
            return Ok(None);
        }

        let id = transform_cache_id(&input.instruction, data);

        if from_cache {
            if let Some(cached) = store.get_transform_config(&id).await? {
                log::debug!("transform cache hit for {}", id);
                // Cache hit is merged under the caller's current input.
                return Ok(Some(TransformConfig {
                    id,
                    instruction: input.instruction.clone(),
                    response_schema: input.response_schema.clone(),
                    updated_at: Utc::now(),
                    ..cached
                }));
            }
        }

        if let Some(mapping) = &input.response_mapping {
            return Ok(Some(TransformConfig {
                id,
                version: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                instruction: input.instruction.clone(),
                response_schema: input.response_schema.clone(),
                response_mapping: Some(mapping.clone()),
                confidence: None,
                confidence_reasoning: None,
            }));
        }

        match self
            .generate_mapping(&input.response_schema, data, &input.instruction)
            .await
        {
            Some(generated) => Ok(Some(TransformConfig {
                id,
                version: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                instruction: input.instruction.clone(),
                response_schema: input.response_schema.clone(),
                response_mapping: Some(generated.jsonata),
                confidence: generated.confidence,
                confidence_reasoning: generated.confidence_reasoning,
            })),
            None => Ok(None),
        }
    }

    /// The mapping loop: propose, apply, validate; feed failures back as
    /// user turns. Returns `None` after `MAX_MAPPING_RETRIES` failures.
    async fn generate_mapping(
        &self,
        target_schema: &Value,
        data: &Value,
        instruction: &str,
    ) -> Option<MappingCompletion> {
        let source_schema = infer_schema(data);
        let sampled = sample_data(data, MAX_SAMPLE_ITEMS, MAX_SAMPLE_CHARS);
        let mut messages = vec![
            ChatMessage::system(prompts::TRANSFORM_SYSTEM_PROMPT),
            ChatMessage::user(prompts::transform_user_prompt(
                target_schema,
                instruction,
                &source_schema,
                &sampled,
            )),
        ];

        let mut last_error: Option<MenderError> = None;
        for retry in 0..MAX_MAPPING_RETRIES {
            let completion = match self
                .llm
                .complete(CompletionRequest {
                    messages: messages.clone(),
                    response_schema: mapping_response_schema(),
                    schema_name: "jsonata_mapping".to_string(),
                    temperature: Some(temperature_for(retry)),
                    use_schema_model: false,
                })
                .await
            {
                Ok(c) => c,
                Err(e) => {
                    log::warn!("mapping completion failed (attempt {}): {}", retry + 1, e);
                    last_error = Some(e);
                    continue;
                }
            };

            let parsed: MappingCompletion = match serde_json::from_value(completion.json.clone())
            {
                Ok(p) => p,
                Err(e) => {
                    messages.push(ChatMessage::assistant(completion.content.clone()));
                    messages.push(ChatMessage::user(prompts::transform_retry_prompt(
                        &format!("completion was not a mapping object: {}", e),
                    )));
                    last_error = Some(MenderError::Llm(e.to_string()));
                    continue;
                }
            };

            match validate_and_apply(data, &parsed.jsonata, target_schema) {
                Ok(_) => {
                    log::info!(
                        "mapping accepted after {} attempt(s) (confidence {:?})",
                        retry + 1,
                        parsed.confidence
                    );
                    return Some(parsed);
                }
                Err(e) => {
                    log::debug!("mapping rejected (attempt {}): {}", retry + 1, e);
                    messages.push(ChatMessage::assistant(completion.content));
                    messages.push(ChatMessage::user(prompts::transform_retry_prompt(
                        &e.to_string(),
                    )));
                    last_error = Some(e);
                }
            }
        }

        if let Some(e) = last_error {
            log::error!(
                "mapping generation exhausted {} attempts: {}",
                MAX_MAPPING_RETRIES,
                e
            );
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StubLlmProvider;
    use crate::store::MemoryDatastore;
    use pretty_assertions::assert_eq;

    fn name_schema() -> Value {
        json!({
            "type": "object",
            "properties": {"name": {"type": "string", "minLength": 1}},
            "required": ["name"]
        })
    }

    fn mapping_json(expr: &str) -> Value {
        json!({
            "jsonata": expr,
            "confidence": 80,
            "confidence_reasoning": "field names match"
        })
    }

    #[tokio::test]
    async fn test_empty_schema_or_data_yields_none() {
        let synth = TransformSynthesizer::new(Arc::new(StubLlmProvider::new(vec![])));
        let store = MemoryDatastore::new();
        let input = TransformInput {
            instruction: "anything".to_string(),
            response_schema: Value::Null,
            response_mapping: None,
        };
        let out = synth
            .prepare_transform(&store, false, &input, &json!({"a": 1}))
            .await
            .unwrap();
        assert_eq!(out, None);

        let input = TransformInput {
            instruction: "anything".to_string(),
            response_schema: name_schema(),
            response_mapping: None,
        };
        let out = synth
            .prepare_transform(&store, false, &input, &json!({}))
            .await
            .unwrap();
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn test_bad_first_draft_is_repaired_via_error_feedback() {
        // First draft references fields that do not exist; the validation
        // failure is fed back and the second draft passes.
        let llm = Arc::new(StubLlmProvider::new(vec![
            mapping_json("{ \"name\": user.firstName & user.lastName }"),
            mapping_json("{ \"name\": user.first & \" \" & user.last }"),
        ]));
        let synth = TransformSynthesizer::new(llm.clone());
        let store = MemoryDatastore::new();
        let input = TransformInput {
            instruction: "full name".to_string(),
            response_schema: name_schema(),
            response_mapping: None,
        };
        let data = json!({"user": {"first": "J", "last": "D"}});

        let config = synth
            .prepare_transform(&store, false, &input, &data)
            .await
            .unwrap()
            .expect("transform config");
        assert_eq!(
            config.response_mapping.as_deref(),
            Some("{ \"name\": user.first & \" \" & user.last }")
        );
        assert_eq!(config.confidence, Some(80));

        // The retry request carried the failure as a user turn.
        let requests = llm.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let retry_turn = &requests[1].messages.last().unwrap().content;
        assert!(retry_turn.contains("failed"));
    }

    #[tokio::test]
    async fn test_exhausted_attempts_return_none() {
        let bad = mapping_json("{ \"name\": user.nope }");
        let llm = Arc::new(StubLlmProvider::new(vec![
            bad.clone(),
            bad.clone(),
            bad.clone(),
            bad.clone(),
            bad,
        ]));
        let synth = TransformSynthesizer::new(llm);
        let store = MemoryDatastore::new();
        let input = TransformInput {
            instruction: "full name".to_string(),
            response_schema: name_schema(),
            response_mapping: None,
        };
        let out = synth
            .prepare_transform(&store, false, &input, &json!({"user": {"first": "J"}}))
            .await
            .unwrap();
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn test_caller_supplied_mapping_is_accepted_without_llm() {
        let synth = TransformSynthesizer::new(Arc::new(StubLlmProvider::new(vec![])));
        let store = MemoryDatastore::new();
        let input = TransformInput {
            instruction: "full name".to_string(),
            response_schema: name_schema(),
            response_mapping: Some("user.first".to_string()),
        };
        let config = synth
            .prepare_transform(&store, false, &input, &json!({"user": {"first": "J"}}))
            .await
            .unwrap()
            .expect("transform config");
        assert_eq!(config.response_mapping.as_deref(), Some("user.first"));
    }

    #[tokio::test]
    async fn test_cache_hit_short_circuits_generation() {
        let data = json!({"user": {"first": "J"}});
        let id = transform_cache_id("full name", &data);
        let store = MemoryDatastore::new();
        let cached = TransformConfig {
            id: id.clone(),
            version: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            instruction: "full name".to_string(),
            response_schema: name_schema(),
            response_mapping: Some("user.first".to_string()),
            confidence: Some(95),
            confidence_reasoning: None,
        };
        store.upsert_transform_config(&id, &cached).await.unwrap();

        // An exhausted stub proves the model is never consulted.
        let synth = TransformSynthesizer::new(Arc::new(StubLlmProvider::new(vec![])));
        let input = TransformInput {
            instruction: "full name".to_string(),
            response_schema: name_schema(),
            response_mapping: None,
        };
        let config = synth
            .prepare_transform(&store, true, &input, &data)
            .await
            .unwrap()
            .expect("cached config");
        assert_eq!(config.response_mapping.as_deref(), Some("user.first"));
        assert_eq!(config.confidence, Some(95));
    }
}
