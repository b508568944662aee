//! Schema generator: instruction + sample response → JSON Schema.

use super::prompts;
use super::{temperature_for, truncate_chars, MAX_SAMPLE_CHARS};
use crate::error::{MenderError, MenderResult};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use serde_json::{json, Value};
use std::sync::Arc;

/// Schema-generation attempts before surfacing the last error.
const MAX_SCHEMA_RETRIES: u32 = 3;

pub struct SchemaGenerator {
    llm: Arc<dyn LlmProvider>,
}

fn schema_response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "jsonSchema": {"type": "object"}
        },
        "required": ["jsonSchema"]
    })
}

/// Some models wrap the schema an extra level; unwrap until a plausible
/// schema object appears.
fn unwrap_schema(mut value: Value) -> Value {
    loop {
        match value {
            Value::Object(ref map) if map.contains_key("jsonSchema") => {
                let inner = map.get("jsonSchema").cloned().unwrap_or(Value::Null);
                value = inner;
            }
            other => return other,
        }
    }
}

impl SchemaGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Produce a JSON Schema describing the shape the instruction implies,
    /// optionally informed by sample response text. Unusable schemas are fed
    /// back to the model up to `MAX_SCHEMA_RETRIES` times.
    pub async fn generate_schema(
        &self,
        instruction: &str,
        response_data: Option<&str>,
    ) -> MenderResult<Value> {
        if instruction.is_empty() {
            return Err(MenderError::Configuration(
                "schema generation requires an instruction".to_string(),
            ));
        }

        let sample = response_data.map(|d| truncate_chars(d, MAX_SAMPLE_CHARS));
        let mut messages = vec![
            ChatMessage::system(prompts::SCHEMA_SYSTEM_PROMPT),
            ChatMessage::user(prompts::schema_user_prompt(instruction, sample.as_deref())),
        ];

        let mut last_error = MenderError::Llm("schema generation produced nothing".to_string());
        for retry in 0..MAX_SCHEMA_RETRIES {
            let completion = match self
                .llm
                .complete(CompletionRequest {
                    messages: messages.clone(),
                    response_schema: schema_response_schema(),
                    schema_name: "json_schema".to_string(),
                    temperature: Some(temperature_for(retry)),
                    use_schema_model: true,
                })
                .await
            {
                Ok(c) => c,
                Err(e) => {
                    log::warn!("schema completion failed (attempt {}): {}", retry + 1, e);
                    last_error = e;
                    continue;
                }
            };

            let schema = unwrap_schema(completion.json.clone());
            // A schema must at least compile.
            match jsonschema::validator_for(&schema) {
                Ok(_) if schema.is_object() => return Ok(schema),
                Ok(_) => {
                    let reason = "schema is not a JSON object".to_string();
                    messages.push(ChatMessage::assistant(completion.content));
                    messages.push(ChatMessage::user(prompts::schema_retry_prompt(&reason)));
                    last_error = MenderError::Llm(reason);
                }
                Err(e) => {
                    let reason = format!("schema does not compile: {}", e);
                    messages.push(ChatMessage::assistant(completion.content));
                    messages.push(ChatMessage::user(prompts::schema_retry_prompt(&reason)));
                    last_error = MenderError::Llm(reason);
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StubLlmProvider;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_generates_and_unwraps_schema() {
        let llm = Arc::new(StubLlmProvider::new(vec![json!({
            "jsonSchema": {
                "type": "object",
                "properties": {"name": {"type": "string"}}
            }
        })]));
        let generator = SchemaGenerator::new(llm.clone());
        let schema = generator
            .generate_schema("list of character names", Some("{\"name\": \"Fry\"}"))
            .await
            .unwrap();
        assert_eq!(schema["type"], "object");
        // Schema-generation calls route to the schema model.
        assert!(llm.requests.lock().unwrap()[0].use_schema_model);
    }

    #[tokio::test]
    async fn test_double_wrapped_schema_is_unwrapped() {
        let llm = Arc::new(StubLlmProvider::new(vec![json!({
            "jsonSchema": {"jsonSchema": {"type": "array"}}
        })]));
        let generator = SchemaGenerator::new(llm);
        let schema = generator.generate_schema("ids", None).await.unwrap();
        assert_eq!(schema, json!({"type": "array"}));
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_last_error() {
        let bad = json!({"jsonSchema": "not an object"});
        let llm = Arc::new(StubLlmProvider::new(vec![bad.clone(), bad.clone(), bad]));
        let generator = SchemaGenerator::new(llm);
        let err = generator.generate_schema("whatever", None).await.unwrap_err();
        assert!(matches!(err, MenderError::Llm(_)));
    }
}
