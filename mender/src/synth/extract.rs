//! Extract synthesizer: instruction + source hints → `ExtractConfig`.

use super::endpoint::available_vars;
use super::prompts;
use super::{temperature_for, truncate_chars, MAX_DOC_CHARS};
use crate::docs::DocumentationFetcher;
use crate::error::{MenderError, MenderResult};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::schema::config_fingerprint;
use crate::synth::RepairContext;
use crate::types::ExtractConfig;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct PreparedExtract {
    pub config: ExtractConfig,
    pub messages: Vec<ChatMessage>,
}

pub struct ExtractSynthesizer {
    llm: Arc<dyn LlmProvider>,
    docs: Arc<DocumentationFetcher>,
}

fn extract_config_response_schema() -> Value {
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
            "decompressionMethod": {
                "type": "string",
                "enum": ["GZIP", "DEFLATE", "ZIP", "AUTO", "NONE"]
            },
            "fileType": {"type": "string", "enum": ["CSV", "JSON", "XML", "AUTO"]},
            "dataPath": {"type": ["string", "null"]}
        },
        "required": ["urlHost", "method", "authentication", "decompressionMethod", "fileType"]
    })
}

impl ExtractSynthesizer {
    pub fn new(llm: Arc<dyn LlmProvider>, docs: Arc<DocumentationFetcher>) -> Self {
        Self { llm, docs }
    }

    /// Generate (or repair) a file-extraction configuration. The loop
    /// contract matches the endpoint synthesizer: seed on empty
    /// `prior_messages`, repair turn otherwise.
    pub async fn prepare_extract(
        &self,
        input: &ExtractConfig,
        payload: &Value,
        credentials: &Value,
        repair: Option<&RepairContext>,
        prior_messages: Vec<ChatMessage>,
        retry_count: u32,
    ) -> MenderResult<PreparedExtract> {
        let id = config_fingerprint(&input.instruction, payload);
        let vars = available_vars(payload, credentials);

        let mut messages = if prior_messages.is_empty() {
            let documentation = self
                .docs
                .fetch_for(input.documentation_url.as_deref(), &input.url_host)
                .await;
            let documentation = truncate_chars(&documentation, MAX_DOC_CHARS);
            let mut messages = vec![
                ChatMessage::system(prompts::EXTRACT_SYSTEM_PROMPT),
                ChatMessage::user(prompts::extract_user_prompt(input, &vars, &documentation)),
            ];
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
                        "resumed extract synthesis requires a repair context".to_string(),
                    ))
                }
            }
            messages
        };

        let completion = self
            .llm
            .complete(CompletionRequest {
                messages: messages.clone(),
                response_schema: extract_config_response_schema(),
                schema_name: "extract_config".to_string(),
                temperature: Some(temperature_for(retry_count)),
                use_schema_model: false,
            })
            .await?;

        let mut config: ExtractConfig =
            serde_json::from_value(completion.json.clone()).map_err(|e| {
                MenderError::Llm(format!(
                    "completion does not describe an extract configuration ({}): {}",
                    e, completion.content
                ))
            })?;

        config.id = id;
        let now = Utc::now();
        config.created_at = now;
        config.updated_at = now;
        config.instruction = input.instruction.clone();
        if config.url_host.is_empty() {
            config.url_host = input.url_host.clone();
        }
        if input.data_path.is_some() {
            config.data_path = input.data_path.clone();
        }
        if input.documentation_url.is_some() {
            config.documentation_url = input.documentation_url.clone();
        }
        config.response_schema = input.response_schema.clone();
        config.response_mapping = input.response_mapping.clone();

        messages.push(ChatMessage::assistant(completion.content));
        log::info!(
            "synthesized extract config {} for '{}'",
            config.id,
            config.instruction
        );

        Ok(PreparedExtract { config, messages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StubLlmProvider;
    use crate::types::{DecompressionMethod, FileType};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_prepare_extract_parses_file_hints() {
        let llm = Arc::new(StubLlmProvider::new(vec![json!({
            "urlHost": "https://files.example.com",
            "urlPath": "/export/users.csv.gz",
            "method": "GET",
            "authentication": "NONE",
            "decompressionMethod": "GZIP",
            "fileType": "CSV"
        })]));
        let synth = ExtractSynthesizer::new(llm, Arc::new(DocumentationFetcher::new()));
        let mut input = ExtractConfig::new("", "https://files.example.com");
        input.instruction = "download the user export".to_string();
        input.documentation_url = Some(String::new());

        let prepared = synth
            .prepare_extract(&input, &json!({}), &json!({}), None, Vec::new(), 0)
            .await
            .unwrap();
        assert_eq!(
            prepared.config.decompression_method,
            DecompressionMethod::Gzip
        );
        assert_eq!(prepared.config.file_type, FileType::Csv);
        assert_eq!(prepared.messages.len(), 3);
        assert!(!prepared.config.id.is_empty());
    }
}
