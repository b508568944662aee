//! Process configuration.
//!
//! All knobs come from the environment, are resolved once at startup into a
//! `MenderConfig`, and are injected explicitly from there on. The core never
//! reads process globals.

use crate::llm::{LlmProviderConfig, LlmProviderType};
use serde::{Deserialize, Serialize};
use std::env;

/// Which datastore backend to run against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DatastoreKind {
    Memory,
    File,
}

/// Top-level configuration for a mender process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenderConfig {
    /// Server port (server feature only).
    pub port: u16,
    pub datastore: DatastoreKind,
    /// Storage directory for the file datastore.
    pub storage_dir: String,
    /// Bearer token required by the server boundary; None disables auth.
    pub auth_token: Option<String>,
    /// Origin allowed to call the server (dashboard CORS).
    pub dashboard_origin: Option<String>,
    pub llm: LlmProviderConfig,
}

impl Default for MenderConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            datastore: DatastoreKind::Memory,
            storage_dir: "./data".to_string(),
            auth_token: None,
            dashboard_origin: None,
            llm: LlmProviderConfig {
                provider_type: LlmProviderType::OpenAi,
                model: "gpt-4.1".to_string(),
                schema_model: None,
                api_key: None,
                base_url: None,
                timeout_seconds: None,
                http_referer: None,
                x_title: None,
            },
        }
    }
}

impl MenderConfig {
    /// Build configuration from the process environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(port) = env::var("MENDER_PORT") {
            if let Ok(port) = port.parse() {
                config.port = port;
            }
        }
        if let Ok(kind) = env::var("MENDER_DATASTORE") {
            config.datastore = match kind.to_ascii_lowercase().as_str() {
                "file" => DatastoreKind::File,
                _ => DatastoreKind::Memory,
            };
        }
        if let Ok(dir) = env::var("MENDER_STORAGE_DIR") {
            config.storage_dir = dir;
        }
        config.auth_token = env::var("MENDER_AUTH_TOKEN").ok();
        config.dashboard_origin = env::var("MENDER_DASHBOARD_ORIGIN").ok();

        // Provider selection: OpenAI-compatible by default, OpenRouter when
        // requested. Each mode reads its own key/base-url/model variables.
        let provider_hint = env::var("MENDER_LLM_PROVIDER").unwrap_or_default();
        let use_openrouter = provider_hint.eq_ignore_ascii_case("openrouter");
        if use_openrouter {
            config.llm.provider_type = LlmProviderType::OpenRouter;
            config.llm.api_key = env::var("OPENROUTER_API_KEY").ok();
            config.llm.base_url = Some(
                env::var("OPENROUTER_BASE_URL")
                    .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string()),
            );
            if let Ok(model) = env::var("OPENROUTER_MODEL") {
                config.llm.model = model;
            }
            config.llm.http_referer = env::var("OPENROUTER_HTTP_REFERER").ok();
            config.llm.x_title = env::var("OPENROUTER_TITLE").ok();
        } else {
            config.llm.provider_type = LlmProviderType::OpenAi;
            config.llm.api_key = env::var("OPENAI_API_KEY").ok();
            config.llm.base_url = env::var("OPENAI_BASE_URL").ok();
            if let Ok(model) = env::var("OPENAI_MODEL") {
                config.llm.model = model;
            }
        }
        config.llm.schema_model = env::var("MENDER_SCHEMA_MODEL").ok();
        if let Ok(secs) = env::var("MENDER_LLM_TIMEOUT_SECONDS") {
            config.llm.timeout_seconds = secs.parse().ok();
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MenderConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.datastore, DatastoreKind::Memory);
        assert_eq!(config.llm.provider_type, LlmProviderType::OpenAi);
        assert_eq!(config.llm.schema_model(), config.llm.model);
    }
}
