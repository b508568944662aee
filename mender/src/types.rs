//! Core data model for the mender pipeline.
//!
//! These shapes cross three boundaries: the JSON surface exposed to callers,
//! the datastore (persisted verbatim as JSON documents), and the
//! JSON-schema-constrained LLM completions. Field names therefore follow the
//! external camelCase convention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

fn now() -> DateTime<Utc> {
    Utc::now()
}

/// HTTP methods supported by synthesized request templates.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum HttpMethod {
    #[default]
    GET,
    POST,
    PUT,
    DELETE,
    PATCH,
    HEAD,
    OPTIONS,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::GET => "GET",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
            HttpMethod::DELETE => "DELETE",
            HttpMethod::PATCH => "PATCH",
            HttpMethod::HEAD => "HEAD",
            HttpMethod::OPTIONS => "OPTIONS",
        }
    }
}

/// Where credentials are injected into the outgoing request.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthType {
    #[default]
    None,
    Header,
    QueryParam,
    #[serde(rename = "OAUTH2")]
    OAuth2,
}

/// Iteration strategy for paginated endpoints. The reserved variables
/// `page`, `offset` and `limit` are bound by the executor per strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaginationType {
    OffsetBased,
    PageBased,
    Disabled,
}

fn default_page_size() -> u32 {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(rename = "type")]
    pub pagination_type: PaginationType,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

/// Decompression applied to a file source before parsing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecompressionMethod {
    Gzip,
    Deflate,
    Zip,
    #[default]
    Auto,
    None,
}

/// Wire format of a file source.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileType {
    Csv,
    Json,
    Xml,
    #[default]
    Auto,
}

/// Cache interaction policy for a single call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheMode {
    #[default]
    Enabled,
    Readonly,
    Writeonly,
    Disabled,
}

impl CacheMode {
    pub fn reads(&self) -> bool {
        matches!(self, CacheMode::Enabled | CacheMode::Readonly)
    }

    pub fn writes(&self) -> bool {
        matches!(self, CacheMode::Enabled | CacheMode::Writeonly)
    }
}

/// Per-call knobs. Defaults match the HTTP caller policy (5 retries,
/// 1000 ms initial backoff, 60 s timeout).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
    #[serde(default)]
    pub cache_mode: CacheMode,
    /// Per-call timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// Initial retry delay in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<u64>,
    /// When set, the terminal run result is POSTed here best-effort.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

/// A fully-resolved HTTP request template produced by the endpoint
/// synthesizer (or supplied verbatim by the caller).
///
/// String-valued fields may contain `{var}` placeholders which the executor
/// binds from payload ∪ credentials ∪ pagination variables at call time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Defaults empty so partial documents (LLM completions, caller input)
    /// deserialize; synthesis always assigns the real id afterwards.
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default = "now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "now")]
    pub updated_at: DateTime<Utc>,
    /// Scheme + host, e.g. `https://api.example.com`.
    pub url_host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_path: Option<String>,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_params: Option<HashMap<String, String>>,
    /// Raw request body; interpreted as JSON after interpolation when it
    /// parses, sent verbatim otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub authentication: AuthType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    /// Dot-separated path into the response JSON; a leading `$` segment
    /// means "root" and is skipped during navigation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_path: Option<String>,
    /// Natural-language instruction that guided (or will guide) synthesis.
    #[serde(default)]
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
    /// JSONata expression reshaping the raw payload into `response_schema`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_mapping: Option<String>,
}

impl ApiConfig {
    pub fn new(id: impl Into<String>, url_host: impl Into<String>) -> Self {
        let ts = Utc::now();
        Self {
            id: id.into(),
            version: None,
            created_at: ts,
            updated_at: ts,
            url_host: url_host.into(),
            url_path: None,
            method: HttpMethod::GET,
            headers: None,
            query_params: None,
            body: None,
            authentication: AuthType::None,
            pagination: None,
            data_path: None,
            instruction: String::new(),
            documentation_url: None,
            response_schema: None,
            response_mapping: None,
        }
    }
}

/// Request template for a file source: an `ApiConfig` minus pagination, plus
/// decompression and file-format hints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default = "now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "now")]
    pub updated_at: DateTime<Utc>,
    pub url_host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_path: Option<String>,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_params: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub authentication: AuthType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_path: Option<String>,
    #[serde(default)]
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_mapping: Option<String>,
    #[serde(default)]
    pub decompression_method: DecompressionMethod,
    #[serde(default)]
    pub file_type: FileType,
}

impl ExtractConfig {
    pub fn new(id: impl Into<String>, url_host: impl Into<String>) -> Self {
        let ts = Utc::now();
        Self {
            id: id.into(),
            version: None,
            created_at: ts,
            updated_at: ts,
            url_host: url_host.into(),
            url_path: None,
            method: HttpMethod::GET,
            headers: None,
            query_params: None,
            body: None,
            authentication: AuthType::None,
            data_path: None,
            instruction: String::new(),
            documentation_url: None,
            response_schema: None,
            response_mapping: None,
            decompression_method: DecompressionMethod::Auto,
            file_type: FileType::Auto,
        }
    }
}

/// A validated (instruction, schema, mapping) triple for reshaping data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransformConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default = "now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub instruction: String,
    pub response_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_mapping: Option<String>,
    /// Model-reported confidence in the mapping, 0–100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_reasoning: Option<String>,
}

/// The configuration a run was executed with, stored alongside the result.
/// Tagged so the three config kinds survive a round trip through storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum RunConfig {
    Api(ApiConfig),
    Extract(ExtractConfig),
    Transform(TransformConfig),
}

impl RunConfig {
    pub fn config_id(&self) -> &str {
        match self {
            RunConfig::Api(c) => &c.id,
            RunConfig::Extract(c) => &c.id,
            RunConfig::Transform(c) => &c.id,
        }
    }
}

/// Immutable record of one invocation. Runs are append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub config: RunConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_api_config_json_surface_is_camel_case() {
        let mut cfg = ApiConfig::new("cfg-1", "https://api.example.com");
        cfg.url_path = Some("/v1/items".to_string());
        cfg.pagination = Some(Pagination {
            pagination_type: PaginationType::OffsetBased,
            page_size: 50,
        });
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["urlHost"], "https://api.example.com");
        assert_eq!(json["urlPath"], "/v1/items");
        assert_eq!(json["pagination"]["type"], "OFFSET_BASED");
        assert_eq!(json["pagination"]["pageSize"], 50);
        assert_eq!(json["method"], "GET");
        assert_eq!(json["authentication"], "NONE");
    }

    #[test]
    fn test_api_config_round_trips_through_json() {
        let mut cfg = ApiConfig::new("cfg-2", "https://api.example.com");
        cfg.headers = Some(HashMap::from([(
            "Authorization".to_string(),
            "Bearer {token}".to_string(),
        )]));
        cfg.response_schema = Some(serde_json::json!({"type": "object"}));
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ApiConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        // The LLM is only guaranteed to produce the fields its schema marks
        // required; everything else must default cleanly.
        let cfg: ApiConfig = serde_json::from_str(
            r#"{"id": "x", "urlHost": "https://api.example.com"}"#,
        )
        .unwrap();
        assert_eq!(cfg.method, HttpMethod::GET);
        assert_eq!(cfg.authentication, AuthType::None);
        assert!(cfg.pagination.is_none());
    }

    #[test]
    fn test_cache_mode_semantics() {
        assert!(CacheMode::Enabled.reads() && CacheMode::Enabled.writes());
        assert!(CacheMode::Readonly.reads() && !CacheMode::Readonly.writes());
        assert!(!CacheMode::Writeonly.reads() && CacheMode::Writeonly.writes());
        assert!(!CacheMode::Disabled.reads() && !CacheMode::Disabled.writes());
    }

    #[test]
    fn test_run_config_kind_survives_round_trip() {
        let run = RunResult {
            id: "r1".to_string(),
            success: true,
            data: None,
            error: None,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            config: RunConfig::Extract(ExtractConfig::new("e1", "https://files.example.com")),
        };
        let json = serde_json::to_string(&run).unwrap();
        let back: RunResult = serde_json::from_str(&json).unwrap();
        assert!(matches!(back.config, RunConfig::Extract(_)));
        assert_eq!(run, back);
    }

    #[test]
    fn test_auth_type_wire_names() {
        assert_eq!(
            serde_json::to_value(AuthType::OAuth2).unwrap(),
            serde_json::json!("OAUTH2")
        );
        assert_eq!(
            serde_json::to_value(AuthType::QueryParam).unwrap(),
            serde_json::json!("QUERY_PARAM")
        );
    }
}
