//! Error types for the mender pipeline.
//!
//! The taxonomy mirrors the recovery policy: only synthesis-driven failures
//! (`Http`, `HtmlInsteadOfJson`, `MappingValidation`, `Llm`) are fed back into
//! an LLM repair loop; everything else is surfaced to the caller immediately.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type MenderResult<T> = Result<T, MenderError>;

#[derive(Debug, Error)]
pub enum MenderError {
    /// Missing or contradictory inputs. User-visible; never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A `{placeholder}` referenced by the config has no binding in
    /// payload ∪ credentials ∪ pagination vars. Fatal for the call.
    #[error("unresolved variables: {}", .0.join(", "))]
    UnresolvedVariables(Vec<String>),

    /// A non-OK HTTP outcome, captured with enough of the request to let the
    /// endpoint synthesizer repair the config.
    #[error("HTTP {status} calling {request_summary}: {body}")]
    Http {
        status: u16,
        body: String,
        request_summary: String,
    },

    /// The endpoint answered with an HTML document where JSON was expected.
    /// Treated like an HTTP failure by the repair loop.
    #[error("received HTML instead of JSON from {url}")]
    HtmlInsteadOfJson { url: String },

    /// LLM provider failure (transport, non-2xx, unparseable completion).
    #[error("LLM error: {0}")]
    Llm(String),

    /// A synthesized mapping either failed to evaluate or its output did not
    /// validate against the response schema. Fed back to the transform loop.
    #[error("mapping validation failed at {path}: {message}")]
    MappingValidation { path: String, message: String },

    /// Decompression, file parsing, or interpolated-body parsing failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Datastore backend failure.
    #[error("datastore error: {0}")]
    Datastore(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serde(String),
}

impl MenderError {
    /// True for error kinds the endpoint synthesizer can attempt to repair by
    /// regenerating the request configuration with the error as context.
    pub fn is_repairable(&self) -> bool {
        matches!(
            self,
            MenderError::Http { .. } | MenderError::HtmlInsteadOfJson { .. }
        )
    }
}

impl From<std::io::Error> for MenderError {
    fn from(e: std::io::Error) -> Self {
        MenderError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for MenderError {
    fn from(e: serde_json::Error) -> Self {
        MenderError::Serde(e.to_string())
    }
}

impl From<reqwest::Error> for MenderError {
    fn from(e: reqwest::Error) -> Self {
        MenderError::Http {
            status: e.status().map(|s| s.as_u16()).unwrap_or(0),
            body: e.to_string(),
            request_summary: e
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "<unknown url>".to_string()),
        }
    }
}
