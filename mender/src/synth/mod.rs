//! LLM-driven synthesis: request configs, file-extract configs, transform
//! mappings and response schemas.
//!
//! Every synthesizer follows the same loop: build (or extend) a message log,
//! ask for a JSON-schema-constrained completion, check the result against
//! reality (execution, evaluation, validation), and on failure append the
//! error as a new user turn and try again with a slightly higher
//! temperature. The message log is owned by the call and is the only repair
//! state.

mod endpoint;
mod extract;
mod prompts;
mod schema_gen;
mod transform;

pub use endpoint::{EndpointSynthesizer, PreparedEndpoint, RepairContext};
pub use extract::{ExtractSynthesizer, PreparedExtract};
pub use schema_gen::SchemaGenerator;
pub use transform::{TransformInput, TransformSynthesizer};

/// Escalating sampling temperature for non-reasoning models: starts
/// deterministic, loosens a little with each repair attempt.
pub(crate) fn temperature_for(retry: u32) -> f64 {
    (0.1 * retry as f64).min(1.0)
}

/// Cap on documentation text shipped in a synthesis prompt.
pub(crate) const MAX_DOC_CHARS: usize = 80_000;

/// Cap on sampled data shipped in a transform prompt.
pub(crate) const MAX_SAMPLE_CHARS: usize = 10_000;

/// Max elements sampled from any array in a transform prompt.
pub(crate) const MAX_SAMPLE_ITEMS: usize = 5;

pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut cut = max;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text[..cut].to_string()
}
