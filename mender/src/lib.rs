// Mender Library
// Self-healing API integration proxy: synthesize request configs with an
// LLM, execute them with pagination and retries, reshape responses through
// schema-validated JSONata mappings, and repair failures by feeding errors
// back to the model.

pub mod config;
pub mod docs;
pub mod error;
pub mod executor;
pub mod files;
pub mod http;
pub mod interpolate;
pub mod jsonata;
pub mod llm;
pub mod orchestrator;
pub mod queue;
pub mod schema;
pub mod store;
pub mod synth;
pub mod types;

// Server boundary
#[cfg(feature = "server")]
pub mod server;

// Re-export the main entry points
pub use crate::error::{MenderError, MenderResult};
pub use crate::orchestrator::{CallInput, ExtractInput, Mender};
pub use crate::synth::TransformInput;
pub use crate::types::{
    ApiConfig, CacheMode, ExtractConfig, RequestOptions, RunResult, TransformConfig,
};
