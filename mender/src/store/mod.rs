//! Datastore abstraction consumed by the core.
//!
//! Responsibilities:
//! - Define the KV + list interface the pipeline needs: get/upsert/delete
//!   per config kind, append-only runs, and the transform cache lookup.
//! - Keep the interface small so alternate backends are drop-in; memory and
//!   file implementations ship here, and operations must be linearizable
//!   per key.

mod file;
mod memory;

pub use file::FileDatastore;
pub use memory::MemoryDatastore;

use crate::error::MenderResult;
use crate::schema::transform_cache_id;
use crate::types::{ApiConfig, ExtractConfig, RunResult, TransformConfig};
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait Datastore: Send + Sync {
    async fn get_api_config(&self, id: &str) -> MenderResult<Option<ApiConfig>>;
    async fn upsert_api_config(&self, id: &str, config: &ApiConfig) -> MenderResult<()>;
    async fn delete_api_config(&self, id: &str) -> MenderResult<bool>;
    async fn list_api_configs(&self, limit: usize, offset: usize)
        -> MenderResult<Vec<ApiConfig>>;

    async fn get_extract_config(&self, id: &str) -> MenderResult<Option<ExtractConfig>>;
    async fn upsert_extract_config(&self, id: &str, config: &ExtractConfig) -> MenderResult<()>;
    async fn delete_extract_config(&self, id: &str) -> MenderResult<bool>;
    async fn list_extract_configs(
        &self,
        limit: usize,
        offset: usize,
    ) -> MenderResult<Vec<ExtractConfig>>;

    async fn get_transform_config(&self, id: &str) -> MenderResult<Option<TransformConfig>>;
    async fn upsert_transform_config(
        &self,
        id: &str,
        config: &TransformConfig,
    ) -> MenderResult<()>;
    async fn delete_transform_config(&self, id: &str) -> MenderResult<bool>;
    async fn list_transform_configs(
        &self,
        limit: usize,
        offset: usize,
    ) -> MenderResult<Vec<TransformConfig>>;

    /// Transform cache lookup keyed by (instruction, shape-of-data).
    async fn get_transform_config_from_request(
        &self,
        instruction: &str,
        data: &Value,
    ) -> MenderResult<Option<TransformConfig>> {
        self.get_transform_config(&transform_cache_id(instruction, data))
            .await
    }

    async fn get_run(&self, id: &str) -> MenderResult<Option<RunResult>>;
    /// Runs are append-only; there is no update or delete.
    async fn append_run(&self, run: &RunResult) -> MenderResult<()>;
    /// Most recent first, optionally filtered by the producing config id.
    async fn list_runs(
        &self,
        limit: usize,
        offset: usize,
        config_id: Option<&str>,
    ) -> MenderResult<Vec<RunResult>>;
}
