//! In-memory datastore backend.

use super::Datastore;
use crate::error::MenderResult;
use crate::types::{ApiConfig, ExtractConfig, RunResult, TransformConfig};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// HashMap-backed datastore; the default for tests and single-process use.
#[derive(Default)]
pub struct MemoryDatastore {
    apis: RwLock<HashMap<String, ApiConfig>>,
    extracts: RwLock<HashMap<String, ExtractConfig>>,
    transforms: RwLock<HashMap<String, TransformConfig>>,
    runs: RwLock<Vec<RunResult>>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn page<T: Clone>(mut items: Vec<T>, limit: usize, offset: usize) -> Vec<T> {
    if offset >= items.len() {
        return Vec::new();
    }
    items.drain(..offset);
    items.truncate(limit);
    items
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn get_api_config(&self, id: &str) -> MenderResult<Option<ApiConfig>> {
        Ok(self.apis.read().await.get(id).cloned())
    }

    async fn upsert_api_config(&self, id: &str, config: &ApiConfig) -> MenderResult<()> {
        self.apis
            .write()
            .await
            .insert(id.to_string(), config.clone());
        Ok(())
    }

    async fn delete_api_config(&self, id: &str) -> MenderResult<bool> {
        Ok(self.apis.write().await.remove(id).is_some())
    }

    async fn list_api_configs(
        &self,
        limit: usize,
        offset: usize,
    ) -> MenderResult<Vec<ApiConfig>> {
        let mut items: Vec<ApiConfig> = self.apis.read().await.values().cloned().collect();
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(page(items, limit, offset))
    }

    async fn get_extract_config(&self, id: &str) -> MenderResult<Option<ExtractConfig>> {
        Ok(self.extracts.read().await.get(id).cloned())
    }

    async fn upsert_extract_config(&self, id: &str, config: &ExtractConfig) -> MenderResult<()> {
        self.extracts
            .write()
            .await
            .insert(id.to_string(), config.clone());
        Ok(())
    }

    async fn delete_extract_config(&self, id: &str) -> MenderResult<bool> {
        Ok(self.extracts.write().await.remove(id).is_some())
    }

    async fn list_extract_configs(
        &self,
        limit: usize,
        offset: usize,
    ) -> MenderResult<Vec<ExtractConfig>> {
        let mut items: Vec<ExtractConfig> =
            self.extracts.read().await.values().cloned().collect();
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(page(items, limit, offset))
    }

    async fn get_transform_config(&self, id: &str) -> MenderResult<Option<TransformConfig>> {
        Ok(self.transforms.read().await.get(id).cloned())
    }

    async fn upsert_transform_config(
        &self,
        id: &str,
        config: &TransformConfig,
    ) -> MenderResult<()> {
        self.transforms
            .write()
            .await
            .insert(id.to_string(), config.clone());
        Ok(())
    }

    async fn delete_transform_config(&self, id: &str) -> MenderResult<bool> {
        Ok(self.transforms.write().await.remove(id).is_some())
    }

    async fn list_transform_configs(
        &self,
        limit: usize,
        offset: usize,
    ) -> MenderResult<Vec<TransformConfig>> {
        let mut items: Vec<TransformConfig> =
            self.transforms.read().await.values().cloned().collect();
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(page(items, limit, offset))
    }

    async fn get_run(&self, id: &str) -> MenderResult<Option<RunResult>> {
        Ok(self.runs.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn append_run(&self, run: &RunResult) -> MenderResult<()> {
        self.runs.write().await.push(run.clone());
        Ok(())
    }

    async fn list_runs(
        &self,
        limit: usize,
        offset: usize,
        config_id: Option<&str>,
    ) -> MenderResult<Vec<RunResult>> {
        let mut items: Vec<RunResult> = self
            .runs
            .read()
            .await
            .iter()
            .filter(|r| config_id.map(|id| r.config.config_id() == id).unwrap_or(true))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(page(items, limit, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunConfig;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_api_config_crud() {
        let store = MemoryDatastore::new();
        let config = ApiConfig::new("cfg-1", "https://api.example.com");
        store.upsert_api_config("cfg-1", &config).await.unwrap();
        assert_eq!(
            store.get_api_config("cfg-1").await.unwrap(),
            Some(config.clone())
        );
        assert_eq!(store.list_api_configs(10, 0).await.unwrap().len(), 1);
        assert!(store.delete_api_config("cfg-1").await.unwrap());
        assert!(!store.delete_api_config("cfg-1").await.unwrap());
        assert_eq!(store.get_api_config("cfg-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_runs_are_append_only_and_filterable() {
        let store = MemoryDatastore::new();
        for (run_id, cfg_id) in [("r1", "a"), ("r2", "b"), ("r3", "a")] {
            let run = RunResult {
                id: run_id.to_string(),
                success: true,
                data: None,
                error: None,
                started_at: Utc::now(),
                completed_at: Utc::now(),
                config: RunConfig::Api(ApiConfig::new(cfg_id, "https://api.example.com")),
            };
            store.append_run(&run).await.unwrap();
        }
        assert_eq!(store.list_runs(10, 0, None).await.unwrap().len(), 3);
        assert_eq!(store.list_runs(10, 0, Some("a")).await.unwrap().len(), 2);
        assert_eq!(store.list_runs(1, 1, None).await.unwrap().len(), 1);
        assert!(store.get_run("r2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_transform_cache_lookup_by_request_shape() {
        let store = MemoryDatastore::new();
        let data = serde_json::json!({"user": {"first": "J"}});
        let id = crate::schema::transform_cache_id("full name", &data);
        let config = TransformConfig {
            id: id.clone(),
            version: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            instruction: "full name".to_string(),
            response_schema: serde_json::json!({"type": "object"}),
            response_mapping: Some("user.first".to_string()),
            confidence: Some(90),
            confidence_reasoning: None,
        };
        store.upsert_transform_config(&id, &config).await.unwrap();

        // Same instruction + same shape (different values) hits the cache.
        let other_data = serde_json::json!({"user": {"first": "Z"}});
        let hit = store
            .get_transform_config_from_request("full name", &other_data)
            .await
            .unwrap();
        assert_eq!(hit, Some(config));

        let miss = store
            .get_transform_config_from_request("different instruction", &data)
            .await
            .unwrap();
        assert_eq!(miss, None);
    }
}
