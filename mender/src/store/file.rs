//! File-backed datastore: one JSON document per entity, grouped by kind.
//!
//! Layout under the base directory:
//!   apis/<id>.json
//!   extracts/<id>.json
//!   transforms/<id>.json
//!   runs/<id>.json        (append-only)

use super::Datastore;
use crate::error::{MenderError, MenderResult};
use crate::types::{ApiConfig, ExtractConfig, RunResult, TransformConfig};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub struct FileDatastore {
    base_dir: PathBuf,
}

impl FileDatastore {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> MenderResult<Self> {
        let dir = base_dir.as_ref().to_path_buf();
        for kind in ["apis", "extracts", "transforms", "runs"] {
            fs::create_dir_all(dir.join(kind))?;
        }
        Ok(Self { base_dir: dir })
    }

    fn sanitize_file_name(id: &str) -> String {
        id.chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
                _ => '-',
            })
            .collect()
    }

    fn path_for(&self, kind: &str, id: &str) -> PathBuf {
        self.base_dir
            .join(kind)
            .join(format!("{}.json", Self::sanitize_file_name(id)))
    }

    fn read_one<T: DeserializeOwned>(&self, kind: &str, id: &str) -> MenderResult<Option<T>> {
        let path = self.path_for(kind, id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let value = serde_json::from_str(&content).map_err(|e| {
            MenderError::Datastore(format!("corrupt document {}: {}", path.display(), e))
        })?;
        Ok(Some(value))
    }

    fn write_one<T: Serialize>(&self, kind: &str, id: &str, value: &T) -> MenderResult<()> {
        let path = self.path_for(kind, id);
        let json = serde_json::to_string_pretty(value)?;
        // Write-then-rename keeps readers away from partial documents.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete_one(&self, kind: &str, id: &str) -> MenderResult<bool> {
        let path = self.path_for(kind, id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        Ok(true)
    }

    fn read_all<T: DeserializeOwned>(&self, kind: &str) -> MenderResult<Vec<T>> {
        let mut items = Vec::new();
        for entry in fs::read_dir(self.base_dir.join(kind))? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let content = fs::read_to_string(&path)?;
                match serde_json::from_str(&content) {
                    Ok(value) => items.push(value),
                    Err(e) => {
                        log::warn!("skipping corrupt document {}: {}", path.display(), e)
                    }
                }
            }
        }
        Ok(items)
    }
}

fn page<T>(mut items: Vec<T>, limit: usize, offset: usize) -> Vec<T> {
    if offset >= items.len() {
        return Vec::new();
    }
    items.drain(..offset);
    items.truncate(limit);
    items
}

#[async_trait]
impl Datastore for FileDatastore {
    async fn get_api_config(&self, id: &str) -> MenderResult<Option<ApiConfig>> {
        self.read_one("apis", id)
    }

    async fn upsert_api_config(&self, id: &str, config: &ApiConfig) -> MenderResult<()> {
        self.write_one("apis", id, config)
    }

    async fn delete_api_config(&self, id: &str) -> MenderResult<bool> {
        self.delete_one("apis", id)
    }

    async fn list_api_configs(
        &self,
        limit: usize,
        offset: usize,
    ) -> MenderResult<Vec<ApiConfig>> {
        let mut items: Vec<ApiConfig> = self.read_all("apis")?;
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(page(items, limit, offset))
    }

    async fn get_extract_config(&self, id: &str) -> MenderResult<Option<ExtractConfig>> {
        self.read_one("extracts", id)
    }

    async fn upsert_extract_config(&self, id: &str, config: &ExtractConfig) -> MenderResult<()> {
        self.write_one("extracts", id, config)
    }

    async fn delete_extract_config(&self, id: &str) -> MenderResult<bool> {
        self.delete_one("extracts", id)
    }

    async fn list_extract_configs(
        &self,
        limit: usize,
        offset: usize,
    ) -> MenderResult<Vec<ExtractConfig>> {
        let mut items: Vec<ExtractConfig> = self.read_all("extracts")?;
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(page(items, limit, offset))
    }

    async fn get_transform_config(&self, id: &str) -> MenderResult<Option<TransformConfig>> {
        self.read_one("transforms", id)
    }

    async fn upsert_transform_config(
        &self,
        id: &str,
        config: &TransformConfig,
    ) -> MenderResult<()> {
        self.write_one("transforms", id, config)
    }

    async fn delete_transform_config(&self, id: &str) -> MenderResult<bool> {
        self.delete_one("transforms", id)
    }

    async fn list_transform_configs(
        &self,
        limit: usize,
        offset: usize,
    ) -> MenderResult<Vec<TransformConfig>> {
        let mut items: Vec<TransformConfig> = self.read_all("transforms")?;
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(page(items, limit, offset))
    }

    async fn get_run(&self, id: &str) -> MenderResult<Option<RunResult>> {
        self.read_one("runs", id)
    }

    async fn append_run(&self, run: &RunResult) -> MenderResult<()> {
        self.write_one("runs", &run.id, run)
    }

    async fn list_runs(
        &self,
        limit: usize,
        offset: usize,
        config_id: Option<&str>,
    ) -> MenderResult<Vec<RunResult>> {
        let mut items: Vec<RunResult> = self.read_all("runs")?;
        if let Some(id) = config_id {
            items.retain(|r| r.config.config_id() == id);
        }
        items.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(page(items, limit, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDatastore::new(dir.path()).unwrap();
        let config = ApiConfig::new("cfg-1", "https://api.example.com");
        store.upsert_api_config("cfg-1", &config).await.unwrap();

        // A fresh instance over the same directory sees the document.
        let reopened = FileDatastore::new(dir.path()).unwrap();
        assert_eq!(
            reopened.get_api_config("cfg-1").await.unwrap(),
            Some(config)
        );
        assert!(reopened.delete_api_config("cfg-1").await.unwrap());
        assert_eq!(reopened.get_api_config("cfg-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ids_with_path_hostile_characters_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDatastore::new(dir.path()).unwrap();
        let config = ApiConfig::new("a/b:c", "https://api.example.com");
        store.upsert_api_config("a/b:c", &config).await.unwrap();
        assert_eq!(
            store.get_api_config("a/b:c").await.unwrap(),
            Some(config)
        );
    }
}
