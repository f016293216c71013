//! JSON file script store
//!
//! The whole store is one JSON object, the same shape `chrome.storage.sync`
//! holds. Writes go to a sibling temp file that is renamed over the original.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use inj_core::{StorageError, StorageTransport};

pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(StorageError::Unavailable(format!(
                    "Failed to read '{}': {}",
                    self.path.display(),
                    e
                )))
            }
        };
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&text)
            .map_err(|e| StorageError::Unavailable(format!("Invalid store '{}': {}", self.path.display(), e)))
    }

    async fn write(&self, records: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let text = serde_json::to_string_pretty(records).map_err(|e| StorageError::Unavailable(e.to_string()))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, text)
            .await
            .map_err(|e| StorageError::from_host_message(format!("Failed to write '{}': {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StorageError::Unavailable(format!("Failed to replace '{}': {}", self.path.display(), e)))
    }
}

impl StorageTransport for JsonFileStorage {
    async fn get_all(&self) -> Result<BTreeMap<String, String>, StorageError> {
        self.read().await
    }

    async fn set_many(&self, entries: BTreeMap<String, String>) -> Result<(), StorageError> {
        let mut records = self.read().await?;
        records.extend(entries);
        self.write(&records).await
    }

    async fn remove_many(&self, keys: Vec<String>) -> Result<(), StorageError> {
        let mut records = self.read().await?;
        let before = records.len();
        for key in &keys {
            records.remove(key);
        }
        if records.len() == before {
            return Ok(());
        }
        self.write(&records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Runtime::new().unwrap()
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path().join("store.json"));
        assert!(runtime().block_on(storage.get_all()).unwrap().is_empty());
    }

    #[test]
    fn test_set_and_remove_persist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let storage = JsonFileStorage::new(&path);

        runtime().block_on(async {
            storage
                .set_many(BTreeMap::from([
                    ("a.com".to_string(), "a()".to_string()),
                    ("b.com".to_string(), "b()".to_string()),
                ]))
                .await
                .unwrap();
            storage.remove_many(vec!["a.com".to_string()]).await.unwrap();
        });

        let reopened = JsonFileStorage::new(&path);
        let records = runtime().block_on(reopened.get_all()).unwrap();
        assert_eq!(records, BTreeMap::from([("b.com".to_string(), "b()".to_string())]));
        assert!(!dir.path().join("store.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_store_is_unavailable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "not json").unwrap();
        let result = runtime().block_on(JsonFileStorage::new(&path).get_all());
        assert!(matches!(result, Err(StorageError::Unavailable(_))));
    }
}
