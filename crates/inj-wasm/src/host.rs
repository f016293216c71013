//! Browser implementations of the core host traits

use std::collections::BTreeMap;
use std::time::Duration;

use inj_core::defaults::{FetchError, ResourceFetcher};
use inj_core::{CodeUnit, StorageError, StorageTransport, TabExecutor};
use serde::Serialize;
use wasm_bindgen::JsValue;

use crate::bridge::{self, js_message};

fn to_plain_object<T: Serialize>(value: &T) -> Result<JsValue, String> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| e.to_string())
}

// =============================================================================
// Storage
// =============================================================================

/// `chrome.storage.sync`
pub struct ChromeStorage;

fn storage_error(value: JsValue) -> StorageError {
    StorageError::from_host_message(js_message(&value))
}

/// Keep string records; anything else was not written by us.
fn string_records(raw: BTreeMap<String, serde_json::Value>) -> BTreeMap<String, String> {
    raw.into_iter()
        .filter_map(|(key, value)| match value {
            serde_json::Value::String(text) => Some((key, text)),
            other => {
                log::warn!("[{}] Ignoring non-text record ({})", key, other);
                None
            }
        })
        .collect()
}

impl StorageTransport for ChromeStorage {
    async fn get_all(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let items = bridge::storage_get_all().await.map_err(storage_error)?;
        let raw: BTreeMap<String, serde_json::Value> =
            serde_wasm_bindgen::from_value(items).map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(string_records(raw))
    }

    async fn set_many(&self, entries: BTreeMap<String, String>) -> Result<(), StorageError> {
        let items = to_plain_object(&entries).map_err(StorageError::Unavailable)?;
        bridge::storage_set(items).await.map_err(storage_error)
    }

    async fn remove_many(&self, keys: Vec<String>) -> Result<(), StorageError> {
        let keys = to_plain_object(&keys).map_err(StorageError::Unavailable)?;
        bridge::storage_remove(keys).await.map_err(storage_error)
    }
}

// =============================================================================
// Tabs
// =============================================================================

/// `chrome.tabs.executeScript`
pub struct ChromeTabs;

impl TabExecutor for ChromeTabs {
    async fn execute(&self, tab_id: i64, unit: &CodeUnit) -> Result<(), String> {
        let details = to_plain_object(unit)?;
        bridge::execute_script(tab_id as f64, details)
            .await
            .map_err(|e| js_message(&e))
    }
}

/// Reload a tab by running `window.location.reload()` in it.
pub async fn reload_tab(tab_id: i64) -> Result<(), String> {
    let details = to_plain_object(&serde_json::json!({ "code": "window.location.reload();" }))?;
    bridge::execute_script(tab_id as f64, details)
        .await
        .map_err(|e| js_message(&e))
}

// =============================================================================
// Packaged Resources
// =============================================================================

/// `fetch()` against the extension package.
pub struct PackageFetcher;

/// Map a rejection `kind` from the bridge to a [`FetchError`].
fn fetch_error(kind: Option<&str>, message: String, timeout: Duration) -> FetchError {
    match kind {
        Some("timeout") => FetchError::TimedOut(timeout),
        Some("not_text") => FetchError::NotText(message),
        _ => FetchError::Failed(message),
    }
}

impl ResourceFetcher for PackageFetcher {
    async fn fetch(&self, uri: &str, timeout: Duration) -> Result<String, FetchError> {
        match bridge::fetch_text(uri, timeout.as_millis() as f64).await {
            Ok(text) => text
                .as_string()
                .ok_or_else(|| FetchError::NotText(format!("{:?}", text))),
            Err(e) => {
                let kind = js_sys::Reflect::get(&e, &"kind".into())
                    .ok()
                    .and_then(|k| k.as_string());
                Err(fetch_error(kind.as_deref(), js_message(&e), timeout))
            }
        }
    }
}
