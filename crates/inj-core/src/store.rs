//! Script storage
//!
//! [`StorageTransport`] is the host's key-value store (`chrome.storage.sync`
//! in the extension, a JSON file in the CLI). It is last-writer-wins with no
//! multi-key transactions. [`ScriptStore`] layers per-key helpers, the soft
//! size limit and logging on top of it.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use crate::codec::utf16_len;
use crate::types::DomainKey;

/// Soft limit on a script body before compression.
pub const DEFAULT_SOFT_SIZE_LIMIT: usize = 8 * 1024;

/// Error type for storage operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),
}

impl StorageError {
    /// Map a host error message to an error kind.
    pub fn from_host_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.to_ascii_uppercase().contains("QUOTA") {
            Self::QuotaExceeded(message)
        } else {
            Self::Unavailable(message)
        }
    }
}

/// Host key-value store contract.
///
/// All operations may be delayed arbitrarily. Implementations surface host
/// rejections (including the host's "last error" side channel) as
/// [`StorageError`].
#[allow(async_fn_in_trait)]
pub trait StorageTransport {
    /// Read every stored record.
    async fn get_all(&self) -> Result<BTreeMap<String, String>, StorageError>;

    /// Write several records. Existing keys are overwritten.
    async fn set_many(&self, entries: BTreeMap<String, String>) -> Result<(), StorageError>;

    /// Delete several records. Missing keys are ignored.
    async fn remove_many(&self, keys: Vec<String>) -> Result<(), StorageError>;
}

// =============================================================================
// Script Store
// =============================================================================

/// Per-key view over a [`StorageTransport`].
pub struct ScriptStore<T> {
    transport: T,
    soft_size_limit: usize,
}

impl<T: StorageTransport> ScriptStore<T> {
    pub fn new(transport: T) -> Self {
        Self::with_soft_limit(transport, DEFAULT_SOFT_SIZE_LIMIT)
    }

    pub fn with_soft_limit(transport: T, soft_size_limit: usize) -> Self {
        Self {
            transport,
            soft_size_limit,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn soft_size_limit(&self) -> usize {
        self.soft_size_limit
    }

    pub async fn get_all(&self) -> Result<BTreeMap<String, String>, StorageError> {
        self.transport.get_all().await
    }

    pub async fn get(&self, key: &DomainKey) -> Result<Option<String>, StorageError> {
        let mut all = self.transport.get_all().await?;
        Ok(all.remove(key.as_str()))
    }

    /// Store a record. `plain` is the uncompressed body, used for the soft limit.
    pub async fn set(&self, key: &DomainKey, plain: &str, content: String) -> Result<(), StorageError> {
        self.check_soft_limit(key.as_str(), plain);

        let len = utf16_len(&content);
        let mut entries = BTreeMap::new();
        entries.insert(key.to_string(), content);
        self.transport.set_many(entries).await?;

        log::debug!("[{}] Saved script to storage ({} units)", key, len);
        Ok(())
    }

    pub async fn remove(&self, key: &DomainKey) -> Result<(), StorageError> {
        self.transport.remove_many(vec![key.to_string()]).await?;
        log::debug!("[{}] Removed script from storage", key);
        Ok(())
    }

    pub async fn set_many(&self, entries: BTreeMap<String, String>) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.transport.set_many(entries).await
    }

    pub async fn remove_many(&self, keys: Vec<String>) -> Result<(), StorageError> {
        if keys.is_empty() {
            return Ok(());
        }
        self.transport.remove_many(keys).await
    }

    /// Returns true if `plain` exceeds the soft limit. Never an error.
    pub fn check_soft_limit(&self, key: &str, plain: &str) -> bool {
        let len = utf16_len(plain);
        if len > self.soft_size_limit {
            log::warn!(
                "[{}] Script is {} units, above the recommended {} before compression",
                key,
                len,
                self.soft_size_limit
            );
            return true;
        }
        false
    }
}

// =============================================================================
// In-Memory Transport
// =============================================================================

/// In-memory [`StorageTransport`] with optional quotas and fault injection.
#[derive(Default)]
pub struct MemoryStorage {
    records: RefCell<BTreeMap<String, String>>,
    item_quota: Option<usize>,
    total_quota: Option<usize>,
    fail_next: RefCell<Option<StorageError>>,
    writes: Cell<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records<I, K, V>(records: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let storage = Self::new();
        storage
            .records
            .borrow_mut()
            .extend(records.into_iter().map(|(k, v)| (k.into(), v.into())));
        storage
    }

    /// Reject writes where a single key + value exceeds `quota` units.
    pub fn item_quota(mut self, quota: usize) -> Self {
        self.item_quota = Some(quota);
        self
    }

    /// Reject writes that would grow the store beyond `quota` units.
    pub fn total_quota(mut self, quota: usize) -> Self {
        self.total_quota = Some(quota);
        self
    }

    /// Make the next operation fail with `error`.
    pub fn fail_next(&self, error: StorageError) {
        *self.fail_next.borrow_mut() = Some(error);
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.records.borrow().clone()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.borrow().contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.records.borrow().get(key).cloned()
    }

    /// Number of successful set/remove calls.
    pub fn write_count(&self) -> usize {
        self.writes.get()
    }

    fn take_fault(&self) -> Result<(), StorageError> {
        match self.fail_next.borrow_mut().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn entry_size(key: &str, value: &str) -> usize {
        utf16_len(key) + utf16_len(value)
    }
}

impl StorageTransport for MemoryStorage {
    async fn get_all(&self) -> Result<BTreeMap<String, String>, StorageError> {
        self.take_fault()?;
        Ok(self.snapshot())
    }

    async fn set_many(&self, entries: BTreeMap<String, String>) -> Result<(), StorageError> {
        self.take_fault()?;

        if let Some(quota) = self.item_quota {
            if let Some((key, value)) = entries.iter().find(|(k, v)| Self::entry_size(k, v) > quota) {
                return Err(StorageError::QuotaExceeded(format!(
                    "QUOTA_BYTES_PER_ITEM quota exceeded for '{}' ({} > {})",
                    key,
                    Self::entry_size(key, value),
                    quota
                )));
            }
        }

        let mut records = self.records.borrow_mut();
        if let Some(quota) = self.total_quota {
            let mut projected = records.clone();
            projected.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
            let total: usize = projected.iter().map(|(k, v)| Self::entry_size(k, v)).sum();
            if total > quota {
                return Err(StorageError::QuotaExceeded(format!(
                    "QUOTA_BYTES quota exceeded ({} > {})",
                    total, quota
                )));
            }
        }

        records.extend(entries);
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }

    async fn remove_many(&self, keys: Vec<String>) -> Result<(), StorageError> {
        self.take_fault()?;
        let mut records = self.records.borrow_mut();
        for key in keys {
            records.remove(&key);
        }
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }
}
