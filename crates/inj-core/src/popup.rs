//! Popup persistence flow
//!
//! The popup edits one script at a time. Edits are debounced, saves are
//! single-flight, and the record written is decided by [`decide_save`]:
//! empty or default content removes the record, anything else is stored in
//! the smaller of its raw and compressed forms.
//!
//! [`PopupSession`] methods take `&self` and never hold a borrow across an
//! await, so the host event loop may deliver edits while a save is in flight.
//! Timers belong to the host: [`PopupSession::edit`] returns the generation
//! to arm a timer with, and [`PopupSession::timer_fired`] ignores stale ones.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;

use futures::channel::oneshot;
use serde::Serialize;

use crate::codec::{decompress, encode_for_storage, size_in_kb, Encoded};
use crate::config::InjectorConfig;
use crate::defaults::DefaultScripts;
use crate::error::Error;
use crate::store::{ScriptStore, StorageTransport};
use crate::types::{DomainKey, GENERIC_KEY, PRELUDE_KEY};
use crate::url::classify_with;

/// File name offered for a full export.
pub const EXPORT_FILE_NAME: &str = "injector-scripts.json";

// =============================================================================
// Save Decision
// =============================================================================

/// Why a save removes the record instead of writing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveReason {
    Empty,
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveDecision {
    Remove(RemoveReason),
    Store(Encoded),
}

/// Decide what persisting `content` under `key` means.
pub fn decide_save(key: &DomainKey, content: &str, defaults: &DefaultScripts) -> SaveDecision {
    if content.is_empty() {
        return SaveDecision::Remove(RemoveReason::Empty);
    }
    if content == defaults.for_role(key.role()) {
        return SaveDecision::Remove(RemoveReason::Default);
    }
    SaveDecision::Store(encode_for_storage(content))
}

impl SaveDecision {
    /// Status shown once this decision has been persisted.
    pub fn status(&self) -> SaveStatus {
        match self {
            Self::Remove(reason) => SaveStatus::Removed(*reason),
            Self::Store(encoded) if encoded.compressed => SaveStatus::SavedCompressed {
                plain_len: encoded.plain_len,
                compressed_len: encoded.compressed_len,
                ratio: encoded.ratio,
            },
            Self::Store(encoded) => SaveStatus::SavedPlain {
                plain_len: encoded.plain_len,
            },
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Outcome shown in the popup status bar.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveStatus {
    Loading,
    Loaded { is_default: bool },
    Waiting,
    Saving,
    SavedPlain { plain_len: usize },
    SavedCompressed { plain_len: usize, compressed_len: usize, ratio: f64 },
    Removed(RemoveReason),
    Error(String),
}

impl SaveStatus {
    pub fn glyph(&self) -> &'static str {
        match self {
            Self::Loading | Self::Saving => "⌛",
            Self::Loaded { is_default: false } | Self::SavedPlain { .. } => "✔️",
            Self::Loaded { is_default: true } | Self::Removed(_) => "✔️🗑️",
            Self::Waiting => "✍️",
            Self::SavedCompressed { .. } => "✔️📦",
            Self::Error(_) => "❌",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Loading => "Loading saved data...".to_string(),
            Self::Loaded { .. } => "Loaded saved script".to_string(),
            Self::Waiting => "Waiting to save changes...".to_string(),
            Self::Saving => "Saving changes...".to_string(),
            Self::SavedPlain { plain_len } => format!("Saved changes ({})", size_in_kb(*plain_len)),
            Self::SavedCompressed {
                plain_len,
                compressed_len,
                ratio,
            } => format!(
                "Saved changes ({} plain, {} compressed, ratio = {:.1})",
                size_in_kb(*plain_len),
                size_in_kb(*compressed_len),
                ratio
            ),
            Self::Removed(RemoveReason::Empty) => {
                "Saved changes (removed script from storage since it is empty)".to_string()
            }
            Self::Removed(RemoveReason::Default) => {
                "Saved changes (removed script from storage since it is equivalent to the default script)".to_string()
            }
            Self::Error(message) => message.clone(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

// =============================================================================
// Save Queue
// =============================================================================

/// Observable state of a [`SaveQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Debouncing(u64),
    Saving,
    SavingPending,
}

/// What the host must do after an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    /// Content did not change; nothing to do.
    Unchanged,
    /// Arm (or re-arm) the debounce timer with this generation.
    ArmTimer(u64),
    /// A save is running; the edit will be saved when it completes.
    Pending,
}

/// Debounce and single-flight bookkeeping.
///
/// Pending content is kept per key, so switching keys while a save runs
/// never drops the previous key's last edit. Starting a save moves the
/// pending content into the running batch; `pending` then only holds edits
/// made after the save started.
#[derive(Debug, Default)]
pub struct SaveQueue {
    generation: u64,
    debouncing: bool,
    saving: bool,
    batch: BTreeMap<DomainKey, String>,
    pending: BTreeMap<DomainKey, String>,
}

impl SaveQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> QueueState {
        match (self.saving, self.debouncing) {
            (true, _) if self.pending.is_empty() => QueueState::Saving,
            (true, _) => QueueState::SavingPending,
            (false, true) => QueueState::Debouncing(self.generation),
            (false, false) => QueueState::Idle,
        }
    }

    fn start(&mut self) {
        self.debouncing = false;
        self.saving = true;
        self.batch.append(&mut self.pending);
    }

    pub fn is_saving(&self) -> bool {
        self.saving
    }

    /// Record new content for `key`.
    pub fn edit(&mut self, key: DomainKey, content: String) -> EditOutcome {
        self.pending.insert(key, content);
        if self.saving {
            return EditOutcome::Pending;
        }
        self.generation += 1;
        self.debouncing = true;
        EditOutcome::ArmTimer(self.generation)
    }

    /// Timer expiry. Returns true if the caller must start saving.
    pub fn timer_fired(&mut self, generation: u64) -> bool {
        if self.saving || !self.debouncing || generation != self.generation {
            return false;
        }
        self.start();
        true
    }

    /// Skip the debounce. Returns true if the caller must start saving.
    pub fn flush(&mut self) -> bool {
        if self.saving || self.pending.is_empty() {
            return false;
        }
        self.start();
        true
    }

    /// Queue `content` for `key` unless a newer edit is already queued.
    /// Does not arm a timer; the next flush picks it up.
    pub fn requeue(&mut self, key: DomainKey, content: String) {
        if !self.batch.contains_key(&key) {
            self.pending.entry(key).or_insert(content);
        }
    }

    /// Forget queued content for `key`. Once nothing is pending the
    /// debounce ends, so an armed timer becomes stale.
    pub fn discard(&mut self, key: &DomainKey) {
        self.pending.remove(key);
        self.batch.remove(key);
        if self.pending.is_empty() && self.debouncing {
            self.debouncing = false;
            self.generation += 1;
        }
    }

    /// Next record to persist, or None once the queue drained.
    /// Draining ends the save.
    pub fn next_pending(&mut self) -> Option<(DomainKey, String)> {
        if self.batch.is_empty() {
            self.batch.append(&mut self.pending);
        }
        let next = self.batch.pop_first();
        if next.is_none() {
            self.saving = false;
        }
        next
    }
}

// =============================================================================
// Popup Session
// =============================================================================

/// Editor content for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedScript {
    pub key: DomainKey,
    pub content: String,
    pub is_default: bool,
}

/// Result of a bulk import.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ImportReport {
    pub removed: Vec<DomainKey>,
    pub saved: Vec<DomainKey>,
    /// Entries that were not applied, with the reason.
    pub failed: Vec<(String, String)>,
}

impl ImportReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Domain choice list: `<prelude>`, `<generic>`, the current domain, then the
/// other stored keys in sorted order.
pub fn domain_choices<'a, I>(current: &DomainKey, stored_keys: I) -> Vec<DomainKey>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut others: Vec<DomainKey> = stored_keys
        .into_iter()
        .filter(|k| k.as_str() != PRELUDE_KEY && k.as_str() != GENERIC_KEY && k.as_str() != current.as_str())
        .filter_map(|k| DomainKey::new(k.as_str()))
        .collect();
    others.sort();
    others.dedup();

    let mut choices = vec![DomainKey::prelude(), DomainKey::generic(), current.clone()];
    choices.extend(others);
    choices
}

/// One popup instance.
pub struct PopupSession<T> {
    store: ScriptStore<T>,
    defaults: Arc<DefaultScripts>,
    config: InjectorConfig,
    current: RefCell<Option<DomainKey>>,
    selected: RefCell<Option<DomainKey>>,
    last_content: RefCell<String>,
    queue: RefCell<SaveQueue>,
    status: RefCell<SaveStatus>,
    /// Content whose last save failed, retried by the next forced save.
    unsaved: RefCell<BTreeMap<DomainKey, String>>,
    /// Callers of [`PopupSession::save_now`] waiting for a running save.
    waiters: RefCell<Vec<oneshot::Sender<SaveStatus>>>,
}

impl<T: StorageTransport> PopupSession<T> {
    pub fn new(store: ScriptStore<T>, defaults: Arc<DefaultScripts>, config: InjectorConfig) -> Self {
        Self {
            store,
            defaults,
            config,
            current: RefCell::new(None),
            selected: RefCell::new(None),
            last_content: RefCell::new(String::new()),
            queue: RefCell::new(SaveQueue::new()),
            status: RefCell::new(SaveStatus::Loading),
            unsaved: RefCell::new(BTreeMap::new()),
            waiters: RefCell::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &ScriptStore<T> {
        &self.store
    }

    pub fn status(&self) -> SaveStatus {
        self.status.borrow().clone()
    }

    pub fn queue_state(&self) -> QueueState {
        self.queue.borrow().state()
    }

    pub fn current_domain(&self) -> Option<DomainKey> {
        self.current.borrow().clone()
    }

    pub fn selected(&self) -> Option<DomainKey> {
        self.selected.borrow().clone()
    }

    /// Last content seen by the editor.
    pub fn content(&self) -> String {
        self.last_content.borrow().clone()
    }

    fn set_status(&self, status: SaveStatus) {
        *self.status.borrow_mut() = status;
    }

    fn fail<E: Into<Error>>(&self, error: E) -> Error {
        let error = error.into();
        self.set_status(SaveStatus::Error(error.to_string()));
        error
    }

    /// Classify the active tab, build the domain choice list and load the
    /// current domain's script.
    pub async fn open(&self, url: &str) -> Result<Vec<DomainKey>, Error> {
        let classified = classify_with(url, &self.config.supported_protocols[..]).map_err(|e| self.fail(e))?;
        let current = classified.domain_key;
        log::debug!("Parsed domain: {}", current);
        *self.current.borrow_mut() = Some(current.clone());

        let stored = self.store.get_all().await.map_err(|e| self.fail(e))?;
        let choices = domain_choices(&current, stored.keys());

        self.load(&current).await?;
        Ok(choices)
    }

    /// Load the editor content for `key`.
    pub async fn load(&self, key: &DomainKey) -> Result<LoadedScript, Error> {
        self.set_status(SaveStatus::Loading);

        let stored = self.store.get_all().await.map_err(|e| self.fail(e))?;
        let (content, is_default) = match stored.get(key.as_str()) {
            Some(record) => (decompress(record).map_err(|e| self.fail(e))?, false),
            None => (self.defaults.for_role(key.role()).to_string(), true),
        };

        *self.selected.borrow_mut() = Some(key.clone());
        *self.last_content.borrow_mut() = content.clone();
        self.set_status(SaveStatus::Loaded { is_default });
        log::debug!("[{}] Loaded script", key);

        Ok(LoadedScript {
            key: key.clone(),
            content,
            is_default,
        })
    }

    /// Editor change for the selected key.
    pub fn edit(&self, content: &str) -> EditOutcome {
        let Some(key) = self.selected() else {
            log::debug!("Ignoring edit: no script selected");
            return EditOutcome::Unchanged;
        };
        if *self.last_content.borrow() == content {
            return EditOutcome::Unchanged;
        }
        *self.last_content.borrow_mut() = content.to_string();

        let outcome = self.queue.borrow_mut().edit(key, content.to_string());
        if let EditOutcome::ArmTimer(_) = outcome {
            self.set_status(SaveStatus::Waiting);
        }
        outcome
    }

    /// Debounce timer expiry. Stale generations are ignored and return None.
    pub async fn timer_fired(&self, generation: u64) -> Option<SaveStatus> {
        if !self.queue.borrow_mut().timer_fired(generation) {
            return None;
        }
        Some(self.run_saves().await)
    }

    /// Save pending edits without waiting for the debounce, and retry
    /// content whose last save failed.
    ///
    /// Resolves once the queue has drained. If a save is already running,
    /// this waits for it and for everything queued behind it.
    pub async fn save_now(&self) -> SaveStatus {
        let started = {
            let mut queue = self.queue.borrow_mut();
            for (key, content) in std::mem::take(&mut *self.unsaved.borrow_mut()) {
                queue.requeue(key, content);
            }
            queue.flush()
        };
        if started {
            return self.run_saves().await;
        }
        if !self.queue.borrow().is_saving() {
            return self.status();
        }

        let (done, finished) = oneshot::channel();
        self.waiters.borrow_mut().push(done);
        finished.await.unwrap_or_else(|_| self.status())
    }

    /// Switch to another key, flushing any debounced or failed save first.
    ///
    /// If that save fails the selection does not change, and the editor
    /// keeps the content that could not be saved.
    pub async fn select(&self, key: &DomainKey) -> Result<LoadedScript, Error> {
        let debouncing = matches!(self.queue_state(), QueueState::Debouncing(_));
        if debouncing || !self.unsaved.borrow().is_empty() {
            if let SaveStatus::Error(message) = self.save_now().await {
                log::warn!("Not switching to {}: {}", key, message);
                return Err(Error::Unsaved(message));
            }
        }
        self.load(key).await
    }

    /// Replace the selected script with `text` and save it.
    pub async fn import_one(&self, text: &str) -> SaveStatus {
        self.edit(text);
        self.save_now().await
    }

    /// Drain the queue. The outcome is the first failure, if any, else the
    /// status of the last write. Waiters receive the same outcome.
    async fn run_saves(&self) -> SaveStatus {
        let mut last = self.status();
        let mut failure = None;
        loop {
            let next = self.queue.borrow_mut().next_pending();
            let Some((key, content)) = next else {
                break;
            };
            self.set_status(SaveStatus::Saving);
            last = self.persist(&key, &content).await;
            if last.is_error() {
                failure.get_or_insert_with(|| last.clone());
            }
            self.set_status(last.clone());
        }

        let outcome = failure.unwrap_or(last);
        self.set_status(outcome.clone());
        let waiters: Vec<_> = self.waiters.borrow_mut().drain(..).collect();
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        outcome
    }

    async fn persist(&self, key: &DomainKey, content: &str) -> SaveStatus {
        let decision = decide_save(key, content, &self.defaults);
        let result = match &decision {
            SaveDecision::Remove(_) => self.store.remove(key).await,
            SaveDecision::Store(encoded) => self.store.set(key, content, encoded.content.clone()).await,
        };

        match result {
            Ok(()) => {
                self.unsaved.borrow_mut().remove(key);
                let status = decision.status();
                log::info!("[{}] {}", key, status.message());
                status
            }
            Err(e) => {
                log::error!("[{}] Failed to save changes: {}", key, e);
                self.unsaved.borrow_mut().insert(key.clone(), content.to_string());
                SaveStatus::Error(format!("Failed to save changes: {}", e))
            }
        }
    }

    /// Selected script as a `(file name, content)` pair.
    pub fn export_one(&self) -> Option<(String, String)> {
        let key = self.selected()?;
        Some((format!("{}.js", key), self.content()))
    }

    /// All records, decompressed, as pretty-printed JSON.
    pub async fn export_all(&self) -> Result<String, Error> {
        let stored = self.store.get_all().await?;

        let mut exportable = BTreeMap::new();
        for (key, record) in &stored {
            let plain = decompress(record).map_err(|e| {
                log::error!("[{}] Cannot export: {}", key, e);
                Error::Decode(e)
            })?;
            exportable.insert(key.as_str(), plain);
        }

        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        exportable
            .serialize(&mut serializer)
            .map_err(|e| Error::Import(e.to_string()))?;
        String::from_utf8(out).map_err(|e| Error::Import(e.to_string()))
    }

    /// Import an export document. Every entry goes through [`decide_save`].
    pub async fn import_all(&self, text: &str) -> Result<ImportReport, Error> {
        if text.len() > self.config.max_import_bytes {
            return Err(Error::Import(format!(
                "file exceeds {}",
                size_in_kb(self.config.max_import_bytes)
            )));
        }
        let document: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(text).map_err(|e| Error::Import(format!("Failed to parse provided file as JSON: {}", e)))?;

        // Queued edits land first so the import overwrites them, not the reverse
        if self.queue_state() != QueueState::Idle {
            if let SaveStatus::Error(message) = self.save_now().await {
                return Err(Error::Import(format!("pending changes were not saved: {}", message)));
            }
        }

        let mut report = ImportReport::default();
        let mut to_remove = Vec::new();
        let mut to_save = BTreeMap::new();

        for (raw_key, value) in document {
            let Some(key) = DomainKey::new(raw_key.as_str()) else {
                report.failed.push((raw_key, "invalid domain key".to_string()));
                continue;
            };
            let Some(content) = value.as_str() else {
                report.failed.push((raw_key, "script is not a string".to_string()));
                continue;
            };

            match decide_save(&key, content, &self.defaults) {
                SaveDecision::Remove(_) => to_remove.push(key),
                SaveDecision::Store(encoded) => {
                    self.store.check_soft_limit(key.as_str(), content);
                    to_save.insert(key, encoded.content);
                }
            }
        }

        let remove_keys: Vec<String> = to_remove.iter().map(DomainKey::to_string).collect();
        match self.store.remove_many(remove_keys).await {
            Ok(()) => report.removed = to_remove,
            Err(e) => {
                log::error!("Failed to remove imported scripts: {}", e);
                report.failed.extend(to_remove.iter().map(|k| (k.to_string(), e.to_string())));
            }
        }

        let save_entries: BTreeMap<String, String> =
            to_save.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        match self.store.set_many(save_entries).await {
            Ok(()) => report.saved = to_save.into_keys().collect(),
            Err(e) => {
                log::error!("Failed to save imported scripts: {}", e);
                report.failed.extend(to_save.keys().map(|k| (k.to_string(), e.to_string())));
            }
        }

        // Edits made while the import was writing predate the imported content
        {
            let mut queue = self.queue.borrow_mut();
            let mut unsaved = self.unsaved.borrow_mut();
            for key in report.saved.iter().chain(&report.removed) {
                queue.discard(key);
                unsaved.remove(key);
            }
        }

        log::info!(
            "Imported scripts: {} saved, {} removed, {} failed",
            report.saved.len(),
            report.removed.len(),
            report.failed.len()
        );

        // The selected script may have changed underneath the editor
        if let Some(selected) = self.selected() {
            if !self.queue.borrow().is_saving() {
                self.load(&selected).await?;
            }
        }

        Ok(report)
    }
}
