//! Background injection pipeline
//!
//! [`Injector`] reacts to tab navigation events: classify the URL, read the
//! store, resolve the bundle, assemble one code unit per slot and hand each to
//! the host's [`TabExecutor`]. Every failure is terminal for its event only;
//! the handler returns an [`InjectionReport`] and never panics.
//!
//! Events that arrive before the defaults are ready follow the configured
//! [`EarlyEventPolicy`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::assembler::{assemble, CodeUnit};
use crate::config::{EarlyEventPolicy, InjectorConfig};
use crate::defaults::{DefaultScripts, DefaultsState};
use crate::error::Error;
use crate::resolver::resolve;
use crate::store::{ScriptStore, StorageTransport};
use crate::types::{DomainKey, RunAt, Slot, TabSnapshot, STATUS_COMPLETE};
use crate::url::classify_with;

/// Host primitive executing a code unit in a tab.
#[allow(async_fn_in_trait)]
pub trait TabExecutor {
    async fn execute(&self, tab_id: i64, unit: &CodeUnit) -> Result<(), String>;
}

/// One navigation event as delivered by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct TabEvent {
    pub tab_id: i64,
    /// `changeInfo.status`, if the event carried one.
    pub status: Option<String>,
    pub tab: TabSnapshot,
}

impl TabEvent {
    pub fn new(tab_id: i64, status: Option<&str>, tab: TabSnapshot) -> Self {
        Self {
            tab_id,
            status: status.map(str::to_string),
            tab,
        }
    }

    /// The event status, falling back to the tab's own status.
    pub fn is_complete(&self) -> bool {
        match &self.status {
            Some(status) => status == STATUS_COMPLETE,
            None => self.tab.is_complete(),
        }
    }
}

/// Outcome of one navigation event.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InjectionReport {
    pub tab_id: i64,
    pub domain_key: Option<DomainKey>,
    /// Slots handed to the executor, in order.
    pub injected: Vec<(Slot, RunAt)>,
    /// Deferred slots held back until the tab completes.
    pub waiting: Vec<Slot>,
    /// Slots whose body is empty.
    pub empty: Vec<Slot>,
    /// Slots that failed to decode or execute.
    pub failed: Vec<(Slot, Error)>,
    /// Why the whole event was dropped, if it was.
    pub skipped: Option<Error>,
    /// True if the event was queued until the defaults are ready.
    pub buffered: bool,
}

impl InjectionReport {
    fn new(tab_id: i64) -> Self {
        Self {
            tab_id,
            ..Default::default()
        }
    }

    fn skip(mut self, reason: Error) -> Self {
        self.skipped = Some(reason);
        self
    }
}

// =============================================================================
// Injector
// =============================================================================

pub struct Injector<T, E> {
    store: ScriptStore<T>,
    executor: E,
    config: InjectorConfig,
    defaults: RefCell<DefaultsState>,
    early_events: RefCell<VecDeque<TabEvent>>,
}

impl<T: StorageTransport, E: TabExecutor> Injector<T, E> {
    /// Create an injector whose defaults are still loading.
    pub fn new(store: ScriptStore<T>, executor: E, config: InjectorConfig) -> Self {
        Self {
            store,
            executor,
            config,
            defaults: RefCell::new(DefaultsState::Loading),
            early_events: RefCell::new(VecDeque::new()),
        }
    }

    pub fn with_defaults(self, state: DefaultsState) -> Self {
        *self.defaults.borrow_mut() = state;
        self
    }

    pub fn store(&self) -> &ScriptStore<T> {
        &self.store
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn config(&self) -> &InjectorConfig {
        &self.config
    }

    pub fn defaults(&self) -> DefaultsState {
        self.defaults.borrow().clone()
    }

    /// Number of early events waiting for the defaults.
    pub fn buffered_events(&self) -> usize {
        self.early_events.borrow().len()
    }

    /// Settle the defaults and replay buffered events in arrival order.
    ///
    /// Unless the new state is ready, buffered events are dropped.
    pub async fn set_defaults(&self, state: DefaultsState) -> Vec<InjectionReport> {
        let ready = matches!(state, DefaultsState::Ready(_));
        if let DefaultsState::Failed(e) = &state {
            log::error!("Default scripts unavailable, injection disabled: {}", e);
        }
        *self.defaults.borrow_mut() = state;
        if !ready {
            let dropped = self.early_events.borrow_mut().drain(..).count();
            if dropped > 0 {
                log::debug!("Dropping {} early navigation events", dropped);
            }
            return Vec::new();
        }

        let pending: Vec<TabEvent> = self.early_events.borrow_mut().drain(..).collect();
        if pending.is_empty() {
            return Vec::new();
        }
        log::debug!("Replaying {} early navigation events", pending.len());

        let mut reports = Vec::with_capacity(pending.len());
        for event in pending {
            reports.push(self.handle_event(event).await);
        }
        reports
    }

    /// Entry point for the host's tab-updated event.
    pub async fn handle_tab_updated(&self, tab_id: i64, status: Option<&str>, tab: TabSnapshot) -> InjectionReport {
        self.handle_event(TabEvent::new(tab_id, status, tab)).await
    }

    pub async fn handle_event(&self, event: TabEvent) -> InjectionReport {
        let state = self.defaults();
        match state {
            DefaultsState::Ready(defaults) => self.inject(event, defaults).await,
            DefaultsState::Loading => self.hold_early_event(event),
            DefaultsState::Failed(e) => {
                log::debug!("Ignoring navigation in tab {}: defaults failed to load", event.tab_id);
                InjectionReport::new(event.tab_id).skip(e.into())
            }
        }
    }

    fn hold_early_event(&self, event: TabEvent) -> InjectionReport {
        let mut report = InjectionReport::new(event.tab_id).skip(Error::DefaultsLoading);

        match self.config.early_events {
            EarlyEventPolicy::Buffer { capacity } if capacity > 0 => {
                let mut queue = self.early_events.borrow_mut();
                if queue.len() >= capacity {
                    if let Some(dropped) = queue.pop_front() {
                        log::debug!("Early event buffer full, dropping event for tab {}", dropped.tab_id);
                    }
                }
                queue.push_back(event);
                report.buffered = true;
            }
            _ => {
                log::debug!("Rejecting navigation in tab {}: defaults still loading", event.tab_id);
            }
        }
        report
    }

    async fn inject(&self, event: TabEvent, defaults: Arc<DefaultScripts>) -> InjectionReport {
        let report = InjectionReport::new(event.tab_id);

        let Some(url) = event.tab.url.as_deref() else {
            log::debug!("Encountered tab without URL (probably a browser internal page)");
            return report.skip(Error::NoUrl);
        };

        let classified = match classify_with(url, &self.config.supported_protocols[..]) {
            Ok(classified) => classified,
            Err(e) => {
                log::debug!("Ignoring script injection: {}", e);
                return report.skip(e.into());
            }
        };
        let domain_key = classified.domain_key;
        let mut report = InjectionReport {
            domain_key: Some(domain_key.clone()),
            ..report
        };

        let stored = match self.store.get_all().await {
            Ok(stored) => stored,
            Err(e) => {
                log::warn!("[{}] Skipping injection: {}", domain_key, e);
                return report.skip(e.into());
            }
        };

        let bundle = match resolve(&defaults, &stored, &domain_key, &event.tab) {
            Ok(bundle) => bundle,
            Err(e) => {
                log::warn!("[{}] Skipping injection, prelude failed to decode: {}", domain_key, e);
                return report.skip(e.into());
            }
        };
        report
            .failed
            .extend(bundle.skipped.iter().map(|(slot, e)| (*slot, Error::from(e.clone()))));

        let complete = event.is_complete();
        for script in bundle.scripts() {
            if script.body.trim().is_empty() {
                report.empty.push(script.slot);
                continue;
            }
            if !script.is_immediate() && !complete {
                report.waiting.push(script.slot);
                continue;
            }

            let unit = assemble(&bundle.prelude, script, &defaults.helper_library, &event.tab);
            match self.executor.execute(event.tab_id, &unit).await {
                Ok(()) => {
                    log::info!(
                        "[{}] Injected {} in tab {} ({})",
                        domain_key,
                        script.slot,
                        event.tab_id,
                        unit.run_at.as_str()
                    );
                    report.injected.push((script.slot, unit.run_at));
                }
                Err(message) => {
                    log::warn!("[{}] Failed to inject {}: {}", domain_key, script.slot, message);
                    report.failed.push((script.slot, Error::Execute(message)));
                }
            }
        }

        report
    }
}

// =============================================================================
// Recording Executor
// =============================================================================

/// [`TabExecutor`] that records every unit it is given.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: RefCell<Vec<(i64, CodeUnit)>>,
    fail_next: RefCell<Option<String>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(i64, CodeUnit)> {
        self.calls.borrow().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    /// Make the next execution fail with `message`.
    pub fn fail_next(&self, message: &str) {
        *self.fail_next.borrow_mut() = Some(message.to_string());
    }
}

impl TabExecutor for RecordingExecutor {
    async fn execute(&self, tab_id: i64, unit: &CodeUnit) -> Result<(), String> {
        if let Some(message) = self.fail_next.borrow_mut().take() {
            return Err(message);
        }
        self.calls.borrow_mut().push((tab_id, unit.clone()));
        Ok(())
    }
}
