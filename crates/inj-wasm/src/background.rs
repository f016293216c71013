//! Background page: load defaults, listen to tab updates, inject.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use inj_core::{load_defaults, DefaultsState, InjectionReport, Injector, InjectorConfig, ScriptStore, TabSnapshot};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;

use crate::host::{ChromeStorage, ChromeTabs, PackageFetcher};
use crate::parse_config;

type BackgroundInjector = Injector<ChromeStorage, ChromeTabs>;

thread_local! {
    static BACKGROUND: RefCell<Option<Rc<BackgroundInjector>>> = const { RefCell::new(None) };
}

/// One log line per event, at a level matching its outcome.
fn log_report(report: &InjectionReport) {
    for (slot, error) in &report.failed {
        log::warn!("Tab {}: {} not injected: {}", report.tab_id, slot, error);
    }
    if let Some(reason) = &report.skipped {
        log::debug!("Tab {}: navigation skipped: {}", report.tab_id, reason);
    }
}

/// Register the tab listener and start loading the defaults.
///
/// The listener is registered immediately; events that arrive before the
/// defaults settle follow `config.early_events`.
#[wasm_bindgen]
pub fn start_background(config: JsValue) -> Result<(), JsValue> {
    if BACKGROUND.with(|b| b.borrow().is_some()) {
        return Err(JsValue::from_str("Background already started"));
    }

    let config: InjectorConfig = parse_config(config)?;
    let timeout = Duration::from_millis(u64::from(config.fetch_timeout_ms));
    let uris = config.resources.clone();
    let store = ScriptStore::with_soft_limit(ChromeStorage, config.soft_size_limit);
    let injector = Rc::new(Injector::new(store, ChromeTabs, config));
    BACKGROUND.with(|b| *b.borrow_mut() = Some(injector.clone()));

    let listener_injector = injector.clone();
    let listener = Closure::<dyn FnMut(f64, JsValue, JsValue)>::new(
        move |tab_id: f64, change_info: JsValue, tab: JsValue| {
            let injector = listener_injector.clone();
            let status = js_sys::Reflect::get(&change_info, &"status".into())
                .ok()
                .and_then(|s| s.as_string());
            let snapshot = match serde_wasm_bindgen::from_value::<serde_json::Value>(tab) {
                Ok(raw) => TabSnapshot::from_value(raw),
                Err(e) => {
                    log::warn!("Tab {}: unreadable tab object: {}", tab_id, e);
                    return;
                }
            };

            spawn_local(async move {
                let report = injector
                    .handle_tab_updated(tab_id as i64, status.as_deref(), snapshot)
                    .await;
                log_report(&report);
            });
        },
    );
    crate::bridge::on_tab_updated(&listener);
    listener.forget();

    spawn_local(async move {
        let state: DefaultsState = load_defaults(&PackageFetcher, &uris, timeout).await.into();
        for report in injector.set_defaults(state).await {
            log_report(&report);
        }
    });

    Ok(())
}

/// Whether the background defaults finished loading successfully.
#[wasm_bindgen]
pub fn is_ready() -> bool {
    BACKGROUND.with(|b| {
        b.borrow()
            .as_ref()
            .map_or(false, |injector| injector.defaults().as_ready().is_some())
    })
}
