//! Popup page bindings
//!
//! [`PopupHandle`] wraps a [`PopupSession`] for the editor page. The debounce
//! timer is a `setTimeout` promise tagged with the session's generation, so
//! a newer edit makes older timers no-ops.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use inj_core::popup::EXPORT_FILE_NAME;
use inj_core::{
    load_script_defaults, DomainKey, EditOutcome, Error, InjectorConfig, PopupSession, SaveStatus, ScriptStore,
    TabSnapshot,
};
use serde::Serialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{future_to_promise, spawn_local};

use crate::bridge::{self, js_message};
use crate::host::{reload_tab, ChromeStorage, PackageFetcher};
use crate::parse_config;

type Session = PopupSession<ChromeStorage>;

fn to_js(error: Error) -> JsValue {
    JsValue::from_str(&error.to_string())
}

/// Optional UI callback receiving `(glyph, message)` on status changes.
#[derive(Clone, Default)]
struct StatusListener(Rc<RefCell<Option<js_sys::Function>>>);

impl StatusListener {
    fn emit(&self, status: &SaveStatus) {
        if let Some(callback) = self.0.borrow().as_ref() {
            let glyph = JsValue::from_str(status.glyph());
            let message = JsValue::from_str(&status.message());
            if let Err(e) = callback.call2(&JsValue::NULL, &glyph, &message) {
                log::warn!("Status listener failed: {}", js_message(&e));
            }
        }
    }
}

#[wasm_bindgen]
pub struct PopupHandle {
    session: Rc<Session>,
    choices: Vec<DomainKey>,
    tab_id: Option<i64>,
    debounce_ms: u32,
    listener: StatusListener,
}

/// Open the editor for the active tab.
#[wasm_bindgen]
pub async fn open_popup(config: JsValue) -> Result<PopupHandle, JsValue> {
    let config: InjectorConfig = parse_config(config)?;

    let tab = bridge::active_tab().await.map_err(|e| JsValue::from_str(&js_message(&e)))?;
    let tab = serde_wasm_bindgen::from_value::<serde_json::Value>(tab)
        .map(TabSnapshot::from_value)
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    let url = tab
        .url
        .clone()
        .ok_or_else(|| JsValue::from_str("Active tab has no URL"))?;

    let timeout = Duration::from_millis(u64::from(config.fetch_timeout_ms));
    let defaults = load_script_defaults(&PackageFetcher, &config.resources, timeout)
        .await
        .map_err(|e| JsValue::from_str(&e.to_string()))?;

    let debounce_ms = config.debounce_ms;
    let store = ScriptStore::with_soft_limit(ChromeStorage, config.soft_size_limit);
    let session = Rc::new(PopupSession::new(store, Arc::new(defaults), config));
    let choices = session.open(&url).await.map_err(to_js)?;

    Ok(PopupHandle {
        session,
        choices,
        tab_id: tab.id,
        debounce_ms,
        listener: StatusListener::default(),
    })
}

#[wasm_bindgen]
impl PopupHandle {
    /// Keys offered in the domain selector, in display order.
    pub fn choices(&self) -> js_sys::Array {
        self.choices.iter().map(|k| JsValue::from_str(k.as_str())).collect()
    }

    pub fn current_domain(&self) -> Option<String> {
        self.session.current_domain().map(String::from)
    }

    pub fn selected(&self) -> Option<String> {
        self.session.selected().map(String::from)
    }

    pub fn content(&self) -> String {
        self.session.content()
    }

    pub fn status_glyph(&self) -> String {
        self.session.status().glyph().to_string()
    }

    pub fn status_message(&self) -> String {
        self.session.status().message()
    }

    pub fn set_status_listener(&self, callback: js_sys::Function) {
        *self.listener.0.borrow_mut() = Some(callback);
    }

    pub fn export_file_name() -> String {
        EXPORT_FILE_NAME.to_string()
    }

    /// Editor input event.
    pub fn edit(&self, content: &str) {
        let outcome = self.session.edit(content);
        self.listener.emit(&self.session.status());

        if let EditOutcome::ArmTimer(generation) = outcome {
            let session = self.session.clone();
            let listener = self.listener.clone();
            let delay = self.debounce_ms;
            spawn_local(async move {
                if let Err(e) = bridge::sleep(delay).await {
                    log::warn!("Debounce timer failed: {}", js_message(&e));
                    return;
                }
                if let Some(status) = session.timer_fired(generation).await {
                    listener.emit(&status);
                }
            });
        }
    }

    /// Switch the editor to another key. Resolves with its content.
    pub fn select(&self, key: String) -> js_sys::Promise {
        let session = self.session.clone();
        let listener = self.listener.clone();
        future_to_promise(async move {
            let key = DomainKey::new(key.as_str()).ok_or_else(|| to_js(Error::InvalidKey(key.clone())))?;
            let result = session.select(&key).await;
            listener.emit(&session.status());
            let loaded = result.map_err(to_js)?;
            Ok(JsValue::from_str(&loaded.content))
        })
    }

    /// Save without waiting for the debounce. Rejects with the error message.
    pub fn save_now(&self) -> js_sys::Promise {
        let session = self.session.clone();
        let listener = self.listener.clone();
        future_to_promise(async move { save(&session, &listener).await.map(|()| JsValue::UNDEFINED) })
    }

    /// Save, then reload the active tab.
    pub fn save_and_reload(&self) -> js_sys::Promise {
        let session = self.session.clone();
        let listener = self.listener.clone();
        let tab_id = self.tab_id;
        future_to_promise(async move {
            save(&session, &listener).await?;
            if let Some(tab_id) = tab_id {
                reload_tab(tab_id).await.map_err(|e| JsValue::from_str(&e))?;
            }
            Ok(JsValue::UNDEFINED)
        })
    }

    /// Selected script as `[fileName, content]`, or null.
    pub fn export_one(&self) -> JsValue {
        match self.session.export_one() {
            Some((name, content)) => js_sys::Array::of2(&name.into(), &content.into()).into(),
            None => JsValue::NULL,
        }
    }

    /// Resolves with the pretty-printed export document.
    pub fn export_all(&self) -> js_sys::Promise {
        let session = self.session.clone();
        future_to_promise(async move {
            let json = session.export_all().await.map_err(to_js)?;
            Ok(JsValue::from_str(&json))
        })
    }

    /// Resolves with `{ removed, saved, failed }`.
    pub fn import_all(&self, text: String) -> js_sys::Promise {
        let session = self.session.clone();
        let listener = self.listener.clone();
        future_to_promise(async move {
            let report = session.import_all(&text).await.map_err(to_js)?;
            listener.emit(&session.status());
            report
                .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
                .map_err(|e| JsValue::from_str(&e.to_string()))
        })
    }

    /// Replace the selected script with `text` and save it.
    pub fn import_one(&self, text: String) -> js_sys::Promise {
        let session = self.session.clone();
        let listener = self.listener.clone();
        future_to_promise(async move {
            let status = session.import_one(&text).await;
            listener.emit(&status);
            match status {
                SaveStatus::Error(message) => Err(JsValue::from_str(&message)),
                _ => Ok(JsValue::UNDEFINED),
            }
        })
    }
}

async fn save(session: &Session, listener: &StatusListener) -> Result<(), JsValue> {
    let status = session.save_now().await;
    listener.emit(&status);
    match status {
        SaveStatus::Error(message) => Err(JsValue::from_str(&message)),
        _ => Ok(()),
    }
}
