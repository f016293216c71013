//! Imports from `js/bridge.js`

use wasm_bindgen::prelude::*;

#[wasm_bindgen(module = "/js/bridge.js")]
extern "C" {
    #[wasm_bindgen(catch, js_name = storageGetAll)]
    pub async fn storage_get_all() -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_name = storageSet)]
    pub async fn storage_set(items: JsValue) -> Result<(), JsValue>;

    #[wasm_bindgen(catch, js_name = storageRemove)]
    pub async fn storage_remove(keys: JsValue) -> Result<(), JsValue>;

    #[wasm_bindgen(catch, js_name = executeScript)]
    pub async fn execute_script(tab_id: f64, details: JsValue) -> Result<(), JsValue>;

    #[wasm_bindgen(catch, js_name = activeTab)]
    pub async fn active_tab() -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_name = fetchText)]
    pub async fn fetch_text(uri: &str, timeout_ms: f64) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    pub async fn sleep(ms: u32) -> Result<(), JsValue>;

    #[wasm_bindgen(js_name = onTabUpdated)]
    pub fn on_tab_updated(listener: &Closure<dyn FnMut(f64, JsValue, JsValue)>);
}

/// Best-effort text of a rejection value.
pub fn js_message(value: &JsValue) -> String {
    if let Some(message) = value.as_string() {
        return message;
    }
    js_sys::Reflect::get(value, &"message".into())
        .ok()
        .and_then(|m| m.as_string())
        .unwrap_or_else(|| format!("{:?}", value))
}
