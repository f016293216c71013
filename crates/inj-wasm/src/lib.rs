//! WebAssembly bindings for Injector
//!
//! The background page calls [`start_background`]; the popup calls
//! [`open_popup`]. Host APIs are reached through `js/bridge.js`.

mod background;
mod bridge;
mod host;
mod popup;

use inj_core::{codec, url, InjectorConfig};
use wasm_bindgen::prelude::*;

pub use background::{is_ready, start_background};
pub use popup::{open_popup, PopupHandle};

#[wasm_bindgen(start)]
pub fn main() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::default());
}

/// `undefined` or `null` means the default configuration.
pub(crate) fn parse_config(value: JsValue) -> Result<InjectorConfig, JsValue> {
    if value.is_undefined() || value.is_null() {
        return Ok(InjectorConfig::default());
    }
    serde_wasm_bindgen::from_value(value).map_err(|e| JsValue::from_str(&format!("Invalid configuration: {}", e)))
}

#[wasm_bindgen]
pub fn classify_url(url: &str) -> Result<String, JsValue> {
    url::classify(url)
        .map(|classified| classified.domain_key.to_string())
        .map_err(|e| JsValue::from_str(&e.to_string()))
}

#[wasm_bindgen]
pub fn compress_script(text: &str) -> String {
    codec::compress(text)
}

#[wasm_bindgen]
pub fn decompress_script(content: &str) -> Result<String, JsValue> {
    codec::decompress(content).map_err(|e| JsValue::from_str(&e.to_string()))
}
