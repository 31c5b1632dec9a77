//! Browser implementations of the collaborator traits, and the DOM bindings.

pub mod api;
pub mod geolocation;
pub mod image_host;
pub mod media;
pub mod relay;
pub mod signature_pad;
pub mod ui;

use wasm_bindgen::JsValue;

/// Best-effort readable text for a thrown JS value
pub(crate) fn js_error_text(value: &JsValue) -> String {
    if let Some(text) = value.as_string() {
        return text;
    }
    for key in ["message", "text", "name"] {
        if let Ok(field) = js_sys::Reflect::get(value, &key.into()) {
            if let Some(text) = field.as_string() {
                return text;
            }
        }
    }
    format!("{:?}", value)
}

pub(crate) fn now_ms() -> u64 {
    js_sys::Date::now() as u64
}
