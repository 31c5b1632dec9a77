//! Calls to the form's own server.

use crate::boundary::ReportSink;
use crate::web::js_error_text;
use async_trait::async_trait;
use common::{ClientConfig, ClientErrorReport};
use wasm_bindgen::JsCast;
use wasm_bindgen::JsValue;
use wasm_bindgen_futures::JsFuture;
use web_sys::{window, Blob, BlobPropertyBag, Request, RequestInit, RequestMode, Response};

fn api_url(path: &str) -> Result<String, JsValue> {
    let window = window().ok_or("No window")?;
    let origin = window
        .location()
        .origin()
        .map_err(|_| JsValue::from_str("No origin"))?;
    Ok(format!("{}{}", origin, path))
}

pub async fn fetch_client_config() -> Result<ClientConfig, JsValue> {
    let window = window().ok_or("No window")?;

    let mut opts = RequestInit::new();
    opts.set_method("GET");
    opts.set_mode(RequestMode::SameOrigin);

    let request = Request::new_with_str_and_init(&api_url("/api/client-config")?, &opts)?;
    let resp_value = JsFuture::from(window.fetch_with_request(&request)).await?;
    let resp: Response = resp_value.dyn_into()?;
    if !resp.ok() {
        return Err(JsValue::from_str(&format!("HTTP {}", resp.status())));
    }

    let json = JsFuture::from(resp.json()?).await?;
    let config: ClientConfig = serde_wasm_bindgen::from_value(json)?;
    Ok(config)
}

async fn post_report(report: &ClientErrorReport) -> Result<(), JsValue> {
    let window = window().ok_or("No window")?;
    let body_str = serde_json::to_string(report).map_err(|e| JsValue::from_str(&e.to_string()))?;

    let mut opts = RequestInit::new();
    opts.set_method("POST");
    opts.set_mode(RequestMode::SameOrigin);
    opts.set_body(&JsValue::from_str(&body_str));

    let request = Request::new_with_str_and_init(&api_url("/api/client-errors")?, &opts)?;
    request.headers().set("Content-Type", "application/json")?;

    let resp_value = JsFuture::from(window.fetch_with_request(&request)).await?;
    let resp: Response = resp_value.dyn_into()?;
    if !resp.ok() {
        return Err(JsValue::from_str(&format!("HTTP {}", resp.status())));
    }
    Ok(())
}

/// Queue a report with `navigator.sendBeacon`. Safe to call from a panic
/// hook, where no future is ever polled again.
pub fn beacon_report(report: &ClientErrorReport) -> Result<(), JsValue> {
    let window = window().ok_or("No window")?;
    let body = serde_json::to_string(report).map_err(|e| JsValue::from_str(&e.to_string()))?;

    let parts = js_sys::Array::of1(&JsValue::from_str(&body));
    let options = BlobPropertyBag::new();
    options.set_type("application/json");
    let blob = Blob::new_with_str_sequence_and_options(&parts, &options)?;

    let queued = window
        .navigator()
        .send_beacon_with_opt_blob(&api_url("/api/client-errors")?, Some(&blob))?;
    if queued {
        Ok(())
    } else {
        Err(JsValue::from_str("beacon not queued"))
    }
}

/// Posts error reports to `/api/client-errors`
pub struct HttpReportSink;

#[async_trait(?Send)]
impl ReportSink for HttpReportSink {
    async fn deliver(&self, report: &ClientErrorReport) -> Result<(), String> {
        post_report(report).await.map_err(|e| js_error_text(&e))
    }
}
