use crate::error::UploadError;
use crate::uploader::{HostResponse, ImageHost};
use crate::web::js_error_text;
use async_trait::async_trait;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{FormData, Request, RequestInit, RequestMode, Response};

/// imgbb-style multipart upload endpoint
pub struct BrowserImageHost {
    upload_url: String,
}

impl BrowserImageHost {
    /// `upload_url` already carries the `?key=` parameter
    pub fn new(upload_url: String) -> Self {
        Self { upload_url }
    }
}

fn network(e: wasm_bindgen::JsValue) -> UploadError {
    UploadError::Network(js_error_text(&e))
}

#[async_trait(?Send)]
impl ImageHost for BrowserImageHost {
    async fn post_image(&self, base64_image: &str) -> Result<HostResponse, UploadError> {
        let window = web_sys::window().ok_or_else(|| UploadError::Network("No window".into()))?;

        let form = FormData::new().map_err(network)?;
        form.append_with_str("image", base64_image).map_err(network)?;

        let mut opts = RequestInit::new();
        opts.set_method("POST");
        opts.set_mode(RequestMode::Cors);
        opts.set_body(&form);

        let request = Request::new_with_str_and_init(&self.upload_url, &opts).map_err(network)?;
        let resp_value = JsFuture::from(window.fetch_with_request(&request))
            .await
            .map_err(network)?;
        let resp: Response = resp_value.dyn_into().map_err(network)?;

        let retry_after = resp.headers().get("Retry-After").ok().flatten();
        let body = JsFuture::from(resp.text().map_err(network)?)
            .await
            .map_err(network)?
            .as_string()
            .unwrap_or_default();

        Ok(HostResponse {
            status: resp.status(),
            retry_after,
            body,
        })
    }
}
