use crate::error::RelayError;
use crate::submission::{EmailRelay, OrderPayload};
use crate::web::js_error_text;
use async_trait::async_trait;
use js_sys::{Function, Promise, Reflect};
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;

/// The EmailJS browser SDK, loaded by the page as `window.emailjs`
pub struct EmailJsRelay {
    initialised: bool,
}

fn sdk_function(name: &str) -> Result<(JsValue, Function), RelayError> {
    let window = web_sys::window().ok_or(RelayError::NotInitialised)?;
    let sdk = Reflect::get(&window, &"emailjs".into()).map_err(|_| RelayError::NotInitialised)?;
    if sdk.is_undefined() || sdk.is_null() {
        return Err(RelayError::NotInitialised);
    }
    let func = Reflect::get(&sdk, &name.into()).map_err(|_| RelayError::NotInitialised)?;
    let func: Function = func.dyn_into().map_err(|_| RelayError::NotInitialised)?;
    Ok((sdk, func))
}

impl EmailJsRelay {
    /// Initialise the SDK once for the session with the public key
    pub fn init(public_key: &str) -> Self {
        let initialised = match sdk_function("init") {
            Ok((sdk, init)) => match init.call1(&sdk, &JsValue::from_str(public_key)) {
                Ok(_) => true,
                Err(e) => {
                    log::error!("Email relay init failed: {}", js_error_text(&e));
                    false
                }
            },
            Err(e) => {
                log::error!("Email relay unavailable: {}", e);
                false
            }
        };
        Self { initialised }
    }
}

/// EmailJS rejects with `{status, text}`; anything else never reached it
fn relay_error(value: &JsValue) -> RelayError {
    let status = Reflect::get(value, &"status".into())
        .ok()
        .and_then(|s| s.as_f64());
    match status {
        Some(status) if status > 0.0 => RelayError::Rejected {
            status: status as u16,
            text: js_error_text(value),
        },
        _ => RelayError::Network(js_error_text(value)),
    }
}

#[async_trait(?Send)]
impl EmailRelay for EmailJsRelay {
    async fn send(
        &self,
        service_id: &str,
        template_id: &str,
        payload: &OrderPayload,
    ) -> Result<(), RelayError> {
        if !self.initialised {
            return Err(RelayError::NotInitialised);
        }
        let (sdk, send) = sdk_function("send")?;
        let params = serde_wasm_bindgen::to_value(payload)
            .map_err(|e| RelayError::Network(e.to_string()))?;

        let promise: Promise = send
            .call3(&sdk, &service_id.into(), &template_id.into(), &params)
            .map_err(|e| relay_error(&e))?
            .dyn_into()
            .map_err(|_| RelayError::Network("send did not return a promise".into()))?;
        let response = JsFuture::from(promise).await.map_err(|e| relay_error(&e))?;

        log::info!("Email relay accepted the order: {}", js_error_text(&response));
        Ok(())
    }
}
