use crate::error::GeoError;
use crate::geo::{GeolocationProvider, PositionOptions};
use async_trait::async_trait;
use common::Coordinate;
use js_sys::{Function, Promise, Reflect};
use wasm_bindgen::JsValue;
use wasm_bindgen_futures::JsFuture;

/// `navigator.geolocation.getCurrentPosition` as a future
pub struct BrowserGeolocation;

/// Map a `GeolocationPositionError` onto [`GeoError`]
fn geo_error(value: &JsValue) -> GeoError {
    let code = Reflect::get(value, &"code".into())
        .ok()
        .and_then(|c| c.as_f64())
        .unwrap_or(0.0) as u32;
    match code {
        1 => GeoError::PermissionDenied,
        3 => GeoError::Timeout,
        _ => GeoError::PositionUnavailable,
    }
}

fn read_f64(object: &JsValue, key: &str) -> Option<f64> {
    Reflect::get(object, &key.into()).ok().and_then(|v| v.as_f64())
}

#[async_trait(?Send)]
impl GeolocationProvider for BrowserGeolocation {
    async fn current_position(&self, options: PositionOptions) -> Result<Coordinate, GeoError> {
        let window = web_sys::window().ok_or(GeoError::Unsupported)?;
        let geolocation = window
            .navigator()
            .geolocation()
            .map_err(|_| GeoError::Unsupported)?;

        let mut js_options = web_sys::PositionOptions::new();
        js_options.set_enable_high_accuracy(options.enable_high_accuracy);
        js_options.set_timeout(options.timeout.as_millis() as u32);
        js_options.set_maximum_age(options.maximum_age.as_millis() as u32);

        let promise = Promise::new(&mut |resolve: Function, reject: Function| {
            if let Err(e) = geolocation.get_current_position_with_error_callback_and_options(
                &resolve,
                Some(&reject),
                &js_options,
            ) {
                let _ = reject.call1(&JsValue::NULL, &e);
            }
        });

        let position = JsFuture::from(promise).await.map_err(|e| geo_error(&e))?;
        let coords = Reflect::get(&position, &"coords".into()).map_err(|_| GeoError::PositionUnavailable)?;
        match (read_f64(&coords, "latitude"), read_f64(&coords, "longitude")) {
            (Some(lat), Some(lng)) => Ok(Coordinate::new(lat, lng)),
            _ => Err(GeoError::PositionUnavailable),
        }
    }
}
