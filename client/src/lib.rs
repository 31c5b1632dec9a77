pub mod boundary;
pub mod devices;
pub mod error;
pub mod form;
pub mod geo;
pub mod retry;
pub mod runtime;
pub mod signature;
pub mod submission;
pub mod tracking;
pub mod uploader;
pub mod web;

#[cfg(test)]
pub(crate) mod testing;

use boundary::ErrorBoundary;
use common::ClientConfig;
use form::{FormServices, FormSession, FormTuning};
use runtime::{BrowserSpawner, BrowserTimer};
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

#[wasm_bindgen(start)]
pub fn main() {
    wasm_logger::init(wasm_logger::Config::default());

    std::panic::set_hook(Box::new(|info| {
        console_error_panic_hook::hook(info);
        web::ui::report_panic(&info.to_string());
    }));

    log::info!("Order form client loaded");
    wasm_bindgen_futures::spawn_local(async {
        if let Err(e) = start().await {
            log::error!("Order form failed to start: {:?}", e);
        }
    });
}

async fn start() -> Result<(), JsValue> {
    let config = match web::api::fetch_client_config().await {
        Ok(config) => config,
        Err(e) => {
            log::warn!("Using built-in client config: {}", web::js_error_text(&e));
            ClientConfig::default()
        }
    };

    let window = web_sys::window().ok_or("No window")?;
    let user_agent = window.navigator().user_agent().ok();
    let spawner = Rc::new(BrowserSpawner);
    let boundary = Rc::new(ErrorBoundary::new(
        Rc::new(web::api::HttpReportSink),
        spawner.clone(),
        web::now_ms,
        user_agent,
    ));

    let services = FormServices {
        geolocation: Rc::new(web::geolocation::BrowserGeolocation),
        media: Rc::new(web::media::BrowserMedia::new("camera-preview", "selfie-preview")),
        image_host: Rc::new(web::image_host::BrowserImageHost::new(config.upload_url())),
        relay: Rc::new(web::relay::EmailJsRelay::init(&config.relay_public_key)),
        timer: Rc::new(BrowserTimer),
        spawner,
    };
    let session = Rc::new(FormSession::new(config, services, FormTuning::default(), boundary.clone()));

    web::ui::init(session.clone(), boundary)?;

    let on_pagehide = Closure::wrap(Box::new(|_event: web_sys::Event| {
        web::ui::teardown();
    }) as Box<dyn FnMut(_)>);
    window.add_event_listener_with_callback("pagehide", on_pagehide.as_ref().unchecked_ref())?;
    on_pagehide.forget();

    session.start().await;
    Ok(())
}
