use crate::boundary::ErrorBoundary;
use crate::devices::Facing;
use crate::error::DeviceKind;
use crate::form::{FormSession, Notice};
use crate::submission::{OrderFields, SubmitOutcome};
use crate::tracking::Photo;
use crate::web::signature_pad::SignaturePad;
use crate::web;
use common::{ClientErrorReport, Coordinate, SelfieState, TrackingState};
use gloo_timers::callback::Interval;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Document, HtmlButtonElement, HtmlElement, HtmlFormElement, HtmlInputElement, PointerEvent};

const RENDER_INTERVAL_MS: u32 = 200;

thread_local! {
    static SESSION: RefCell<Option<Rc<FormSession>>> = RefCell::new(None);
    static BOUNDARY: RefCell<Option<Rc<ErrorBoundary>>> = RefCell::new(None);
    static PAD: RefCell<Option<SignaturePad>> = RefCell::new(None);
    static RENDER_LOOP: RefCell<Option<Interval>> = RefCell::new(None);
    static LAST_PHOTO_REVISION: Cell<u64> = Cell::new(u64::MAX);
    static PAD_WAS_OPEN: Cell<bool> = Cell::new(false);
}

fn session() -> Option<Rc<FormSession>> {
    SESSION.with(|s| s.borrow().clone())
}

fn page_document() -> Option<Document> {
    web_sys::window().and_then(|w| w.document())
}

fn html(document: &Document, id: &str) -> Option<HtmlElement> {
    document
        .get_element_by_id(id)
        .and_then(|e| e.dyn_into::<HtmlElement>().ok())
}

fn set_visible(document: &Document, id: &str, visible: bool) {
    if let Some(element) = html(document, id) {
        let display = if visible { "block" } else { "none" };
        element.style().set_property("display", display).ok();
    }
}

fn set_text(document: &Document, id: &str, text: &str) {
    if let Some(element) = document.get_element_by_id(id) {
        element.set_text_content(Some(text));
    }
}

fn alert(message: &str) {
    if let Some(window) = web_sys::window() {
        let _ = window.alert_with_message(message);
    }
}

/// Attach `handler` to `event` on the element with `id`
fn listen<F>(document: &Document, id: &str, event: &str, handler: F)
where
    F: FnMut(web_sys::Event) + 'static,
{
    if let Some(element) = document.get_element_by_id(id) {
        let closure = Closure::wrap(Box::new(handler) as Box<dyn FnMut(_)>);
        let _ = element.add_event_listener_with_callback(event, closure.as_ref().unchecked_ref());
        closure.forget();
    } else {
        log::warn!("Element #{} not found, {} handler not bound", id, event);
    }
}

/// Run an async session operation from an event handler
fn spawn_with_session<F, Fut>(operation: F)
where
    F: FnOnce(Rc<FormSession>) -> Fut,
    Fut: std::future::Future<Output = ()> + 'static,
{
    if let Some(session) = session() {
        wasm_bindgen_futures::spawn_local(operation(session));
    }
}

/// Panic hook: record the panic, ship it with a beacon and show the banner.
///
/// The instance traps as soon as the hook returns, so this stays synchronous
/// and the banner's reload button is wired in the page script.
pub fn report_panic(message: &str) {
    let recorded = BOUNDARY.with(|b| {
        b.try_borrow().ok().and_then(|boundary| {
            boundary
                .as_ref()
                .map(|boundary| (boundary.panicked(message), boundary.fallback_text()))
        })
    });
    let (report, detail) = recorded.unwrap_or_else(|| {
        let report = ClientErrorReport {
            source: "panic".to_string(),
            message: message.to_string(),
            detail: None,
            timestamp_ms: web::now_ms(),
            user_agent: None,
        };
        (report, message.to_string())
    });

    if let Err(e) = web::api::beacon_report(&report) {
        log::warn!("Could not send panic report: {}", web::js_error_text(&e));
    }
    if let Some(document) = page_document() {
        set_text(&document, "fallback-detail", &detail);
        set_visible(&document, "fallback-banner", true);
    }
}

pub fn init(session: Rc<FormSession>, boundary: Rc<ErrorBoundary>) -> Result<(), JsValue> {
    let document = page_document().ok_or("No document")?;

    SESSION.with(|s| *s.borrow_mut() = Some(session));
    BOUNDARY.with(|b| *b.borrow_mut() = Some(boundary));

    match SignaturePad::attach("signature-pad") {
        Ok(pad) => PAD.with(|p| *p.borrow_mut() = Some(pad)),
        Err(e) => log::error!("Signature pad unavailable: {:?}", e),
    }

    setup_camera_controls(&document);
    setup_photo_list(&document);
    setup_signature_controls(&document);
    setup_gps_controls(&document);
    setup_submit(&document);

    let interval = Interval::new(RENDER_INTERVAL_MS, render);
    RENDER_LOOP.with(|r| *r.borrow_mut() = Some(interval));

    log::info!("Order form initialized");
    Ok(())
}

/// Stop the render loop and every device; bound to `pagehide`
pub fn teardown() {
    RENDER_LOOP.with(|r| r.borrow_mut().take());
    if let Some(session) = session() {
        session.teardown();
    }
}

fn setup_camera_controls(document: &Document) {
    listen(document, "open-camera", "click", |_| {
        spawn_with_session(|session| async move {
            if let Err(e) = session.open_camera().await {
                log::warn!("Camera not opened: {}", e);
            }
        });
    });

    listen(document, "capture-photo", "click", |_| {
        if let Some(session) = session() {
            match session.capture_photo() {
                Ok(id) => log::info!("Photo {} captured", id),
                Err(e) => log::warn!("Capture failed: {}", e),
            }
        }
    });

    listen(document, "flip-camera", "click", |_| {
        spawn_with_session(|session| async move {
            if let Err(e) = session.flip_camera().await {
                log::warn!("Camera not switched: {}", e);
            }
        });
    });

    listen(document, "close-camera", "click", |_| {
        if let Some(session) = session() {
            session.close_camera();
        }
    });

    listen(document, "permission-retry", "click", |_| {
        spawn_with_session(|session| async move {
            if !session.dismiss_permission_notice().await {
                alert("Access is still blocked. Please allow it in your browser settings.");
            }
        });
    });
}

fn setup_photo_list(document: &Document) {
    // Remove buttons are re-rendered, so clicks are delegated to the list
    listen(document, "photo-list", "click", |event| {
        let target = event
            .target()
            .and_then(|t| t.dyn_into::<web_sys::Element>().ok());
        let id = target
            .and_then(|t| t.get_attribute("data-remove-photo"))
            .and_then(|v| v.parse::<u64>().ok());
        if let (Some(id), Some(session)) = (id, session()) {
            session.remove_photo(id);
        }
    });
}

fn with_pad<R>(f: impl FnOnce(&mut SignaturePad) -> R) -> Option<R> {
    PAD.with(|p| p.try_borrow_mut().ok().and_then(|mut pad| pad.as_mut().map(f)))
}

fn pad_is_open() -> bool {
    session()
        .map(|s| s.signature_state().panel_open)
        .unwrap_or(false)
}

fn setup_signature_controls(document: &Document) {
    listen(document, "toggle-signature", "click", |_| {
        spawn_with_session(|session| async move {
            if let Err(e) = session.toggle_signature().await {
                log::warn!("Signature panel: {}", e);
            }
        });
    });

    listen(document, "clear-signature", "click", |_| {
        with_pad(|pad| pad.clear());
        spawn_with_session(|session| async move {
            session.clear_signature().await;
        });
    });

    listen(document, "signature-pad", "pointerdown", |event| {
        if !pad_is_open() {
            return;
        }
        event.prevent_default();
        if let Ok(pointer) = event.dyn_into::<PointerEvent>() {
            with_pad(|pad| pad.start_stroke(&pointer));
        }
        spawn_with_session(|session| async move {
            session.begin_signature_stroke().await;
        });
    });

    listen(document, "signature-pad", "pointermove", |event| {
        event.prevent_default();
        if let Ok(pointer) = event.dyn_into::<PointerEvent>() {
            with_pad(|pad| pad.extend_stroke(&pointer));
        }
    });

    for event in ["pointerup", "pointerleave"] {
        listen(document, "signature-pad", event, |_| {
            with_pad(|pad| pad.end_stroke());
        });
    }
}

fn setup_gps_controls(document: &Document) {
    listen(document, "retry-gps", "click", |_| {
        if let Some(session) = session() {
            session.retry_gps();
        }
    });

    listen(document, "dismiss-gps-warning", "click", |_| {
        if let Some(session) = session() {
            session.dismiss_gps_warning();
        }
    });

    listen(document, "contact-admin", "click", |_| {
        if let (Some(session), Some(window)) = (session(), web_sys::window()) {
            let url = session.admin_contact_url().to_string();
            if url.is_empty() {
                alert("No admin contact is configured.");
            } else {
                let _ = window.open_with_url_and_target(&url, "_blank");
            }
        }
    });
}

fn input_value(document: &Document, name: &str) -> String {
    document
        .get_element_by_id(name)
        .and_then(|e| {
            if let Some(input) = e.dyn_ref::<HtmlInputElement>() {
                Some(input.value())
            } else {
                e.dyn_ref::<web_sys::HtmlTextAreaElement>().map(|t| t.value())
            }
        })
        .unwrap_or_default()
}

fn read_fields(document: &Document) -> OrderFields {
    OrderFields {
        name: input_value(document, "name"),
        date: input_value(document, "date"),
        phone: input_value(document, "phone"),
        address: input_value(document, "address"),
        address_detail: input_value(document, "address-detail"),
        quantity: input_value(document, "quantity"),
        reason: input_value(document, "reason"),
    }
}

fn setup_submit(document: &Document) {
    listen(document, "order-form", "submit", |event| {
        event.prevent_default();
        let document = match page_document() {
            Some(d) => d,
            None => return,
        };
        let fields = read_fields(&document);
        let signature_image = if pad_is_open() {
            with_pad(|pad| pad.export().ok()).flatten()
        } else {
            None
        };

        spawn_with_session(|session| async move {
            let outcome = session.submit(fields, signature_image).await;
            log::info!("Submit finished: {:?}", outcome);
            if outcome == SubmitOutcome::Sent {
                if let Some(form) = document
                    .get_element_by_id("order-form")
                    .and_then(|e| e.dyn_into::<HtmlFormElement>().ok())
                {
                    form.reset();
                }
                with_pad(|pad| pad.clear());
            }
        });
    });

    listen(document, "cancel-submit", "click", |_| {
        if let Some(session) = session() {
            session.cancel();
        }
    });
}

/// `select_map_location(lat, lng)`, called by the map widget on click
#[wasm_bindgen]
pub fn select_map_location(lat: f64, lng: f64) {
    if let Some(session) = session() {
        session.select_location(Coordinate::new(lat, lng));
    }
}

fn photo_status(photo: &Photo) -> String {
    match photo.tracking_state {
        TrackingState::Pending | TrackingState::Tracking => {
            let mut status = format!("Analysing location... {}%", photo.progress);
            if photo.signal_warning {
                status.push_str(" (weak GPS signal)");
            }
            status
        }
        TrackingState::Resolved => match photo.location {
            Some(location) => format!("Location: {}", location),
            None => "Location found".to_string(),
        },
        TrackingState::Failed => "Location unavailable".to_string(),
    }
}

fn render_photos(document: &Document, session: &FormSession) {
    let revision = session.photos_revision();
    if LAST_PHOTO_REVISION.with(|r| r.replace(revision)) == revision {
        return;
    }

    let mut markup = String::new();
    for (i, photo) in session.photos().iter().enumerate() {
        markup.push_str(&format!(
            "<div class=\"photo-card\">\
               <img src=\"{src}\" alt=\"Photo {n}\">\
               <div class=\"photo-progress\"><div style=\"width:{progress}%\"></div></div>\
               <p class=\"photo-status\">{status}</p>\
               <button type=\"button\" data-remove-photo=\"{id}\">Remove</button>\
             </div>",
            src = photo.image_data,
            n = i + 1,
            progress = photo.progress,
            status = photo_status(photo),
            id = photo.id,
        ));
    }
    if let Some(list) = document.get_element_by_id("photo-list") {
        list.set_inner_html(&markup);
    }
}

fn render_signature(document: &Document, session: &FormSession) {
    let state = session.signature_state();
    set_visible(document, "signature-panel", state.panel_open);

    // The canvas only has a size once the panel is visible
    let was_open = PAD_WAS_OPEN.with(|p| p.replace(state.panel_open));
    if state.panel_open && !was_open {
        with_pad(|pad| pad.reset());
    }

    if let Some(clear) = document
        .get_element_by_id("clear-signature")
        .and_then(|e| e.dyn_into::<HtmlButtonElement>().ok())
    {
        clear.set_disabled(!state.has_ink);
    }

    let status = match state.selfie_state {
        SelfieState::NotStarted if state.has_ink => "Preparing selfie...",
        SelfieState::NotStarted => "Sign to take a selfie (face the camera)",
        SelfieState::Capturing => "Taking selfie...",
        SelfieState::Captured => "Selfie captured",
        SelfieState::Failed => "Selfie failed, please sign again",
    };
    set_text(document, "selfie-status", status);
}

fn render_notice(document: &Document, session: &FormSession) {
    match session.notice() {
        Some(Notice::PermissionRequired(kind)) => {
            let text = match kind {
                DeviceKind::Location => "Location access is required. Allow location access for this site, then tap Retry.",
                DeviceKind::Camera => "Camera access is required. Allow camera access for this site, then tap Retry.",
            };
            set_text(document, "permission-text", text);
            set_visible(document, "permission-overlay", true);
        }
        Some(Notice::PhotosRequired) => {
            session.dismiss_notice();
            alert("Please add at least one evidence photo before signing.");
        }
        Some(Notice::Error(message)) | Some(Notice::Success(message)) => {
            session.dismiss_notice();
            alert(&message);
        }
        None => set_visible(document, "permission-overlay", false),
    }
}

fn render_submission(document: &Document, session: &FormSession) {
    let state = session.submission_state();
    set_visible(document, "progress-modal", state.phase.shows_modal());
    set_text(document, "progress-message", &state.message);
    if let Some(bar) = html(document, "progress-bar") {
        bar.style()
            .set_property("width", &format!("{}%", state.progress))
            .ok();
    }
    let cancel_label = if state.cancellable { "Cancel" } else { "Hide" };
    set_text(document, "cancel-submit", cancel_label);

    let button = session.submit_button();
    if let Some(submit) = document
        .get_element_by_id("submit-button")
        .and_then(|e| e.dyn_into::<HtmlButtonElement>().ok())
    {
        submit.set_disabled(!button.enabled);
        submit.set_text_content(Some(button.label));
    }
}

fn render() {
    let (document, session) = match (page_document(), session()) {
        (Some(d), Some(s)) => (d, s),
        _ => return,
    };

    set_visible(&document, "camera-panel", session.camera_open());
    let flip_label = match session.camera_facing() {
        Facing::Environment => "Use front camera",
        Facing::User => "Use back camera",
    };
    set_text(&document, "flip-camera", flip_label);
    render_photos(&document, &session);
    render_signature(&document, &session);

    let health = session.gps_health();
    set_visible(&document, "gps-warning", health.warning_visible);
    set_text(&document, "gps-retry-count", &format!("Attempt {}", health.retry_count));

    match session.selected_location() {
        Some(location) => set_text(&document, "selected-location", &location.maps_link()),
        None => set_text(&document, "selected-location", "No location selected"),
    }
    if let Some(map) = document.get_element_by_id("map") {
        let center = session.map_center();
        let _ = map.set_attribute("data-lat", &center.lat.to_string());
        let _ = map.set_attribute("data-lng", &center.lng.to_string());
    }

    render_submission(&document, &session);
    render_notice(&document, &session);
}
