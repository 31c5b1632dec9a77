//! Camera streams bound to `<video>` preview elements.

use crate::devices::{CaptureStream, DeviceRole, Facing, MediaCapture};
use crate::error::CaptureError;
use crate::web::js_error_text;
use async_trait::async_trait;
use js_sys::{Object, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    CanvasRenderingContext2d, HtmlCanvasElement, HtmlVideoElement, MediaStream,
    MediaStreamConstraints, MediaStreamTrack,
};

/// Evidence photos are shrunk to fit this box
pub const PHOTO_MAX_WIDTH: u32 = 800;
pub const PHOTO_MAX_HEIGHT: u32 = 600;
pub const PHOTO_QUALITY: f64 = 0.5;
pub const SELFIE_QUALITY: f64 = 0.8;

/// `HAVE_CURRENT_DATA`
const READY_STATE_CURRENT_DATA: u16 = 2;

/// Size of a `width` x `height` frame scaled down to fit `max_w` x `max_h`.
///
/// Landscape frames are bounded by width, everything else by height.
pub fn fit_within(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    if width > height {
        if width > max_w {
            let scaled = (height as f64 * max_w as f64 / width as f64).round() as u32;
            return (max_w, scaled.max(1));
        }
    } else if height > max_h {
        let scaled = (width as f64 * max_h as f64 / height as f64).round() as u32;
        return (scaled.max(1), max_h);
    }
    (width, height)
}

fn capture_error(value: &JsValue) -> CaptureError {
    let name = Reflect::get(value, &"name".into())
        .ok()
        .and_then(|n| n.as_string())
        .unwrap_or_default();
    match name.as_str() {
        "NotAllowedError" | "PermissionDeniedError" => CaptureError::PermissionDenied,
        _ => CaptureError::NoDevice(js_error_text(value)),
    }
}

fn video_constraints(facing: Facing) -> Result<JsValue, JsValue> {
    let obj = Object::new();
    Reflect::set(&obj, &"facingMode".into(), &facing.constraint().into())?;

    let width_obj = Object::new();
    Reflect::set(&width_obj, &"ideal".into(), &1280.into())?;
    Reflect::set(&obj, &"width".into(), &width_obj)?;

    let height_obj = Object::new();
    Reflect::set(&height_obj, &"ideal".into(), &720.into())?;
    Reflect::set(&obj, &"height".into(), &height_obj)?;

    Ok(obj.into())
}

pub fn stop_stream(stream: &MediaStream) {
    let tracks = stream.get_tracks();
    for i in 0..tracks.length() {
        let track = MediaStreamTrack::from(tracks.get(i));
        track.stop();
    }
}

/// Opens `getUserMedia` streams and attaches them to the preview elements
pub struct BrowserMedia {
    main_video_id: String,
    selfie_video_id: String,
}

impl BrowserMedia {
    pub fn new(main_video_id: &str, selfie_video_id: &str) -> Self {
        Self {
            main_video_id: main_video_id.to_string(),
            selfie_video_id: selfie_video_id.to_string(),
        }
    }

    fn video_element(&self, role: DeviceRole) -> Result<HtmlVideoElement, CaptureError> {
        let id = match role {
            DeviceRole::Main => &self.main_video_id,
            DeviceRole::Selfie => &self.selfie_video_id,
        };
        web_sys::window()
            .and_then(|w| w.document())
            .and_then(|d| d.get_element_by_id(id))
            .and_then(|e| e.dyn_into::<HtmlVideoElement>().ok())
            .ok_or_else(|| CaptureError::NoDevice(format!("missing video element #{}", id)))
    }
}

#[async_trait(?Send)]
impl MediaCapture for BrowserMedia {
    async fn open(
        &self,
        role: DeviceRole,
        facing: Facing,
        mirrored: bool,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let window = web_sys::window().ok_or_else(|| CaptureError::NoDevice("No window".into()))?;
        let media_devices = window
            .navigator()
            .media_devices()
            .map_err(|e| CaptureError::NoDevice(js_error_text(&e)))?;

        let mut constraints = MediaStreamConstraints::new();
        constraints.set_audio(&JsValue::FALSE);
        constraints.set_video(&video_constraints(facing).map_err(|e| capture_error(&e))?);

        let promise = media_devices
            .get_user_media_with_constraints(&constraints)
            .map_err(|e| capture_error(&e))?;
        let stream_js = JsFuture::from(promise).await.map_err(|e| capture_error(&e))?;
        let stream = MediaStream::from(stream_js);

        let video = match self.video_element(role) {
            Ok(video) => video,
            Err(e) => {
                stop_stream(&stream);
                return Err(e);
            }
        };
        let transform = if mirrored { "scaleX(-1)" } else { "none" };
        video.style().set_property("transform", transform).ok();
        video.set_src_object(Some(&stream));
        if let Ok(promise) = video.play() {
            // Autoplay rejections surface as "not ready" later on
            wasm_bindgen_futures::spawn_local(async move {
                let _ = JsFuture::from(promise).await;
            });
        }

        log::info!("{:?} camera stream opened facing {:?}", role, facing);
        Ok(Box::new(BrowserStream {
            role,
            mirrored,
            stream,
            video,
        }))
    }
}

struct BrowserStream {
    role: DeviceRole,
    mirrored: bool,
    stream: MediaStream,
    video: HtmlVideoElement,
}

impl BrowserStream {
    fn frame_size(&self) -> (u32, u32) {
        let (w, h) = (self.video.video_width(), self.video.video_height());
        match self.role {
            DeviceRole::Main => fit_within(w, h, PHOTO_MAX_WIDTH, PHOTO_MAX_HEIGHT),
            DeviceRole::Selfie => (w, h),
        }
    }
}

impl CaptureStream for BrowserStream {
    fn is_ready(&self) -> bool {
        self.video.ready_state() >= READY_STATE_CURRENT_DATA && self.video.video_width() > 0
    }

    fn grab_frame(&self) -> Result<String, CaptureError> {
        let (width, height) = self.frame_size();
        if width == 0 || height == 0 {
            return Err(CaptureError::NotReady);
        }

        let fail = |e: JsValue| CaptureError::NoDevice(js_error_text(&e));
        let document = web_sys::window()
            .and_then(|w| w.document())
            .ok_or_else(|| CaptureError::NoDevice("No document".into()))?;
        let canvas: HtmlCanvasElement = document
            .create_element("canvas")
            .map_err(fail)?
            .dyn_into()
            .map_err(|_| CaptureError::NoDevice("canvas unsupported".into()))?;
        canvas.set_width(width);
        canvas.set_height(height);

        let context: CanvasRenderingContext2d = canvas
            .get_context("2d")
            .map_err(fail)?
            .ok_or_else(|| CaptureError::NoDevice("2d context unavailable".into()))?
            .dyn_into()
            .map_err(|_| CaptureError::NoDevice("2d context unavailable".into()))?;
        if self.mirrored {
            // Keep the photo the way the preview showed it
            context.translate(width as f64, 0.0).map_err(fail)?;
            context.scale(-1.0, 1.0).map_err(fail)?;
        }
        context
            .draw_image_with_html_video_element_and_dw_and_dh(
                &self.video,
                0.0,
                0.0,
                width as f64,
                height as f64,
            )
            .map_err(fail)?;

        let quality = match self.role {
            DeviceRole::Main => PHOTO_QUALITY,
            DeviceRole::Selfie => SELFIE_QUALITY,
        };
        canvas
            .to_data_url_with_type_and_encoder_options("image/jpeg", &JsValue::from_f64(quality))
            .map_err(fail)
    }

    fn stop(&self) {
        stop_stream(&self.stream);
        self.video.set_src_object(None);
        log::debug!("{:?} camera tracks stopped", self.role);
    }
}
