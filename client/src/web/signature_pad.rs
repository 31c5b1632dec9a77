//! Freehand drawing on the signature canvas.

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{CanvasRenderingContext2d, HtmlCanvasElement, PointerEvent};

const STROKE_WIDTH: f64 = 3.0;
const EXPORT_QUALITY: f64 = 0.8;

pub struct SignaturePad {
    canvas: HtmlCanvasElement,
    context: CanvasRenderingContext2d,
    drawing: bool,
}

impl SignaturePad {
    pub fn attach(canvas_id: &str) -> Result<Self, JsValue> {
        let document = web_sys::window()
            .and_then(|w| w.document())
            .ok_or("No document")?;
        let canvas: HtmlCanvasElement = document
            .get_element_by_id(canvas_id)
            .ok_or("Signature canvas not found")?
            .dyn_into()?;
        let context: CanvasRenderingContext2d = canvas
            .get_context("2d")?
            .ok_or("2d context unavailable")?
            .dyn_into()?;
        Ok(Self {
            canvas,
            context,
            drawing: false,
        })
    }

    /// Match the backing store to the displayed size and paint it white
    pub fn reset(&mut self) {
        let rect = self.canvas.get_bounding_client_rect();
        if rect.width() > 0.0 && rect.height() > 0.0 {
            self.canvas.set_width(rect.width() as u32);
            self.canvas.set_height(rect.height() as u32);
        }
        self.drawing = false;
        self.context.set_line_cap("round");
        self.context.set_line_width(STROKE_WIDTH);
        self.context.set_stroke_style(&JsValue::from_str("black"));
        self.clear();
    }

    pub fn clear(&self) {
        self.context.set_fill_style(&JsValue::from_str("white"));
        self.context.fill_rect(
            0.0,
            0.0,
            self.canvas.width() as f64,
            self.canvas.height() as f64,
        );
    }

    fn point(&self, event: &PointerEvent) -> (f64, f64) {
        let rect = self.canvas.get_bounding_client_rect();
        (
            event.client_x() as f64 - rect.left(),
            event.client_y() as f64 - rect.top(),
        )
    }

    pub fn start_stroke(&mut self, event: &PointerEvent) {
        let (x, y) = self.point(event);
        self.drawing = true;
        self.context.begin_path();
        self.context.move_to(x, y);
    }

    pub fn extend_stroke(&self, event: &PointerEvent) {
        if !self.drawing {
            return;
        }
        let (x, y) = self.point(event);
        self.context.line_to(x, y);
        self.context.stroke();
    }

    pub fn end_stroke(&mut self) {
        if self.drawing {
            self.context.close_path();
            self.drawing = false;
        }
    }

    /// The drawing as a JPEG `data:` URL
    pub fn export(&self) -> Result<String, JsValue> {
        self.canvas
            .to_data_url_with_type_and_encoder_options("image/jpeg", &JsValue::from_f64(EXPORT_QUALITY))
    }
}
