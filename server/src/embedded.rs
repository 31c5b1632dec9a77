//! Embedded static files
//!
//! The page, its stylesheet and the wasm-pack output under `static/public/pkg`
//! are compiled into the binary so the server deploys as a single executable.

use axum::{
    extract::Path,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use rust_embed::Embed;

#[derive(Embed)]
#[folder = "static"]
pub struct StaticAssets;

pub async fn serve_public(Path(path): Path<String>) -> Response {
    serve_embedded_file(&format!("public/{}", path))
}

pub async fn serve_index() -> Response {
    serve_embedded_file("public/index.html")
}

fn serve_embedded_file(path: &str) -> Response {
    match StaticAssets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, mime.as_ref().to_string())],
                content.data.into_owned(),
            )
                .into_response()
        }
        None => {
            tracing::debug!("No embedded file at {}", path);
            (StatusCode::NOT_FOUND, "Not Found").into_response()
        }
    }
}
