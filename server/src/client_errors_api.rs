//! Collector for reports posted by the browser's error boundary.
//!
//! Reports only end up in the server log; nothing is stored.

use axum::{http::StatusCode, Json};
use chrono::{DateTime, Utc};
use common::ClientErrorReport;

/// Longest message or detail kept in the log line
const MAX_FIELD_LEN: usize = 4096;

pub async fn post_client_error(Json(report): Json<ClientErrorReport>) -> StatusCode {
    if report.source.trim().is_empty() || report.message.trim().is_empty() {
        tracing::debug!("Dropping empty client error report");
        return StatusCode::BAD_REQUEST;
    }

    let reported_at = DateTime::<Utc>::from_timestamp_millis(report.timestamp_ms as i64)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| report.timestamp_ms.to_string());

    tracing::warn!(
        source = %report.source,
        reported_at = %reported_at,
        user_agent = report.user_agent.as_deref().unwrap_or("unknown"),
        detail = report.detail.as_deref().map(|d| truncate(d, MAX_FIELD_LEN)).unwrap_or(""),
        "Client error: {}",
        truncate(&report.message, MAX_FIELD_LEN)
    );

    StatusCode::NO_CONTENT
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
