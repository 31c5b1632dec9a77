//! Image bytes to hosted URL.
//!
//! [`AssetUploader::upload`] is the single-shot primitive. Transport-level
//! retries (429 with `Retry-After`, network errors with doubling backoff) are
//! layered on top in [`AssetUploader::upload_with_backoff`].

use crate::error::UploadError;
use crate::retry::{self, Backoff, RetryPolicy, Verdict};
use crate::runtime::Timer;
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::rc::Rc;
use std::time::Duration;

/// Raw HTTP outcome of an image host request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostResponse {
    pub status: u16,
    /// `Retry-After` header, when present
    pub retry_after: Option<String>,
    pub body: String,
}

#[async_trait(?Send)]
pub trait ImageHost {
    /// POST a multipart form with the bare base64 image in the `image` field.
    ///
    /// `Err` is reserved for requests that never produced an HTTP response.
    async fn post_image(&self, base64_image: &str) -> Result<HostResponse, UploadError>;
}

#[derive(Debug, Deserialize)]
struct HostEnvelope {
    data: Option<HostImage>,
}

#[derive(Debug, Deserialize)]
struct HostImage {
    url: Option<String>,
    display_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub max_attempts: u32,
    /// Initial pause for generic failures, doubled on each further failure
    pub backoff: Duration,
    /// Pause after a 429 without a `Retry-After` header
    pub rate_limit_default: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
            rate_limit_default: Duration::from_secs(2),
        }
    }
}

/// Strip a `data:image/...;base64,` prefix if present
pub fn strip_data_uri(image: &str) -> &str {
    if let Some(rest) = image.strip_prefix("data:image/") {
        if let Some(pos) = rest.find(";base64,") {
            return &rest[pos + ";base64,".len()..];
        }
    }
    image
}

/// Parse a `Retry-After` header given in seconds
pub fn parse_retry_after(value: Option<&str>) -> Option<u64> {
    value.and_then(|v| v.trim().parse::<u64>().ok())
}

pub struct AssetUploader {
    host: Rc<dyn ImageHost>,
    timer: Rc<dyn Timer>,
    config: UploadConfig,
}

impl AssetUploader {
    pub fn new(host: Rc<dyn ImageHost>, timer: Rc<dyn Timer>, config: UploadConfig) -> Self {
        Self { host, timer, config }
    }

    /// Upload one image (data URI or bare base64) and return its public URL.
    pub async fn upload(&self, image: &str) -> Result<String, UploadError> {
        let payload = strip_data_uri(image);
        if payload.is_empty()
            || base64::engine::general_purpose::STANDARD
                .decode(payload)
                .is_err()
        {
            return Err(UploadError::InvalidImage);
        }

        let response = self.host.post_image(payload).await?;
        if response.status == 429 {
            return Err(UploadError::RateLimited {
                retry_after_secs: parse_retry_after(response.retry_after.as_deref()),
            });
        }
        if !(200..300).contains(&response.status) {
            return Err(UploadError::Http(response.status));
        }

        let envelope: HostEnvelope = serde_json::from_str(&response.body)
            .map_err(|e| UploadError::Decode(e.to_string()))?;
        let image = envelope.data.ok_or(UploadError::MissingUrl)?;

        // The short display URL is preferred over the canonical one
        image
            .display_url
            .filter(|u| !u.is_empty())
            .or(image.url.filter(|u| !u.is_empty()))
            .ok_or(UploadError::MissingUrl)
    }

    /// [`upload`](Self::upload) with the image host's transport retry rules:
    /// 429 waits `Retry-After` seconds (or the default), other transient
    /// failures back off exponentially, everything else fails immediately.
    pub async fn upload_with_backoff(&self, image: &str) -> Result<String, UploadError> {
        let policy = RetryPolicy {
            max_attempts: self.config.max_attempts,
            backoff: Backoff::Exponential {
                initial: self.config.backoff,
                factor: 2,
            },
        };
        let rate_limit_default = self.config.rate_limit_default;
        let this = self;

        retry::run(
            policy,
            self.timer.as_ref(),
            move |_| this.upload(image),
            |attempt, error| {
                log::warn!("Upload attempt {} failed: {}", attempt, error);
                match error {
                    UploadError::RateLimited { retry_after_secs } => Verdict::RetryAfter(
                        retry_after_secs
                            .map(Duration::from_secs)
                            .unwrap_or(rate_limit_default),
                    ),
                    e if e.is_transient() => Verdict::Retry,
                    _ => Verdict::GiveUp,
                }
            },
        )
        .await
        .map_err(|exhausted| exhausted.last_error)
    }
}
