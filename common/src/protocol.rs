use serde::{Deserialize, Serialize};
use crate::location::{Coordinate, DEFAULT_CENTER};

/// Runtime settings the server hands to the browser form.
///
/// Everything in here ends up in the page anyway (the image host key and the
/// relay public key are client-side credentials), so it is served as plain JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Image host upload endpoint, the API key is appended as `?key=`
    #[serde(default = "default_image_host_url")]
    pub image_host_url: String,
    #[serde(default)]
    pub image_host_key: String,

    /// Public key the email relay is initialised with (once per session)
    #[serde(default)]
    pub relay_public_key: String,
    #[serde(default)]
    pub relay_service_id: String,
    #[serde(default)]
    pub relay_template_id: String,

    /// Address every order is delivered to
    #[serde(default)]
    pub recipient_email: String,

    /// Link opened by the "contact admin" escalation button
    #[serde(default)]
    pub admin_contact_url: String,

    #[serde(default = "default_center")]
    pub default_center: Coordinate,
}

fn default_image_host_url() -> String {
    "https://api.imgbb.com/1/upload".to_string()
}

fn default_center() -> Coordinate {
    DEFAULT_CENTER
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            image_host_url: default_image_host_url(),
            image_host_key: String::new(),
            relay_public_key: String::new(),
            relay_service_id: String::new(),
            relay_template_id: String::new(),
            recipient_email: String::new(),
            admin_contact_url: String::new(),
            default_center: default_center(),
        }
    }
}

impl ClientConfig {
    /// Full upload URL including the API key query parameter
    pub fn upload_url(&self) -> String {
        format!("{}?key={}", self.image_host_url, self.image_host_key)
    }
}

/// An error the browser's error boundary forwards to the server log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientErrorReport {
    /// Where the error surfaced ("geo", "upload", "submit", "panic", ...)
    pub source: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}
