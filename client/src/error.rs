use thiserror::Error;

/// Which device a permission or availability problem concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Location,
    Camera,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Location => write!(f, "location"),
            DeviceKind::Camera => write!(f, "camera"),
        }
    }
}

/// Failure reported by the device geolocation provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeoError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("location request timed out")]
    Timeout,

    #[error("position unavailable")]
    PositionUnavailable,

    #[error("geolocation not supported")]
    Unsupported,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("image host unreachable: {0}")]
    Network(String),

    #[error("image host rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("image host returned HTTP {0}")]
    Http(u16),

    #[error("image host response has no usable URL")]
    MissingUrl,

    #[error("image data is not valid base64")]
    InvalidImage,

    #[error("could not decode image host response: {0}")]
    Decode(String),
}

impl UploadError {
    /// Errors worth another attempt at the transport level
    pub fn is_transient(&self) -> bool {
        match self {
            UploadError::Network(_) | UploadError::RateLimited { .. } => true,
            UploadError::Http(status) => *status >= 500,
            UploadError::MissingUrl | UploadError::InvalidImage | UploadError::Decode(_) => false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("camera permission denied")]
    PermissionDenied,

    #[error("no camera available: {0}")]
    NoDevice(String),

    #[error("camera did not become ready in time")]
    NotReady,

    #[error("captured frame is empty")]
    DegenerateFrame,

    #[error("selfie capture cancelled")]
    Cancelled,

    #[error("selfie upload failed: {0}")]
    Upload(#[from] UploadError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("email relay rejected the message ({status}): {text}")]
    Rejected { status: u16, text: String },

    #[error("email relay unreachable: {0}")]
    Network(String),

    #[error("email relay not initialised")]
    NotInitialised,
}

/// User-facing error taxonomy of the order form
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    #[error("{0} permission denied")]
    PermissionDenied(DeviceKind),

    #[error("network failure: {0}")]
    TransientNetwork(String),

    #[error("{0} unavailable: {1}")]
    DeviceUnavailable(DeviceKind, String),

    #[error("missing required field: {0}")]
    Validation(&'static str),

    #[error("unexpected response: {0}")]
    Integration(String),

    #[error("please add at least one evidence photo first")]
    PhotosRequired,
}

impl From<GeoError> for FormError {
    fn from(error: GeoError) -> Self {
        match error {
            GeoError::PermissionDenied => FormError::PermissionDenied(DeviceKind::Location),
            other => FormError::DeviceUnavailable(DeviceKind::Location, other.to_string()),
        }
    }
}

impl From<UploadError> for FormError {
    fn from(error: UploadError) -> Self {
        if error.is_transient() {
            FormError::TransientNetwork(error.to_string())
        } else {
            FormError::Integration(error.to_string())
        }
    }
}

impl From<CaptureError> for FormError {
    fn from(error: CaptureError) -> Self {
        match error {
            CaptureError::PermissionDenied => FormError::PermissionDenied(DeviceKind::Camera),
            CaptureError::Upload(upload) => upload.into(),
            other => FormError::DeviceUnavailable(DeviceKind::Camera, other.to_string()),
        }
    }
}

impl From<RelayError> for FormError {
    fn from(error: RelayError) -> Self {
        match error {
            RelayError::Network(msg) => FormError::TransientNetwork(msg),
            other => FormError::Integration(other.to_string()),
        }
    }
}
