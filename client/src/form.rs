//! The order form session: wires the components together and exposes the
//! operations the page binds to buttons, the map, and the signature pad.

use crate::boundary::ErrorBoundary;
use crate::devices::{CaptureDeviceManager, DeviceRole, Facing, MediaCapture};
use crate::error::{CaptureError, DeviceKind, FormError, GeoError};
use crate::geo::{GeoAcquirer, GeoConfig, GeolocationProvider, GpsHealth, SharedGpsHealth};
use crate::runtime::{Spawner, Timer};
use crate::signature::{SelfieConfig, SignatureSelfieFlow, SignatureState};
use crate::submission::{
    EmailRelay, OrderFields, RelayTarget, SignatureAttachment, SubmissionOrchestrator,
    SubmissionState, SubmitOutcome, SubmitRequest,
};
use crate::tracking::{Photo, PhotoId, PhotoTrackingCoordinator, SharedPhotos, TrackingConfig};
use crate::uploader::{AssetUploader, ImageHost, UploadConfig};
use common::{ClientConfig, Coordinate};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Browser (or test) implementations of the outside world
pub struct FormServices {
    pub geolocation: Rc<dyn GeolocationProvider>,
    pub media: Rc<dyn MediaCapture>,
    pub image_host: Rc<dyn ImageHost>,
    pub relay: Rc<dyn EmailRelay>,
    pub timer: Rc<dyn Timer>,
    pub spawner: Rc<dyn Spawner>,
}

#[derive(Debug, Clone, Default)]
pub struct FormTuning {
    pub geo: GeoConfig,
    pub tracking: TrackingConfig,
    pub upload: UploadConfig,
    pub selfie: SelfieConfig,
}

/// Overlay or alert currently shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Instructional overlay; dismissing it re-requests the permission
    PermissionRequired(DeviceKind),
    PhotosRequired,
    Error(String),
    Success(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitButton {
    pub label: &'static str,
    pub enabled: bool,
}

pub struct FormSession {
    config: ClientConfig,
    health: SharedGpsHealth,
    geo: Rc<GeoAcquirer>,
    devices: Rc<CaptureDeviceManager>,
    tracking: Rc<PhotoTrackingCoordinator>,
    signature: Rc<SignatureSelfieFlow>,
    submission: Rc<SubmissionOrchestrator>,
    spawner: Rc<dyn Spawner>,
    boundary: Rc<ErrorBoundary>,
    selected_location: Cell<Option<Coordinate>>,
    notice: RefCell<Option<Notice>>,
}

impl FormSession {
    pub fn new(
        config: ClientConfig,
        services: FormServices,
        tuning: FormTuning,
        boundary: Rc<ErrorBoundary>,
    ) -> Self {
        let health = SharedGpsHealth::default();
        let geo = Rc::new(GeoAcquirer::new(
            services.geolocation,
            services.timer.clone(),
            health.clone(),
            tuning.geo,
        ));
        let devices = Rc::new(CaptureDeviceManager::new(services.media));
        let tracking = Rc::new(PhotoTrackingCoordinator::new(
            SharedPhotos::default(),
            geo.clone(),
            services.timer.clone(),
            tuning.tracking,
        ));
        let uploader = Rc::new(AssetUploader::new(
            services.image_host,
            services.timer.clone(),
            tuning.upload,
        ));
        let signature = Rc::new(SignatureSelfieFlow::new(
            devices.clone(),
            uploader.clone(),
            services.timer,
            tuning.selfie,
        ));
        let submission = Rc::new(SubmissionOrchestrator::new(
            tracking.clone(),
            geo.clone(),
            uploader,
            services.relay,
            RelayTarget::from(&config),
        ));

        Self {
            config,
            health,
            geo,
            devices,
            tracking,
            signature,
            submission,
            spawner: services.spawner,
            boundary,
            selected_location: Cell::new(None),
            notice: RefCell::new(None),
        }
    }

    pub fn photos(&self) -> Vec<Photo> {
        self.tracking.photos().borrow().photos().to_vec()
    }

    /// Changes whenever any photo changes
    pub fn photos_revision(&self) -> u64 {
        self.tracking.photos().borrow().revision()
    }

    pub fn gps_health(&self) -> GpsHealth {
        self.health.borrow().clone()
    }

    pub fn signature_state(&self) -> SignatureState {
        self.signature.snapshot()
    }

    pub fn submission_state(&self) -> SubmissionState {
        self.submission.state()
    }

    pub fn notice(&self) -> Option<Notice> {
        self.notice.borrow().clone()
    }

    pub fn dismiss_notice(&self) {
        self.notice.borrow_mut().take();
    }

    fn show(&self, notice: Notice) {
        *self.notice.borrow_mut() = Some(notice);
    }

    /// The picked location, else the first located photo, else the default
    pub fn map_center(&self) -> Coordinate {
        if let Some(selected) = self.selected_location.get() {
            return selected;
        }
        self.tracking
            .photos()
            .borrow()
            .photos()
            .iter()
            .find_map(|p| p.location)
            .unwrap_or(self.config.default_center)
    }

    pub fn selected_location(&self) -> Option<Coordinate> {
        self.selected_location.get()
    }

    pub fn camera_open(&self) -> bool {
        self.devices.is_live(DeviceRole::Main)
    }

    #[cfg(test)]
    pub(crate) fn devices(&self) -> &Rc<CaptureDeviceManager> {
        &self.devices
    }

    /// Ask for the location permission up front, as the page loads
    pub async fn start(&self) {
        if let Err(GeoError::PermissionDenied) = self.geo.request_permission().await {
            log::warn!("Location permission denied on start-up");
            self.show(Notice::PermissionRequired(DeviceKind::Location));
        }
    }

    /// Start the evidence camera; closes the signature pad first.
    pub async fn open_camera(&self) -> Result<(), FormError> {
        if self.signature.is_open() {
            self.signature.close();
        }
        match self.devices.acquire(DeviceRole::Main).await {
            Ok(()) => Ok(()),
            Err(error) => Err(self.capture_failed(error)),
        }
    }

    /// Switch the evidence camera between back and front
    pub async fn flip_camera(&self) -> Result<Facing, FormError> {
        self.devices
            .flip_main()
            .await
            .map_err(|error| self.capture_failed(error))
    }

    pub fn camera_facing(&self) -> Facing {
        self.devices.facing(DeviceRole::Main)
    }

    pub fn close_camera(&self) {
        self.devices.release(DeviceRole::Main);
    }

    fn capture_failed(&self, error: CaptureError) -> FormError {
        let error = FormError::from(error);
        if let FormError::PermissionDenied(kind) = &error {
            self.show(Notice::PermissionRequired(*kind));
        } else {
            self.boundary.report("camera", &error, None);
            self.show(Notice::Error(error.to_string()));
        }
        error
    }

    /// Take the current camera frame as a photo and start tracking its location
    pub fn capture_photo(&self) -> Result<PhotoId, FormError> {
        let frame = self
            .devices
            .grab_frame(DeviceRole::Main)
            .map_err(|e| self.capture_failed(e))?;
        self.devices.release(DeviceRole::Main);

        let (id, task) = self.tracking.capture(frame);
        self.spawner.spawn(task);
        Ok(id)
    }

    pub fn remove_photo(&self, id: PhotoId) -> bool {
        self.tracking.remove(id)
    }

    /// Show or hide the signature pad
    pub async fn toggle_signature(&self) -> Result<(), FormError> {
        if self.signature.is_open() {
            self.signature.close();
            return Ok(());
        }

        let photo_count = self.tracking.photos().borrow().len();
        match self.signature.open(photo_count).await {
            Ok(()) => Ok(()),
            Err(FormError::PhotosRequired) => {
                self.show(Notice::PhotosRequired);
                Err(FormError::PhotosRequired)
            }
            Err(FormError::PermissionDenied(kind)) => {
                self.show(Notice::PermissionRequired(kind));
                Err(FormError::PermissionDenied(kind))
            }
            Err(error) => {
                // The pad stays open; the selfie will be retried on the first stroke
                log::warn!("Selfie camera failed to start: {}", error);
                Err(error)
            }
        }
    }

    /// Pointer-down on the pad; selfie failures are logged, never blocking
    pub async fn begin_signature_stroke(&self) {
        match self.signature.begin_stroke().await {
            Ok(()) | Err(CaptureError::Cancelled) => {}
            Err(error) => {
                self.boundary.report("selfie", &error, None);
            }
        }
    }

    pub async fn clear_signature(&self) {
        if let Err(error) = self.signature.clear().await {
            log::warn!("Selfie camera restart failed: {}", error);
        }
    }

    /// The map widget reported a click
    pub fn select_location(&self, location: Coordinate) {
        self.selected_location.set(Some(location));
    }

    /// Start a fresh GPS cycle for every photo without a location
    pub fn retry_gps(&self) {
        self.health.borrow_mut().reset();
        let tasks = self.tracking.retry_unlocated();
        log::info!("Retrying GPS for {} photo(s)", tasks.len());
        for task in tasks {
            self.spawner.spawn(task);
        }
    }

    pub fn dismiss_gps_warning(&self) {
        self.health.borrow_mut().warning_visible = false;
    }

    pub fn admin_contact_url(&self) -> &str {
        &self.config.admin_contact_url
    }

    /// Dismiss the permission overlay and ask again; returns whether access
    /// was granted. The overlay stays up while access is still denied.
    pub async fn dismiss_permission_notice(&self) -> bool {
        let kind = match self.notice() {
            Some(Notice::PermissionRequired(kind)) => kind,
            _ => return true,
        };

        let granted = match kind {
            DeviceKind::Location => match self.geo.request_permission().await {
                Ok(_) => {
                    self.health.borrow_mut().permission_denied = false;
                    true
                }
                Err(_) => false,
            },
            DeviceKind::Camera => self.devices.probe(DeviceRole::Main).await.is_ok(),
        };

        if granted {
            log::info!("{} permission granted", kind);
            self.dismiss_notice();
        }
        granted
    }

    pub fn submit_button(&self) -> SubmitButton {
        let (label, enabled) = if self.health.borrow().error_flag {
            ("GPS error - contact admin", false)
        } else if self.submission.is_busy() {
            ("Sending order...", false)
        } else if !self.tracking.photos().borrow().all_complete() {
            ("Waiting for location analysis...", false)
        } else if self.signature.blocks_submission() {
            ("Please finish the signature with a selfie", false)
        } else {
            ("Submit", true)
        };
        SubmitButton { label, enabled }
    }

    /// Submit the order. `signature_image` is the exported pad, if open.
    pub async fn submit(&self, fields: OrderFields, signature_image: Option<String>) -> SubmitOutcome {
        if self.signature.blocks_submission() {
            return SubmitOutcome::Failed(FormError::Validation("signature selfie"));
        }

        let signature = match (self.signature.is_open(), signature_image) {
            (true, Some(image)) => Some(SignatureAttachment {
                image,
                selfie_url: self.signature.selfie_url(),
            }),
            _ => None,
        };
        let request = SubmitRequest {
            fields,
            signature,
            selected_location: self.selected_location.get(),
        };

        let outcome = self.submission.submit(&request).await;
        match &outcome {
            SubmitOutcome::Sent => {
                self.reset();
                self.show(Notice::Success("Order sent successfully!".to_string()));
            }
            SubmitOutcome::Failed(error) => {
                self.boundary.report("submit", error, None);
                self.show(Notice::Error(format!("Sorry, something went wrong: {}", error)));
            }
            _ => {}
        }
        outcome
    }

    /// Cancel button of the progress modal
    pub fn cancel(&self) -> bool {
        self.submission.cancel()
    }

    /// Back to a blank form after a successful send
    fn reset(&self) {
        self.tracking.clear();
        self.signature.close();
        self.devices.release_all();
        self.selected_location.set(None);
        self.submission.reset();
    }

    /// Page unload: stop every task and device
    pub fn teardown(&self) {
        self.tracking.clear();
        self.signature.close();
        self.devices.release_all();
        log::info!("Form session torn down");
    }
}
