//! Two-phase order submission.
//!
//! A submit while any photo is still unsettled only drains the outstanding
//! location lookups and hands control back; the next submit uploads every
//! asset, assembles the relay payload and sends it.

use crate::error::{FormError, RelayError};
use crate::geo::GeoAcquirer;
use crate::tracking::{PhotoId, PhotoTrackingCoordinator};
use crate::uploader::AssetUploader;
use async_trait::async_trait;
use common::{ClientConfig, Coordinate, SubmissionPhase};
use futures::future::{self, AbortHandle, Abortable};
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Share of the progress bar reserved for setup before uploads begin
const SETUP_PROGRESS: u8 = 10;
/// Share spread across all uploads
const UPLOAD_PROGRESS: u8 = 60;
const ASSEMBLED_PROGRESS: u8 = 80;
const SENDING_PROGRESS: u8 = 90;

/// Progress modal state of the current submit attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionState {
    pub phase: SubmissionPhase,
    /// 0-100
    pub progress: u8,
    /// Cancel actually stops the work (only while awaiting locations)
    pub cancellable: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Stragglers were resolved; submit again to send
    AwaitingLocations,
    Sent,
    Cancelled,
    /// Another submit is still running
    Busy,
    Failed(FormError),
}

/// Raw customer fields from the form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFields {
    pub name: String,
    pub date: String,
    pub phone: String,
    pub address: String,
    pub address_detail: String,
    pub quantity: String,
    pub reason: String,
}

impl OrderFields {
    /// First required field that is blank
    pub fn validate(&self) -> Result<(), FormError> {
        let required = [
            ("name", &self.name),
            ("date", &self.date),
            ("phone", &self.phone),
            ("address", &self.address),
            ("quantity", &self.quantity),
        ];
        match required.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((field, _)) => Err(FormError::Validation(*field)),
            None => Ok(()),
        }
    }
}

/// Signature canvas export plus the selfie taken while signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureAttachment {
    /// Canvas as a JPEG `data:` URL
    pub image: String,
    pub selfie_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitRequest {
    pub fields: OrderFields,
    /// Present while the signature panel is open
    pub signature: Option<SignatureAttachment>,
    /// Location picked on the map, if the user picked one
    pub selected_location: Option<Coordinate>,
}

/// Flat template parameters handed to the email relay
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrderPayload {
    pub to_email: String,
    pub from_name: String,
    pub date: String,
    pub phone: String,
    pub address: String,
    pub address_detail: String,
    pub quantity: String,
    pub reason: String,
    pub location: String,
    pub photos: String,
    pub signature: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadedPhoto {
    pub url: String,
    pub location: Option<Coordinate>,
}

#[async_trait(?Send)]
pub trait EmailRelay {
    async fn send(
        &self,
        service_id: &str,
        template_id: &str,
        payload: &OrderPayload,
    ) -> Result<(), RelayError>;
}

/// Where the relay delivers the order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayTarget {
    pub service_id: String,
    pub template_id: String,
    pub recipient: String,
}

impl From<&ClientConfig> for RelayTarget {
    fn from(config: &ClientConfig) -> Self {
        Self {
            service_id: config.relay_service_id.clone(),
            template_id: config.relay_template_id.clone(),
            recipient: config.recipient_email.clone(),
        }
    }
}

/// Bar position after `done` of `total` uploads
pub fn upload_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return SETUP_PROGRESS + UPLOAD_PROGRESS;
    }
    let share = done.min(total) * UPLOAD_PROGRESS as usize / total;
    SETUP_PROGRESS + share as u8
}

fn location_line(location: Option<&Coordinate>) -> String {
    location
        .map(|c| c.maps_link())
        .unwrap_or_else(|| "Location unavailable".to_string())
}

impl OrderPayload {
    pub fn assemble(
        target: &RelayTarget,
        request: &SubmitRequest,
        photos: &[UploadedPhoto],
        signature_url: Option<&str>,
    ) -> Self {
        let fields = &request.fields;

        let photo_list = photos
            .iter()
            .enumerate()
            .map(|(i, photo)| {
                format!(
                    "Photo {n}: {url}\nPhoto {n} location: {loc}",
                    n = i + 1,
                    url = photo.url,
                    loc = location_line(photo.location.as_ref())
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let selfie_url = request
            .signature
            .as_ref()
            .and_then(|s| s.selfie_url.as_deref());
        let signature = match signature_url {
            Some(url) => {
                let mut text = format!(
                    "Digital signature: {}\nSignature location: {}",
                    url,
                    location_line(request.selected_location.as_ref())
                );
                if let Some(selfie) = selfie_url {
                    text.push_str(&format!("\n\nSelfie at signing: {}", selfie));
                }
                text
            }
            None => String::new(),
        };

        let location = request
            .selected_location
            .map(|c| c.maps_link())
            .unwrap_or_else(|| "No coordinates".to_string());

        let message = compose_message(fields, &photo_list, &signature);

        OrderPayload {
            to_email: target.recipient.clone(),
            from_name: fields.name.clone(),
            date: fields.date.clone(),
            phone: fields.phone.clone(),
            address: fields.address.clone(),
            address_detail: fields.address_detail.clone(),
            quantity: fields.quantity.clone(),
            reason: fields.reason.clone(),
            location,
            photos: photo_list,
            signature,
            message,
        }
    }
}

fn compose_message(fields: &OrderFields, photo_list: &str, signature: &str) -> String {
    let mut message = format!(
        "New order:\n\n\
         Customer:\n\
         - Name: {}\n\
         - Date: {}\n\
         - Phone: {}\n\n\
         Delivery address:\n\
         - Address: {}\n\
         - Address detail: {}\n\n\
         Order:\n\
         - Quantity (boxes): {}\n\
         - Reason: {}\n\n\
         Evidence photos and locations:\n{}",
        fields.name,
        fields.date,
        fields.phone,
        fields.address,
        fields.address_detail,
        fields.quantity,
        fields.reason,
        photo_list
    );
    if !signature.is_empty() {
        message.push_str("\n\n");
        message.push_str(signature);
    }
    message.push_str("\n\nRegards,\nOrder form");
    message
}

pub struct SubmissionOrchestrator {
    tracking: Rc<PhotoTrackingCoordinator>,
    geo: Rc<GeoAcquirer>,
    uploader: Rc<AssetUploader>,
    relay: Rc<dyn EmailRelay>,
    target: RelayTarget,
    state: RefCell<SubmissionState>,
    in_flight: Cell<bool>,
    cancel_requested: Cell<bool>,
    awaiting: RefCell<Option<AbortHandle>>,
}

impl SubmissionOrchestrator {
    pub fn new(
        tracking: Rc<PhotoTrackingCoordinator>,
        geo: Rc<GeoAcquirer>,
        uploader: Rc<AssetUploader>,
        relay: Rc<dyn EmailRelay>,
        target: RelayTarget,
    ) -> Self {
        Self {
            tracking,
            geo,
            uploader,
            relay,
            target,
            state: RefCell::new(SubmissionState::default()),
            in_flight: Cell::new(false),
            cancel_requested: Cell::new(false),
            awaiting: RefCell::new(None),
        }
    }

    pub fn state(&self) -> SubmissionState {
        self.state.borrow().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.get()
    }

    fn enter(&self, phase: SubmissionPhase, progress: u8, cancellable: bool, message: &str) {
        *self.state.borrow_mut() = SubmissionState {
            phase,
            progress,
            cancellable,
            message: message.to_string(),
        };
    }

    fn set_progress(&self, progress: u8) {
        let mut state = self.state.borrow_mut();
        if state.phase.shows_modal() {
            state.progress = progress;
        }
    }

    pub async fn submit(&self, request: &SubmitRequest) -> SubmitOutcome {
        if self.in_flight.replace(true) {
            return SubmitOutcome::Busy;
        }
        self.cancel_requested.set(false);

        let unsettled = self.tracking.photos().borrow().unsettled_ids();
        let outcome = if unsettled.is_empty() {
            match self.send(request).await {
                Ok(outcome) => outcome,
                Err(error) if self.cancel_requested.get() => {
                    log::info!("Order abandoned by the user; dropping failure: {}", error);
                    SubmitOutcome::Cancelled
                }
                Err(error) => {
                    log::error!("Order submission failed: {}", error);
                    self.enter(SubmissionPhase::Idle, 0, false, &error.to_string());
                    SubmitOutcome::Failed(error)
                }
            }
        } else {
            self.await_locations(unsettled).await
        };

        self.in_flight.set(false);
        outcome
    }

    /// Resolve every straggler with one bounded lookup each, concurrently
    async fn await_locations(&self, ids: Vec<PhotoId>) -> SubmitOutcome {
        log::info!("Submit deferred: {} photo(s) still waiting for a location", ids.len());
        self.enter(
            SubmissionPhase::AwaitingLocations,
            0,
            true,
            "Please wait, fetching photo locations...",
        );

        let total = ids.len();
        let done = Cell::new(0usize);
        let done = &done;
        let lookups = ids.into_iter().map(|id| async move {
            let location = self.geo.acquire(self.geo.default_attempts(), |_| {}).await;
            self.tracking.settle(id, location);
            done.set(done.get() + 1);
            self.set_progress((done.get() * 100 / total) as u8);
        });

        let (handle, registration) = AbortHandle::new_pair();
        *self.awaiting.borrow_mut() = Some(handle);
        let result = Abortable::new(future::join_all(lookups), registration).await;
        self.awaiting.borrow_mut().take();

        match result {
            Ok(_) => {
                self.enter(SubmissionPhase::Idle, 0, false, "");
                SubmitOutcome::AwaitingLocations
            }
            Err(_) => SubmitOutcome::Cancelled,
        }
    }

    async fn send(&self, request: &SubmitRequest) -> Result<SubmitOutcome, FormError> {
        request.fields.validate()?;

        let photos: Vec<(String, Option<Coordinate>)> = self
            .tracking
            .photos()
            .borrow()
            .photos()
            .iter()
            .map(|p| (p.image_data.clone(), p.location))
            .collect();

        self.enter(SubmissionPhase::Uploading, SETUP_PROGRESS, false, "Sending order...");

        let total = photos.len() + usize::from(request.signature.is_some());
        let done = Cell::new(0usize);
        let done = &done;
        let uploads = photos.iter().map(|(image, location)| async move {
            let url = self.uploader.upload_with_backoff(image).await?;
            done.set(done.get() + 1);
            self.set_progress(upload_progress(done.get(), total));
            Ok::<_, FormError>(UploadedPhoto {
                url,
                location: *location,
            })
        });
        let uploaded = future::try_join_all(uploads).await?;

        let signature_url = match &request.signature {
            Some(signature) => {
                let url = self.uploader.upload_with_backoff(&signature.image).await?;
                done.set(done.get() + 1);
                self.set_progress(upload_progress(done.get(), total));
                Some(url)
            }
            None => None,
        };

        if self.cancel_requested.get() {
            log::info!("Submission cancelled after uploads");
            return Ok(SubmitOutcome::Cancelled);
        }

        let payload =
            OrderPayload::assemble(&self.target, request, &uploaded, signature_url.as_deref());
        self.set_progress(ASSEMBLED_PROGRESS);

        if self.cancel_requested.get() {
            return Ok(SubmitOutcome::Cancelled);
        }
        self.enter(SubmissionPhase::Sending, SENDING_PROGRESS, false, "Sending order...");
        self.relay
            .send(&self.target.service_id, &self.target.template_id, &payload)
            .await?;

        log::info!("Order sent with {} photo(s)", uploaded.len());
        self.enter(SubmissionPhase::Done, 100, false, "Order sent successfully!");
        Ok(SubmitOutcome::Sent)
    }

    /// Cancel action of the progress modal.
    ///
    /// While awaiting locations this stops waiting and fails the stragglers.
    /// During upload/send it only hides the modal and keeps the relay from
    /// being called if it has not been yet.
    pub fn cancel(&self) -> bool {
        let phase = self.state.borrow().phase;
        match phase {
            SubmissionPhase::AwaitingLocations => {
                if let Some(handle) = self.awaiting.borrow_mut().take() {
                    handle.abort();
                }
                let failed = self.tracking.cancel_unsettled();
                log::info!("Location wait cancelled, {} photo(s) marked failed", failed.len());
                self.enter(SubmissionPhase::Cancelled, 0, false, "");
                true
            }
            SubmissionPhase::Uploading | SubmissionPhase::Sending => {
                self.cancel_requested.set(true);
                log::info!("Cancel requested during {:?}; in-flight requests continue", phase);
                self.enter(SubmissionPhase::Cancelled, 0, false, "");
                true
            }
            _ => false,
        }
    }

    /// Back to idle after the outcome was shown
    pub fn reset(&self) {
        if !self.in_flight.get() {
            *self.state.borrow_mut() = SubmissionState::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GeoError;
    use crate::geo::{GeoConfig, SharedGpsHealth};
    use crate::runtime::Timer;
    use crate::testing::{FakeImageHost, FakeRelay, ScriptedGeolocation, TokioTimer, PIXEL_JPEG};
    use crate::tracking::{SharedPhotos, TrackingConfig};
    use crate::uploader::UploadConfig;
    use common::TrackingState;
    use std::time::Duration;
    use tokio::task::LocalSet;
    use tokio::time::sleep;

    const HERE: Coordinate = Coordinate { lat: 3.59, lng: 98.67 };

    struct Fixture {
        orchestrator: Rc<SubmissionOrchestrator>,
        tracking: Rc<PhotoTrackingCoordinator>,
        host: Rc<FakeImageHost>,
        relay: Rc<FakeRelay>,
    }

    fn fixture(geo: ScriptedGeolocation, host: FakeImageHost, relay: FakeRelay) -> Fixture {
        let timer: Rc<dyn Timer> = Rc::new(TokioTimer);
        let geo = Rc::new(GeoAcquirer::new(
            Rc::new(geo),
            timer.clone(),
            SharedGpsHealth::default(),
            GeoConfig::default(),
        ));
        let tracking = Rc::new(PhotoTrackingCoordinator::new(
            SharedPhotos::default(),
            geo.clone(),
            timer.clone(),
            TrackingConfig::default(),
        ));
        let host = Rc::new(host);
        let relay = Rc::new(relay);
        let uploader = Rc::new(AssetUploader::new(host.clone(), timer, UploadConfig::default()));
        let target = RelayTarget {
            service_id: "service_test".into(),
            template_id: "template_test".into(),
            recipient: "orders@example.com".into(),
        };
        let orchestrator = Rc::new(SubmissionOrchestrator::new(
            tracking.clone(),
            geo,
            uploader,
            relay.clone(),
            target,
        ));
        Fixture {
            orchestrator,
            tracking,
            host,
            relay,
        }
    }

    fn fields() -> OrderFields {
        OrderFields {
            name: "Budi".into(),
            date: "2024-05-01".into(),
            phone: "0812".into(),
            address: "Jl. Merdeka 1".into(),
            address_detail: "Blue gate".into(),
            quantity: "3".into(),
            reason: "Restock".into(),
        }
    }

    fn add_resolved_photo(tracking: &PhotoTrackingCoordinator, location: Option<Coordinate>) -> u64 {
        let id = tracking.photos().borrow_mut().add(PIXEL_JPEG.to_string());
        tracking.settle(id, location);
        id
    }

    fn hosts(n: usize) -> FakeImageHost {
        FakeImageHost::new(
            (0..n)
                .map(|i| FakeImageHost::ok(&format!("https://i.host/{}.jpg", i), None))
                .collect(),
        )
    }

    #[test]
    fn test_upload_progress_weights() {
        assert_eq!(upload_progress(0, 2), 10);
        assert_eq!(upload_progress(1, 2), 40);
        assert_eq!(upload_progress(2, 2), 70);
        assert_eq!(upload_progress(0, 0), 70);
    }

    #[test]
    fn test_validation_reports_first_missing_field() {
        let mut f = fields();
        assert_eq!(f.validate(), Ok(()));
        f.phone = "  ".into();
        assert_eq!(f.validate(), Err(FormError::Validation("phone")));
    }

    #[test]
    fn test_payload_formatting() {
        let target = RelayTarget {
            recipient: "orders@example.com".into(),
            ..RelayTarget::default()
        };
        let request = SubmitRequest {
            fields: fields(),
            signature: Some(SignatureAttachment {
                image: PIXEL_JPEG.into(),
                selfie_url: Some("https://host/selfie".into()),
            }),
            selected_location: None,
        };
        let photos = vec![
            UploadedPhoto {
                url: "https://host/a".into(),
                location: Some(HERE),
            },
            UploadedPhoto {
                url: "https://host/b".into(),
                location: None,
            },
        ];

        let payload = OrderPayload::assemble(&target, &request, &photos, Some("https://host/sig"));

        assert_eq!(payload.to_email, "orders@example.com");
        assert_eq!(payload.location, "No coordinates");
        assert_eq!(
            payload.photos,
            "Photo 1: https://host/a\nPhoto 1 location: https://www.google.com/maps?q=3.59,98.67\n\n\
             Photo 2: https://host/b\nPhoto 2 location: Location unavailable"
        );
        assert!(payload.signature.starts_with("Digital signature: https://host/sig\n"));
        assert!(payload.signature.ends_with("Selfie at signing: https://host/selfie"));
        assert!(payload.message.contains("- Name: Budi"));
        assert!(payload.message.contains(&payload.photos));

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["from_name"], "Budi");
        assert_eq!(json["address_detail"], "Blue gate");
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_uploads_and_sends() {
        let f = fixture(ScriptedGeolocation::always(Ok(HERE)), hosts(2), FakeRelay::new());
        add_resolved_photo(&f.tracking, Some(HERE));
        let request = SubmitRequest {
            fields: fields(),
            signature: Some(SignatureAttachment {
                image: PIXEL_JPEG.into(),
                selfie_url: Some("https://host/selfie".into()),
            }),
            selected_location: Some(HERE),
        };

        let outcome = f.orchestrator.submit(&request).await;

        assert_eq!(outcome, SubmitOutcome::Sent);
        assert_eq!(f.host.payloads().len(), 2);
        let sent = f.relay.sent();
        assert_eq!(sent.len(), 1);
        let (service, template, payload) = &sent[0];
        assert_eq!(service, "service_test");
        assert_eq!(template, "template_test");
        assert!(payload.photos.contains("https://i.host/0.jpg"));
        assert!(payload.signature.contains("https://i.host/1.jpg"));
        assert_eq!(payload.location, HERE.maps_link());

        let state = f.orchestrator.state();
        assert_eq!(state.phase, SubmissionPhase::Done);
        assert_eq!(state.progress, 100);
        assert!(!f.orchestrator.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsettled_photos_defer_sending() {
        let f = fixture(ScriptedGeolocation::always(Ok(HERE)), hosts(1), FakeRelay::new());
        let id = f.tracking.photos().borrow_mut().add(PIXEL_JPEG.to_string());
        let request = SubmitRequest {
            fields: fields(),
            ..SubmitRequest::default()
        };

        let first = f.orchestrator.submit(&request).await;

        assert_eq!(first, SubmitOutcome::AwaitingLocations);
        assert!(f.relay.sent().is_empty());
        assert!(f.host.payloads().is_empty());
        let photo = f.tracking.photos().borrow().get(id).cloned().unwrap();
        assert_eq!(photo.tracking_state, TrackingState::Resolved);
        assert_eq!(photo.location, Some(HERE));
        assert_eq!(f.orchestrator.state().phase, SubmissionPhase::Idle);

        assert_eq!(f.orchestrator.submit(&request).await, SubmitOutcome::Sent);
        assert_eq!(f.relay.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_awaiting_locations() {
        let geo = ScriptedGeolocation::always(Err(GeoError::Timeout)).with_delay(Duration::from_secs(2));
        let f = fixture(geo, hosts(1), FakeRelay::new());
        let id = f.tracking.photos().borrow_mut().add(PIXEL_JPEG.to_string());
        let local = LocalSet::new();

        local
            .run_until(async {
                let orchestrator = f.orchestrator.clone();
                let submit = tokio::task::spawn_local(async move {
                    orchestrator
                        .submit(&SubmitRequest {
                            fields: fields(),
                            ..SubmitRequest::default()
                        })
                        .await
                });
                sleep(Duration::from_secs(1)).await;

                let state = f.orchestrator.state();
                assert_eq!(state.phase, SubmissionPhase::AwaitingLocations);
                assert!(state.cancellable);

                assert!(f.orchestrator.cancel());
                assert_eq!(submit.await.unwrap(), SubmitOutcome::Cancelled);

                assert!(!f.orchestrator.state().phase.shows_modal());
                let photo = f.tracking.photos().borrow().get(id).cloned().unwrap();
                assert_eq!(photo.tracking_state, TrackingState::Failed);
                assert_eq!(photo.progress, 100);
                assert!(f.relay.sent().is_empty());
                assert!(!f.orchestrator.is_busy());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_failure_preserves_state() {
        let relay = FakeRelay::failing(RelayError::Rejected {
            status: 400,
            text: "template not found".into(),
        });
        let f = fixture(ScriptedGeolocation::always(Ok(HERE)), hosts(1), relay);
        add_resolved_photo(&f.tracking, None);

        let outcome = f
            .orchestrator
            .submit(&SubmitRequest {
                fields: fields(),
                ..SubmitRequest::default()
            })
            .await;

        assert!(matches!(outcome, SubmitOutcome::Failed(FormError::Integration(_))));
        assert_eq!(f.tracking.photos().borrow().len(), 1);
        let state = f.orchestrator.state();
        assert_eq!(state.phase, SubmissionPhase::Idle);
        assert!(state.message.contains("template not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_rejection_never_calls_relay() {
        let f = fixture(
            ScriptedGeolocation::always(Ok(HERE)),
            FakeImageHost::new(vec![FakeImageHost::status(400)]),
            FakeRelay::new(),
        );
        add_resolved_photo(&f.tracking, Some(HERE));

        let outcome = f
            .orchestrator
            .submit(&SubmitRequest {
                fields: fields(),
                ..SubmitRequest::default()
            })
            .await;

        assert_eq!(
            outcome,
            SubmitOutcome::Failed(FormError::Integration("image host returned HTTP 400".into()))
        );
        assert!(f.relay.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_upload_is_best_effort() {
        let host = hosts(1).with_delay(Duration::from_secs(2));
        let f = fixture(ScriptedGeolocation::always(Ok(HERE)), host, FakeRelay::new());
        add_resolved_photo(&f.tracking, Some(HERE));
        let local = LocalSet::new();

        local
            .run_until(async {
                let orchestrator = f.orchestrator.clone();
                let submit = tokio::task::spawn_local(async move {
                    orchestrator
                        .submit(&SubmitRequest {
                            fields: fields(),
                            ..SubmitRequest::default()
                        })
                        .await
                });
                sleep(Duration::from_millis(500)).await;
                let state = f.orchestrator.state();
                assert_eq!(state.phase, SubmissionPhase::Uploading);
                assert!(!state.cancellable);

                // Second submit while the first is running
                assert_eq!(
                    f.orchestrator.submit(&SubmitRequest::default()).await,
                    SubmitOutcome::Busy
                );

                assert!(f.orchestrator.cancel());
                assert_eq!(submit.await.unwrap(), SubmitOutcome::Cancelled);
                // The upload already in flight still went out
                assert_eq!(f.host.payloads().len(), 1);
                assert!(f.relay.sent().is_empty());
                assert_eq!(f.tracking.photos().borrow().len(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_failure_after_cancel_is_not_reported() {
        let host = FakeImageHost::new(vec![FakeImageHost::status(400)]).with_delay(Duration::from_secs(2));
        let f = fixture(ScriptedGeolocation::always(Ok(HERE)), host, FakeRelay::new());
        add_resolved_photo(&f.tracking, Some(HERE));
        let local = LocalSet::new();

        local
            .run_until(async {
                let orchestrator = f.orchestrator.clone();
                let submit = tokio::task::spawn_local(async move {
                    orchestrator
                        .submit(&SubmitRequest {
                            fields: fields(),
                            ..SubmitRequest::default()
                        })
                        .await
                });
                sleep(Duration::from_millis(500)).await;
                assert!(f.orchestrator.cancel());

                assert_eq!(submit.await.unwrap(), SubmitOutcome::Cancelled);
                let state = f.orchestrator.state();
                assert_eq!(state.phase, SubmissionPhase::Cancelled);
                assert!(state.message.is_empty());
                assert!(f.relay.sent().is_empty());
                assert!(!f.orchestrator.is_busy());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_failure_uploads_nothing() {
        let f = fixture(ScriptedGeolocation::always(Ok(HERE)), hosts(1), FakeRelay::new());
        add_resolved_photo(&f.tracking, Some(HERE));

        let outcome = f.orchestrator.submit(&SubmitRequest::default()).await;

        assert_eq!(outcome, SubmitOutcome::Failed(FormError::Validation("name")));
        assert!(f.host.payloads().is_empty());
    }
}
