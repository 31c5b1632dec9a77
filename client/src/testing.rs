//! In-memory collaborators for the unit tests.

use crate::boundary::ReportSink;
use crate::devices::{CaptureStream, DeviceRole, Facing, MediaCapture};
use crate::error::{CaptureError, GeoError, RelayError, UploadError};
use crate::geo::{GeolocationProvider, PositionOptions};
use crate::runtime::{Spawner, Timer};
use crate::submission::{EmailRelay, OrderPayload};
use crate::uploader::{HostResponse, ImageHost};
use async_trait::async_trait;
use common::{ClientErrorReport, Coordinate};
use futures::future::LocalBoxFuture;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

/// Smallest payload that passes the base64 check
pub const PIXEL_JPEG: &str = "data:image/jpeg;base64,/9j/4AAQSkZJRg==";

pub struct TokioTimer;

#[async_trait(?Send)]
impl Timer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Needs to run inside a `LocalSet`
pub struct TokioSpawner;

impl Spawner for TokioSpawner {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        tokio::task::spawn_local(task);
    }
}

/// Answers position requests from a script, then from a fallback
pub struct ScriptedGeolocation {
    script: RefCell<VecDeque<Result<Coordinate, GeoError>>>,
    fallback: Result<Coordinate, GeoError>,
    delay: Duration,
    requests: RefCell<Vec<PositionOptions>>,
}

impl ScriptedGeolocation {
    pub fn new(script: Vec<Result<Coordinate, GeoError>>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            fallback: Err(GeoError::PositionUnavailable),
            delay: Duration::ZERO,
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn always(result: Result<Coordinate, GeoError>) -> Self {
        Self {
            fallback: result,
            ..Self::new(Vec::new())
        }
    }

    /// Every request takes `delay` to answer
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<PositionOptions> {
        self.requests.borrow().clone()
    }
}

#[async_trait(?Send)]
impl GeolocationProvider for ScriptedGeolocation {
    async fn current_position(&self, options: PositionOptions) -> Result<Coordinate, GeoError> {
        self.requests.borrow_mut().push(options);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.borrow_mut().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

pub struct FakeImageHost {
    script: RefCell<VecDeque<Result<HostResponse, UploadError>>>,
    payloads: RefCell<Vec<String>>,
    delay: Duration,
}

impl FakeImageHost {
    pub fn new(responses: Vec<HostResponse>) -> Self {
        Self {
            script: RefCell::new(responses.into_iter().map(Ok).collect()),
            payloads: RefCell::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    pub fn failing_network(times: usize) -> Self {
        let host = Self::new(Vec::new());
        host.script
            .borrow_mut()
            .extend((0..times).map(|_| Err(UploadError::Network("connection reset".into()))));
        host
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn ok(url: &str, display_url: Option<&str>) -> HostResponse {
        let mut data = serde_json::json!({ "url": url });
        if let Some(display_url) = display_url {
            data["display_url"] = serde_json::Value::from(display_url);
        }
        HostResponse {
            status: 200,
            retry_after: None,
            body: serde_json::json!({ "data": data, "success": true }).to_string(),
        }
    }

    pub fn status(status: u16) -> HostResponse {
        HostResponse {
            status,
            retry_after: None,
            body: r#"{"error":{"message":"scripted failure"}}"#.to_string(),
        }
    }

    /// Bare base64 bodies received so far
    pub fn payloads(&self) -> Vec<String> {
        self.payloads.borrow().clone()
    }
}

#[async_trait(?Send)]
impl ImageHost for FakeImageHost {
    async fn post_image(&self, base64_image: &str) -> Result<HostResponse, UploadError> {
        self.payloads.borrow_mut().push(base64_image.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.borrow_mut().pop_front();
        next.unwrap_or_else(|| Err(UploadError::Network("no scripted response".into())))
    }
}

#[derive(Default)]
struct MediaShared {
    denied: RefCell<HashSet<DeviceRole>>,
    missing: RefCell<HashSet<Facing>>,
    opens: RefCell<Vec<(DeviceRole, Facing, bool)>>,
    not_ready: RefCell<HashSet<DeviceRole>>,
    frames: RefCell<HashMap<DeviceRole, String>>,
    opened: RefCell<HashMap<DeviceRole, usize>>,
    stopped: RefCell<HashMap<DeviceRole, usize>>,
    live: Cell<usize>,
    frames_grabbed: Cell<usize>,
}

/// Camera double: streams are always ready and return [`PIXEL_JPEG`]
/// unless told otherwise.
pub struct FakeMedia {
    shared: Rc<MediaShared>,
}

impl FakeMedia {
    pub fn new() -> Self {
        Self {
            shared: Rc::new(MediaShared::default()),
        }
    }

    pub fn deny(&self, role: DeviceRole) {
        self.shared.denied.borrow_mut().insert(role);
    }

    pub fn allow(&self, role: DeviceRole) {
        self.shared.denied.borrow_mut().remove(&role);
    }

    /// The device has no camera facing this way
    pub fn remove_camera(&self, facing: Facing) {
        self.shared.missing.borrow_mut().insert(facing);
    }

    pub fn set_ready(&self, role: DeviceRole, ready: bool) {
        let mut not_ready = self.shared.not_ready.borrow_mut();
        if ready {
            not_ready.remove(&role);
        } else {
            not_ready.insert(role);
        }
    }

    pub fn set_frame(&self, role: DeviceRole, frame: &str) {
        self.shared.frames.borrow_mut().insert(role, frame.to_string());
    }

    pub fn live_count(&self) -> usize {
        self.shared.live.get()
    }

    pub fn opened(&self, role: DeviceRole) -> usize {
        self.shared.opened.borrow().get(&role).copied().unwrap_or(0)
    }

    pub fn stopped(&self, role: DeviceRole) -> usize {
        self.shared.stopped.borrow().get(&role).copied().unwrap_or(0)
    }

    /// Successful opens as (role, facing, mirrored)
    pub fn opens(&self) -> Vec<(DeviceRole, Facing, bool)> {
        self.shared.opens.borrow().clone()
    }

    pub fn frames_grabbed(&self) -> usize {
        self.shared.frames_grabbed.get()
    }
}

#[async_trait(?Send)]
impl MediaCapture for FakeMedia {
    async fn open(
        &self,
        role: DeviceRole,
        facing: Facing,
        mirrored: bool,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        if self.shared.denied.borrow().contains(&role) {
            return Err(CaptureError::PermissionDenied);
        }
        if self.shared.missing.borrow().contains(&facing) {
            return Err(CaptureError::NoDevice(format!("no camera facing {}", facing.constraint())));
        }
        *self.shared.opened.borrow_mut().entry(role).or_default() += 1;
        self.shared.opens.borrow_mut().push((role, facing, mirrored));
        self.shared.live.set(self.shared.live.get() + 1);
        Ok(Box::new(FakeStream {
            role,
            shared: Rc::clone(&self.shared),
            stopped: Cell::new(false),
        }))
    }
}

struct FakeStream {
    role: DeviceRole,
    shared: Rc<MediaShared>,
    stopped: Cell<bool>,
}

impl CaptureStream for FakeStream {
    fn is_ready(&self) -> bool {
        !self.stopped.get() && !self.shared.not_ready.borrow().contains(&self.role)
    }

    fn grab_frame(&self) -> Result<String, CaptureError> {
        self.shared.frames_grabbed.set(self.shared.frames_grabbed.get() + 1);
        Ok(self
            .shared
            .frames
            .borrow()
            .get(&self.role)
            .cloned()
            .unwrap_or_else(|| PIXEL_JPEG.to_string()))
    }

    fn stop(&self) {
        if !self.stopped.replace(true) {
            self.shared.live.set(self.shared.live.get() - 1);
            *self.shared.stopped.borrow_mut().entry(self.role).or_default() += 1;
        }
    }
}

pub struct FakeRelay {
    failure: Option<RelayError>,
    sent: RefCell<Vec<(String, String, OrderPayload)>>,
}

impl FakeRelay {
    pub fn new() -> Self {
        Self {
            failure: None,
            sent: RefCell::new(Vec::new()),
        }
    }

    pub fn failing(error: RelayError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new()
        }
    }

    /// Accepted messages as (service id, template id, payload)
    pub fn sent(&self) -> Vec<(String, String, OrderPayload)> {
        self.sent.borrow().clone()
    }
}

#[async_trait(?Send)]
impl EmailRelay for FakeRelay {
    async fn send(
        &self,
        service_id: &str,
        template_id: &str,
        payload: &OrderPayload,
    ) -> Result<(), RelayError> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        self.sent
            .borrow_mut()
            .push((service_id.to_string(), template_id.to_string(), payload.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    fail: bool,
    delivered: RefCell<Vec<ClientErrorReport>>,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn delivered(&self) -> Vec<ClientErrorReport> {
        self.delivered.borrow().clone()
    }
}

#[async_trait(?Send)]
impl ReportSink for RecordingSink {
    async fn deliver(&self, report: &ClientErrorReport) -> Result<(), String> {
        if self.fail {
            return Err("collector offline".to_string());
        }
        self.delivered.borrow_mut().push(report.clone());
        Ok(())
    }
}
