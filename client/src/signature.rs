//! Signature pad with verification selfie.
//!
//! The first stroke on the pad captures a selfie from the front camera and
//! uploads it; the signature only counts once that selfie is `Captured`.
//! Closing or clearing the pad bumps an epoch so late capture results from a
//! previous session are dropped.

use crate::devices::{CaptureDeviceManager, DeviceRole};
use crate::error::{CaptureError, FormError};
use crate::retry::{self, RetryPolicy, Verdict};
use crate::runtime::Timer;
use crate::uploader::AssetUploader;
use common::SelfieState;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SelfieConfig {
    /// Whole capture-to-upload sequence: the first grab plus three retries
    pub capture_policy: RetryPolicy,
    pub ready_poll: Duration,
    pub ready_polls: u32,
    /// Extra wait after the preview reports ready
    pub settle_delay: Duration,
    /// Wait before restarting the selfie camera after a clear
    pub restart_delay: Duration,
}

impl Default for SelfieConfig {
    fn default() -> Self {
        Self {
            capture_policy: RetryPolicy::bounded(4, Duration::from_secs(2)),
            ready_poll: Duration::from_millis(500),
            ready_polls: 10,
            settle_delay: Duration::from_secs(1),
            restart_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureState {
    pub panel_open: bool,
    pub selfie_state: SelfieState,
    pub selfie_url: Option<String>,
    /// At least one stroke since the pad was opened or cleared
    pub has_ink: bool,
    epoch: u64,
}

pub struct SignatureSelfieFlow {
    state: RefCell<SignatureState>,
    devices: Rc<CaptureDeviceManager>,
    uploader: Rc<AssetUploader>,
    timer: Rc<dyn Timer>,
    config: SelfieConfig,
}

/// A grab that produced no image data
fn is_degenerate(frame: &str) -> bool {
    let frame = frame.trim();
    frame.is_empty() || frame == "data:," || frame.ends_with(',')
}

impl SignatureSelfieFlow {
    pub fn new(
        devices: Rc<CaptureDeviceManager>,
        uploader: Rc<AssetUploader>,
        timer: Rc<dyn Timer>,
        config: SelfieConfig,
    ) -> Self {
        Self {
            state: RefCell::new(SignatureState::default()),
            devices,
            uploader,
            timer,
            config,
        }
    }

    pub fn snapshot(&self) -> SignatureState {
        self.state.borrow().clone()
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().panel_open
    }

    pub fn selfie_state(&self) -> SelfieState {
        self.state.borrow().selfie_state
    }

    pub fn selfie_url(&self) -> Option<String> {
        self.state.borrow().selfie_url.clone()
    }

    /// An open pad without a captured selfie holds back submission
    pub fn blocks_submission(&self) -> bool {
        let state = self.state.borrow();
        state.panel_open && state.selfie_state != SelfieState::Captured
    }

    fn reset(&self, panel_open: bool) -> u64 {
        let mut state = self.state.borrow_mut();
        let epoch = state.epoch + 1;
        *state = SignatureState {
            panel_open,
            epoch,
            ..SignatureState::default()
        };
        epoch
    }

    fn is_current(&self, epoch: u64) -> bool {
        let state = self.state.borrow();
        state.panel_open && state.epoch == epoch
    }

    /// Open the pad. Needs at least one photo; stops the main camera and
    /// starts the selfie camera. The pad stays open even if the camera fails.
    pub async fn open(&self, photo_count: usize) -> Result<(), FormError> {
        if photo_count == 0 {
            return Err(FormError::PhotosRequired);
        }
        if self.is_open() {
            return Ok(());
        }

        self.devices.release(DeviceRole::Main);
        let epoch = self.reset(true);
        log::info!("Signature panel opened");

        self.devices.acquire(DeviceRole::Selfie).await?;
        if !self.is_current(epoch) {
            // Closed while the camera was starting
            self.release_if_closed();
        }
        Ok(())
    }

    pub fn close(&self) {
        self.reset(false);
        self.devices.release(DeviceRole::Selfie);
        log::info!("Signature panel closed");
    }

    fn release_if_closed(&self) {
        if !self.is_open() {
            self.devices.release(DeviceRole::Selfie);
        }
    }

    /// Pointer-down on the pad. Starts a selfie capture unless one exists or
    /// is already running.
    pub async fn begin_stroke(&self) -> Result<(), CaptureError> {
        let needs_capture = {
            let mut state = self.state.borrow_mut();
            if !state.panel_open {
                return Ok(());
            }
            state.has_ink = true;
            matches!(state.selfie_state, SelfieState::NotStarted | SelfieState::Failed)
        };

        if needs_capture {
            self.capture_selfie().await?;
        }
        Ok(())
    }

    /// Capture and upload the selfie, retrying the whole sequence.
    pub async fn capture_selfie(&self) -> Result<String, CaptureError> {
        let epoch = {
            let mut state = self.state.borrow_mut();
            if !state.panel_open {
                return Err(CaptureError::Cancelled);
            }
            state.selfie_state = SelfieState::Capturing;
            state.epoch
        };

        let this = self;
        let result = retry::run(
            self.config.capture_policy,
            self.timer.as_ref(),
            move |_| this.capture_once(epoch),
            |attempt, error| {
                if *error == CaptureError::Cancelled {
                    return Verdict::GiveUp;
                }
                log::warn!("Selfie attempt {} failed: {}", attempt, error);
                Verdict::Retry
            },
        )
        .await;

        if !self.is_current(epoch) {
            log::debug!("Dropping selfie result from a closed signature session");
            self.release_if_closed();
            return Err(CaptureError::Cancelled);
        }

        match result {
            Ok(url) => {
                self.devices.release(DeviceRole::Selfie);
                let mut state = self.state.borrow_mut();
                state.selfie_state = SelfieState::Captured;
                state.selfie_url = Some(url.clone());
                log::info!("Selfie captured: {}", url);
                Ok(url)
            }
            Err(exhausted) => {
                log::error!(
                    "Selfie capture failed after {} attempts: {}",
                    exhausted.attempts,
                    exhausted.last_error
                );
                self.state.borrow_mut().selfie_state = SelfieState::Failed;
                Err(exhausted.last_error)
            }
        }
    }

    async fn capture_once(&self, epoch: u64) -> Result<String, CaptureError> {
        if !self.is_current(epoch) {
            return Err(CaptureError::Cancelled);
        }
        self.devices.acquire(DeviceRole::Selfie).await?;
        self.wait_until_ready().await?;
        self.timer.sleep(self.config.settle_delay).await;

        if !self.is_current(epoch) {
            return Err(CaptureError::Cancelled);
        }
        let frame = self.devices.grab_frame(DeviceRole::Selfie)?;
        if is_degenerate(&frame) {
            return Err(CaptureError::DegenerateFrame);
        }
        Ok(self.uploader.upload(&frame).await?)
    }

    async fn wait_until_ready(&self) -> Result<(), CaptureError> {
        let devices = &self.devices;
        retry::run(
            RetryPolicy::bounded(self.config.ready_polls + 1, self.config.ready_poll),
            self.timer.as_ref(),
            move |_| {
                let ready = devices.is_ready(DeviceRole::Selfie);
                async move {
                    if ready {
                        Ok(())
                    } else {
                        Err(CaptureError::NotReady)
                    }
                }
            },
            |_, _| Verdict::Retry,
        )
        .await
        .map_err(|exhausted| exhausted.last_error)
    }

    /// Wipe the signature: drop the selfie and restart the selfie camera
    /// after a short settle delay.
    pub async fn clear(&self) -> Result<(), CaptureError> {
        if !self.is_open() {
            return Ok(());
        }
        let epoch = self.reset(true);
        self.devices.release(DeviceRole::Selfie);

        self.timer.sleep(self.config.restart_delay).await;
        if !self.is_current(epoch) {
            return Ok(());
        }
        self.devices.acquire(DeviceRole::Selfie).await?;
        self.release_if_closed();
        Ok(())
    }
}
