//! Exclusive ownership of the video capture devices.
//!
//! The form uses two logical cameras: the main evidence camera and the selfie
//! camera behind the signature pad. At most one of them is live at a time and
//! every stream is stopped on release, replacement, or when the manager drops.

use crate::error::CaptureError;
use async_trait::async_trait;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    /// Back camera used for evidence photos
    Main,
    /// Front camera used for the verification selfie
    Selfie,
}

impl DeviceRole {
    pub fn other(self) -> Self {
        match self {
            DeviceRole::Main => DeviceRole::Selfie,
            DeviceRole::Selfie => DeviceRole::Main,
        }
    }

}

/// Which physical camera a stream is opened on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facing {
    /// Back camera
    Environment,
    /// Front camera
    User,
}

impl Facing {
    pub fn flipped(self) -> Self {
        match self {
            Facing::Environment => Facing::User,
            Facing::User => Facing::Environment,
        }
    }

    /// `facingMode` constraint value
    pub fn constraint(self) -> &'static str {
        match self {
            Facing::Environment => "environment",
            Facing::User => "user",
        }
    }
}

/// A live video stream bound to a preview element
pub trait CaptureStream {
    /// The preview is playing and a frame can be grabbed
    fn is_ready(&self) -> bool;
    /// Current frame as a `data:` URL
    fn grab_frame(&self) -> Result<String, CaptureError>;
    /// Stop every track of the stream
    fn stop(&self);
}

#[async_trait(?Send)]
pub trait MediaCapture {
    /// Request a video-only stream for `role` from the camera facing `facing`.
    /// `mirrored` streams flip their preview and grabbed frames horizontally.
    async fn open(
        &self,
        role: DeviceRole,
        facing: Facing,
        mirrored: bool,
    ) -> Result<Box<dyn CaptureStream>, CaptureError>;
}

/// Stops the wrapped stream when dropped
struct StreamGuard(Box<dyn CaptureStream>);

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.stop();
    }
}

pub struct CaptureDeviceManager {
    media: Rc<dyn MediaCapture>,
    main: RefCell<Option<Box<dyn CaptureStream>>>,
    selfie: RefCell<Option<Box<dyn CaptureStream>>>,
    main_facing: Cell<Facing>,
}

impl CaptureDeviceManager {
    pub fn new(media: Rc<dyn MediaCapture>) -> Self {
        Self {
            media,
            main: RefCell::new(None),
            selfie: RefCell::new(None),
            main_facing: Cell::new(Facing::Environment),
        }
    }

    fn slot(&self, role: DeviceRole) -> &RefCell<Option<Box<dyn CaptureStream>>> {
        match role {
            DeviceRole::Main => &self.main,
            DeviceRole::Selfie => &self.selfie,
        }
    }

    /// The selfie always uses the front camera; the main camera can be flipped
    pub fn facing(&self, role: DeviceRole) -> Facing {
        match role {
            DeviceRole::Main => self.main_facing.get(),
            DeviceRole::Selfie => Facing::User,
        }
    }

    /// The main camera is shown mirrored while it faces the user
    pub fn is_mirrored(&self, role: DeviceRole) -> bool {
        role == DeviceRole::Main && self.facing(role) == Facing::User
    }

    async fn open(&self, role: DeviceRole) -> Result<Box<dyn CaptureStream>, CaptureError> {
        self.media
            .open(role, self.facing(role), self.is_mirrored(role))
            .await
    }

    /// Make `role` the live device, stopping the other role first.
    ///
    /// An already-live stream for `role` is kept as is.
    pub async fn acquire(&self, role: DeviceRole) -> Result<(), CaptureError> {
        self.release(role.other());
        if self.is_live(role) {
            return Ok(());
        }

        let stream = self.open(role).await?;

        // The other role may have been acquired while we were waiting
        self.release(role.other());
        let previous = self.slot(role).borrow_mut().replace(stream);
        if let Some(previous) = previous {
            previous.stop();
        }
        log::debug!("Acquired {:?} camera", role);
        Ok(())
    }

    /// Stop and forget the stream for `role`; returns whether one was live
    pub fn release(&self, role: DeviceRole) -> bool {
        let stream = self.slot(role).borrow_mut().take();
        match stream {
            Some(stream) => {
                stream.stop();
                log::debug!("Released {:?} camera", role);
                true
            }
            None => false,
        }
    }

    pub fn release_all(&self) {
        self.release(DeviceRole::Main);
        self.release(DeviceRole::Selfie);
    }

    pub fn is_live(&self, role: DeviceRole) -> bool {
        self.slot(role).borrow().is_some()
    }

    pub fn is_ready(&self, role: DeviceRole) -> bool {
        self.slot(role)
            .borrow()
            .as_ref()
            .map(|s| s.is_ready())
            .unwrap_or(false)
    }

    pub fn grab_frame(&self, role: DeviceRole) -> Result<String, CaptureError> {
        let slot = self.slot(role).borrow();
        match slot.as_ref() {
            Some(stream) => stream.grab_frame(),
            None => Err(CaptureError::NoDevice(format!("{:?} camera is not open", role))),
        }
    }

    /// Open `role` just long enough to confirm access, then stop it again.
    ///
    /// Does not touch the managed streams.
    pub async fn probe(&self, role: DeviceRole) -> Result<(), CaptureError> {
        let _guard = StreamGuard(self.open(role).await?);
        Ok(())
    }

    /// Switch the main camera between back and front.
    ///
    /// A live main stream is reopened on the other camera. If that camera
    /// cannot be opened the previous facing is restored and reopened.
    pub async fn flip_main(&self) -> Result<Facing, CaptureError> {
        let previous = self.main_facing.get();
        let next = previous.flipped();
        self.main_facing.set(next);
        if !self.release(DeviceRole::Main) {
            log::debug!("Main camera will open facing {:?}", next);
            return Ok(next);
        }

        match self.acquire(DeviceRole::Main).await {
            Ok(()) => {
                log::info!("Main camera switched to {:?}", next);
                Ok(next)
            }
            Err(error) => {
                log::warn!("Could not switch main camera to {:?}: {}", next, error);
                self.main_facing.set(previous);
                if let Err(e) = self.acquire(DeviceRole::Main).await {
                    log::warn!("Could not reopen main camera facing {:?}: {}", previous, e);
                }
                Err(error)
            }
        }
    }
}

impl Drop for CaptureDeviceManager {
    fn drop(&mut self) {
        self.release_all();
    }
}
