//! Device location acquisition with tiered accuracy and bounded retries.

use crate::error::GeoError;
use crate::retry::{self, RetryPolicy, Verdict};
use crate::runtime::Timer;
use async_trait::async_trait;
use common::Coordinate;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Options of a single position request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub enable_high_accuracy: bool,
    pub timeout: Duration,
    /// How old a cached position may be
    pub maximum_age: Duration,
}

impl PositionOptions {
    /// First tier: fresh fix, short timeout
    pub const HIGH_ACCURACY: PositionOptions = PositionOptions {
        enable_high_accuracy: true,
        timeout: Duration::from_secs(3),
        maximum_age: Duration::ZERO,
    };

    /// Second tier: coarse fix, cached positions up to 30 s old
    pub const LOW_ACCURACY: PositionOptions = PositionOptions {
        enable_high_accuracy: false,
        timeout: Duration::from_secs(10),
        maximum_age: Duration::from_secs(30),
    };

    /// Availability probe run before committing to the full retry loop
    pub const PROBE: PositionOptions = PositionOptions {
        enable_high_accuracy: false,
        timeout: Duration::from_secs(5),
        maximum_age: Duration::from_secs(60),
    };

    /// Used when explicitly (re-)requesting the location permission
    pub const PERMISSION: PositionOptions = PositionOptions {
        enable_high_accuracy: true,
        timeout: Duration::from_secs(5),
        maximum_age: Duration::ZERO,
    };
}

#[async_trait(?Send)]
pub trait GeolocationProvider {
    async fn current_position(&self, options: PositionOptions) -> Result<Coordinate, GeoError>;
}

/// Session-wide GPS status shown by the warning overlay and the submit button
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpsHealth {
    /// Set once a full retry cycle is exhausted
    pub error_flag: bool,
    /// Attempt number of the cycle currently running
    pub retry_count: u32,
    /// GPS warning overlay visibility; the user can dismiss it
    pub warning_visible: bool,
    /// The provider reported a permission denial since the last reset
    pub permission_denied: bool,
}

impl GpsHealth {
    pub fn reset(&mut self) {
        *self = GpsHealth::default();
    }

    pub(crate) fn mark_exhausted(&mut self) {
        self.error_flag = true;
        self.warning_visible = true;
    }
}

pub type SharedGpsHealth = Rc<RefCell<GpsHealth>>;

#[derive(Debug, Clone)]
pub struct GeoConfig {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub high_accuracy: PositionOptions,
    pub low_accuracy: PositionOptions,
    pub probe: PositionOptions,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_secs(3),
            high_accuracy: PositionOptions::HIGH_ACCURACY,
            low_accuracy: PositionOptions::LOW_ACCURACY,
            probe: PositionOptions::PROBE,
        }
    }
}

pub struct GeoAcquirer {
    provider: Rc<dyn GeolocationProvider>,
    timer: Rc<dyn Timer>,
    health: SharedGpsHealth,
    config: GeoConfig,
}

impl GeoAcquirer {
    pub fn new(
        provider: Rc<dyn GeolocationProvider>,
        timer: Rc<dyn Timer>,
        health: SharedGpsHealth,
        config: GeoConfig,
    ) -> Self {
        Self {
            provider,
            timer,
            health,
            config,
        }
    }

    pub fn health(&self) -> &SharedGpsHealth {
        &self.health
    }

    pub fn default_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Try to get a coordinate, up to `max_attempts` high+low accuracy pairs.
    ///
    /// `on_attempt` is called with the attempt number after each attempt in
    /// which both tiers failed. Success resets the session [`GpsHealth`];
    /// exhaustion sets its error flag and returns `None`. A budget of zero
    /// attempts is exhausted without asking the provider at all.
    pub async fn acquire<F>(&self, max_attempts: u32, mut on_attempt: F) -> Option<Coordinate>
    where
        F: FnMut(u32),
    {
        if max_attempts == 0 {
            log::warn!("GPS lookup requested with no attempts left");
            self.health.borrow_mut().mark_exhausted();
            return None;
        }
        let policy = RetryPolicy::bounded(max_attempts, self.config.retry_delay);
        let this = self;

        let result = retry::run(
            policy,
            self.timer.as_ref(),
            move |attempt| {
                this.health.borrow_mut().retry_count = attempt;
                this.attempt_once()
            },
            |attempt, error| {
                log::debug!("GPS attempt {}/{} failed: {}", attempt, max_attempts, error);
                on_attempt(attempt);
                Verdict::Retry
            },
        )
        .await;

        match result {
            Ok(coordinate) => {
                self.health.borrow_mut().reset();
                Some(coordinate)
            }
            Err(exhausted) => {
                log::warn!(
                    "GPS unavailable after {} attempts: {}",
                    exhausted.attempts,
                    exhausted.last_error
                );
                self.health.borrow_mut().mark_exhausted();
                None
            }
        }
    }

    /// One attempt: high accuracy first, low accuracy as the in-attempt fallback
    async fn attempt_once(&self) -> Result<Coordinate, GeoError> {
        match self.request(self.config.high_accuracy).await {
            Ok(coordinate) => Ok(coordinate),
            Err(error) => {
                log::debug!("High accuracy fix failed ({}), trying low accuracy", error);
                self.request(self.config.low_accuracy).await
            }
        }
    }

    async fn request(&self, options: PositionOptions) -> Result<Coordinate, GeoError> {
        let result = self.provider.current_position(options).await;
        if let Err(GeoError::PermissionDenied) = result {
            self.health.borrow_mut().permission_denied = true;
        }
        result
    }

    /// Single low-accuracy probe, used as a gate before [`acquire`](Self::acquire).
    pub async fn check_availability(&self) -> bool {
        match self.provider.current_position(self.config.probe).await {
            Ok(_) => true,
            Err(error) => {
                log::debug!("GPS availability probe failed: {}", error);
                false
            }
        }
    }

    /// Explicit permission request; only a denial is reported as an error.
    pub async fn request_permission(&self) -> Result<bool, GeoError> {
        match self.provider.current_position(PositionOptions::PERMISSION).await {
            Ok(_) => Ok(true),
            Err(GeoError::PermissionDenied) => {
                self.health.borrow_mut().permission_denied = true;
                Err(GeoError::PermissionDenied)
            }
            Err(_) => Ok(false),
        }
    }
}
