//! Per-photo location tracking.
//!
//! Every captured photo gets its own task: a simulated progress bar runs next
//! to the real lookup (availability probe, then [`GeoAcquirer::acquire`]), and
//! the bar is dropped the moment the lookup resolves. Unexpected failures
//! restart the whole attempt under the configured restart policy.

use crate::error::GeoError;
use crate::geo::GeoAcquirer;
use crate::retry::{self, RetryPolicy, Verdict};
use crate::runtime::Timer;
use common::{Coordinate, TrackingState};
use futures::future::{self, AbortHandle, Abortable, Either, LocalBoxFuture};
use std::cell::RefCell;
use std::collections::HashMap;
use std::convert::Infallible;
use std::rc::Rc;
use std::time::Duration;

pub type PhotoId = u64;

#[derive(Debug, Clone, PartialEq)]
pub struct Photo {
    pub id: PhotoId,
    /// Compressed JPEG as a `data:` URL
    pub image_data: String,
    pub location: Option<Coordinate>,
    pub tracking_state: TrackingState,
    /// Displayed progress, 0-100
    pub progress: u8,
    pub signal_warning: bool,
}

/// The form's photo list
#[derive(Debug, Default)]
pub struct PhotoBook {
    photos: Vec<Photo>,
    next_id: PhotoId,
    revision: u64,
}

pub type SharedPhotos = Rc<RefCell<PhotoBook>>;

impl PhotoBook {
    pub fn add(&mut self, image_data: String) -> PhotoId {
        let id = self.next_id;
        self.next_id += 1;
        // Pending only until a tracking task is attached
        self.photos.push(Photo {
            id,
            image_data,
            location: None,
            tracking_state: TrackingState::Pending,
            progress: 0,
            signal_warning: false,
        });
        self.revision += 1;
        id
    }

    pub fn remove(&mut self, id: PhotoId) -> bool {
        let before = self.photos.len();
        self.photos.retain(|p| p.id != id);
        let removed = self.photos.len() != before;
        if removed {
            self.revision += 1;
        }
        removed
    }

    /// Apply `f` to the photo, if it still exists
    pub fn update<F>(&mut self, id: PhotoId, f: F) -> bool
    where
        F: FnOnce(&mut Photo),
    {
        match self.photos.iter_mut().find(|p| p.id == id) {
            Some(photo) => {
                f(photo);
                self.revision += 1;
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn get(&self, id: PhotoId) -> Option<&Photo> {
        self.photos.iter().find(|p| p.id == id)
    }

    pub fn photos(&self) -> &[Photo] {
        &self.photos
    }

    pub fn len(&self) -> usize {
        self.photos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.photos.is_empty()
    }

    pub fn clear(&mut self) {
        self.photos.clear();
        self.revision += 1;
    }

    /// Bumped on every change; the view re-renders the list when it moves
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// No photo has a lookup pending or in flight
    pub fn all_settled(&self) -> bool {
        self.photos.iter().all(|p| p.tracking_state.is_settled())
    }

    /// Every photo has finished its displayed analysis
    pub fn all_complete(&self) -> bool {
        self.all_settled() && self.photos.iter().all(|p| p.progress >= 100)
    }

    pub fn unsettled_ids(&self) -> Vec<PhotoId> {
        self.photos
            .iter()
            .filter(|p| !p.tracking_state.is_settled())
            .map(|p| p.id)
            .collect()
    }

    pub fn unlocated_ids(&self) -> Vec<PhotoId> {
        self.photos
            .iter()
            .filter(|p| p.location.is_none())
            .map(|p| p.id)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct TrackingConfig {
    pub tick: Duration,
    pub step: u8,
    /// Simulated progress never passes this value
    pub ceiling: u8,
    /// Attempts after which the weak-signal warning is shown
    pub weak_signal_after: u32,
    /// Restarts of the whole attempt after an unexpected failure
    pub restart_policy: RetryPolicy,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(250),
            step: 5,
            ceiling: 95,
            weak_signal_after: 3,
            restart_policy: RetryPolicy::bounded(20, Duration::from_secs(3)),
        }
    }
}

pub struct PhotoTrackingCoordinator {
    photos: SharedPhotos,
    geo: Rc<GeoAcquirer>,
    timer: Rc<dyn Timer>,
    config: TrackingConfig,
    tasks: RefCell<HashMap<PhotoId, AbortHandle>>,
}

impl PhotoTrackingCoordinator {
    pub fn new(
        photos: SharedPhotos,
        geo: Rc<GeoAcquirer>,
        timer: Rc<dyn Timer>,
        config: TrackingConfig,
    ) -> Self {
        Self {
            photos,
            geo,
            timer,
            config,
            tasks: RefCell::new(HashMap::new()),
        }
    }

    pub fn photos(&self) -> &SharedPhotos {
        &self.photos
    }

    /// Add a freshly captured photo; the returned task tracks its location.
    pub fn capture(self: &Rc<Self>, image_data: String) -> (PhotoId, LocalBoxFuture<'static, ()>) {
        let id = self.photos.borrow_mut().add(image_data);
        log::info!("Captured photo {}", id);
        (id, self.track(id))
    }

    /// Tracking task for `id`, replacing any task already running for it.
    ///
    /// The photo is `Tracking` from this call on, before the task first runs.
    /// The task stops when the lookup settles or when the photo is removed,
    /// settled from outside, or the coordinator is cleared.
    pub fn track(self: &Rc<Self>, id: PhotoId) -> LocalBoxFuture<'static, ()> {
        let (handle, registration) = AbortHandle::new_pair();
        if let Some(previous) = self.tasks.borrow_mut().insert(id, handle) {
            previous.abort();
        }
        self.mark_tracking(id);

        let this = Rc::clone(self);
        let task = Abortable::new(async move { this.run(id).await }, registration);
        Box::pin(async move {
            if task.await.is_err() {
                log::debug!("Tracking for photo {} aborted", id);
            }
        })
    }

    /// Restart tracking for every photo that still has no location
    pub fn retry_unlocated(self: &Rc<Self>) -> Vec<LocalBoxFuture<'static, ()>> {
        let ids = self.photos.borrow().unlocated_ids();
        ids.into_iter().map(|id| self.track(id)).collect()
    }

    async fn run(&self, id: PhotoId) {
        let this = self;
        let result = retry::run(
            self.config.restart_policy,
            self.timer.as_ref(),
            move |restart| {
                this.begin(id, restart);
                this.attempt(id)
            },
            |restart, error| {
                log::warn!("Location tracking for photo {} failed ({}), restart {}", id, error, restart);
                self.photos.borrow_mut().update(id, |p| p.progress = 0);
                Verdict::Retry
            },
        )
        .await;

        match result {
            Ok(location) => self.finish(id, location),
            Err(exhausted) => {
                log::error!(
                    "Giving up on location for photo {} after {} restarts",
                    id,
                    exhausted.attempts
                );
                self.geo.health().borrow_mut().mark_exhausted();
                self.finish(id, None);
            }
        }
    }

    fn begin(&self, id: PhotoId, restart: u32) {
        log::debug!("Tracking photo {} (run {})", id, restart);
        self.mark_tracking(id);
    }

    fn mark_tracking(&self, id: PhotoId) {
        self.photos.borrow_mut().update(id, |p| {
            p.tracking_state = TrackingState::Tracking;
            p.progress = 0;
        });
    }

    /// One tracking run: the real lookup raced against the progress simulation
    async fn attempt(&self, id: PhotoId) -> Result<Option<Coordinate>, GeoError> {
        let lookup = Box::pin(self.lookup(id));
        let ticker = Box::pin(self.simulate_progress(id));

        match future::select(lookup, ticker).await {
            // Dropping the ticker here stops the simulated progress
            Either::Left((result, _ticker)) => result,
            Either::Right((never, _)) => match never {},
        }
    }

    async fn lookup(&self, id: PhotoId) -> Result<Option<Coordinate>, GeoError> {
        if !self.geo.check_availability().await {
            return Err(GeoError::PositionUnavailable);
        }

        let weak_after = self.config.weak_signal_after;
        let photos = Rc::clone(&self.photos);
        let location = self
            .geo
            .acquire(self.geo.default_attempts(), move |attempt| {
                if attempt > weak_after {
                    photos.borrow_mut().update(id, |p| p.signal_warning = true);
                }
            })
            .await;
        Ok(location)
    }

    async fn simulate_progress(&self, id: PhotoId) -> Infallible {
        let mut progress = 0u8;
        loop {
            self.timer.sleep(self.config.tick).await;
            if progress < self.config.ceiling {
                progress = progress.saturating_add(self.config.step).min(self.config.ceiling);
                self.photos.borrow_mut().update(id, |p| p.progress = progress);
            }
        }
    }

    fn finish(&self, id: PhotoId, location: Option<Coordinate>) {
        self.tasks.borrow_mut().remove(&id);
        self.photos.borrow_mut().update(id, |p| {
            if p.location.is_none() {
                p.location = location;
            }
            p.tracking_state = if p.location.is_some() {
                TrackingState::Resolved
            } else {
                TrackingState::Failed
            };
            p.progress = 100;
            p.signal_warning = false;
        });
    }

    fn abort(&self, id: PhotoId) {
        if let Some(handle) = self.tasks.borrow_mut().remove(&id) {
            handle.abort();
        }
    }

    /// Record an outcome obtained elsewhere, stopping the photo's own task
    pub fn settle(&self, id: PhotoId, location: Option<Coordinate>) {
        self.abort(id);
        self.finish(id, location);
    }

    /// Give up on every photo still waiting for a location
    pub fn cancel_unsettled(&self) -> Vec<PhotoId> {
        let ids = self.photos.borrow().unsettled_ids();
        for id in &ids {
            self.settle(*id, None);
        }
        ids
    }

    pub fn remove(&self, id: PhotoId) -> bool {
        self.abort(id);
        let removed = self.photos.borrow_mut().remove(id);
        if removed {
            log::info!("Removed photo {}", id);
        }
        removed
    }

    pub fn clear(&self) {
        for (_, handle) in self.tasks.borrow_mut().drain() {
            handle.abort();
        }
        self.photos.borrow_mut().clear();
    }

    #[cfg(test)]
    pub(crate) fn active_tasks(&self) -> usize {
        self.tasks.borrow().len()
    }
}

impl Drop for PhotoTrackingCoordinator {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.get_mut().drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{GeoConfig, SharedGpsHealth};
    use crate::testing::{ScriptedGeolocation, TokioTimer};
    use tokio::task::LocalSet;
    use tokio::time::{advance, sleep};

    const HERE: Coordinate = Coordinate { lat: 3.59, lng: 98.67 };

    fn coordinator(geo: Rc<ScriptedGeolocation>, config: TrackingConfig) -> (Rc<PhotoTrackingCoordinator>, SharedGpsHealth) {
        let health = SharedGpsHealth::default();
        let timer: Rc<dyn Timer> = Rc::new(TokioTimer);
        let acquirer = Rc::new(GeoAcquirer::new(geo, timer.clone(), health.clone(), GeoConfig::default()));
        let coordinator = Rc::new(PhotoTrackingCoordinator::new(
            SharedPhotos::default(),
            acquirer,
            timer,
            config,
        ));
        (coordinator, health)
    }

    fn photo(c: &PhotoTrackingCoordinator, id: PhotoId) -> Photo {
        c.photos().borrow().get(id).cloned().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_gps_available_resolves_photo() {
        let geo = Rc::new(ScriptedGeolocation::always(Ok(HERE)));
        let (c, _) = coordinator(geo, TrackingConfig::default());

        let (id, task) = c.capture("data:image/jpeg;base64,AAAA".into());
        // Tracking before the task is ever polled
        let fresh = photo(&c, id);
        assert_eq!(fresh.tracking_state, TrackingState::Tracking);
        assert_eq!(fresh.progress, 0);
        task.await;

        let p = photo(&c, id);
        assert_eq!(p.tracking_state, TrackingState::Resolved);
        assert_eq!(p.location, Some(HERE));
        assert_eq!(p.progress, 100);
        assert_eq!(c.active_tasks(), 0);
        assert!(c.photos().borrow().all_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_simulation_stays_below_100_while_tracking() {
        let geo = Rc::new(ScriptedGeolocation::always(Ok(HERE)).with_delay(Duration::from_secs(10)));
        let (c, _) = coordinator(geo, TrackingConfig::default());
        let local = LocalSet::new();

        local
            .run_until(async {
                let (id, task) = c.capture("AAAA".into());
                tokio::task::spawn_local(task);

                sleep(Duration::from_millis(1100)).await;
                let p = photo(&c, id);
                assert_eq!(p.tracking_state, TrackingState::Tracking);
                assert_eq!(p.progress, 20);

                sleep(Duration::from_secs(8)).await;
                let p = photo(&c, id);
                assert_eq!(p.tracking_state, TrackingState::Tracking);
                assert_eq!(p.progress, 95);

                // probe (10 s) + high accuracy fix (10 s)
                sleep(Duration::from_secs(12)).await;
                let p = photo(&c, id);
                assert_eq!(p.tracking_state, TrackingState::Resolved);
                assert_eq!(p.progress, 100);

                // The ticker is gone: nothing moves any more
                let revision = c.photos().borrow().revision();
                sleep(Duration::from_secs(5)).await;
                assert_eq!(c.photos().borrow().revision(), revision);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_lookup_fails_photo_and_flags_gps() {
        // Probe succeeds, every real fix fails
        let geo = Rc::new(ScriptedGeolocation::new(vec![Ok(HERE)]));
        let (c, health) = coordinator(geo.clone(), TrackingConfig::default());
        let local = LocalSet::new();

        local
            .run_until(async {
                let (id, task) = c.capture("AAAA".into());
                let handle = tokio::task::spawn_local(task);

                // Warning appears once attempt 4 has failed (3 s pauses, 3 pauses in)
                sleep(Duration::from_millis(9500)).await;
                assert!(photo(&c, id).signal_warning);

                handle.await.unwrap();
                let p = photo(&c, id);
                assert_eq!(p.tracking_state, TrackingState::Failed);
                assert_eq!(p.location, None);
                assert_eq!(p.progress, 100);
                assert!(!p.signal_warning);
                assert!(health.borrow().error_flag);
                // 1 probe + 5 high/low pairs
                assert_eq!(geo.requests().len(), 11);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_restarts_after_pause() {
        let geo = Rc::new(ScriptedGeolocation::new(vec![
            Err(GeoError::PositionUnavailable),
            Ok(HERE),
            Ok(HERE),
        ]));
        let (c, _) = coordinator(geo, TrackingConfig::default());
        let started = tokio::time::Instant::now();

        let (id, task) = c.capture("AAAA".into());
        task.await;

        assert_eq!(photo(&c, id).tracking_state, TrackingState::Resolved);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_ceiling_is_terminal() {
        let geo = Rc::new(ScriptedGeolocation::always(Err(GeoError::PositionUnavailable)));
        let config = TrackingConfig {
            restart_policy: RetryPolicy::bounded(2, Duration::from_secs(3)),
            ..TrackingConfig::default()
        };
        let (c, health) = coordinator(geo.clone(), config);

        let (id, task) = c.capture("AAAA".into());
        task.await;

        let p = photo(&c, id);
        assert_eq!(p.tracking_state, TrackingState::Failed);
        assert_eq!(p.progress, 100);
        assert!(health.borrow().error_flag);
        // Only the two probes ran
        assert_eq!(geo.requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_aborts_tracking() {
        let geo = Rc::new(ScriptedGeolocation::always(Ok(HERE)).with_delay(Duration::from_secs(10)));
        let (c, _) = coordinator(geo, TrackingConfig::default());
        let local = LocalSet::new();

        local
            .run_until(async {
                let (id, task) = c.capture("AAAA".into());
                let handle = tokio::task::spawn_local(task);
                sleep(Duration::from_secs(1)).await;

                assert!(c.remove(id));
                handle.await.unwrap();
                assert_eq!(c.active_tasks(), 0);
                assert!(c.photos().borrow().is_empty());

                let revision = c.photos().borrow().revision();
                advance(Duration::from_secs(30)).await;
                assert_eq!(c.photos().borrow().revision(), revision);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_and_cancel_unsettled() {
        let geo = Rc::new(ScriptedGeolocation::always(Ok(HERE)).with_delay(Duration::from_secs(10)));
        let (c, _) = coordinator(geo, TrackingConfig::default());
        let local = LocalSet::new();

        local
            .run_until(async {
                let (first, t1) = c.capture("AAAA".into());
                let (second, t2) = c.capture("BBBB".into());
                tokio::task::spawn_local(t1);
                tokio::task::spawn_local(t2);
                sleep(Duration::from_secs(1)).await;

                c.settle(first, Some(HERE));
                assert_eq!(photo(&c, first).tracking_state, TrackingState::Resolved);

                assert_eq!(c.cancel_unsettled(), vec![second]);
                let p = photo(&c, second);
                assert_eq!(p.tracking_state, TrackingState::Failed);
                assert_eq!(p.progress, 100);
                assert_eq!(c.active_tasks(), 0);
                assert!(c.photos().borrow().all_settled());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_marks_failed_photo_tracking_immediately() {
        let geo = Rc::new(ScriptedGeolocation::always(Ok(HERE)));
        let (c, _) = coordinator(geo, TrackingConfig::default());
        let id = c.photos().borrow_mut().add("AAAA".into());
        c.settle(id, None);
        assert_eq!(photo(&c, id).progress, 100);

        let tasks = c.retry_unlocated();
        assert_eq!(tasks.len(), 1);
        let p = photo(&c, id);
        assert_eq!(p.tracking_state, TrackingState::Tracking);
        assert!(p.progress < 100);

        futures::future::join_all(tasks).await;
        let p = photo(&c, id);
        assert_eq!(p.tracking_state, TrackingState::Resolved);
        assert_eq!(p.progress, 100);
    }

    #[test]
    fn test_photo_book_ids_are_stable() {
        let mut book = PhotoBook::default();
        let a = book.add("A".into());
        let b = book.add("B".into());
        assert!(book.remove(a));
        let c = book.add("C".into());
        assert_ne!(c, b);
        assert_eq!(book.photos().iter().map(|p| p.id).collect::<Vec<_>>(), vec![b, c]);
        assert!(!book.remove(a));
        assert_eq!(book.unlocated_ids(), vec![b, c]);
    }
}
