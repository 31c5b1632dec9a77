//! Scheduling seams: sleeping and spawning on the single-threaded event loop.
//!
//! In the browser both map onto the JS event loop (`gloo-timers`,
//! `wasm_bindgen_futures::spawn_local`); tests plug in tokio.

use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use std::time::Duration;

#[async_trait(?Send)]
pub trait Timer {
    async fn sleep(&self, duration: Duration);
}

pub trait Spawner {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>);
}

/// `setTimeout`-backed timer
pub struct BrowserTimer;

#[async_trait(?Send)]
impl Timer for BrowserTimer {
    async fn sleep(&self, duration: Duration) {
        gloo_timers::future::sleep(duration).await;
    }
}

pub struct BrowserSpawner;

impl Spawner for BrowserSpawner {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        wasm_bindgen_futures::spawn_local(task);
    }
}
