//! Retry policies shared by every loop in the form.
//!
//! Location attempts, photo tracking restarts, image host transport retries and
//! selfie capture all run through [`run`] with an explicit [`RetryPolicy`], so the
//! number of attempts and the pause between them is always a visible choice.

use crate::runtime::Timer;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `initial`, then `initial * factor`, `initial * factor^2`, ...
    Exponential { initial: Duration, factor: u32 },
}

impl Backoff {
    /// Pause after the `attempt`-th failure (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, factor } => {
                let exponent = attempt.saturating_sub(1).min(16);
                initial.saturating_mul(factor.saturating_pow(exponent))
            }
        }
    }
}

/// Give up after `max_attempts` failed attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn bounded(max_attempts: u32, delay: Duration) -> Self {
        RetryPolicy {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Whether attempt number `attempt` (1-based) may run
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Retry after the policy's delay
    Retry,
    /// Retry after this delay instead (e.g. a server supplied `Retry-After`)
    RetryAfter(Duration),
    /// Stop now and return the error
    GiveUp,
}

/// Terminal failure of a retry loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `op` until it succeeds, the policy runs out, or `on_failure` gives up.
///
/// `op` receives the 1-based attempt number. `on_failure` sees every failed
/// attempt (including the last one) before any pause is taken.
pub async fn run<T, E, F, Fut, H>(
    policy: RetryPolicy,
    timer: &dyn Timer,
    mut op: F,
    mut on_failure: H,
) -> Result<T, Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    H: FnMut(u32, &E) -> Verdict,
{
    let mut attempt = 1;
    loop {
        let error = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let verdict = on_failure(attempt, &error);
        if verdict == Verdict::GiveUp || !policy.allows(attempt + 1) {
            return Err(Exhausted {
                attempts: attempt,
                last_error: error,
            });
        }

        let pause = match verdict {
            Verdict::RetryAfter(pause) => pause,
            _ => policy.delay_after(attempt),
        };
        timer.sleep(pause).await;
        attempt += 1;
    }
}
