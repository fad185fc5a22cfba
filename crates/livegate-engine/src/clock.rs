//! Injected monotonic time source.
//!
//! Rate limiting, stability debouncing, and the wall-clock timeouts all
//! read time through this trait so tests can drive them deterministically.

use std::time::Duration;

/// Monotonic clock. `now` is the elapsed time since an arbitrary fixed
/// origin; only differences are meaningful.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Duration;
}

/// Default clock backed by `tokio::time`, so paused-runtime tests advance
/// timestamps and sleeps together.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: tokio::time::Instant,
}

impl MonotonicClock {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}
