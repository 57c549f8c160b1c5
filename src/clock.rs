//! Time sources. All times are seconds as `f64`.
//!
//! The radio stamps outgoing frames with [`Clock::now`] and compares received
//! stamps against it, so every agent of a swarm must share a roughly
//! synchronised clock (wall time in deployment).

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Current time in seconds.
    fn now(&self) -> f64;

    /// Blocks the calling thread for `seconds`. Non-positive values return at once.
    fn sleep(&self, seconds: f64);
}

/// Wall clock: seconds since the Unix epoch.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    fn sleep(&self, seconds: f64) {
        if seconds > 0.0 && seconds.is_finite() {
            thread::sleep(Duration::from_secs_f64(seconds));
        }
    }
}

/// Manually driven clock; `sleep` advances time instead of blocking.
///
/// Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, t: f64) {
        *self.now.lock() = t;
    }

    pub fn advance(&self, dt: f64) {
        *self.now.lock() += dt;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }

    fn sleep(&self, seconds: f64) {
        if seconds > 0.0 {
            self.advance(seconds);
        }
    }
}
