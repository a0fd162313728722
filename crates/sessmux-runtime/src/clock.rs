//! Clock seam for the provider task.
//!
//! The pure machines take `now` as a parameter; the runtime decides where
//! `now` comes from. Production uses the wall clock, tests and the
//! simulate harness pin the clock to the tokio timer so paused virtual
//! time drives the countdown deterministically.

use chrono::{DateTime, TimeDelta, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock derived from the tokio timer: `base + elapsed`. Under a paused
/// runtime, `tokio::time::advance` moves this clock.
#[derive(Debug, Clone)]
pub struct TimerClock {
    base: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl TimerClock {
    /// Anchor the clock at `base`; must be called inside a runtime.
    pub fn starting_at(base: DateTime<Utc>) -> Self {
        Self {
            base,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TimerClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + TimeDelta::from_std(self.started.elapsed()).unwrap_or_default()
    }
}
