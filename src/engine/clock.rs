use std::sync::atomic::{AtomicI64, Ordering};

use crate::model::Ms;

/// Source of "now" for past-reservation checks and record stamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Ms;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Ms {
        crate::time::now_ms()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now: Ms) -> Self {
        Self(AtomicI64::new(now))
    }

    pub fn set(&self, now: Ms) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Ms) {
        self.0.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Ms {
        self.0.load(Ordering::SeqCst)
    }
}
