//! Time sources for the reactor
//!
//! The reactor and the timer list read the time only through a [`Clock`], so
//! timer modes and connect backoff can be exercised without sleeping:
//!
//! - `SystemClock`: monotonic milliseconds since construction
//! - `ManualClock`: a shared counter the test advances by hand

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Monotonic millisecond time source
pub trait Clock {
    /// Current time in milliseconds
    fn now_ms(&self) -> u64;

    /// Clock name (for logging)
    fn name(&self) -> &'static str;
}

/// Wall clock backed by `Instant`
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn name(&self) -> &'static str {
        "system"
    }
}

/// Hand-driven clock for deterministic tests
///
/// Clones share the same counter, so a test can keep one handle and give the
/// other to the reactor.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(start_ms)),
        }
    }

    /// Jump to an absolute time
    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }

    /// Move forward by `ms`
    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add(ms));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    fn name(&self) -> &'static str {
        "manual"
    }
}
