//! Microsecond time sources.
//!
//! Every timeout in the bridge (bus acknowledge, synchronous access, pulse
//! widths, upload idle) is measured against a `TimeSource` handed in at
//! construction, so tests can drive time explicitly.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Monotonic microsecond counter.
pub trait TimeSource {
    fn micros(&self) -> u64;

    /// Whether `timeout_us` has passed since `start_us`.
    fn elapsed_since(&self, start_us: u64, timeout_us: u64) -> bool {
        self.micros().saturating_sub(start_us) >= timeout_us
    }
}

/// Wall-clock time since construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemClock {
    fn micros(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

/// Explicitly driven clock. Clones share the same counter.
///
/// With a non-zero auto step every read advances time by that amount, which
/// lets a polling loop with a timeout terminate without a second thread.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
    auto_step: u64,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_auto_step(step_us: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(0)),
            auto_step: step_us,
        }
    }

    pub fn advance(&self, us: u64) {
        self.now.set(self.now.get().saturating_add(us));
    }

    pub fn set(&self, us: u64) {
        self.now.set(us);
    }
}

impl TimeSource for ManualClock {
    fn micros(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now.saturating_add(self.auto_step));
        now
    }
}
