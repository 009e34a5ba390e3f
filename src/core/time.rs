//! Time abstraction for deadlines, arm timeouts and host testing.
//!
//! All driver timing is expressed in microseconds against a monotonic
//! `TimeSource`. On target the source is the Embassy clock; host tests use
//! `MockTime` with controllable advancement so timeout behaviour is
//! deterministic.

use core::cell::Cell;

/// Platform-agnostic monotonic time source.
///
/// Implementations must be cheap to clone; the driver hands copies to the
/// coordinator and the configuration facade so both sides observe the same
/// clock.
pub trait TimeSource: Clone {
    /// Returns current time in microseconds since system start.
    fn now_us(&self) -> u64;

    /// Returns current time in milliseconds since system start.
    fn now_ms(&self) -> u64 {
        self.now_us() / 1000
    }

    /// Returns elapsed time in microseconds since a reference point.
    ///
    /// Uses saturating subtraction so a reference taken "in the future"
    /// (clock skew between contexts) reads as zero elapsed.
    fn elapsed_since(&self, reference_us: u64) -> u64 {
        self.now_us().saturating_sub(reference_us)
    }
}

/// A rolling deadline used to self-throttle subsystem updaters.
///
/// Updaters are no-ops until their deadline elapses, then perform exactly one
/// register exchange and reschedule. A failed exchange defers the deadline by
/// a short backoff instead of the full period so recovery is prompt without
/// hammering a dead link every tick.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    next_us: u64,
    period_us: u64,
}

impl Deadline {
    /// Creates a deadline that is immediately due and repeats every
    /// `period_us` after being rescheduled.
    pub const fn new(period_us: u64) -> Self {
        Self {
            next_us: 0,
            period_us,
        }
    }

    /// True once the deadline has elapsed.
    pub fn ready(&self, now_us: u64) -> bool {
        now_us >= self.next_us
    }

    /// Pushes the deadline one full period past `now_us`.
    pub fn reschedule(&mut self, now_us: u64) {
        self.next_us = now_us + self.period_us;
    }

    /// Pushes the deadline a short `backoff_us` past `now_us`.
    pub fn defer(&mut self, now_us: u64, backoff_us: u64) {
        self.next_us = now_us + backoff_us;
    }
}

// ============================================================================
// Mock implementation (always available for host testing)
// ============================================================================

/// Mock time source with controllable time advancement.
///
/// `TimeSource` is implemented for `&MockTime`, not the value: the driver
/// clones its time handle internally, and a cloned reference still points at
/// the one cell, so advancing the clock from the test is observed by every
/// holder.
///
/// # Example
///
/// ```
/// use rcio_link::core::time::{MockTime, TimeSource};
///
/// let time = MockTime::new();
/// time.advance(1500);
/// assert_eq!((&time).now_us(), 1500);
/// assert_eq!((&time).now_ms(), 1);
/// ```
#[derive(Default)]
pub struct MockTime {
    current_us: Cell<u64>,
}

impl MockTime {
    /// Creates a new `MockTime` starting at time 0.
    pub fn new() -> Self {
        Self {
            current_us: Cell::new(0),
        }
    }

    /// Creates a new `MockTime` starting at the specified time.
    pub fn with_initial(us: u64) -> Self {
        Self {
            current_us: Cell::new(us),
        }
    }

    /// Sets the current time to an absolute value.
    pub fn set(&self, us: u64) {
        self.current_us.set(us);
    }

    /// Advances the current time by the specified amount.
    pub fn advance(&self, us: u64) {
        self.current_us.set(self.current_us.get() + us);
    }
}

impl TimeSource for &MockTime {
    fn now_us(&self) -> u64 {
        self.current_us.get()
    }
}

// ============================================================================
// Embassy implementation (for target use)
// ============================================================================

/// Time source backed by the Embassy monotonic clock.
#[derive(Clone, Copy, Default)]
pub struct EmbassyTime;

impl TimeSource for EmbassyTime {
    fn now_us(&self) -> u64 {
        embassy_time::Instant::now().as_micros()
    }
}
