//! Subsystem updaters driven by the coordinator.
//!
//! Each updater owns a small piece of state and a monotonic deadline. It is a
//! no-op until the deadline elapses, then performs a bounded amount of bus
//! work and reschedules. Updaters never stop the loop: an I/O failure is
//! logged, the deadline is nudged forward, and the updater simply tries again
//! later.

pub mod adc;
pub mod pwm;
pub mod rcin;
pub mod safety;
pub mod status;

use crate::registers::RegisterClient;
use crate::transport::BusInterface;

/// Backoff applied to an updater's deadline after a failed exchange, instead
/// of the full period, so recovery after transient faults is prompt.
pub const RETRY_BACKOFF_US: u64 = 5_000;

/// One subsystem's per-tick entry point.
pub trait Updater<B: BusInterface> {
    /// Runs at most one register exchange if the subsystem's deadline has
    /// elapsed. Returns true iff bus work completed successfully this tick;
    /// the coordinator uses a run of all-false ticks as a link-quiet
    /// diagnostic.
    fn update(&mut self, client: &RegisterClient<'_, B>, now_us: u64) -> bool;
}
