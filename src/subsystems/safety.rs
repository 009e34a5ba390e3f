//! Safety heartbeat.
//!
//! While enabled, the host writes an incrementing counter to the heartbeat
//! page so the board can tell a live host from a hung one and fail safe on
//! its own. The counter wraps at 256.

use crate::core::sync::Shared;
use crate::core::time::Deadline;
use crate::protocol::PAGE_HEARTBEAT;
use crate::registers::RegisterClient;
use crate::subsystems::{Updater, RETRY_BACKOFF_US};
use crate::transport::BusInterface;

const HEARTBEAT_PERIOD_US: u64 = 200_000;

/// Heartbeat state, shared with the configuration facade.
pub struct SafetyState {
    pub enabled: bool,
    pub counter: u8,
}

impl SafetyState {
    pub fn new() -> Self {
        // Enabled by default: a host that never says otherwise should still
        // be supervised.
        Self {
            enabled: true,
            counter: 0,
        }
    }
}

impl Default for SafetyState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SafetyUpdater<'a> {
    safety: &'a Shared<SafetyState>,
    deadline: Deadline,
}

impl<'a> SafetyUpdater<'a> {
    pub fn new(safety: &'a Shared<SafetyState>) -> Self {
        Self {
            safety,
            deadline: Deadline::new(HEARTBEAT_PERIOD_US),
        }
    }
}

impl<'a, B: BusInterface> Updater<B> for SafetyUpdater<'a> {
    fn update(&mut self, client: &RegisterClient<'_, B>, now_us: u64) -> bool {
        if !self.deadline.ready(now_us) {
            return false;
        }

        let beat = self.safety.with(|s| s.enabled.then_some(s.counter));
        let Some(counter) = beat else {
            self.deadline.reschedule(now_us);
            return false;
        };

        match client.set(PAGE_HEARTBEAT, 0, &[counter as u16]) {
            Ok(()) => {
                self.safety.with_mut(|s| s.counter = s.counter.wrapping_add(1));
                self.deadline.reschedule(now_us);
                true
            }
            Err(err) => {
                crate::log_warn!("safety: heartbeat not delivered: {}", err.describe());
                self.deadline.defer(now_us, RETRY_BACKOFF_US);
                false
            }
        }
    }
}
