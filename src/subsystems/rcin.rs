//! RC input capture.
//!
//! Reads the receiver state the board decoded: first the status flags to
//! learn whether a receiver is connected and over which protocol, then the
//! raw pulse widths. Samples outside the physically plausible pulse range
//! are discarded rather than propagated, so a glitching receiver cannot
//! inject wild values into the mixer.

use crate::core::sync::Shared;
use crate::core::time::Deadline;
use crate::protocol::{StatusFlags, PAGE_RAW_RC_INPUT, PAGE_STATUS, STATUS_FLAGS};
use crate::registers::RegisterClient;
use crate::subsystems::{Updater, RETRY_BACKOFF_US};
use crate::transport::BusInterface;

/// RC input channels carried by the protocol.
pub const RCIN_CHANNELS: usize = 8;

/// Plausible pulse width range in protocol units; anything outside is noise.
pub const PULSE_MIN: u16 = 800;
pub const PULSE_MAX: u16 = 2500;

const RCIN_PERIOD_US: u64 = 10_000;

/// Receiver protocol the board reports decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RcSource {
    Unknown,
    Ppm,
    Dsm,
    Sbus,
    St24,
}

impl RcSource {
    fn classify(flags: StatusFlags) -> Self {
        if flags.contains(StatusFlags::RC_PPM) {
            RcSource::Ppm
        } else if flags.contains(StatusFlags::RC_DSM) {
            RcSource::Dsm
        } else if flags.contains(StatusFlags::RC_SBUS) {
            RcSource::Sbus
        } else if flags.contains(StatusFlags::RC_ST24) {
            RcSource::St24
        } else {
            RcSource::Unknown
        }
    }
}

/// Latest validated receiver capture, shared with the facade.
pub struct RcInputState {
    pub connected: bool,
    pub source: RcSource,
    pub channels: [u16; RCIN_CHANNELS],
}

impl RcInputState {
    pub fn new() -> Self {
        Self {
            connected: false,
            source: RcSource::Unknown,
            channels: [0; RCIN_CHANNELS],
        }
    }
}

impl Default for RcInputState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RcInputUpdater<'a> {
    rcin: &'a Shared<RcInputState>,
    deadline: Deadline,
}

impl<'a> RcInputUpdater<'a> {
    pub fn new(rcin: &'a Shared<RcInputState>) -> Self {
        Self {
            rcin,
            deadline: Deadline::new(RCIN_PERIOD_US),
        }
    }
}

impl<'a, B: BusInterface> Updater<B> for RcInputUpdater<'a> {
    fn update(&mut self, client: &RegisterClient<'_, B>, now_us: u64) -> bool {
        if !self.deadline.ready(now_us) {
            return false;
        }

        let flags = match client.get_byte(PAGE_STATUS, STATUS_FLAGS) {
            Ok(raw) => StatusFlags::from_bits_truncate(raw),
            Err(_) => {
                self.rcin.with_mut(|s| s.connected = false);
                self.deadline.defer(now_us, RETRY_BACKOFF_US);
                return false;
            }
        };

        if !flags.contains(StatusFlags::RC_OK) {
            // No receiver; don't try to fetch anything. The flags exchange
            // itself succeeded, so this still counts as bus work.
            self.rcin.with_mut(|s| s.connected = false);
            self.deadline.reschedule(now_us);
            return true;
        }

        let mut raw = [0u16; RCIN_CHANNELS];
        match client.get(PAGE_RAW_RC_INPUT, 0, &mut raw) {
            Ok(()) => {
                self.rcin.with_mut(|s| {
                    s.connected = true;
                    s.source = RcSource::classify(flags);
                    for (stored, &sample) in s.channels.iter_mut().zip(raw.iter()) {
                        if (PULSE_MIN..=PULSE_MAX).contains(&sample) {
                            *stored = sample;
                        }
                    }
                });
                self.deadline.reschedule(now_us);
                true
            }
            Err(_) => {
                self.rcin.with_mut(|s| s.connected = false);
                self.deadline.defer(now_us, RETRY_BACKOFF_US);
                false
            }
        }
    }
}
