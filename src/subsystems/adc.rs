//! ADC sampling.
//!
//! A single block read of the raw ADC page per deadline; the board does the
//! actual conversion. Channel count depends on the detected board.

use crate::core::sync::Shared;
use crate::core::time::Deadline;
use crate::protocol::PAGE_RAW_ADC_INPUT;
use crate::registers::RegisterClient;
use crate::subsystems::{Updater, RETRY_BACKOFF_US};
use crate::transport::BusInterface;

/// Most ADC channels any supported board exposes.
pub const ADC_MAX_CHANNELS: usize = 8;

const ADC_PERIOD_US: u64 = 20_000;

/// Latest raw samples, shared with the facade.
pub struct AdcState {
    pub samples: [u16; ADC_MAX_CHANNELS],
    pub channel_count: usize,
}

impl AdcState {
    pub fn new() -> Self {
        Self {
            samples: [0; ADC_MAX_CHANNELS],
            channel_count: ADC_MAX_CHANNELS,
        }
    }
}

impl Default for AdcState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct AdcUpdater<'a> {
    adc: &'a Shared<AdcState>,
    deadline: Deadline,
}

impl<'a> AdcUpdater<'a> {
    pub fn new(adc: &'a Shared<AdcState>) -> Self {
        Self {
            adc,
            deadline: Deadline::new(ADC_PERIOD_US),
        }
    }
}

impl<'a, B: BusInterface> Updater<B> for AdcUpdater<'a> {
    fn update(&mut self, client: &RegisterClient<'_, B>, now_us: u64) -> bool {
        if !self.deadline.ready(now_us) {
            return false;
        }

        let count = self.adc.with(|s| s.channel_count);
        let mut samples = [0u16; ADC_MAX_CHANNELS];
        match client.get(PAGE_RAW_ADC_INPUT, 0, &mut samples[..count]) {
            Ok(()) => {
                self.adc
                    .with_mut(|s| s.samples[..count].copy_from_slice(&samples[..count]));
                self.deadline.reschedule(now_us);
                true
            }
            Err(_) => {
                self.deadline.defer(now_us, RETRY_BACKOFF_US);
                false
            }
        }
    }
}
