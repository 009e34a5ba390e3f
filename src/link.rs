//! Top-level context object and configuration facade.
//!
//! [`RcioLink`] owns the transport lock, the shared subsystem state and the
//! coordinator control handle. Everything else borrows from it, so a single
//! `static` (or a stack allocation outliving the tasks) is the whole memory
//! story.
//!
//! The facade methods only touch in-memory state under short critical
//! sections. All register traffic goes through the coordinator, with one
//! exception: [`RcioLink::probe`] talks to the board directly, before the
//! coordinator starts.

use embassy_sync::mutex::Mutex;

use crate::coordinator::{Coordinator, CoordinatorControl};
use crate::core::sync::Shared;
use crate::core::time::TimeSource;
use crate::protocol::{
    SetupFeatures, CONFIG_BOARD_TYPE, CONFIG_PROTOCOL_VERSION, PAGE_CONFIG, PAGE_SETUP,
    PROTOCOL_VERSION, SETUP_CRC, SETUP_FEATURES,
};
use crate::registers::{RegisterClient, RegisterError, TransportLock};
use crate::subsystems::adc::AdcState;
use crate::subsystems::pwm::{self, FrequencyLayout, PwmState};
use crate::subsystems::rcin::{RcInputState, RcSource, RCIN_CHANNELS};
use crate::subsystems::safety::SafetyState;
use crate::subsystems::status::StatusState;
use crate::transport::{BusInterface, Transport};

pub use crate::subsystems::status::BoardType;

/// One coherent copy of the board health state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub alive: bool,
    pub init_ok: bool,
    pub pwm_ok: bool,
    pub crc: u32,
    pub board_type: BoardType,
}

/// The driver context. Owns all state; construct one per board.
pub struct RcioLink<B: BusInterface, T: TimeSource> {
    transport: TransportLock<B>,
    control: CoordinatorControl,
    time: T,
    safety: Shared<SafetyState>,
    pwm: Shared<PwmState>,
    adc: Shared<AdcState>,
    rcin: Shared<RcInputState>,
    status: Shared<StatusState>,
}

impl<B: BusInterface, T: TimeSource> RcioLink<B, T> {
    pub fn new(bus: B, time: T) -> Self {
        Self {
            transport: Mutex::new(Transport::new(bus)),
            control: CoordinatorControl::new(),
            time,
            safety: Shared::new(SafetyState::new()),
            pwm: Shared::new(PwmState::new()),
            adc: Shared::new(AdcState::new()),
            rcin: Shared::new(RcInputState::new()),
            status: Shared::new(StatusState::new()),
        }
    }

    /// A register client sharing this link's transport lock.
    pub fn client(&self) -> RegisterClient<'_, B> {
        RegisterClient::new(&self.transport)
    }

    /// Exclusive access to the underlying bus, for platform-level work (or
    /// test instrumentation) while no exchange is in flight. `None` when the
    /// link is busy.
    pub fn with_bus<R>(&self, f: impl FnOnce(&mut B) -> R) -> Option<R> {
        let mut transport = self.transport.try_lock().ok()?;
        Some(f(transport.bus_mut()))
    }

    pub fn control(&self) -> &CoordinatorControl {
        &self.control
    }

    /// Builds the periodic worker for this link. Call once and hand the
    /// result to a task; run it via [`Coordinator::run`] or drive
    /// [`Coordinator::tick`] directly.
    pub fn coordinator(&self) -> Coordinator<'_, B, T> {
        Coordinator::new(
            self.client(),
            self.time.clone(),
            &self.control,
            &self.safety,
            &self.pwm,
            &self.adc,
            &self.rcin,
            &self.status,
        )
    }

    /// Identifies the board and brings the hardware to a known state. Must
    /// run before the coordinator starts; this is the only facade method that
    /// touches the bus.
    ///
    /// Detects the board type, picks the frequency layout from the firmware
    /// feature bits, releases the safety, programs initial rates and the RC
    /// calibration table, and snapshots the firmware CRC.
    pub fn probe(&self) -> Result<BoardType, RegisterError> {
        let client = self.client();

        let version = client.get_byte(PAGE_CONFIG, CONFIG_PROTOCOL_VERSION)?;
        if version != PROTOCOL_VERSION {
            crate::log_warn!(
                "probe: firmware speaks protocol {} (expected {})",
                version,
                PROTOCOL_VERSION
            );
        }

        let board_type = BoardType::from_register(client.get_byte(PAGE_CONFIG, CONFIG_BOARD_TYPE)?);
        let features =
            SetupFeatures::from_bits_truncate(client.get_byte(PAGE_SETUP, SETUP_FEATURES)?);
        let layout = if features.contains(SetupFeatures::ADV_FREQ_CONFIG) {
            crate::log_info!("probe: per-timer frequency registers available");
            FrequencyLayout::PerTimer
        } else {
            crate::log_info!("probe: legacy two-domain frequency firmware");
            FrequencyLayout::TwoDomain
        };

        self.pwm
            .with_mut(|state| state.configure_layout(layout, board_type.pwm_channels()));
        self.adc
            .with_mut(|state| state.channel_count = board_type.adc_channels());

        pwm::hardware_init(&client, &self.pwm)?;

        let mut crc_words = [0u16; 2];
        client.get(PAGE_SETUP, SETUP_CRC, &mut crc_words)?;
        self.status.with_mut(|s| {
            s.board_type = board_type;
            s.crc = (crc_words[1] as u32) << 16 | crc_words[0] as u32;
        });

        crate::log_info!("probe: board identified, firmware crc snapshotted");
        Ok(board_type)
    }

    /// Requests one PWM channel's duty and period in nanoseconds. In-memory
    /// only; the coordinator converges hardware on its next ticks. See the
    /// frequency rules on [`PwmState::configure_channel`].
    pub fn configure_channel(&self, channel: usize, duty_ns: u32, period_ns: u32) {
        let now_us = self.time.now_us();
        self.pwm
            .with_mut(|state| state.configure_channel(channel, duty_ns, period_ns, now_us));
    }

    /// Marks PWM outputs live again after a [`disable`](Self::disable).
    pub fn enable(&self) {
        self.pwm.with_mut(PwmState::enable);
    }

    /// Stops duty output and actively zeroes every channel.
    pub fn disable(&self) {
        self.pwm.with_mut(PwmState::disable);
    }

    /// Excludes a channel from output (its duty is held at zero) or restores
    /// it.
    pub fn ignore_channel(&self, channel: usize, ignored: bool) {
        self.pwm
            .with_mut(|state| state.ignore_channel(channel, ignored));
    }

    /// Turns the liveness heartbeat on or off. Off means the board will fail
    /// safe on its own schedule.
    pub fn set_heartbeat_enabled(&self, enabled: bool) {
        self.safety.with_mut(|s| s.enabled = enabled);
    }

    pub fn read_status(&self) -> StatusSnapshot {
        self.status.with(|s| StatusSnapshot {
            alive: s.alive,
            init_ok: s.init_ok,
            pwm_ok: s.pwm_ok,
            crc: s.crc,
            board_type: s.board_type,
        })
    }

    /// Latest validated RC capture: connection state, decoded protocol and
    /// the channel pulse widths.
    pub fn rc_input(&self) -> (bool, RcSource, [u16; RCIN_CHANNELS]) {
        self.rcin.with(|s| (s.connected, s.source, s.channels))
    }

    pub fn adc_samples(&self, out: &mut [u16]) -> usize {
        self.adc.with(|s| {
            let count = s.channel_count.min(out.len());
            out[..count].copy_from_slice(&s.samples[..count]);
            count
        })
    }
}
