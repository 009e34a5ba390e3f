//! Register map of the I/O coprocessor.
//!
//! Registers are addressed by `(page, offset)` and are 16 bits wide. The
//! numbers here mirror the PX4IO-derived layout of the board firmware; they
//! are deliberately collected in one place so a firmware with a different
//! table only requires edits to this module.
//!
//! Flag registers are modelled with `bitflags` so call sites name bits rather
//! than masks.

use bitflags::bitflags;

pub mod packet;

/// Board identity and version registers.
pub const PAGE_CONFIG: u8 = 0;
/// Status flags, alarms and health counters.
pub const PAGE_STATUS: u8 = 1;
/// Raw RC receiver capture, one pulse width per channel.
pub const PAGE_RAW_RC_INPUT: u8 = 4;
/// Raw ADC samples.
pub const PAGE_RAW_ADC_INPUT: u8 = 6;
/// Setup and arming controls.
pub const PAGE_SETUP: u8 = 50;
/// Per-channel RC input calibration records.
pub const PAGE_RC_CONFIG: u8 = 53;
/// Direct PWM duty values, one register per output channel.
pub const PAGE_DIRECT_PWM: u8 = 54;
/// Host liveness heartbeat counter.
pub const PAGE_HEARTBEAT: u8 = 58;

// Config page offsets.
pub const CONFIG_PROTOCOL_VERSION: u8 = 0;
pub const CONFIG_BOARD_TYPE: u8 = 1;

/// Protocol revision this driver speaks.
pub const PROTOCOL_VERSION: u16 = 4;

// Status page offsets.
pub const STATUS_FLAGS: u8 = 2;
pub const STATUS_ALARMS: u8 = 3;

// Setup page offsets.
pub const SETUP_FEATURES: u8 = 0;
pub const SETUP_ARMING: u8 = 1;
pub const SETUP_PWM_RATES: u8 = 2;
pub const SETUP_PWM_DEFAULTRATE: u8 = 3;
pub const SETUP_PWM_ALTRATE: u8 = 4;
/// Firmware CRC, low word then high word.
pub const SETUP_CRC: u8 = 11;
pub const SETUP_FORCE_SAFETY_OFF: u8 = 12;
/// First of four consecutive per-timer-group rate registers.
pub const SETUP_PWM_GROUP_RATE_BASE: u8 = 18;

/// Magic value the firmware requires before it releases the safety.
pub const FORCE_SAFETY_MAGIC: u16 = 22027;

// RC config page: one stride-6 record per channel.
pub const RC_CONFIG_STRIDE: u8 = 6;
pub const RC_CONFIG_MIN: usize = 0;
pub const RC_CONFIG_CENTER: usize = 1;
pub const RC_CONFIG_MAX: usize = 2;
pub const RC_CONFIG_DEADZONE: usize = 3;
pub const RC_CONFIG_ASSIGNMENT: usize = 4;
pub const RC_CONFIG_OPTIONS: usize = 5;

bitflags! {
    /// Status flags register (`PAGE_STATUS` / `STATUS_FLAGS`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u16 {
        const OUTPUTS_ARMED = 1 << 0;
        const RC_OK = 1 << 4;
        const RC_PPM = 1 << 5;
        const RC_DSM = 1 << 6;
        const RC_SBUS = 1 << 7;
        const INIT_OK = 1 << 10;
        const RC_ST24 = 1 << 13;
    }
}

bitflags! {
    /// Alarms register (`PAGE_STATUS` / `STATUS_ALARMS`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusAlarms: u16 {
        const PWM_ERROR = 1 << 5;
    }
}

bitflags! {
    /// Firmware capability bits (`PAGE_SETUP` / `SETUP_FEATURES`).
    ///
    /// Read once at probe and cached; features are never re-probed per tick.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SetupFeatures: u16 {
        /// Firmware exposes per-timer-group frequency registers.
        const ADV_FREQ_CONFIG = 1 << 4;
    }
}

bitflags! {
    /// Arming control bits (`PAGE_SETUP` / `SETUP_ARMING`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ArmingFlags: u16 {
        const IO_ARM_OK = 1 << 0;
        const FMU_ARMED = 1 << 1;
        const ALWAYS_PWM_ENABLE = 1 << 3;
    }
}

bitflags! {
    /// Per-channel RC config options (`PAGE_RC_CONFIG`, options word).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RcConfigOptions: u16 {
        const ENABLED = 1 << 0;
        const REVERSE = 1 << 1;
    }
}
