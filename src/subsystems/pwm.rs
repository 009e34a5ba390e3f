//! PWM output manager: duty values, timer-group frequencies and arming.
//!
//! Hardware imposes two rules this module exists to enforce:
//!
//! 1. All channels sharing a hardware timer are driven at one frequency.
//! 2. Changing that frequency while motors may be spinning can produce a
//!    brief, dangerous output discontinuity.
//!
//! Configuration requests arrive from the motor mixer and only mutate
//! in-memory state; the actual hardware conversation is deferred to the
//! coordinator tick, which converges the board in bounded steps: clear every
//! output, then retime one dirty group per tick, then resume duty writes.
//!
//! A frequency request is authoritative only on a group's control channel
//! (its lowest index). A non-control request is honoured only when every
//! other channel in the group is provably stopped; otherwise the request is
//! refused and the requesting channel's duty is forced to zero, because its
//! actual output frequency would be ambiguous.

use crate::core::logging::RateLimiter;
use crate::core::sync::Shared;
use crate::protocol::{PAGE_DIRECT_PWM, PAGE_RC_CONFIG, PAGE_SETUP};
use crate::protocol::{
    ArmingFlags, RcConfigOptions, FORCE_SAFETY_MAGIC, RC_CONFIG_ASSIGNMENT, RC_CONFIG_CENTER,
    RC_CONFIG_DEADZONE, RC_CONFIG_MAX, RC_CONFIG_MIN, RC_CONFIG_OPTIONS, RC_CONFIG_STRIDE,
    SETUP_ARMING, SETUP_FORCE_SAFETY_OFF, SETUP_PWM_ALTRATE, SETUP_PWM_DEFAULTRATE,
    SETUP_PWM_GROUP_RATE_BASE, SETUP_PWM_RATES,
};
use crate::registers::{RegisterClient, RegisterError};
use crate::subsystems::Updater;
use crate::transport::BusInterface;

/// Most channels any supported board exposes.
pub const PWM_MAX_CHANNELS: usize = 16;
/// Channels per hardware timer on advanced firmware.
pub const CHANNELS_PER_TIMER: usize = 4;
/// Timer groups on advanced firmware.
pub const TIMER_GROUP_COUNT: usize = 4;

const LEGACY_DOMAIN_COUNT: usize = 2;
const LEGACY_CHANNELS_PER_DOMAIN: usize = 8;

/// Every accepted configuration request pushes the arm deadline this far out;
/// silence for longer than this disarms the outputs.
pub const ARM_TIMEOUT_US: u64 = 100_000;

/// Ticks a channel is pinned to zero duty after a disable, so disarming
/// proactively zeroes instead of freezing the last value.
const FORCE_ZERO_TICKS: u8 = 10;

/// Shortest accepted period; requests faster than this are refused outright.
const PERIOD_MIN_NS: u32 = 2_040_816;

const DEFAULT_FREQUENCY_HZ: u16 = 50;

/// Frequency-change advisories are capped to one per this interval.
const FREQ_WARN_INTERVAL_US: u64 = 5_000_000;

/// How the firmware exposes output frequency control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyLayout {
    /// One rate register per hardware timer, four channels each.
    PerTimer,
    /// Legacy firmware: two rate domains of eight channels ("alt" low,
    /// "default" high), the degenerate case of the same algorithm.
    TwoDomain,
}

/// One hardware timer and the channels it drives.
#[derive(Debug, Clone, Copy)]
pub struct TimerGroup {
    pub group_id: u8,
    /// Lowest channel of the group; the only channel whose frequency
    /// requests are unconditionally authoritative.
    pub control_channel: u8,
    pub current_frequency_hz: u16,
    pub pending_frequency_hz: Option<u16>,
}

impl TimerGroup {
    fn new(group_id: u8, control_channel: u8) -> Self {
        Self {
            group_id,
            control_channel,
            current_frequency_hz: DEFAULT_FREQUENCY_HZ,
            pending_frequency_hz: None,
        }
    }

    /// A pending frequency awaits hardware convergence.
    pub fn is_dirty(&self) -> bool {
        self.pending_frequency_hz.is_some()
    }
}

/// Per-channel view for introspection and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelState {
    pub duty_value: u16,
    pub armed: bool,
    pub ignored: bool,
}

/// The single state-changing bus action the updater may take this tick.
#[derive(Debug, Clone, Copy)]
enum BusAction {
    Idle,
    ClearOutputs {
        count: usize,
    },
    SetGroupRate {
        group: usize,
        rate_offset: u8,
        frequency_hz: u16,
    },
    WriteDuty {
        values: [u16; PWM_MAX_CHANNELS],
        count: usize,
    },
}

/// All PWM output state. Shared between the configuration facade and the
/// coordinator's updater; mutated only under the state lock, never during a
/// bus exchange.
pub struct PwmState {
    duty: [u16; PWM_MAX_CHANNELS],
    ignored: [bool; PWM_MAX_CHANNELS],
    force_zero: [u8; PWM_MAX_CHANNELS],
    groups: [TimerGroup; TIMER_GROUP_COUNT],
    group_count: usize,
    channels_per_group: usize,
    layout: FrequencyLayout,
    channel_count: usize,
    /// Set once the all-zero clear preceding a retime has reached hardware.
    clearing_outputs: bool,
    arm_timeout_us: u64,
    output_enabled: bool,
    reject_warning: RateLimiter,
    stopped_advisory: RateLimiter,
}

impl PwmState {
    pub fn new() -> Self {
        let mut state = Self {
            duty: [0; PWM_MAX_CHANNELS],
            ignored: [false; PWM_MAX_CHANNELS],
            force_zero: [0; PWM_MAX_CHANNELS],
            groups: [TimerGroup::new(0, 0); TIMER_GROUP_COUNT],
            group_count: TIMER_GROUP_COUNT,
            channels_per_group: CHANNELS_PER_TIMER,
            layout: FrequencyLayout::PerTimer,
            channel_count: PWM_MAX_CHANNELS,
            clearing_outputs: false,
            arm_timeout_us: 0,
            output_enabled: true,
            reject_warning: RateLimiter::new(FREQ_WARN_INTERVAL_US),
            stopped_advisory: RateLimiter::new(FREQ_WARN_INTERVAL_US),
        };
        state.configure_layout(FrequencyLayout::PerTimer, PWM_MAX_CHANNELS);
        state
    }

    /// Applies the detected firmware capability and board channel count.
    /// Called once at probe; the layout is cached and never re-probed.
    pub fn configure_layout(&mut self, layout: FrequencyLayout, channel_count: usize) {
        self.layout = layout;
        self.channel_count = channel_count.min(PWM_MAX_CHANNELS);
        match layout {
            FrequencyLayout::PerTimer => {
                self.group_count = TIMER_GROUP_COUNT;
                self.channels_per_group = CHANNELS_PER_TIMER;
            }
            FrequencyLayout::TwoDomain => {
                self.group_count = LEGACY_DOMAIN_COUNT;
                self.channels_per_group = LEGACY_CHANNELS_PER_DOMAIN;
            }
        }
        for gid in 0..self.group_count {
            self.groups[gid] =
                TimerGroup::new(gid as u8, (gid * self.channels_per_group) as u8);
        }
    }

    pub fn layout(&self) -> FrequencyLayout {
        self.layout
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn group_of(&self, channel: usize) -> usize {
        channel / self.channels_per_group
    }

    /// True when every channel of `group` other than `requester` has zero
    /// duty, i.e. the group's motors are provably stopped.
    fn co_channels_stopped(&self, group: usize, requester: usize) -> bool {
        let base = group * self.channels_per_group;
        (base..base + self.channels_per_group)
            .filter(|&c| c != requester && c < self.channel_count)
            .all(|c| self.duty[c] == 0)
    }

    /// Applies one `(channel, duty_ns, period_ns)` configuration request.
    ///
    /// Fire and forget: the mixer has no way to react to a refusal inside its
    /// control loop, so a rejected frequency change zeroes the channel and
    /// warns instead of returning an error.
    pub fn configure_channel(
        &mut self,
        channel: usize,
        duty_ns: u32,
        period_ns: u32,
        now_us: u64,
    ) {
        if channel >= self.channel_count {
            crate::log_warn!("pwm: configure on missing channel {}", channel);
            return;
        }
        if period_ns < PERIOD_MIN_NS {
            crate::log_warn!("pwm: period below hardware minimum on channel {}", channel);
            return;
        }

        // Any configuration traffic keeps the outputs armed.
        self.arm_timeout_us = now_us + ARM_TIMEOUT_US;

        if self.ignored[channel] || self.force_zero[channel] > 0 {
            self.duty[channel] = 0;
            return;
        }

        let duty = (duty_ns / 1000) as u16;
        let new_frequency_hz = (1_000_000_000 / period_ns) as u16;
        let gid = self.group_of(channel);
        let group = self.groups[gid];

        if new_frequency_hz == group.current_frequency_hz {
            // No frequency change; the duty is consistent with the group's
            // running rate.
            self.duty[channel] = duty;
            return;
        }

        let is_control = channel as u8 == group.control_channel;
        if is_control || self.co_channels_stopped(gid, channel) {
            if !is_control && self.stopped_advisory.allow(now_us) {
                crate::log_warn!(
                    "pwm: honouring non-control frequency change on channel {} because group {} is stopped",
                    channel,
                    gid
                );
            }
            self.groups[gid].pending_frequency_hz = Some(new_frequency_hz);
            self.duty[channel] = duty;
            crate::log_debug!("pwm: group {} retime requested, {} Hz", gid, new_frequency_hz);
        } else {
            if self.reject_warning.allow(now_us) {
                crate::log_warn!(
                    "pwm: only control-channel frequency changes are honoured while co-channels are active; zeroing channel {}",
                    channel
                );
            }
            // Refuse to drive an output whose actual frequency is ambiguous.
            self.duty[channel] = 0;
        }
    }

    /// Marks outputs live. Duty writes still require fresh configuration
    /// traffic within the arm timeout.
    pub fn enable(&mut self) {
        self.output_enabled = true;
    }

    /// Stops duty writes and pins every channel to zero for a few ticks so
    /// the hardware is left silenced, not at its last value.
    pub fn disable(&mut self) {
        self.output_enabled = false;
        for channel in 0..self.channel_count {
            self.duty[channel] = 0;
            self.force_zero[channel] = FORCE_ZERO_TICKS;
        }
    }

    /// Administratively excludes a channel: its duty is held at zero in every
    /// hardware write until it is unignored.
    pub fn ignore_channel(&mut self, channel: usize, ignored: bool) {
        if let Some(slot) = self.ignored.get_mut(channel) {
            *slot = ignored;
        }
        if ignored {
            if let Some(duty) = self.duty.get_mut(channel) {
                *duty = 0;
            }
        }
    }

    /// Whether outputs are currently armed.
    pub fn armed(&self, now_us: u64) -> bool {
        self.output_enabled && self.arm_timeout_us > 0 && now_us < self.arm_timeout_us
    }

    pub fn channel(&self, channel: usize, now_us: u64) -> ChannelState {
        ChannelState {
            duty_value: self.duty[channel],
            armed: self.armed(now_us),
            ignored: self.ignored[channel],
        }
    }

    /// The frequency a channel is effectively driven at: the committed rate
    /// of its timer group.
    pub fn effective_frequency(&self, channel: usize) -> u16 {
        self.groups[self.group_of(channel)].current_frequency_hz
    }

    pub fn group(&self, gid: usize) -> &TimerGroup {
        &self.groups[gid]
    }

    pub fn any_group_dirty(&self) -> bool {
        self.groups[..self.group_count].iter().any(TimerGroup::is_dirty)
    }

    /// The setup-page offset of a group's rate register under the current
    /// layout.
    fn rate_offset(&self, gid: usize) -> u8 {
        match self.layout {
            FrequencyLayout::PerTimer => SETUP_PWM_GROUP_RATE_BASE + gid as u8,
            // Legacy: low domain is the "alt" rate, high domain the default.
            FrequencyLayout::TwoDomain => {
                if gid == 0 {
                    SETUP_PWM_ALTRATE
                } else {
                    SETUP_PWM_DEFAULTRATE
                }
            }
        }
    }

    /// Duty values as they must reach hardware: ignored channels held at
    /// zero. (A block write cannot skip individual registers.)
    fn output_values(&self) -> [u16; PWM_MAX_CHANNELS] {
        let mut values = self.duty;
        for (value, &ignored) in values.iter_mut().zip(self.ignored.iter()) {
            if ignored {
                *value = 0;
            }
        }
        values
    }

    /// Decides the single bus action for this tick. Runs under the state
    /// lock; the chosen action is executed after the lock is released.
    fn plan(&mut self, now_us: u64) -> BusAction {
        for channel in 0..self.channel_count {
            if self.force_zero[channel] > 0 {
                self.force_zero[channel] -= 1;
                self.duty[channel] = 0;
            }
        }

        if self.any_group_dirty() {
            if !self.clearing_outputs {
                // No channel may be mid-duty when a rate register changes.
                return BusAction::ClearOutputs {
                    count: self.channel_count,
                };
            }
            for gid in 0..self.group_count {
                if let Some(frequency_hz) = self.groups[gid].pending_frequency_hz {
                    return BusAction::SetGroupRate {
                        group: gid,
                        rate_offset: self.rate_offset(gid),
                        frequency_hz,
                    };
                }
            }
        }

        self.clearing_outputs = false;
        if self.armed(now_us) {
            BusAction::WriteDuty {
                values: self.output_values(),
                count: self.channel_count,
            }
        } else {
            // Fail safe on loss of configuration traffic: silence, not
            // last-known-value. The preceding disable already zeroed the
            // board.
            BusAction::Idle
        }
    }

    fn note_outputs_cleared(&mut self) {
        self.clearing_outputs = true;
    }

    /// Commits a successfully written rate; only then does the group's
    /// effective frequency move.
    fn commit_group_rate(&mut self, gid: usize) {
        if let Some(frequency_hz) = self.groups[gid].pending_frequency_hz.take() {
            self.groups[gid].current_frequency_hz = frequency_hz;
        }
    }
}

impl Default for PwmState {
    fn default() -> Self {
        Self::new()
    }
}

/// Coordinator-side updater converging hardware toward [`PwmState`].
///
/// At most one state-changing bus action per tick, to bound the PWM
/// subsystem's share of link bandwidth.
pub struct PwmUpdater<'a> {
    pwm: &'a Shared<PwmState>,
    failure_warning: RateLimiter,
}

impl<'a> PwmUpdater<'a> {
    pub fn new(pwm: &'a Shared<PwmState>) -> Self {
        Self {
            pwm,
            failure_warning: RateLimiter::new(FREQ_WARN_INTERVAL_US),
        }
    }
}

impl<'a, B: BusInterface> Updater<B> for PwmUpdater<'a> {
    fn update(&mut self, client: &RegisterClient<'_, B>, now_us: u64) -> bool {
        let action = self.pwm.with_mut(|state| state.plan(now_us));

        let result = match action {
            BusAction::Idle => return false,
            BusAction::ClearOutputs { count } => {
                let zeros = [0u16; PWM_MAX_CHANNELS];
                client.set(PAGE_DIRECT_PWM, 0, &zeros[..count]).map(|()| {
                    self.pwm.with_mut(PwmState::note_outputs_cleared);
                })
            }
            BusAction::SetGroupRate {
                group,
                rate_offset,
                frequency_hz,
            } => client
                .set_byte(PAGE_SETUP, rate_offset, frequency_hz)
                .map(|()| {
                    self.pwm.with_mut(|state| state.commit_group_rate(group));
                    crate::log_info!("pwm: group {} retimed to {} Hz", group, frequency_hz);
                }),
            BusAction::WriteDuty { values, count } => {
                client.set(PAGE_DIRECT_PWM, 0, &values[..count])
            }
        };

        match result {
            Ok(()) => true,
            Err(err) => {
                // Dirty groups stay dirty and the clear flag stays unset, so
                // the failed step is retried on the next tick.
                if self.failure_warning.allow(now_us) {
                    crate::log_warn!("pwm: bus action failed: {}", err.describe());
                }
                false
            }
        }
    }
}

/// One-time hardware bring-up: releases the safety, sets arming bits, writes
/// the initial rate configuration for the detected layout and loads the
/// default per-channel RC calibration records.
pub fn hardware_init<B: BusInterface>(
    client: &RegisterClient<'_, B>,
    pwm: &Shared<PwmState>,
) -> Result<(), RegisterError> {
    let (layout, channel_count, rates) = pwm.with(|state| {
        let mut rates = [(0u8, DEFAULT_FREQUENCY_HZ); TIMER_GROUP_COUNT];
        for gid in 0..state.group_count {
            rates[gid] = (state.rate_offset(gid), state.groups[gid].current_frequency_hz);
        }
        (state.layout, state.channel_count, rates)
    });

    client.set_byte(PAGE_SETUP, SETUP_FORCE_SAFETY_OFF, FORCE_SAFETY_MAGIC)?;
    client.set_byte(
        PAGE_SETUP,
        SETUP_ARMING,
        (ArmingFlags::IO_ARM_OK | ArmingFlags::FMU_ARMED | ArmingFlags::ALWAYS_PWM_ENABLE).bits(),
    )?;

    match layout {
        FrequencyLayout::PerTimer => {
            for &(offset, frequency_hz) in rates[..TIMER_GROUP_COUNT].iter() {
                client.set_byte(PAGE_SETUP, offset, frequency_hz)?;
            }
        }
        FrequencyLayout::TwoDomain => {
            // Legacy firmware wants the alt-rate channel bitmap first.
            client.set_byte(PAGE_SETUP, SETUP_PWM_RATES, 0x00FF)?;
            for &(offset, frequency_hz) in rates[..LEGACY_DOMAIN_COUNT].iter() {
                client.set_byte(PAGE_SETUP, offset, frequency_hz)?;
            }
        }
    }

    for channel in 0..channel_count {
        let mut record = [0u16; RC_CONFIG_STRIDE as usize];
        record[RC_CONFIG_MIN] = 900;
        record[RC_CONFIG_CENTER] = 1500;
        record[RC_CONFIG_MAX] = 2000;
        record[RC_CONFIG_DEADZONE] = 10;
        record[RC_CONFIG_ASSIGNMENT] = channel as u16;
        record[RC_CONFIG_OPTIONS] = RcConfigOptions::ENABLED.bits();
        client.set(PAGE_RC_CONFIG, channel as u8 * RC_CONFIG_STRIDE, &record)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::TransportLock;
    use crate::sim::SimBoard;
    use crate::transport::Transport;
    use embassy_sync::mutex::Mutex;

    const NOW: u64 = 1_000_000;

    fn configured() -> PwmState {
        let mut state = PwmState::new();
        state.configure_layout(FrequencyLayout::PerTimer, 16);
        state
    }

    fn spin_up_group(state: &mut PwmState, channels: core::ops::Range<usize>, hz: u32) {
        let period = 1_000_000_000 / hz;
        for channel in channels {
            state.configure_channel(channel, 1_500_000, period, NOW);
        }
    }

    #[test]
    fn same_frequency_duty_accepted_unconditionally() {
        let mut state = configured();
        state.configure_channel(2, 1_200_000, 20_000_000, NOW); // 50 Hz, the default
        assert_eq!(state.channel(2, NOW).duty_value, 1200);
        assert!(!state.any_group_dirty());
    }

    #[test]
    fn control_channel_frequency_change_always_accepted() {
        let mut state = configured();
        spin_up_group(&mut state, 1..4, 50);

        // Co-channels are spinning, but channel 0 controls group 0.
        state.configure_channel(0, 1_500_000, 2_500_000, NOW); // 400 Hz
        assert_eq!(state.group(0).pending_frequency_hz, Some(400));
        assert_eq!(state.channel(0, NOW).duty_value, 1500);
    }

    #[test]
    fn non_control_change_rejected_while_co_channels_active() {
        let mut state = configured();
        spin_up_group(&mut state, 0..4, 50);

        state.configure_channel(2, 1_500_000, 5_000_000, NOW); // 200 Hz
        assert_eq!(state.group(0).pending_frequency_hz, None);
        assert_eq!(state.channel(2, NOW).duty_value, 0);
        assert_eq!(state.effective_frequency(2), 50);
    }

    #[test]
    fn non_control_change_accepted_when_group_stopped() {
        let mut state = configured();
        // Group 1 (channels 4..8) has no duty anywhere.
        state.configure_channel(6, 1_500_000, 2_500_000, NOW); // 400 Hz
        assert_eq!(state.group(1).pending_frequency_hz, Some(400));
        assert_eq!(state.channel(6, NOW).duty_value, 1500);
    }

    #[test]
    fn ignored_channel_is_forced_to_zero() {
        let mut state = configured();
        state.ignore_channel(3, true);
        state.configure_channel(3, 1_500_000, 20_000_000, NOW);
        assert_eq!(state.channel(3, NOW).duty_value, 0);
        assert!(state.channel(3, NOW).ignored);
    }

    #[test]
    fn arm_timeout_expires_without_traffic() {
        let mut state = configured();
        state.configure_channel(0, 1_500_000, 20_000_000, NOW);
        assert!(state.armed(NOW + ARM_TIMEOUT_US - 1));
        assert!(!state.armed(NOW + ARM_TIMEOUT_US));
    }

    #[test]
    fn groups_report_consistent_frequency_when_clean() {
        let mut state = configured();
        spin_up_group(&mut state, 0..4, 50);
        state.configure_channel(0, 1_500_000, 2_500_000, NOW); // 400 Hz pending

        // Converge: clear, then retime.
        assert!(matches!(state.plan(NOW), BusAction::ClearOutputs { .. }));
        state.note_outputs_cleared();
        match state.plan(NOW) {
            BusAction::SetGroupRate { group, .. } => state.commit_group_rate(group),
            other => panic!("expected rate write, got {:?}", other),
        }

        assert!(!state.any_group_dirty());
        for channel in 0..4 {
            assert_eq!(state.effective_frequency(channel), 400);
        }
        for channel in 4..8 {
            assert_eq!(state.effective_frequency(channel), 50);
        }
    }

    #[test]
    fn legacy_layout_has_two_domains_of_eight() {
        let mut state = PwmState::new();
        state.configure_layout(FrequencyLayout::TwoDomain, 16);

        spin_up_group(&mut state, 1..8, 50);
        // Channel 4 is a control pin under PerTimer but not under TwoDomain.
        state.configure_channel(4, 1_500_000, 2_500_000, NOW);
        assert_eq!(state.group(0).pending_frequency_hz, None);
        assert_eq!(state.channel(4, NOW).duty_value, 0);

        // Channel 8 controls the high domain.
        state.configure_channel(8, 1_500_000, 2_500_000, NOW);
        assert_eq!(state.group(1).pending_frequency_hz, Some(400));
    }

    #[test]
    fn disable_pins_channels_to_zero_for_a_while() {
        let mut state = configured();
        spin_up_group(&mut state, 0..4, 50);
        state.disable();

        // Configuration during the countdown cannot revive the channel.
        state.configure_channel(0, 1_500_000, 20_000_000, NOW);
        assert_eq!(state.channel(0, NOW).duty_value, 0);
    }

    #[test]
    fn plan_is_idle_when_disarmed_and_clean() {
        let mut state = configured();
        assert!(matches!(state.plan(NOW), BusAction::Idle));
    }

    #[test]
    fn plan_writes_duty_while_armed_and_clean() {
        let mut state = configured();
        spin_up_group(&mut state, 0..4, 50);
        match state.plan(NOW + 1) {
            BusAction::WriteDuty { values, count } => {
                assert_eq!(count, 16);
                assert_eq!(values[0], 1500);
            }
            other => panic!("expected duty write, got {:?}", other),
        }
    }

    #[test]
    fn updater_converges_one_action_per_tick() {
        let mut state = configured();
        spin_up_group(&mut state, 0..4, 50);
        state.configure_channel(0, 1_500_000, 2_500_000, NOW); // 400 Hz

        let pwm = Shared::new(state);
        let lock: TransportLock<SimBoard> = Mutex::new(Transport::new(SimBoard::new()));
        let client = RegisterClient::new(&lock);
        let mut updater = PwmUpdater::new(&pwm);

        // Tick 1: full-channel clear.
        assert!(Updater::<SimBoard>::update(&mut updater, &client, NOW + 1));
        // Tick 2: rate register write.
        assert!(Updater::<SimBoard>::update(&mut updater, &client, NOW + 2));
        // Tick 3: duty block write resumes.
        assert!(Updater::<SimBoard>::update(&mut updater, &client, NOW + 3));

        assert_eq!(pwm.with(|s| s.effective_frequency(0)), 400);
        assert!(!pwm.with(PwmState::any_group_dirty));
    }

    #[test]
    fn failed_rate_write_leaves_group_dirty_and_frequency_unchanged() {
        let mut state = configured();
        spin_up_group(&mut state, 0..4, 50);
        state.configure_channel(0, 1_500_000, 2_500_000, NOW);
        state.note_outputs_cleared();

        let pwm = Shared::new(state);
        let mut board = SimBoard::new();
        board.fail_next_exchanges(3);
        let lock: TransportLock<SimBoard> = Mutex::new(Transport::new(board));
        let client = RegisterClient::new(&lock);
        let mut updater = PwmUpdater::new(&pwm);

        for i in 0..3 {
            assert!(!Updater::<SimBoard>::update(&mut updater, &client, NOW + i));
        }
        assert_eq!(pwm.with(|s| s.effective_frequency(0)), 50);
        assert!(pwm.with(PwmState::any_group_dirty));

        // Link recovers; the retime goes through.
        assert!(Updater::<SimBoard>::update(&mut updater, &client, NOW + 10));
        assert_eq!(pwm.with(|s| s.effective_frequency(0)), 400);
    }

    #[test]
    fn hardware_init_writes_safety_arming_and_rc_config() {
        let pwm = Shared::new(configured());
        let lock: TransportLock<SimBoard> = Mutex::new(Transport::new(SimBoard::new()));
        let client = RegisterClient::new(&lock);

        hardware_init(&client, &pwm).unwrap();

        // The safety release register is write-only; check the wire, not RAM.
        let transport = lock.try_lock().ok().unwrap();
        assert!(transport
            .bus()
            .writes_to_page(PAGE_SETUP)
            .any(|w| w.offset == SETUP_FORCE_SAFETY_OFF && w.first_value == FORCE_SAFETY_MAGIC));
        drop(transport);

        assert_eq!(
            client.get_byte(PAGE_RC_CONFIG, RC_CONFIG_STRIDE).unwrap(),
            900
        );
    }
}
