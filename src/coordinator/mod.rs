//! The periodic worker that owns all register traffic.
//!
//! One coordinator drives every subsystem updater in a fixed order each tick:
//! safety, PWM, ADC, RC input, status. Updaters self-throttle on their own
//! deadlines, so the tick itself can run fast (sub-millisecond sleep) without
//! flooding the link.
//!
//! Stopping is cooperative: a stop request is observed at the top of the next
//! iteration, and an in-flight bus exchange is allowed to complete. An
//! updater's failure never stops the loop; only an explicit stop does.

use core::sync::atomic::{AtomicU8, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::Timer;

use crate::core::sync::Shared;
use crate::core::time::TimeSource;
use crate::registers::RegisterClient;
use crate::subsystems::adc::{AdcState, AdcUpdater};
use crate::subsystems::pwm::{PwmState, PwmUpdater};
use crate::subsystems::rcin::{RcInputState, RcInputUpdater};
use crate::subsystems::safety::{SafetyState, SafetyUpdater};
use crate::subsystems::status::{StatusState, StatusUpdater};
use crate::subsystems::Updater;
use crate::transport::BusInterface;

/// Sleep between ticks.
pub const TICK_INTERVAL_US: u64 = 1_000;

/// Ticks without any completed bus work before the link is flagged quiet.
/// Diagnostic only; surfaced through status, never acted on here.
const QUIET_TICK_THRESHOLD: u32 = 500;

const STATE_STOPPED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPING: u8 = 2;

/// Coordinator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    Stopping,
}

/// Start/stop handle, owned by the link context and shareable across tasks.
pub struct CoordinatorControl {
    state: AtomicU8,
    stopped: Signal<CriticalSectionRawMutex, ()>,
}

impl CoordinatorControl {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_STOPPED),
            stopped: Signal::new(),
        }
    }

    pub fn state(&self) -> RunState {
        match self.state.load(Ordering::Acquire) {
            STATE_RUNNING => RunState::Running,
            STATE_STOPPING => RunState::Stopping,
            _ => RunState::Stopped,
        }
    }

    /// Requests a cooperative stop and waits until the loop has exited.
    pub async fn stop(&self) {
        if self.state.load(Ordering::Acquire) == STATE_STOPPED {
            return;
        }
        self.stopped.reset();
        self.state.store(STATE_STOPPING, Ordering::Release);
        self.stopped.wait().await;
    }

    fn enter_running(&self) {
        self.state.store(STATE_RUNNING, Ordering::Release);
    }

    fn stop_requested(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_STOPPING
    }

    fn acknowledge_stopped(&self) {
        self.state.store(STATE_STOPPED, Ordering::Release);
        self.stopped.signal(());
    }
}

impl Default for CoordinatorControl {
    fn default() -> Self {
        Self::new()
    }
}

/// The periodic worker. Owns the updaters; borrows the shared state and the
/// transport lock from the link context.
pub struct Coordinator<'a, B: BusInterface, T: TimeSource> {
    client: RegisterClient<'a, B>,
    time: T,
    control: &'a CoordinatorControl,
    status: &'a Shared<StatusState>,
    safety: SafetyUpdater<'a>,
    pwm: PwmUpdater<'a>,
    adc: AdcUpdater<'a>,
    rcin: RcInputUpdater<'a>,
    status_updater: StatusUpdater<'a>,
    quiet_ticks: u32,
}

impl<'a, B: BusInterface, T: TimeSource> Coordinator<'a, B, T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: RegisterClient<'a, B>,
        time: T,
        control: &'a CoordinatorControl,
        safety: &'a Shared<SafetyState>,
        pwm: &'a Shared<PwmState>,
        adc: &'a Shared<AdcState>,
        rcin: &'a Shared<RcInputState>,
        status: &'a Shared<StatusState>,
    ) -> Self {
        Self {
            client,
            time,
            control,
            status,
            safety: SafetyUpdater::new(safety),
            pwm: PwmUpdater::new(pwm),
            adc: AdcUpdater::new(adc),
            rcin: RcInputUpdater::new(rcin),
            status_updater: StatusUpdater::new(status),
            quiet_ticks: 0,
        }
    }

    /// Runs one tick: every updater, fixed order. Public so host tests can
    /// drive the coordinator deterministically without the async loop.
    pub fn tick(&mut self) {
        let now_us = self.time.now_us();

        let mut worked = self.safety.update(&self.client, now_us);
        worked |= self.pwm.update(&self.client, now_us);
        worked |= self.adc.update(&self.client, now_us);
        worked |= self.rcin.update(&self.client, now_us);
        worked |= self.status_updater.update(&self.client, now_us);

        if worked {
            if self.quiet_ticks >= QUIET_TICK_THRESHOLD {
                self.status.with_mut(|s| s.link_quiet = false);
            }
            self.quiet_ticks = 0;
        } else {
            self.quiet_ticks = self.quiet_ticks.saturating_add(1);
            if self.quiet_ticks == QUIET_TICK_THRESHOLD {
                crate::log_warn!("coordinator: no bus work for {} ticks", QUIET_TICK_THRESHOLD);
                self.status.with_mut(|s| s.link_quiet = true);
            }
        }
    }

    /// The continuous loop. Returns once a stop has been requested and
    /// acknowledged; the control handle transitions back to `Stopped`.
    pub async fn run(&mut self) {
        self.control.enter_running();
        crate::log_info!("coordinator: running");
        loop {
            if self.control.stop_requested() {
                break;
            }
            self.tick();
            Timer::after_micros(TICK_INTERVAL_US).await;
        }
        crate::log_info!("coordinator: stopped");
        self.control.acknowledge_stopped();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::MockTime;
    use crate::protocol::{StatusFlags, PAGE_HEARTBEAT, PAGE_STATUS, STATUS_FLAGS};
    use crate::registers::TransportLock;
    use crate::sim::SimBoard;
    use crate::transport::Transport;
    use embassy_sync::mutex::Mutex;

    struct Harness {
        lock: TransportLock<SimBoard>,
        control: CoordinatorControl,
        safety: Shared<SafetyState>,
        pwm: Shared<PwmState>,
        adc: Shared<AdcState>,
        rcin: Shared<RcInputState>,
        status: Shared<StatusState>,
        time: MockTime,
    }

    impl Harness {
        fn new(board: SimBoard) -> Self {
            Self {
                lock: Mutex::new(Transport::new(board)),
                control: CoordinatorControl::new(),
                safety: Shared::new(SafetyState::new()),
                pwm: Shared::new(PwmState::new()),
                adc: Shared::new(AdcState::new()),
                rcin: Shared::new(RcInputState::new()),
                status: Shared::new(StatusState::new()),
                time: MockTime::with_initial(1),
            }
        }

        fn coordinator(&self) -> Coordinator<'_, SimBoard, &MockTime> {
            Coordinator::new(
                RegisterClient::new(&self.lock),
                &self.time,
                &self.control,
                &self.safety,
                &self.pwm,
                &self.adc,
                &self.rcin,
                &self.status,
            )
        }
    }

    fn healthy_board() -> SimBoard {
        let mut board = SimBoard::new();
        board.set_register(PAGE_STATUS, STATUS_FLAGS, StatusFlags::INIT_OK.bits());
        board
    }

    #[test]
    fn first_tick_runs_every_due_updater() {
        let harness = Harness::new(healthy_board());
        let mut coordinator = harness.coordinator();

        coordinator.tick();

        // Heartbeat went out and status came back alive in one tick.
        let client = RegisterClient::new(&harness.lock);
        assert_eq!(client.get_byte(PAGE_HEARTBEAT, 0).unwrap(), 0);
        assert!(harness.status.with(|s| s.alive));
    }

    #[test]
    fn updaters_throttle_between_deadlines() {
        let harness = Harness::new(healthy_board());
        let mut coordinator = harness.coordinator();

        coordinator.tick();
        let beats_after_first = harness.safety.with(|s| s.counter);

        // A tick 1 ms later finds every deadline still pending.
        harness.time.advance(TICK_INTERVAL_US);
        coordinator.tick();
        assert_eq!(harness.safety.with(|s| s.counter), beats_after_first);
    }

    #[test]
    fn quiet_link_flag_raised_and_cleared() {
        let harness = Harness::new(healthy_board());
        let mut coordinator = harness.coordinator();
        coordinator.tick();

        // Starve the loop of due deadlines: tick without advancing time.
        for _ in 0..QUIET_TICK_THRESHOLD {
            coordinator.tick();
        }
        assert!(harness.status.with(|s| s.link_quiet));

        // Work resumes once deadlines come due again.
        harness.time.advance(1_000_000);
        coordinator.tick();
        assert!(!harness.status.with(|s| s.link_quiet));
    }

    #[test]
    fn updater_failure_does_not_stop_the_loop() {
        let mut board = healthy_board();
        board.fail_next_exchanges(10);
        let harness = Harness::new(board);
        let mut coordinator = harness.coordinator();

        coordinator.tick();
        harness.time.advance(1_000_000);
        coordinator.tick();

        // Faults exhausted; the next due tick works again.
        harness.time.advance(1_000_000);
        coordinator.tick();
        assert!(harness.status.with(|s| s.alive));
    }

    #[test]
    fn control_state_machine_transitions() {
        let control = CoordinatorControl::new();
        assert_eq!(control.state(), RunState::Stopped);

        control.enter_running();
        assert_eq!(control.state(), RunState::Running);
        assert!(!control.stop_requested());

        control.state.store(STATE_STOPPING, Ordering::Release);
        assert_eq!(control.state(), RunState::Stopping);
        assert!(control.stop_requested());

        control.acknowledge_stopped();
        assert_eq!(control.state(), RunState::Stopped);
    }
}
