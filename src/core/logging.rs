//! Logging abstraction
//!
//! Provides unified logging macros that work across different targets:
//! - Embedded (`defmt` feature): uses defmt
//! - Host tests: uses `println!`
//! - Host non-test: no-op
//!
//! Also provides [`RateLimiter`] for messages that would otherwise flood the
//! log, such as the PWM frequency-change advisories that can fire on every
//! mixer output cycle.

/// Limits how often a recurring message is emitted.
///
/// The first call is always allowed; subsequent calls are suppressed until
/// the interval has passed.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiter {
    interval_us: u64,
    next_us: u64,
}

impl RateLimiter {
    /// Creates a limiter allowing one message per `interval_us`.
    pub const fn new(interval_us: u64) -> Self {
        Self {
            interval_us,
            next_us: 0,
        }
    }

    /// Returns true if a message may be emitted now, and starts a new
    /// suppression window if so.
    pub fn allow(&mut self, now_us: u64) -> bool {
        if now_us >= self.next_us {
            self.next_us = now_us + self.interval_us;
            true
        } else {
            false
        }
    }
}

/// Log debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::debug!($($arg)*);

        #[cfg(all(not(feature = "defmt"), test))]
        println!("[DEBUG] {}", format!($($arg)*));

        #[cfg(all(not(feature = "defmt"), not(test)))]
        let _ = ::core::format_args!($($arg)*);
    }};
}

/// Log informational message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::info!($($arg)*);

        #[cfg(all(not(feature = "defmt"), test))]
        println!("[INFO] {}", format!($($arg)*));

        #[cfg(all(not(feature = "defmt"), not(test)))]
        let _ = ::core::format_args!($($arg)*);
    }};
}

/// Log warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::warn!($($arg)*);

        #[cfg(all(not(feature = "defmt"), test))]
        println!("[WARN] {}", format!($($arg)*));

        #[cfg(all(not(feature = "defmt"), not(test)))]
        let _ = ::core::format_args!($($arg)*);
    }};
}

/// Log error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::error!($($arg)*);

        #[cfg(all(not(feature = "defmt"), test))]
        println!("[ERROR] {}", format!($($arg)*));

        #[cfg(all(not(feature = "defmt"), not(test)))]
        let _ = ::core::format_args!($($arg)*);
    }};
}
