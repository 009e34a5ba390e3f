//! Core support systems shared by every layer of the driver.
//!
//! - [`time`]: `TimeSource` abstraction, deadlines and the host-test `MockTime`
//! - [`logging`]: log macros and rate limiting for advisory messages
//! - [`sync`]: cross-context shared state wrapper

pub mod logging;
pub mod sync;
pub mod time;
