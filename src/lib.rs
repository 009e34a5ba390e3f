#![cfg_attr(not(test), no_std)]

//! rcio-link - Host-side driver core for an RC I/O coprocessor
//!
//! This library coordinates a host processor with a companion real-time I/O
//! board over a byte-oriented link. It speaks a small framed, CRC-protected
//! register protocol, time-slices the shared link among independent subsystem
//! updaters, and enforces the PWM timer-group frequency and arming safety
//! rules so motor outputs cannot be driven into an inconsistent state.
//!
//! # Modules
//!
//! - [`protocol`]: Register map constants and the wire packet format
//! - [`transport`]: Bus abstraction and frame-level exchange validation
//! - [`registers`]: Page/offset register access with exclusive link ownership
//! - [`coordinator`]: The periodic worker driving all subsystem updaters
//! - [`subsystems`]: PWM output, RC input, ADC, status and safety heartbeat
//! - [`link`]: The top-level context object and configuration facade
//! - [`sim`]: Simulated coprocessor for host testing
//!
//! # Architecture
//!
//! Data flows one direction into the transport (request) and one back
//! (validated reply). A single coordinator task owns all register traffic;
//! configuration calls from the outside only mutate in-memory state and never
//! block on the link.

pub mod coordinator;
pub mod core;
pub mod link;
pub mod protocol;
pub mod registers;
pub mod sim;
pub mod subsystems;
pub mod transport;

pub use coordinator::{Coordinator, CoordinatorControl, RunState};
pub use link::{BoardType, RcioLink, StatusSnapshot};
pub use registers::{RegisterClient, RegisterError};
pub use transport::{BusError, BusInterface, Transport, TransportError};
