//! # pawguard-daemon
//!
//! Process-level wiring for pawguard: logging, signal handling, and the
//! detection loop that drives [`pawguard_core::ProximityEngine`].

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod logging;
pub mod runtime;
pub mod signals;

pub use runtime::Daemon;
