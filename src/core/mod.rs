//! Core systems
//!
//! Shared infrastructure used by the drivers and tasks: logging macros and
//! the global system event bits.

pub mod events;
pub mod logging;
