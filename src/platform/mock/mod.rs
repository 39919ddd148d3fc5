//! Mock platform implementation for host-side testing
//!
//! Provides software implementations of the platform traits so driver logic
//! can run in ordinary `cargo test` without hardware.

pub mod timer;
pub mod uart;

pub use timer::MockTimer;
pub use uart::MockUart;
