//! RP2350 platform implementation for Raspberry Pi Pico 2 W
//!
//! Concrete implementations of the platform abstraction traits for the
//! RP2350 microcontroller using the `rp235x-hal` crate.
//!
//! # Feature Gate
//!
//! This module is only available when the `pico2_w` feature is enabled:
//!
//! ```toml
//! [dependencies]
//! gentrack = { version = "0.1", features = ["pico2_w"] }
//! ```

mod timer;
mod uart;

pub use timer::Rp2350Timer;
pub use uart::Rp2350Uart;
