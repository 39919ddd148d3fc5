//! Timer interface trait
//!
//! All delays and clock reads in the drivers go through this trait so that
//! host tests can drive a virtual clock instead of sleeping.

use crate::platform::Result;

/// Timer interface trait
///
/// Provides blocking delays and a monotonic clock. Platform implementations
/// must guarantee the clock is monotonic over the device lifetime.
pub trait TimerInterface {
    /// Delay for the given number of microseconds
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Timer(TimerError::InvalidDuration)` if the
    /// duration is not representable on the platform.
    fn delay_us(&mut self, us: u32) -> Result<()>;

    /// Delay for the given number of milliseconds
    fn delay_ms(&mut self, ms: u32) -> Result<()> {
        // 32-bit µs math overflows above ~71 min, chunk the delay
        let mut remaining = ms;
        while remaining > 0 {
            let chunk = remaining.min(60_000);
            self.delay_us(chunk * 1_000)?;
            remaining -= chunk;
        }
        Ok(())
    }

    /// Monotonic clock in microseconds since boot
    fn now_us(&self) -> u64;

    /// Monotonic clock in milliseconds since boot
    fn now_ms(&self) -> u64 {
        self.now_us() / 1_000
    }
}
