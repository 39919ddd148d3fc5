//! Mock timer implementation
//!
//! Maintains a virtual clock that advances instantly on delay, and records
//! every delay requested so tests can assert exact backoff sequences.

use crate::platform::error::{PlatformError, TimerError};
use crate::platform::traits::TimerInterface;
use crate::platform::Result;
use heapless::Vec;

const MAX_DELAY_LOG: usize = 256;

/// Mock timer with virtual time
pub struct MockTimer {
    now_us: u64,
    delays_us: Vec<u64, MAX_DELAY_LOG>,
}

impl MockTimer {
    /// Create a new mock timer at t=0
    pub fn new() -> Self {
        Self {
            now_us: 0,
            delays_us: Vec::new(),
        }
    }

    /// Advance virtual time without recording a delay
    pub fn advance_ms(&mut self, ms: u64) {
        self.now_us += ms * 1_000;
    }

    /// All delays requested so far, in milliseconds
    pub fn delays_ms(&self) -> impl Iterator<Item = u64> + '_ {
        self.delays_us.iter().map(|us| us / 1_000)
    }

    /// Clear the delay history
    pub fn clear_delays(&mut self) {
        self.delays_us.clear();
    }
}

impl Default for MockTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerInterface for MockTimer {
    fn delay_us(&mut self, us: u32) -> Result<()> {
        if us == 0 {
            return Err(PlatformError::Timer(TimerError::InvalidDuration));
        }
        self.now_us += us as u64;
        let _ = self.delays_us.push(us as u64);
        Ok(())
    }

    fn now_us(&self) -> u64 {
        self.now_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_time_advances_on_delay() {
        let mut timer = MockTimer::new();
        assert_eq!(timer.now_ms(), 0);
        timer.delay_ms(2_000).unwrap();
        assert_eq!(timer.now_ms(), 2_000);
    }

    #[test]
    fn test_delay_history() {
        let mut timer = MockTimer::new();
        timer.delay_ms(10).unwrap();
        timer.delay_ms(2_000).unwrap();
        timer.delay_ms(4_000).unwrap();
        let big: std::vec::Vec<u64> = timer.delays_ms().filter(|&d| d >= 1_000).collect();
        assert_eq!(big, vec![2_000, 4_000]);
    }

    #[test]
    fn test_advance_not_recorded() {
        let mut timer = MockTimer::new();
        timer.advance_ms(500);
        assert_eq!(timer.now_ms(), 500);
        assert_eq!(timer.delays_ms().count(), 0);
    }

    #[test]
    fn test_zero_delay_rejected() {
        let mut timer = MockTimer::new();
        assert_eq!(
            timer.delay_us(0),
            Err(PlatformError::Timer(TimerError::InvalidDuration))
        );
    }
}
