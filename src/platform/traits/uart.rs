//! UART interface trait
//!
//! This module defines the UART (serial) interface that platform
//! implementations must provide. The modem transport is built exclusively on
//! this trait so that the AT engine can run against mock hardware in tests.

use crate::platform::Result;

/// UART parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartParity {
    /// No parity bit
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

/// UART stop bits setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartStopBits {
    /// One stop bit
    One,
    /// Two stop bits
    Two,
}

/// UART configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UartConfig {
    /// Baud rate in bits per second
    pub baud_rate: u32,
    /// Number of data bits (typically 8)
    pub data_bits: u8,
    /// Parity setting
    pub parity: UartParity,
    /// Stop bits setting
    pub stop_bits: UartStopBits,
}

impl Default for UartConfig {
    fn default() -> Self {
        // SIM7080G factory default: 115200 8N1
        Self {
            baud_rate: 115_200,
            data_bits: 8,
            parity: UartParity::None,
            stop_bits: UartStopBits::One,
        }
    }
}

/// UART interface trait
///
/// Platform implementations must provide this interface for serial
/// communication. All operations are non-blocking: `read` returns however
/// many bytes are currently buffered (possibly zero).
///
/// # Safety Invariants
///
/// - Only one owner per UART instance
/// - No concurrent access to the same UART from multiple contexts
pub trait UartInterface {
    /// Write data to the UART
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Uart(UartError::WriteFailed)` on hardware failure.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Read available data into `buffer`
    ///
    /// Returns the number of bytes read, which may be zero if no data is
    /// pending. Never blocks waiting for data.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Uart(UartError::ReadFailed)` on hardware failure.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Change the baud rate
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Uart(UartError::InvalidBaudRate)` if the rate
    /// is not supported.
    fn set_baud_rate(&mut self, baud: u32) -> Result<()>;

    /// Check whether received data is pending
    fn available(&self) -> bool;

    /// Flush the transmit path
    fn flush(&mut self) -> Result<()>;
}
