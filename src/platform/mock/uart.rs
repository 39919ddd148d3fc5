//! Mock UART implementation
//!
//! Simulates a modem on the other end of the wire: every completed command
//! line (terminated by CR) pops the next scripted response into the receive
//! buffer. Raw bytes can also be injected directly to simulate unsolicited
//! result codes arriving between commands.

use crate::platform::error::{PlatformError, UartError};
use crate::platform::traits::UartInterface;
use crate::platform::Result;
use heapless::{Deque, Vec};

const RX_BUFFER_SIZE: usize = 1024;
const TX_LOG_SIZE: usize = 2048;
const MAX_SCRIPTED: usize = 64;
const MAX_RESPONSE_LEN: usize = 512;

/// Mock UART for testing
pub struct MockUart {
    rx_buffer: Deque<u8, RX_BUFFER_SIZE>,
    tx_log: Vec<u8, TX_LOG_SIZE>,
    script: Deque<Vec<u8, MAX_RESPONSE_LEN>, MAX_SCRIPTED>,
    baud_rate: u32,
    fail_writes: bool,
    respond_on_any_write: bool,
}

impl MockUart {
    /// Create a new mock UART with empty buffers
    pub fn new() -> Self {
        Self {
            rx_buffer: Deque::new(),
            tx_log: Vec::new(),
            script: Deque::new(),
            baud_rate: 115_200,
            fail_writes: false,
            respond_on_any_write: false,
        }
    }

    /// Queue a canned response, delivered after the next complete command line
    pub fn queue_response(&mut self, response: &[u8]) {
        let mut v = Vec::new();
        let _ = v.extend_from_slice(response);
        let _ = self.script.push_back(v);
    }

    /// Inject bytes directly into the receive buffer (URCs, partial lines)
    pub fn inject_rx_data(&mut self, data: &[u8]) {
        for &b in data {
            let _ = self.rx_buffer.push_back(b);
        }
    }

    /// Everything written to the UART so far
    pub fn tx_data(&self) -> &[u8] {
        &self.tx_log
    }

    /// Count occurrences of `needle` in the transmit log
    pub fn tx_count(&self, needle: &[u8]) -> usize {
        if needle.is_empty() {
            return 0;
        }
        self.tx_log
            .windows(needle.len())
            .filter(|w| *w == needle)
            .count()
    }

    /// Pop a scripted response on every write, not only completed lines
    ///
    /// Needed for prompted exchanges where the payload carries no CR.
    pub fn set_respond_on_any_write(&mut self, v: bool) {
        self.respond_on_any_write = v;
    }

    /// Make subsequent writes fail with `UartError::WriteFailed`
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Clear the transmit log
    pub fn clear_tx(&mut self) {
        self.tx_log.clear();
    }
}

impl Default for MockUart {
    fn default() -> Self {
        Self::new()
    }
}

impl UartInterface for MockUart {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.fail_writes {
            return Err(PlatformError::Uart(UartError::WriteFailed));
        }
        let _ = self.tx_log.extend_from_slice(data);
        // A CR completes a command line and triggers the next scripted reply
        if data.contains(&b'\r') || self.respond_on_any_write {
            if let Some(response) = self.script.pop_front() {
                self.inject_rx_data(&response);
            }
        }
        Ok(data.len())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut count = 0;
        while count < buffer.len() {
            match self.rx_buffer.pop_front() {
                Some(b) => {
                    buffer[count] = b;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        if baud == 0 {
            return Err(PlatformError::Uart(UartError::InvalidBaudRate));
        }
        self.baud_rate = baud;
        Ok(())
    }

    fn available(&self) -> bool {
        !self.rx_buffer.is_empty()
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_response_on_command() {
        let mut uart = MockUart::new();
        uart.queue_response(b"\r\nOK\r\n");

        uart.write(b"AT\r").unwrap();
        assert!(uart.available());

        let mut buf = [0u8; 16];
        let n = uart.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"\r\nOK\r\n");
    }

    #[test]
    fn test_script_consumed_in_order() {
        let mut uart = MockUart::new();
        uart.queue_response(b"first\r\n");
        uart.queue_response(b"second\r\n");

        uart.write(b"AT+A\r").unwrap();
        let mut buf = [0u8; 32];
        let n = uart.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"first\r\n");

        uart.write(b"AT+B\r").unwrap();
        let n = uart.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"second\r\n");
    }

    #[test]
    fn test_partial_write_does_not_consume_script() {
        let mut uart = MockUart::new();
        uart.queue_response(b"OK\r\n");

        uart.write(b"AT+CGNS").unwrap();
        assert!(!uart.available());
        uart.write(b"INF\r").unwrap();
        assert!(uart.available());
    }

    #[test]
    fn test_tx_count() {
        let mut uart = MockUart::new();
        uart.write(b"AT+CNACT=0,1\r").unwrap();
        uart.write(b"AT+CNACT?\r").unwrap();
        uart.write(b"AT+CNACT=0,1\r").unwrap();
        assert_eq!(uart.tx_count(b"AT+CNACT=0,1"), 2);
    }

    #[test]
    fn test_write_failure() {
        let mut uart = MockUart::new();
        uart.set_fail_writes(true);
        assert_eq!(
            uart.write(b"AT\r"),
            Err(PlatformError::Uart(UartError::WriteFailed))
        );
    }

    #[test]
    fn test_injected_urc() {
        let mut uart = MockUart::new();
        uart.inject_rx_data(b"+APP RDY\r\n");
        let mut buf = [0u8; 16];
        let n = uart.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"+APP RDY\r\n");
    }
}
