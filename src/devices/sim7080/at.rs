//! AT command engine
//!
//! One primitive everything above is built on: write a command, collect
//! bytes until a terminator line (`OK`, `ERROR`, `+CME ERROR`) or the
//! timeout, and hand back the raw text with a classification. Response
//! scanning is line-based so a terminator split across two reads is still
//! recognized.

use crate::platform::{TimerInterface, UartInterface};
use heapless::{String, Vec};

use super::transport::UartHandle;
use super::{Modem, ModemError, MAX_RESPONSE_LEN};

/// Poll interval while waiting for response bytes
const READ_POLL_MS: u32 = 10;

/// Longest line that can still be a terminator
const LINE_SCAN_LEN: usize = 64;

/// Classification of one AT exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AtOutcome {
    /// Terminated with OK
    Ok,
    /// Terminated with ERROR or +CME/+CMS ERROR
    Error,
    /// No terminator within the budget, partial text preserved
    Timeout,
}

/// Captured result of one AT exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtResponse {
    pub outcome: AtOutcome,
    /// Raw response text, capped at `MAX_RESPONSE_LEN` bytes
    pub text: String<MAX_RESPONSE_LEN>,
}

impl AtResponse {
    pub fn is_ok(&self) -> bool {
        self.outcome == AtOutcome::Ok
    }
}

fn is_final_ok(line: &[u8]) -> bool {
    line == b"OK"
}

fn is_final_error(line: &[u8]) -> bool {
    line == b"ERROR" || line.starts_with(b"+CME ERROR") || line.starts_with(b"+CMS ERROR")
}

fn push_text(text: &mut String<MAX_RESPONSE_LEN>, byte: u8) {
    // Replace non-printable noise so the capture stays valid UTF-8
    let c = if byte.is_ascii_graphic() || byte == b' ' || byte == b'\r' || byte == b'\n' {
        byte as char
    } else {
        '.'
    };
    let _ = text.push(c);
}

impl<U: UartInterface, T: TimerInterface> Modem<U, T> {
    /// Send a command and await its terminator
    ///
    /// Acquires the transport, drains stale bytes, writes `cmd` followed by
    /// CR, then collects the response. Timeout is reported in the outcome,
    /// not as an error; only transport and platform failures return `Err`.
    pub fn send_at(&mut self, cmd: &str, timeout_ms: u32) -> Result<AtResponse, ModemError> {
        let mut handle = self.transport.acquire(&mut self.timer)?;
        handle.drain();
        handle.write(cmd.as_bytes()).map_err(ModemError::Platform)?;
        handle.write(b"\r").map_err(ModemError::Platform)?;
        Self::collect_response(&mut handle, &mut self.timer, timeout_ms)
    }

    /// Send a command, expect OK
    ///
    /// Collapses the outcome into the error taxonomy for callers that only
    /// care about success.
    pub fn send_expect_ok(&mut self, cmd: &str, timeout_ms: u32) -> Result<(), ModemError> {
        match self.send_at(cmd, timeout_ms)?.outcome {
            AtOutcome::Ok => Ok(()),
            AtOutcome::Error => Err(ModemError::ProtocolError),
            AtOutcome::Timeout => Err(ModemError::Timeout),
        }
    }

    /// Send a query, expect OK, return the captured text
    pub fn send_query(
        &mut self,
        cmd: &str,
        timeout_ms: u32,
    ) -> Result<String<MAX_RESPONSE_LEN>, ModemError> {
        let response = self.send_at(cmd, timeout_ms)?;
        match response.outcome {
            AtOutcome::Ok => Ok(response.text),
            AtOutcome::Error => Err(ModemError::ProtocolError),
            AtOutcome::Timeout => Err(ModemError::Timeout),
        }
    }

    /// Two-phase exchange for commands that answer with a `>` prompt
    ///
    /// Writes `cmd`, waits for the prompt, writes `data` raw, then awaits
    /// the normal terminator. Used by SMPUB and HTTPDATA.
    pub fn send_prompted(
        &mut self,
        cmd: &str,
        data: &[u8],
        prompt_timeout_ms: u32,
        timeout_ms: u32,
    ) -> Result<AtResponse, ModemError> {
        let mut handle = self.transport.acquire(&mut self.timer)?;
        handle.drain();
        handle.write(cmd.as_bytes()).map_err(ModemError::Platform)?;
        handle.write(b"\r").map_err(ModemError::Platform)?;

        // Wait for the '>' prompt byte. Read one byte at a time so anything
        // the modem sends after the prompt stays buffered for the response
        // collector.
        let deadline = self.timer.now_ms() + prompt_timeout_ms as u64;
        let mut got_prompt = false;
        let mut scratch = [0u8; 1];
        while self.timer.now_ms() < deadline {
            if handle.available() {
                let n = handle.read(&mut scratch).map_err(ModemError::Platform)?;
                if n == 1 && scratch[0] == b'>' {
                    got_prompt = true;
                    break;
                }
            } else {
                self.timer
                    .delay_ms(READ_POLL_MS)
                    .map_err(ModemError::Platform)?;
            }
        }
        if !got_prompt {
            return Ok(AtResponse {
                outcome: AtOutcome::Timeout,
                text: String::new(),
            });
        }

        handle.write(data).map_err(ModemError::Platform)?;
        Self::collect_response(&mut handle, &mut self.timer, timeout_ms)
    }

    /// Wait for an unsolicited line containing one of `markers`
    ///
    /// No command is written. Returns the matching line, or
    /// `ModemError::Timeout` if nothing matches within the budget.
    pub fn wait_for_any(
        &mut self,
        markers: &[&str],
        timeout_ms: u32,
    ) -> Result<String<LINE_SCAN_LEN>, ModemError> {
        let mut handle = self.transport.acquire(&mut self.timer)?;
        let deadline = self.timer.now_ms() + timeout_ms as u64;
        let mut line: Vec<u8, LINE_SCAN_LEN> = Vec::new();
        let mut scratch = [0u8; 64];

        while self.timer.now_ms() < deadline {
            if handle.available() {
                let n = handle.read(&mut scratch).map_err(ModemError::Platform)?;
                for &b in &scratch[..n] {
                    match b {
                        b'\n' => {
                            if let Ok(text) = core::str::from_utf8(&line) {
                                if markers.iter().any(|m| text.contains(m)) {
                                    let mut matched: String<LINE_SCAN_LEN> = String::new();
                                    let _ = matched.push_str(text);
                                    return Ok(matched);
                                }
                            }
                            line.clear();
                        }
                        b'\r' => {}
                        _ => {
                            let _ = line.push(b);
                        }
                    }
                }
            } else {
                self.timer
                    .delay_ms(READ_POLL_MS)
                    .map_err(ModemError::Platform)?;
            }
        }
        Err(ModemError::Timeout)
    }

    pub(crate) fn collect_response(
        handle: &mut UartHandle<'_, U>,
        timer: &mut T,
        timeout_ms: u32,
    ) -> Result<AtResponse, ModemError> {
        let deadline = timer.now_ms() + timeout_ms as u64;
        let mut text: String<MAX_RESPONSE_LEN> = String::new();
        // Current line kept separately so terminators are still seen after
        // the capture has filled up
        let mut line: Vec<u8, LINE_SCAN_LEN> = Vec::new();
        // One byte per read: bytes past the terminator (unsolicited lines
        // arriving in the same burst) must stay buffered for the next reader
        let mut scratch = [0u8; 1];

        while timer.now_ms() < deadline {
            if handle.available() {
                let n = handle.read(&mut scratch).map_err(ModemError::Platform)?;
                if n == 0 {
                    continue;
                }
                let b = scratch[0];
                push_text(&mut text, b);
                match b {
                    b'\n' => {
                        if is_final_ok(&line) {
                            return Ok(AtResponse {
                                outcome: AtOutcome::Ok,
                                text,
                            });
                        }
                        if is_final_error(&line) {
                            return Ok(AtResponse {
                                outcome: AtOutcome::Error,
                                text,
                            });
                        }
                        line.clear();
                    }
                    b'\r' => {}
                    _ => {
                        let _ = line.push(b);
                    }
                }
            } else {
                timer.delay_ms(READ_POLL_MS).map_err(ModemError::Platform)?;
            }
        }

        Ok(AtResponse {
            outcome: AtOutcome::Timeout,
            text,
        })
    }
}
