//! HTTP over AT
//!
//! One-shot GET/POST through the modem's embedded HTTP client. The service
//! is brought up with `AT+HTTPINIT`, torn down with `AT+HTTPTERM` whether
//! the request succeeded or not, so a failed exchange never leaves the
//! client half-open for the next one.
//!
//! POST bodies go through `AT+HTTPDATA`, which answers with a `DOWNLOAD`
//! line instead of the usual `>` prompt. The request itself is asynchronous:
//! `AT+HTTPACTION` returns OK immediately and the status arrives later as a
//! `+HTTPACTION: <method>,<status>,<len>` URC.

use crate::platform::{TimerInterface, UartInterface};
use core::fmt::Write as _;
use heapless::{String, Vec};

use super::at::AtOutcome;
use super::{Modem, ModemError, MAX_RESPONSE_LEN};

/// URL length bound, rejected before anything touches the wire
pub const MAX_URL_LEN: usize = 160;

const ACTION_GET: u8 = 0;
const ACTION_POST: u8 = 1;
const ACTION_TIMEOUT_MS: u32 = 30_000;
const DOWNLOAD_PROMPT_TIMEOUT_MS: u32 = 5_000;

/// Outcome of one HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code from the `+HTTPACTION` report
    pub status: u16,
    /// Response body, empty when the server sent none
    pub body: String<MAX_RESPONSE_LEN>,
}

impl<U: UartInterface, T: TimerInterface> Modem<U, T> {
    /// Perform an HTTP GET
    pub fn http_get(&mut self, url: &str) -> Result<HttpResponse, ModemError> {
        self.http_request(url, None)
    }

    /// Perform an HTTP POST with a JSON body
    pub fn http_post(&mut self, url: &str, body: &[u8]) -> Result<HttpResponse, ModemError> {
        self.http_request(url, Some(body))
    }

    fn http_request(
        &mut self,
        url: &str,
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, ModemError> {
        if !self.link.connected {
            return Err(ModemError::InvalidState);
        }
        if url.len() > MAX_URL_LEN {
            return Err(ModemError::InvalidState);
        }

        self.send_expect_ok("AT+HTTPINIT", 2_000)?;
        let result = self.http_exchange(url, body);
        // Tear the service down on both paths
        let _ = self.send_expect_ok("AT+HTTPTERM", 2_000);
        result
    }

    fn http_exchange(
        &mut self,
        url: &str,
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, ModemError> {
        let mut cmd: String<192> = String::new();
        let _ = write!(cmd, "AT+HTTPPARA=\"URL\",\"{}\"", url);
        self.send_expect_ok(&cmd, 2_000)?;
        self.send_expect_ok("AT+HTTPPARA=\"CONTENT\",\"application/json\"", 2_000)?;

        let action = match body {
            Some(data) => {
                self.http_upload_body(data)?;
                ACTION_POST
            }
            None => ACTION_GET,
        };

        cmd.clear();
        let _ = write!(cmd, "AT+HTTPACTION={}", action);
        self.send_expect_ok(&cmd, 5_000)?;

        let mut marker: String<24> = String::new();
        let _ = write!(marker, "+HTTPACTION: {},", action);
        let line = self.wait_for_any(&[&marker], ACTION_TIMEOUT_MS)?;
        let (status, len) = parse_httpaction(&line).ok_or(ModemError::ParseError)?;

        if len == 0 {
            return Ok(HttpResponse {
                status,
                body: String::new(),
            });
        }

        let text = self.send_query("AT+HTTPREAD", 10_000)?;
        let body = extract_httpread(&text).ok_or(ModemError::ParseError)?;
        Ok(HttpResponse { status, body })
    }

    /// Stage a POST body, waiting for the `DOWNLOAD` go-ahead line
    fn http_upload_body(&mut self, data: &[u8]) -> Result<(), ModemError> {
        let mut cmd: String<48> = String::new();
        let _ = write!(cmd, "AT+HTTPDATA={},10000", data.len());

        let mut handle = self.transport.acquire(&mut self.timer)?;
        handle.drain();
        handle.write(cmd.as_bytes()).map_err(ModemError::Platform)?;
        handle.write(b"\r").map_err(ModemError::Platform)?;

        // Single-byte reads keep anything after the go-ahead buffered for
        // the response collector
        let deadline = self.timer.now_ms() + DOWNLOAD_PROMPT_TIMEOUT_MS as u64;
        let mut line: Vec<u8, 32> = Vec::new();
        let mut scratch = [0u8; 1];
        let mut ready = false;
        while self.timer.now_ms() < deadline {
            if handle.available() {
                let n = handle.read(&mut scratch).map_err(ModemError::Platform)?;
                if n == 0 {
                    continue;
                }
                match scratch[0] {
                    b'\n' => {
                        if line.as_slice() == b"DOWNLOAD" {
                            ready = true;
                            break;
                        }
                        if line.as_slice() == b"ERROR" {
                            return Err(ModemError::ProtocolError);
                        }
                        line.clear();
                    }
                    b'\r' => {}
                    b => {
                        let _ = line.push(b);
                    }
                }
            } else {
                self.timer.delay_ms(10).map_err(ModemError::Platform)?;
            }
        }
        if !ready {
            return Err(ModemError::Timeout);
        }

        handle.write(data).map_err(ModemError::Platform)?;
        let response = Self::collect_response(&mut handle, &mut self.timer, 10_000)?;
        match response.outcome {
            AtOutcome::Ok => Ok(()),
            AtOutcome::Error => Err(ModemError::ProtocolError),
            AtOutcome::Timeout => Err(ModemError::Timeout),
        }
    }
}

/// Parse `+HTTPACTION: <method>,<status>,<len>`
pub(crate) fn parse_httpaction(line: &str) -> Option<(u16, usize)> {
    let payload = line.split_once(':')?.1.trim();
    let mut parts = payload.split(',');
    let _method: u8 = parts.next()?.trim().parse().ok()?;
    let status: u16 = parts.next()?.trim().parse().ok()?;
    let len: usize = parts.next()?.trim().parse().ok()?;
    Some((status, len))
}

/// Pull the body out of a captured `AT+HTTPREAD` response
///
/// `+HTTPREAD: <len>` announces the byte count, the body follows on the
/// next line. A capture truncated by the response cap yields what arrived.
pub(crate) fn extract_httpread(text: &str) -> Option<String<MAX_RESPONSE_LEN>> {
    let start = text.find("+HTTPREAD:")?;
    let rest = &text[start..];
    let header_end = rest.find('\n')?;
    let len: usize = rest[..header_end]
        .trim_end_matches('\r')
        .split(':')
        .nth(1)?
        .trim()
        .parse()
        .ok()?;

    let after = &rest[header_end + 1..];
    let take = len.min(after.len());
    let mut body: String<MAX_RESPONSE_LEN> = String::new();
    body.push_str(after.get(..take)?).ok()?;
    Some(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{MockTimer, MockUart};

    fn connected_modem(uart: MockUart) -> Modem<MockUart, MockTimer> {
        let mut m = Modem::new(uart, MockTimer::new());
        m.link.connected = true;
        m
    }

    #[test]
    fn test_parse_httpaction() {
        assert_eq!(parse_httpaction("+HTTPACTION: 0,200,387"), Some((200, 387)));
        assert_eq!(parse_httpaction("+HTTPACTION: 1,404,0"), Some((404, 0)));
        assert_eq!(parse_httpaction("+HTTPACTION: junk"), None);
    }

    #[test]
    fn test_extract_httpread() {
        let body = extract_httpread("\r\n+HTTPREAD: 5\r\nhello\r\n+HTTPREAD: 0\r\nOK\r\n")
            .unwrap();
        assert_eq!(body.as_str(), "hello");
    }

    #[test]
    fn test_extract_httpread_truncated_capture() {
        let body = extract_httpread("\r\n+HTTPREAD: 100\r\nshort").unwrap();
        assert_eq!(body.as_str(), "short");
    }

    #[test]
    fn test_get_happy_path() {
        let mut uart = MockUart::new();
        uart.queue_response(b"\r\nOK\r\n"); // HTTPINIT
        uart.queue_response(b"\r\nOK\r\n"); // URL
        uart.queue_response(b"\r\nOK\r\n"); // CONTENT
        // OK consumed by the action command, the URC stays buffered
        uart.queue_response(b"\r\nOK\r\n\r\n+HTTPACTION: 0,200,5\r\n");
        uart.queue_response(b"\r\n+HTTPREAD: 5\r\nhello\r\n+HTTPREAD: 0\r\nOK\r\n");
        uart.queue_response(b"\r\nOK\r\n"); // HTTPTERM
        let mut m = connected_modem(uart);

        let response = m.http_get("http://example.com/cfg").unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body.as_str(), "hello");
        let tx = m.transport_tx();
        assert!(tx.contains("AT+HTTPPARA=\"URL\",\"http://example.com/cfg\""));
        assert!(tx.contains("AT+HTTPACTION=0"));
        assert_eq!(m.transport_tx_count("AT+HTTPTERM"), 1);
    }

    #[test]
    fn test_post_uploads_body() {
        let mut uart = MockUart::new();
        uart.set_respond_on_any_write(true);
        // Every write pops one script: send_at issues two writes per command
        uart.queue_response(b"\r\nOK\r\n"); // HTTPINIT cmd
        uart.queue_response(b""); //          HTTPINIT cr
        uart.queue_response(b"\r\nOK\r\n"); // URL cmd
        uart.queue_response(b"");
        uart.queue_response(b"\r\nOK\r\n"); // CONTENT cmd
        uart.queue_response(b"");
        uart.queue_response(b"DOWNLOAD\r\n"); // HTTPDATA cmd
        uart.queue_response(b""); //            HTTPDATA cr
        uart.queue_response(b"\r\nOK\r\n"); //  body bytes
        uart.queue_response(b"\r\nOK\r\n\r\n+HTTPACTION: 1,201,0\r\n"); // ACTION cmd
        uart.queue_response(b"");
        uart.queue_response(b"\r\nOK\r\n"); // HTTPTERM cmd
        let mut m = connected_modem(uart);

        let response = m.http_post("http://example.com/ingest", b"{\"v\":1}").unwrap();
        assert_eq!(response.status, 201);
        assert!(response.body.is_empty());
        let tx = m.transport_tx();
        assert!(tx.contains("AT+HTTPDATA=7,10000"));
        assert!(tx.contains("{\"v\":1}"));
    }

    #[test]
    fn test_failed_url_still_terminates_service() {
        let mut uart = MockUart::new();
        uart.queue_response(b"\r\nOK\r\n"); //    HTTPINIT
        uart.queue_response(b"\r\nERROR\r\n"); // URL rejected
        uart.queue_response(b"\r\nOK\r\n"); //    HTTPTERM
        let mut m = connected_modem(uart);

        assert_eq!(
            m.http_get("http://example.com").err(),
            Some(ModemError::ProtocolError)
        );
        assert_eq!(m.transport_tx_count("AT+HTTPTERM"), 1);
    }

    #[test]
    fn test_requires_connected_link() {
        let mut m = Modem::new(MockUart::new(), MockTimer::new());
        assert_eq!(
            m.http_get("http://example.com").err(),
            Some(ModemError::InvalidState)
        );
        assert!(m.transport_tx().is_empty());
    }

    #[test]
    fn test_rejects_oversize_url() {
        let mut m = connected_modem(MockUart::new());
        let long: std::string::String = core::iter::repeat('a').take(MAX_URL_LEN + 1).collect();
        assert_eq!(m.http_get(&long).err(), Some(ModemError::InvalidState));
        assert!(m.transport_tx().is_empty());
    }
}
