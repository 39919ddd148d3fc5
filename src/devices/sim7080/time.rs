//! Network time
//!
//! NTP over the active PDP context. Configuration latches network time and
//! binds the CNTP client to context 1; the actual sync is asynchronous, the
//! modem answers `AT+CNTPSTART` with OK and reports the result later as a
//! `+CNTP: <code>,"<time>"` URC.

use crate::platform::{TimerInterface, UartInterface};
use crate::{log_info, log_warn};

use super::{Modem, ModemError, UtcTime};

/// NTP server queried over the PDP context
pub const NTP_SERVER: &str = "pool.ntp.org";

const CONFIG_RETRIES: u32 = 3;
const CONFIG_RETRY_DELAY_MS: u32 = 500;

/// Network time sync status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NetworkTime {
    /// Time latch and CNTP target are configured
    pub configured: bool,
    /// At least one successful sync since configuration
    pub synced: bool,
    /// UTC from the last successful sync
    pub utc: UtcTime,
    /// Monotonic milliseconds of the last successful sync
    pub synced_at: u64,
}

impl<U: UartInterface, T: TimerInterface> Modem<U, T> {
    /// Configure network time latch and the NTP target
    ///
    /// Each sub-step retries up to 3 times. Any step exhausting its retries
    /// fails the whole configuration.
    pub fn configure_network_time(&mut self) -> Result<(), ModemError> {
        self.net_time = NetworkTime::default();

        let mut cmd: heapless::String<96> = heapless::String::new();
        let _ = cmd.push_str("AT+CNTP=\"");
        let _ = cmd.push_str(NTP_SERVER);
        let _ = cmd.push_str("\",0");

        self.time_config_step("AT+CLTS=1")?;
        self.time_config_step("AT+CNTPCID=1")?;
        self.time_config_step(&cmd)?;

        self.net_time.configured = true;
        Ok(())
    }

    /// Trigger an NTP sync and wait for the result URC
    ///
    /// Configures network time first if that has not happened yet. Returns
    /// the decoded UTC on success.
    pub fn sync_network_time(&mut self, timeout_ms: u32) -> Result<UtcTime, ModemError> {
        if !self.net_time.configured {
            log_info!("Network time not configured yet, configuring now");
            self.configure_network_time()?;
        }

        self.send_expect_ok("AT+CNTPSTART", 2_000)?;

        let line = self.wait_for_any(&["+CNTP:"], timeout_ms).map_err(|e| {
            self.net_time.synced = false;
            self.record_error("NTP sync timeout, no +CNTP response");
            e
        })?;

        match parse_cntp(&line) {
            Some((1, Some(utc))) => {
                self.net_time.synced = true;
                self.net_time.utc = utc;
                self.net_time.synced_at = self.timer.now_ms();
                log_info!(
                    "Network time synced: {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    utc.year,
                    utc.month,
                    utc.day,
                    utc.hour,
                    utc.minute,
                    utc.second
                );
                Ok(utc)
            }
            Some((code, _)) => {
                self.net_time.synced = false;
                match code {
                    2 => self.record_error("NTP sync failed, network error"),
                    3 => self.record_error("NTP sync failed, DNS resolution error"),
                    4 => self.record_error("NTP sync failed, server timeout"),
                    _ => self.record_error("NTP sync failed, unknown result code"),
                }
                Err(ModemError::ProtocolError)
            }
            None => {
                self.net_time.synced = false;
                self.record_error("Malformed +CNTP response");
                Err(ModemError::ParseError)
            }
        }
    }

    fn time_config_step(&mut self, cmd: &str) -> Result<(), ModemError> {
        let mut last = ModemError::ProtocolError;
        for attempt in 1..=CONFIG_RETRIES {
            match self.send_expect_ok(cmd, 1_000) {
                Ok(()) => return Ok(()),
                Err(e) => last = e,
            }
            if attempt < CONFIG_RETRIES {
                log_warn!("Time config step failed, attempt {}", attempt);
                self.timer
                    .delay_ms(CONFIG_RETRY_DELAY_MS)
                    .map_err(ModemError::Platform)?;
            }
        }
        Err(last)
    }
}

/// Parse `+CNTP: <code>[,"YYYY/MM/DD,HH:MM:SS"]`
pub(crate) fn parse_cntp(line: &str) -> Option<(u32, Option<UtcTime>)> {
    let payload = line.split_once(':')?.1.trim();
    let (code_text, rest) = match payload.split_once(',') {
        Some((c, r)) => (c, Some(r)),
        None => (payload, None),
    };
    let code: u32 = code_text.trim().parse().ok()?;

    let utc = rest.and_then(parse_cntp_timestamp);
    Some((code, utc))
}

/// Decode a quoted `YYYY/MM/DD,HH:MM:SS` timestamp with range validation
fn parse_cntp_timestamp(quoted: &str) -> Option<UtcTime> {
    let text = quoted.trim().trim_matches('"');
    let (date, clock) = text.split_once(',')?;

    let mut date_parts = date.split('/');
    let year: u16 = date_parts.next()?.parse().ok()?;
    let month: u8 = date_parts.next()?.parse().ok()?;
    let day: u8 = date_parts.next()?.parse().ok()?;

    let mut clock_parts = clock.split(':');
    let hour: u8 = clock_parts.next()?.parse().ok()?;
    let minute: u8 = clock_parts.next()?.parse().ok()?;
    let second: u8 = clock_parts.next()?.parse().ok()?;

    if year < 2020
        || !(1..=12).contains(&month)
        || !(1..=31).contains(&day)
        || hour > 23
        || minute > 59
        || second > 59
    {
        return None;
    }

    Some(UtcTime {
        year,
        month,
        day,
        hour,
        minute,
        second,
    })
}
