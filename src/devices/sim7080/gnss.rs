//! GNSS subsystem
//!
//! Power control and fix polling over the AT engine. The `+CGNSINF` payload
//! is parsed positionally; the DOP block sits at a vendor-firmware-dependent
//! offset, so those fields are best-effort and default to zero.

use crate::platform::{TimerInterface, UartInterface};

use super::{GnssFix, Modem, ModemError, UtcTime};

const CMD_TIMEOUT_MS: u32 = 1_000;

/// Minimum comma count for a structurally valid CGNSINF payload
const MIN_DELIMITERS: usize = 14;

const IDX_RUN: usize = 0;
const IDX_FIX: usize = 1;
const IDX_UTC: usize = 2;
const IDX_LAT: usize = 3;
const IDX_LON: usize = 4;
const IDX_ALT: usize = 5;
const IDX_SPEED: usize = 6;
const IDX_COURSE: usize = 7;
const IDX_HDOP: usize = 10;
const IDX_VDOP: usize = 12;
const IDX_SATS: usize = 14;

/// Outcome of parsing one CGNSINF payload
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ParsedFix {
    /// Engine powered and a position is available
    Fix(GnssFix),
    /// Engine powered but no position yet
    NoFix,
    /// Engine not running
    NotRunning,
}

impl<U: UartInterface, T: TimerInterface> Modem<U, T> {
    /// Power the GNSS engine on
    pub fn gnss_power_on(&mut self) -> Result<(), ModemError> {
        self.send_expect_ok("AT+CGNSPWR=1", CMD_TIMEOUT_MS)?;
        self.gnss_powered = true;
        Ok(())
    }

    /// Power the GNSS engine off
    pub fn gnss_power_off(&mut self) -> Result<(), ModemError> {
        self.send_expect_ok("AT+CGNSPWR=0", CMD_TIMEOUT_MS)?;
        self.gnss_powered = false;
        Ok(())
    }

    /// Query the actual power state from the hardware
    ///
    /// Also refreshes the cached flag, which can drift after a modem reset.
    pub fn gnss_query_power(&mut self) -> Result<bool, ModemError> {
        let text = self.send_query("AT+CGNSPWR?", CMD_TIMEOUT_MS)?;
        let payload = extract_payload(&text, "+CGNSPWR:").ok_or(ModemError::ParseError)?;
        let on = payload.trim() == "1";
        self.gnss_powered = on;
        Ok(on)
    }

    /// Poll for a position fix
    ///
    /// On a fix the stored snapshot is replaced wholesale and a copy is
    /// returned. `NoFix` clears only the `valid` flag; `NotRunning` and
    /// parse failures leave the stored fix untouched.
    pub fn poll_fix(&mut self, timeout_ms: u32) -> Result<GnssFix, ModemError> {
        let text = self.send_query("AT+CGNSINF", timeout_ms)?;
        let payload = extract_payload(&text, "+CGNSINF:").ok_or(ModemError::ParseError)?;

        match parse_cgnsinf(payload)? {
            ParsedFix::Fix(mut fix) => {
                fix.captured_at = self.timer.now_ms();
                self.fix = fix;
                Ok(fix)
            }
            ParsedFix::NoFix => {
                self.fix.valid = false;
                Err(ModemError::NoFix)
            }
            ParsedFix::NotRunning => Err(ModemError::NotRunning),
        }
    }
}

/// Locate `prefix` in a response capture and return the rest of that line
pub(crate) fn extract_payload<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let start = text.find(prefix)? + prefix.len();
    let rest = &text[start..];
    let end = rest.find('\r').unwrap_or(rest.len());
    Some(rest[..end].trim_start())
}

/// Parse a comma-delimited CGNSINF payload
///
/// Structural problems (too few fields, unparseable mandatory numbers)
/// return `ParseError`; missing optional fields never do.
pub(crate) fn parse_cgnsinf(payload: &str) -> Result<ParsedFix, ModemError> {
    if payload.matches(',').count() < MIN_DELIMITERS {
        return Err(ModemError::ParseError);
    }

    let mut fields: heapless::Vec<&str, 24> = heapless::Vec::new();
    for f in payload.split(',') {
        if fields.push(f).is_err() {
            break;
        }
    }
    if fields.len() <= IDX_SATS {
        return Err(ModemError::ParseError);
    }

    if fields[IDX_RUN].trim() != "1" {
        return Ok(ParsedFix::NotRunning);
    }
    if fields[IDX_FIX].trim() != "1" {
        return Ok(ParsedFix::NoFix);
    }

    let mut fix = GnssFix {
        valid: true,
        latitude: parse_f64(fields[IDX_LAT])?,
        longitude: parse_f64(fields[IDX_LON])?,
        altitude: parse_f64(fields[IDX_ALT])?,
        speed: parse_f64(fields[IDX_SPEED])? as f32,
        course: parse_f64(fields[IDX_COURSE])? as f32,
        satellites: fields[IDX_SATS].trim().parse().unwrap_or(0),
        ..GnssFix::default()
    };

    // DOP offsets vary between vendor firmware builds, best effort only
    for (idx, slot) in (IDX_HDOP..=IDX_VDOP).zip([&mut fix.hdop, &mut fix.pdop, &mut fix.vdop]) {
        if let Some(field) = fields.get(idx) {
            *slot = field.trim().parse().unwrap_or(0.0);
        }
    }

    if let Some(utc) = parse_utc14(fields[IDX_UTC]) {
        fix.utc = utc;
    }

    Ok(ParsedFix::Fix(fix))
}

fn parse_f64(field: &str) -> Result<f64, ModemError> {
    field.trim().parse().map_err(|_| ModemError::ParseError)
}

/// Decode a `yyyyMMddHHmmss` timestamp, ignoring any fractional suffix
fn parse_utc14(field: &str) -> Option<UtcTime> {
    let digits = field.trim().as_bytes();
    if digits.len() < 14 || !digits[..14].iter().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let num = |range: core::ops::Range<usize>| -> u16 {
        digits[range].iter().fold(0u16, |acc, b| acc * 10 + (b - b'0') as u16)
    };
    Some(UtcTime {
        year: num(0..4),
        month: num(4..6) as u8,
        day: num(6..8) as u8,
        hour: num(8..10) as u8,
        minute: num(10..12) as u8,
        second: num(12..14) as u8,
    })
}
