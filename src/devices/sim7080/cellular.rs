//! Cellular subsystem
//!
//! Registration tracking, APN configuration, PDP activation with retry and
//! RAT fallback, network statistics, and detach diagnostics. The attach
//! sequence suspends GNSS first since the SIM7080G cannot service both
//! radios at full rate during attach.

use crate::parameters::ApnConfig;
use crate::platform::{TimerInterface, UartInterface};
use crate::{log_info, log_warn};
use heapless::String;

use super::gnss::extract_payload;
use super::{Modem, ModemError, StatsSample, MAX_IP_LEN, MAX_OPERATOR_LEN};

/// Registration poll interval
const REG_POLL_MS: u32 = 2_000;

/// PDP activation attempts before giving up on the current RAT
const PDP_MAX_ATTEMPTS: u32 = 3;

/// Settle time between CNACT acceptance and IP verification
const PDP_SETTLE_MS: u32 = 2_000;

/// Active PDP context status from `AT+CNACT?`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct CnactStatus {
    pub active: bool,
    pub ip: String<MAX_IP_LEN>,
}

impl CnactStatus {
    /// Active with a real address, not the placeholder 0.0.0.0
    pub fn has_real_ip(&self) -> bool {
        self.active && !self.ip.is_empty() && self.ip.as_str() != "0.0.0.0"
    }
}

impl<U: UartInterface, T: TimerInterface> Modem<U, T> {
    /// Poll network registration until home/roaming or the deadline
    ///
    /// Returns `Ok(false)` on deadline rather than an error; the caller
    /// decides whether to proceed degraded.
    pub fn ensure_registered(&mut self, max_wait_ms: u32) -> Result<bool, ModemError> {
        let deadline = self.timer.now_ms() + max_wait_ms as u64;
        loop {
            if let Ok(text) = self.send_query("AT+CEREG?", REG_POLL_MS) {
                if let Some(stat) = parse_cereg(&text) {
                    self.link.registration_state = stat;
                    if stat == 1 || stat == 5 {
                        return Ok(true);
                    }
                }
            }
            if self.timer.now_ms() >= deadline {
                return Ok(false);
            }
            self.timer
                .delay_ms(REG_POLL_MS)
                .map_err(ModemError::Platform)?;
        }
    }

    /// Configure the PDP context APN
    ///
    /// The two-argument CNCFG form is rejected by some firmware builds, so
    /// a shorter alternate form is tried on failure. Credentials go in as
    /// separate parameter writes afterwards.
    pub fn configure_apn(&mut self, config: &ApnConfig) -> Result<(), ModemError> {
        if config.apn.is_empty() {
            return Err(ModemError::InvalidState);
        }

        let mut cmd: String<128> = String::new();
        let _ = cmd.push_str("AT+CNCFG=0,1,\"");
        let _ = cmd.push_str(&config.apn);
        let _ = cmd.push_str("\"");
        if self.send_expect_ok(&cmd, 3_000).is_err() {
            cmd.clear();
            let _ = cmd.push_str("AT+CNCFG=0,\"");
            let _ = cmd.push_str(&config.apn);
            let _ = cmd.push_str("\"");
            self.send_expect_ok(&cmd, 3_000)?;
        }

        if !config.user.is_empty() {
            cmd.clear();
            let _ = cmd.push_str("AT+CNCFG=0,3,\"");
            let _ = cmd.push_str(&config.user);
            let _ = cmd.push_str("\"");
            let _ = self.send_expect_ok(&cmd, 3_000);
        }
        if !config.pass.is_empty() {
            cmd.clear();
            let _ = cmd.push_str("AT+CNCFG=0,4,\"");
            let _ = cmd.push_str(&config.pass);
            let _ = cmd.push_str("\"");
            self.send_expect_ok(&cmd, 3_000)?;
        }

        self.link.apn = config.apn.clone();
        Ok(())
    }

    /// Activate PDP context 0 and verify a real IP was assigned
    ///
    /// "OK" without a non-zero address is treated as not-yet-successful.
    /// Retries with exponential backoff (2s, 4s, none after the last).
    pub fn activate_pdp(&mut self, timeout_ms: u32) -> Result<(), ModemError> {
        for attempt in 1..=PDP_MAX_ATTEMPTS {
            // Another context cycle may have left the PDP already up
            if let Ok(text) = self.send_query("AT+CNACT?", 3_000) {
                if let Some(status) = parse_cnact(&text) {
                    if status.has_real_ip() {
                        self.link.ip_address = status.ip;
                        return Ok(());
                    }
                }
            }

            match self.send_at("AT+CNACT=0,1", timeout_ms.min(15_000)) {
                Ok(r) if r.is_ok() => {
                    self.timer
                        .delay_ms(PDP_SETTLE_MS)
                        .map_err(ModemError::Platform)?;
                    if let Ok(text) = self.send_query("AT+CNACT?", 5_000) {
                        if let Some(status) = parse_cnact(&text) {
                            if status.has_real_ip() {
                                log_info!("PDP active, IP {}", status.ip.as_str());
                                self.link.ip_address = status.ip;
                                return Ok(());
                            }
                        }
                    }
                    log_warn!("PDP accepted but no IP assigned, attempt {}", attempt);
                }
                _ => {
                    log_warn!("PDP activation rejected, attempt {}", attempt);
                    self.refresh_detach_reason();
                }
            }

            if attempt < PDP_MAX_ATTEMPTS {
                let backoff_ms = PDP_SETTLE_MS << (attempt - 1);
                self.timer
                    .delay_ms(backoff_ms)
                    .map_err(ModemError::Platform)?;
            }
        }
        Err(ModemError::PdpActivationFailed)
    }

    /// Attach to the network end to end
    ///
    /// SIM check, RAT setup, registration, APN, PDP activation with
    /// automatic-RAT fallback. GNSS is suspended during the attach and
    /// resumed afterwards whatever the outcome, but only if the suspension
    /// itself succeeded.
    pub fn connect_network(&mut self, config: &ApnConfig) -> Result<(), ModemError> {
        self.reset_stats();

        let gnss_was_on = self.gnss_query_power().unwrap_or(false);
        let mut suspended = false;
        if gnss_was_on {
            log_info!("Suspending GNSS for network attach");
            suspended = self.gnss_power_off().is_ok();
            if suspended {
                self.timer.delay_ms(800).map_err(ModemError::Platform)?;
            } else {
                log_warn!("Failed to suspend GNSS before attach");
            }
        }

        let result = self.attach(config);

        if gnss_was_on && suspended {
            self.timer.delay_ms(250).map_err(ModemError::Platform)?;
            if self.gnss_power_on().is_err() {
                log_warn!("Failed to resume GNSS after network attach");
            }
        }

        if result.is_err() {
            self.link.connected = false;
            self.link.ip_address.clear();
            self.reset_stats();
        }
        result
    }

    fn attach(&mut self, config: &ApnConfig) -> Result<(), ModemError> {
        let text = self.send_query("AT+CPIN?", 2_000)?;
        if !text.contains("+CPIN: READY") {
            self.record_error("SIM not ready for attach");
            return Err(ModemError::SimLocked);
        }

        let _ = self.send_expect_ok("AT+CFUN=1", 5_000);
        let _ = self.send_expect_ok("AT+CMNB=1", 2_000);
        let _ = self.send_expect_ok("AT+CNMP=38", 2_000);
        let _ = self.send_expect_ok("AT+CGATT=1", 5_000);
        let _ = self.send_expect_ok("AT+COPS=0", 5_000);

        if !self.ensure_registered(120_000)? {
            log_warn!("Not registered yet, proceeding with attach anyway");
        }

        self.configure_apn(config)?;

        if self.activate_pdp(90_000).is_err() {
            // Cat-M1-only attach failed, let the modem pick the RAT
            log_warn!("PDP failed under Cat-M1, falling back to automatic RAT");
            let _ = self.send_expect_ok("AT+CNMP=2", 2_000);
            let _ = self.ensure_registered(60_000);
            if self.activate_pdp(90_000).is_err() {
                self.refresh_detach_reason();
                self.record_error("PDP activation failed after RAT fallback");
                return Err(ModemError::PdpActivationFailed);
            }
        }

        if let Ok(text) = self.send_query("AT+CNACT?", 3_000) {
            if let Some(status) = parse_cnact(&text) {
                self.link.ip_address = status.ip;
            }
        }

        let _ = self.operator_name();
        let _ = self.signal_strength();

        self.link.connected = true;
        self.link.last_update = self.timer.now_ms();
        self.link.last_detach_reason.clear();
        self.reset_stats();
        let _ = self.update_stats();
        log_info!("Attached to network");
        Ok(())
    }

    /// Deactivate PDP context 0
    pub fn disconnect_network(&mut self) -> Result<(), ModemError> {
        self.send_expect_ok("AT+CNACT=0,0", 10_000)?;
        self.link.connected = false;
        self.link.ip_address.clear();
        Ok(())
    }

    /// Re-check the link and refresh the snapshot
    ///
    /// PDP context first, registration as a fallback. On a fresh detach the
    /// CEER reason is captured before reporting disconnected.
    pub fn is_network_connected(&mut self) -> bool {
        let was_connected = self.link.connected;

        if let Ok(text) = self.send_query("AT+CNACT?", 2_000) {
            if let Some(status) = parse_cnact(&text) {
                if status.active {
                    self.link.connected = true;
                    self.link.ip_address = status.ip;
                    self.link.last_update = self.timer.now_ms();
                    let _ = self.update_stats();
                    return true;
                }
                self.link.ip_address.clear();
            }
        }

        if let Ok(text) = self.send_query("AT+CEREG?", 2_000) {
            if let Some(stat) = parse_cereg(&text) {
                self.link.registration_state = stat;
                if stat == 1 || stat == 5 {
                    self.link.connected = true;
                    self.link.last_update = self.timer.now_ms();
                    let _ = self.update_stats();
                    return true;
                }
            }
        }

        self.link.connected = false;
        self.reset_stats();
        if was_connected {
            self.refresh_detach_reason();
        }
        false
    }

    /// Signal strength in dBm, -100 when unknown
    pub fn signal_strength(&mut self) -> Result<i8, ModemError> {
        let text = self.send_query("AT+CSQ", 2_000)?;
        let dbm = parse_csq(&text).ok_or(ModemError::ParseError)?;
        self.link.signal_dbm = dbm;
        Ok(dbm)
    }

    /// Registered operator name from `AT+COPS?`
    pub fn operator_name(&mut self) -> Result<String<MAX_OPERATOR_LEN>, ModemError> {
        let text = self.send_query("AT+COPS?", 2_000)?;
        let name = parse_cops(&text).ok_or(ModemError::ParseError)?;
        self.link.operator_name = name.clone();
        Ok(name)
    }

    /// Module IMEI from `AT+GSN`
    pub fn imei(&mut self) -> Result<String<16>, ModemError> {
        let text = self.send_query("AT+GSN", 2_000)?;
        let mut imei: String<16> = String::new();
        for line in text.lines() {
            let line = line.trim();
            if line.len() >= 14 && line.bytes().all(|b| b.is_ascii_digit()) {
                let _ = imei.push_str(line);
                break;
            }
        }
        if imei.is_empty() {
            return Err(ModemError::ParseError);
        }
        self.link.imei = imei.clone();
        Ok(imei)
    }

    /// Refresh byte counters and throughput from `AT+NETDEVSTATUS=0`
    ///
    /// When the device reports zero bps rates, throughput is derived from
    /// the byte-counter delta over elapsed wall time.
    pub fn update_stats(&mut self) -> Result<(), ModemError> {
        if !self.link.connected {
            return Err(ModemError::InvalidState);
        }
        let text = self.send_query("AT+NETDEVSTATUS=0", 2_000)?;
        let (tx_bytes, rx_bytes, mut tx_bps, mut rx_bps) =
            parse_netdev_status(&text).ok_or(ModemError::ParseError)?;

        let now = self.timer.now_ms();
        if tx_bps == 0 && rx_bps == 0 {
            if let Some(sample) = self.stats_sample {
                let delta_ms = now.saturating_sub(sample.at_ms);
                if delta_ms > 0 {
                    let tx_delta = tx_bytes.saturating_sub(sample.tx_bytes);
                    let rx_delta = rx_bytes.saturating_sub(sample.rx_bytes);
                    tx_bps = ((tx_delta * 1_000) / delta_ms) as u32;
                    rx_bps = ((rx_delta * 1_000) / delta_ms) as u32;
                }
            }
        }

        self.link.tx_bytes = tx_bytes;
        self.link.rx_bytes = rx_bytes;
        self.link.tx_bps = tx_bps;
        self.link.rx_bps = rx_bps;
        self.link.last_update = now;
        self.stats_sample = Some(StatsSample {
            at_ms: now,
            tx_bytes,
            rx_bytes,
        });
        Ok(())
    }

    /// Capture the most recent detach diagnostic from `AT+CEER`
    pub fn refresh_detach_reason(&mut self) {
        if let Ok(text) = self.send_query("AT+CEER", 3_000) {
            if let Some(reason) = extract_payload(&text, "+CEER:") {
                self.link.last_detach_reason.clear();
                let reason = reason.trim();
                let text = if reason.is_empty() { "No detail" } else { reason };
                for c in text.chars() {
                    if self.link.last_detach_reason.push(c).is_err() {
                        break;
                    }
                }
            }
        }
    }

    pub(crate) fn reset_stats(&mut self) {
        self.link.tx_bytes = 0;
        self.link.rx_bytes = 0;
        self.link.tx_bps = 0;
        self.link.rx_bps = 0;
        self.stats_sample = None;
    }
}

/// Extract the registration <stat> from a CEREG response
pub(crate) fn parse_cereg(text: &str) -> Option<u8> {
    let payload = extract_payload(text, "+CEREG:")?;
    let mut fields = payload.split(',');
    let _n = fields.next()?;
    fields.next()?.trim().parse().ok()
}

/// Extract context status and IP from a CNACT response
///
/// Multiple contexts may be listed; the first active one wins.
pub(crate) fn parse_cnact(text: &str) -> Option<CnactStatus> {
    let mut found = false;
    let mut status = CnactStatus::default();
    for line in text.lines() {
        let Some(idx) = line.find("+CNACT:") else {
            continue;
        };
        found = true;
        let payload = &line[idx + "+CNACT:".len()..];
        let mut fields = payload.split(',');
        let _cid = fields.next();
        let Some(state) = fields.next() else {
            continue;
        };
        if state.trim() == "1" {
            status.active = true;
            if let Some(rest) = fields.next() {
                let ip = rest.trim().trim_matches('"').trim();
                let _ = status.ip.push_str(ip);
            }
            return Some(status);
        }
    }
    if found {
        Some(status)
    } else {
        None
    }
}

/// Convert a CSQ response to dBm, 99 meaning unknown
pub(crate) fn parse_csq(text: &str) -> Option<i8> {
    let payload = extract_payload(text, "+CSQ:")?;
    let csq: i32 = payload.split(',').next()?.trim().parse().ok()?;
    if csq == 99 {
        return Some(-100);
    }
    let dbm = -113 + 2 * csq;
    Some(dbm.clamp(-113, -51) as i8)
}

/// Extract the quoted operator name from a COPS response
pub(crate) fn parse_cops(text: &str) -> Option<String<MAX_OPERATOR_LEN>> {
    let payload = extract_payload(text, "+COPS:")?;
    let start = payload.find('"')? + 1;
    let rest = &payload[start..];
    let end = rest.find('"')?;
    let mut name: String<MAX_OPERATOR_LEN> = String::new();
    for c in rest[..end].chars() {
        if name.push(c).is_err() {
            break;
        }
    }
    Some(name)
}

/// Parse a NETDEVSTATUS line into (tx_bytes, rx_bytes, tx_bps, rx_bps)
///
/// Firmware builds differ in field count, so the trailing numeric tokens
/// are taken positionally from the end of the line.
pub(crate) fn parse_netdev_status(text: &str) -> Option<(u64, u64, u32, u32)> {
    let start = text.find("+NETDEVSTATUS")?;
    let rest = &text[start..];
    let line_end = rest.find('\n').unwrap_or(rest.len());
    let mut line = &rest[..line_end];
    if let Some(colon) = line.find(':') {
        line = &line[colon + 1..];
    }

    let mut values: heapless::Vec<u64, 8> = heapless::Vec::new();
    for token in line.split(',') {
        let token = token.trim().trim_matches('\r');
        if token.is_empty() {
            continue;
        }
        if let Ok(v) = token.parse::<u64>() {
            if values.push(v).is_err() {
                break;
            }
        }
    }

    let n = values.len();
    if n >= 6 {
        let tx_bps = values[n - 2].min(u32::MAX as u64) as u32;
        let rx_bps = values[n - 1].min(u32::MAX as u64) as u32;
        Some((values[n - 4], values[n - 3], tx_bps, rx_bps))
    } else if n >= 4 {
        Some((values[n - 2], values[n - 1], 0, 0))
    } else {
        None
    }
}
