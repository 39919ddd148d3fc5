//! Modem lifecycle
//!
//! Boot probing, SIM-ready wait, baseline configuration, soft reset and
//! shutdown. The state machine is linear:
//! `Uninitialized → Probing → WaitingForSim → Configuring → Ready`, with
//! `Ready → Probing` on soft reset and anything → `Uninitialized` on
//! shutdown. A modem that never answers the probes is reported absent, not
//! fatal; the rest of the system boots without it.

use crate::platform::{TimerInterface, UartInterface};
use crate::{log_info, log_warn};

use super::{Modem, ModemError, ModemState};

/// Delay after opening the UART before probing, lets the module boot
const BOOT_SETTLE_MS: u32 = 300;

/// SIM-ready poll interval
const SIM_POLL_MS: u32 = 500;

/// Hard cap on the SIM-ready wait
const SIM_WAIT_MS: u32 = 30_000;

/// Window watched for the ready URC after a soft reset
const RESET_WATCH_MS: u32 = 20_000;

/// Baseline config sub-step retries
const CONFIG_RETRIES: u32 = 3;

impl<U: UartInterface, T: TimerInterface> Modem<U, T> {
    /// Bring the modem from power-on to `Ready`
    ///
    /// Probe, wait for the SIM, apply baseline configuration. Network time
    /// configuration failing is logged but does not block `Ready`.
    pub fn init(&mut self) -> Result<(), ModemError> {
        self.state = ModemState::Probing;
        if let Err(e) = self.probe() {
            self.state = ModemState::Uninitialized;
            self.record_error("No AT response, modem absent");
            return Err(e);
        }

        self.state = ModemState::WaitingForSim;
        if let Err(e) = self.wait_for_sim() {
            self.state = ModemState::Uninitialized;
            return Err(e);
        }

        self.state = ModemState::Configuring;
        if let Err(e) = self.apply_baseline_config() {
            self.state = ModemState::Uninitialized;
            self.record_error("Baseline configuration failed");
            return Err(e);
        }

        if self.configure_network_time().is_err() {
            // Not critical, NTP can be configured again before first use
            log_warn!("Network time configuration failed, continuing");
        }

        self.state = ModemState::Ready;
        self.last_error.clear();
        log_info!("Modem initialized");
        Ok(())
    }

    /// Soft reset via `AT+CRESET`
    ///
    /// Watches unsolicited lines for a ready marker, then re-applies the
    /// full configuration stage. On timeout no stored link or fix data is
    /// altered.
    pub fn soft_reset(&mut self) -> Result<(), ModemError> {
        log_info!("Soft reset");
        // Some firmware resets before answering, success not required
        let _ = self.send_at("AT+CRESET", 2_000);

        self.state = ModemState::Probing;
        if self
            .wait_for_any(&["RDY", "READY", "PB DONE"], RESET_WATCH_MS)
            .is_err()
        {
            self.record_error("Modem did not become ready after reset");
            return Err(ModemError::ResetTimeout);
        }

        self.timer.delay_ms(200).map_err(ModemError::Platform)?;

        let mut responding = false;
        for _ in 0..8 {
            if self.send_expect_ok("AT", 1_000).is_ok() {
                responding = true;
                break;
            }
            self.timer.delay_ms(500).map_err(ModemError::Platform)?;
        }
        if !responding {
            self.record_error("AT timeout after reset");
            return Err(ModemError::ResetTimeout);
        }

        self.state = ModemState::Configuring;
        self.apply_baseline_config()?;
        if self.configure_network_time().is_err() {
            log_warn!("Network time configuration failed after reset");
        }

        // The reset powered the GNSS engine down with everything else
        self.gnss_powered = false;
        self.reset_stats();
        self.state = ModemState::Ready;
        self.last_error.clear();
        log_info!("Soft reset complete");
        Ok(())
    }

    /// Park the modem after an unrecoverable error
    ///
    /// A parked modem answers no further operations until the next
    /// `init`. Used by the orchestrator for SIM lock and absent hardware.
    pub fn park(&mut self) {
        self.state = ModemState::Suspended;
    }

    /// Power the module down and return to `Uninitialized`
    pub fn shutdown(&mut self) {
        if self.gnss_powered {
            let _ = self.gnss_power_off();
        }
        if self.link.connected {
            let _ = self.disconnect_network();
        }
        let _ = self.send_at("AT+CPOWD=1", 5_000);

        self.net_time = super::time::NetworkTime::default();
        self.reset_stats();
        self.link.connected = false;
        self.link.ip_address.clear();
        self.state = ModemState::Uninitialized;
        log_info!("Modem shut down");
    }

    fn probe(&mut self) -> Result<(), ModemError> {
        self.timer
            .delay_ms(BOOT_SETTLE_MS)
            .map_err(ModemError::Platform)?;
        {
            let mut handle = self.transport.acquire(&mut self.timer)?;
            handle.drain();
        }

        if self.send_expect_ok("AT", 1_000).is_ok() {
            return Ok(());
        }

        // Wake-up nudge: kill echo, ask for identification, then retry
        log_info!("No AT response, nudging modem");
        let _ = self.send_at("ATE0", 500);
        let _ = self.send_at("ATI", 1_000);
        if self.send_expect_ok("AT", 1_000).is_ok() {
            return Ok(());
        }

        Err(ModemError::ModemAbsent)
    }

    fn wait_for_sim(&mut self) -> Result<(), ModemError> {
        let deadline = self.timer.now_ms() + SIM_WAIT_MS as u64;
        loop {
            if let Ok(text) = self.send_query("AT+CPIN?", 2_000) {
                if text.contains("+CPIN: READY") {
                    return Ok(());
                }
                if text.contains("+CPIN: SIM PIN") || text.contains("+CPIN: SIM PUK") {
                    self.record_error("SIM requires PIN/PUK unlock");
                    return Err(ModemError::SimLocked);
                }
            }
            if self.timer.now_ms() >= deadline {
                self.record_error("SIM not ready after 30s");
                return Err(ModemError::SimTimeout);
            }
            self.timer
                .delay_ms(SIM_POLL_MS)
                .map_err(ModemError::Platform)?;
        }
    }

    fn apply_baseline_config(&mut self) -> Result<(), ModemError> {
        self.config_step("ATE0", 1_000)?;
        self.config_step("AT+CMEE=2", 1_000)?;
        self.config_step("AT+CFUN=1", 5_000)?;

        // Boot reliability: UART awake, power saving off, no flow control.
        // Best effort, older firmware rejects some of these.
        let _ = self.config_step("AT+CSCLK=0", 1_000);
        let _ = self.config_step("AT+CPSMS=0", 1_000);
        let _ = self.config_step("AT+CEDRXS=0", 1_000);
        let _ = self.config_step("AT+IFC=0,0", 1_000);

        // Preferred RAT and automatic operator selection
        let _ = self.config_step("AT+CMNB=1", 2_000);
        let _ = self.config_step("AT+CNMP=38", 2_000);
        let _ = self.config_step("AT+COPS=0", 5_000);
        let _ = self.config_step("AT+CEREG=2", 1_000);

        Ok(())
    }

    fn config_step(&mut self, cmd: &str, timeout_ms: u32) -> Result<(), ModemError> {
        let mut last = ModemError::ProtocolError;
        for attempt in 1..=CONFIG_RETRIES {
            match self.send_expect_ok(cmd, timeout_ms) {
                Ok(()) => return Ok(()),
                Err(e) => last = e,
            }
            if attempt < CONFIG_RETRIES {
                self.timer.delay_ms(200).map_err(ModemError::Platform)?;
            }
        }
        Err(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{MockTimer, MockUart};

    fn modem(uart: MockUart) -> Modem<MockUart, MockTimer> {
        Modem::new(uart, MockTimer::new())
    }

    fn queue_ok(uart: &mut MockUart, count: usize) {
        for _ in 0..count {
            uart.queue_response(b"\r\nOK\r\n");
        }
    }

    #[test]
    fn test_init_happy_path() {
        let mut uart = MockUart::new();
        // Probe
        uart.queue_response(b"\r\nOK\r\n");
        // SIM ready
        uart.queue_response(b"\r\n+CPIN: READY\r\n\r\nOK\r\n");
        // Baseline config + network time
        queue_ok(&mut uart, 14);
        let mut m = modem(uart);

        m.init().unwrap();
        assert_eq!(m.state(), ModemState::Ready);
        assert!(m.network_time().configured);
        assert!(m.last_error().is_empty());
    }

    #[test]
    fn test_init_modem_absent() {
        let mut m = modem(MockUart::new());
        assert_eq!(m.init().err(), Some(ModemError::ModemAbsent));
        assert_eq!(m.state(), ModemState::Uninitialized);
        // Probe, nudge (ATE0 + ATI), retry
        assert_eq!(m.transport_tx_count("ATE0"), 1);
        assert_eq!(m.transport_tx_count("ATI"), 1);
        assert_eq!(m.transport_tx_count("AT\r"), 2);
    }

    #[test]
    fn test_init_probe_succeeds_after_nudge() {
        let mut uart = MockUart::new();
        // First AT gets garbage, nudge responses, retry succeeds
        uart.queue_response(b"\r\nATATAT\r\n");
        uart.queue_response(b"\r\nOK\r\n");
        uart.queue_response(b"\r\nSIM7080G R1951\r\n\r\nOK\r\n");
        uart.queue_response(b"\r\nOK\r\n");
        uart.queue_response(b"\r\n+CPIN: READY\r\n\r\nOK\r\n");
        queue_ok(&mut uart, 14);
        let mut m = modem(uart);

        m.init().unwrap();
        assert_eq!(m.state(), ModemState::Ready);
    }

    #[test]
    fn test_init_sim_locked_is_terminal() {
        let mut uart = MockUart::new();
        uart.queue_response(b"\r\nOK\r\n");
        uart.queue_response(b"\r\n+CPIN: SIM PIN\r\n\r\nOK\r\n");
        let mut m = modem(uart);

        assert_eq!(m.init().err(), Some(ModemError::SimLocked));
        assert_eq!(m.state(), ModemState::Uninitialized);
        assert!(m.last_error().contains("PIN"));
        // No retry after a lock report
        assert_eq!(m.transport_tx_count("AT+CPIN?"), 1);
    }

    #[test]
    fn test_init_sim_timeout() {
        let mut uart = MockUart::new();
        uart.queue_response(b"\r\nOK\r\n");
        for _ in 0..62 {
            uart.queue_response(b"\r\n+CPIN: NOT READY\r\n\r\nOK\r\n");
        }
        let mut m = modem(uart);

        assert_eq!(m.init().err(), Some(ModemError::SimTimeout));
        assert!(m.timer.now_ms() >= 30_000);
    }

    #[test]
    fn test_init_required_config_step_fails_after_retries() {
        let mut uart = MockUart::new();
        uart.queue_response(b"\r\nOK\r\n");
        uart.queue_response(b"\r\n+CPIN: READY\r\n\r\nOK\r\n");
        // ATE0 rejected on all three attempts
        uart.queue_response(b"\r\nERROR\r\n");
        uart.queue_response(b"\r\nERROR\r\n");
        uart.queue_response(b"\r\nERROR\r\n");
        let mut m = modem(uart);

        assert_eq!(m.init().err(), Some(ModemError::ProtocolError));
        assert_eq!(m.state(), ModemState::Uninitialized);
        assert_eq!(m.transport_tx_count("ATE0"), 3);
    }

    #[test]
    fn test_soft_reset() {
        let mut uart = MockUart::new();
        // CRESET answers OK, ready URC follows in the same burst
        uart.queue_response(b"\r\nOK\r\n\r\nAPP RDY\r\n");
        // AT probe after reset
        uart.queue_response(b"\r\nOK\r\n");
        // Baseline + time config
        queue_ok(&mut uart, 14);
        let mut m = modem(uart);
        m.gnss_powered = true;

        m.soft_reset().unwrap();
        assert_eq!(m.state(), ModemState::Ready);
        assert!(!m.is_gnss_powered());
    }

    #[test]
    fn test_soft_reset_timeout_leaves_data_alone() {
        let mut uart = MockUart::new();
        uart.queue_response(b"\r\nOK\r\n");
        let mut m = modem(uart);
        m.fix.valid = true;
        m.fix.latitude = 35.0;
        m.link.connected = true;

        assert_eq!(m.soft_reset().err(), Some(ModemError::ResetTimeout));
        assert!(m.fix().valid);
        assert_eq!(m.fix().latitude, 35.0);
        assert!(m.link().connected);
    }

    #[test]
    fn test_shutdown() {
        let mut uart = MockUart::new();
        // GNSS off, PDP down, power down
        queue_ok(&mut uart, 3);
        let mut m = modem(uart);
        m.state = ModemState::Ready;
        m.gnss_powered = true;
        m.link.connected = true;
        m.net_time.configured = true;

        m.shutdown();
        assert_eq!(m.state(), ModemState::Uninitialized);
        assert!(!m.link().connected);
        assert!(!m.network_time().configured);
        let tx = m.transport_tx();
        assert!(tx.contains("AT+CGNSPWR=0"));
        assert!(tx.contains("AT+CNACT=0,0"));
        assert!(tx.contains("AT+CPOWD=1"));
    }
}
