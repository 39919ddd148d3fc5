//! Modem orchestrator task
//!
//! The single task that owns the modem. Everything the loop does is
//! arbitration: service queued commands from other tasks, keep the cellular
//! link attached (with backoff between attempts), and poll GNSS fixes into
//! status records. Results cross task boundaries only through the command
//! bridge, the status reporter, and the system event bits.

use crate::core::events::{EventGroup, SystemEvents};
use crate::devices::sim7080::{Modem, ModemError, ModemState};
use crate::parameters::ApnConfig;
use crate::platform::{TimerInterface, UartInterface};
use crate::{log_error, log_info, log_warn};
use embassy_time::{Duration, Instant, Timer};

use super::command::{CommandBridge, ModemOp};
use super::status::StatusReporter;

/// Orchestrator loop tuning
pub struct OrchestratorConfig {
    /// Connected-link health check interval
    pub link_poll_interval_ms: u64,
    /// GNSS fix poll interval (a GNSS_UPDATE_REQ event polls sooner)
    pub fix_poll_interval_ms: u64,
    /// Reattach backoff floor
    pub reattach_floor_ms: u64,
    /// Reattach backoff cap
    pub reattach_cap_ms: u64,
    /// Idle tick between loop passes
    pub loop_tick_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            link_poll_interval_ms: 2_000,
            fix_poll_interval_ms: 5_000,
            reattach_floor_ms: 5_000,
            reattach_cap_ms: 120_000,
            loop_tick_ms: 50,
        }
    }
}

/// Reattach interval state
///
/// Doubles on each failure, capped, and resets to the floor on the first
/// success. Keeps a flapping network from busy-looping the modem without
/// letting the retry interval grow unbounded.
pub struct ReattachBackoff {
    current_ms: u64,
    floor_ms: u64,
    cap_ms: u64,
}

impl ReattachBackoff {
    pub fn new(floor_ms: u64, cap_ms: u64) -> Self {
        Self {
            current_ms: floor_ms,
            floor_ms,
            cap_ms,
        }
    }

    /// Delay to wait before the next attempt, doubling for the one after
    pub fn next_delay(&mut self) -> u64 {
        let delay = self.current_ms;
        self.current_ms = (self.current_ms * 2).min(self.cap_ms);
        delay
    }

    pub fn reset(&mut self) {
        self.current_ms = self.floor_ms;
    }
}

/// Execute one bridged operation against the owned modem
pub(crate) fn execute_command<U: UartInterface, T: TimerInterface>(
    modem: &mut Modem<U, T>,
    op: &ModemOp,
) -> bool {
    let result = match op {
        ModemOp::ConfigureMqtt(config) => modem.mqtt_configure(config),
        ModemOp::ConnectMqtt => modem.mqtt_connect(30_000),
        ModemOp::PublishMqtt {
            topic,
            payload,
            qos,
            retain,
        } => modem.mqtt_publish(topic, payload, *qos, *retain, 15_000),
        ModemOp::SubscribeMqtt { topic, qos } => modem.mqtt_subscribe(topic, *qos),
        ModemOp::UnsubscribeMqtt { topic } => modem.mqtt_unsubscribe(topic),
        ModemOp::DisconnectMqtt => modem.mqtt_disconnect(),
    };
    if let Err(e) = &result {
        log_warn!("Bridged modem op failed: {:?}", e);
    }
    result.is_ok()
}

/// Orchestrator entry point
///
/// Never returns. SIM lock or absent hardware parks the modem; the rest of
/// the system keeps running and bridged commands are answered with `false`.
pub async fn run_modem_task<U: UartInterface, T: TimerInterface>(
    mut modem: Modem<U, T>,
    bridge: &'static CommandBridge,
    reporter: &'static StatusReporter,
    events: &'static EventGroup,
    apn: ApnConfig,
    config: OrchestratorConfig,
) -> ! {
    let mut backoff = ReattachBackoff::new(config.reattach_floor_ms, config.reattach_cap_ms);
    let mut next_attach_at = Instant::now();
    let mut last_link_poll = Instant::now();
    let mut last_fix_poll = Instant::now();
    let mut time_synced = false;
    let mut was_connected = false;

    match modem.init() {
        Ok(()) => {
            let _ = modem.gnss_power_on();
        }
        Err(ModemError::SimLocked) | Err(ModemError::ModemAbsent) => {
            log_error!("Modem unavailable: {}", modem.last_error());
            events.set(SystemEvents::ERROR_DETECTED);
            modem.park();
        }
        Err(_) => {
            log_warn!("Modem init failed: {}", modem.last_error());
            next_attach_at = Instant::now() + Duration::from_millis(backoff.next_delay());
        }
    }

    loop {
        // Bridged commands are serviced first and answered exactly once,
        // with `false` whenever the modem cannot take them
        while let Some(cmd) = bridge.try_next() {
            let ok = modem.state() == ModemState::Ready && execute_command(&mut modem, &cmd.op);
            cmd.responder.signal(ok);
        }

        if modem.state() == ModemState::Suspended {
            Timer::after_millis(config.loop_tick_ms).await;
            continue;
        }

        // Retry bring-up until the modem reaches Ready
        if modem.state() != ModemState::Ready {
            if Instant::now() >= next_attach_at {
                match modem.init() {
                    Ok(()) => {
                        backoff.reset();
                        let _ = modem.gnss_power_on();
                    }
                    Err(ModemError::SimLocked) | Err(ModemError::ModemAbsent) => {
                        log_error!("Modem unavailable: {}", modem.last_error());
                        events.set(SystemEvents::ERROR_DETECTED);
                        modem.park();
                    }
                    Err(_) => {
                        next_attach_at =
                            Instant::now() + Duration::from_millis(backoff.next_delay());
                    }
                }
            }
            Timer::after_millis(config.loop_tick_ms).await;
            continue;
        }

        let now = Instant::now();

        if !modem.link().connected {
            if now >= next_attach_at {
                match modem.connect_network(&apn) {
                    Ok(()) => {
                        log_info!("Cellular link up, ip {}", modem.link().ip_address.as_str());
                        backoff.reset();
                        was_connected = true;
                        events.set(SystemEvents::CELLULAR_READY | SystemEvents::STATUS_CHANGE);
                        reporter.publish_cell(&modem.link());
                        // One NTP sync per fresh attach
                        if !time_synced && modem.sync_network_time(15_000).is_ok() {
                            time_synced = true;
                        }
                    }
                    Err(_) => {
                        log_warn!("Network attach failed: {}", modem.last_error());
                        events.clear(SystemEvents::CELLULAR_READY);
                        events.set(SystemEvents::ERROR_DETECTED);
                        next_attach_at = now + Duration::from_millis(backoff.next_delay());
                    }
                }
            }
        } else if now.duration_since(last_link_poll).as_millis() >= config.link_poll_interval_ms {
            last_link_poll = now;
            let up = modem.is_network_connected();
            if up != was_connected {
                events.set(SystemEvents::STATUS_CHANGE);
                reporter.publish_cell(&modem.link());
            }
            if up {
                events.set(SystemEvents::CELLULAR_READY);
            } else {
                log_warn!("Link lost: {}", modem.link().last_detach_reason.as_str());
                events.clear(SystemEvents::CELLULAR_READY);
                time_synced = false;
                next_attach_at = now + Duration::from_millis(backoff.next_delay());
            }
            was_connected = up;
        }

        let fix_requested = !events.take(SystemEvents::GNSS_UPDATE_REQ).is_empty();
        if fix_requested
            || now.duration_since(last_fix_poll).as_millis() >= config.fix_poll_interval_ms
        {
            last_fix_poll = now;
            match modem.poll_fix(2_000) {
                Ok(fix) => {
                    reporter.publish_gnss(&fix);
                    events.set(SystemEvents::MQTT_DATA_READY);
                }
                Err(ModemError::NoFix) => {
                    // Still a record: consumers want to see fix loss
                    reporter.publish_gnss(&modem.fix());
                }
                Err(ModemError::NotRunning) => {
                    let _ = modem.gnss_power_on();
                }
                Err(_) => {
                    // No update this cycle
                }
            }
        }

        Timer::after_millis(config.loop_tick_ms).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{MockTimer, MockUart};

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut backoff = ReattachBackoff::new(5_000, 120_000);
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![5_000, 10_000, 20_000, 40_000, 80_000, 120_000, 120_000]
        );
    }

    #[test]
    fn test_backoff_resets_to_floor_on_success() {
        let mut backoff = ReattachBackoff::new(5_000, 120_000);
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), 5_000);
        assert_eq!(backoff.next_delay(), 10_000);
    }

    #[test]
    fn test_execute_command_connect() {
        let mut uart = MockUart::new();
        uart.queue_response(b"\r\nOK\r\n");
        let mut modem = Modem::new(uart, MockTimer::new());

        assert!(execute_command(&mut modem, &ModemOp::ConnectMqtt));
        assert!(modem.transport_tx().contains("AT+SMCONN"));
    }

    #[test]
    fn test_execute_command_publish() {
        let mut uart = MockUart::new();
        uart.set_respond_on_any_write(true);
        uart.queue_response(b"> ");
        uart.queue_response(b"\r\nOK\r\n");
        let mut modem = Modem::new(uart, MockTimer::new());

        let op = ModemOp::publish("status/genset", b"{\"v\":1}", 1, false).unwrap();
        assert!(execute_command(&mut modem, &op));
        assert!(modem.transport_tx().contains("AT+SMPUB=\"status/genset\",7,1,0"));
    }

    #[test]
    fn test_execute_command_reports_rejection() {
        let mut uart = MockUart::new();
        uart.queue_response(b"\r\nERROR\r\n");
        let mut modem = Modem::new(uart, MockTimer::new());

        assert!(!execute_command(&mut modem, &ModemOp::DisconnectMqtt));
    }

    #[test]
    fn test_orchestrator_config_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.link_poll_interval_ms, 2_000);
        assert_eq!(config.reattach_floor_ms, 5_000);
        assert_eq!(config.reattach_cap_ms, 120_000);
    }
}
