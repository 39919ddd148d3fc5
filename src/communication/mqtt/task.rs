//! MQTT telemetry task
//!
//! Waits for the cellular link, brings the broker session up through the
//! command bridge, then publishes status records as JSON lines. A failed
//! publish tears the session state down locally; the next pass reconfigures
//! and reconnects once the link is back.

use crate::core::events::{EventGroup, SystemEvents};
use crate::parameters::MqttBrokerConfig;
use crate::subsystems::modem::{CommandBridge, ModemOp, ResponseSignal, StatusReporter};
use crate::{log_info, log_warn};
use embassy_time::Timer;

/// MQTT task tuning
pub struct MqttTaskConfig {
    /// Topic all telemetry records are published on
    pub telemetry_topic: &'static str,
    /// Publish QoS
    pub qos: u8,
    /// Bounded wait for a free command-queue slot
    pub queue_wait_ms: u64,
    /// Bounded wait for a publish/configure result
    pub response_wait_ms: u64,
    /// Bounded wait for the connect result (SMCONN is slow)
    pub connect_wait_ms: u64,
    /// Delay before retrying after a failed session bring-up
    pub retry_delay_ms: u64,
    /// Idle tick between loop passes
    pub loop_tick_ms: u64,
}

impl Default for MqttTaskConfig {
    fn default() -> Self {
        Self {
            telemetry_topic: "gentrack/telemetry",
            qos: 1,
            queue_wait_ms: 100,
            response_wait_ms: 20_000,
            connect_wait_ms: 45_000,
            retry_delay_ms: 10_000,
            loop_tick_ms: 250,
        }
    }
}

/// MQTT telemetry entry point
///
/// Never returns. Without broker credentials the task parks itself; without
/// a cellular link it idles until `CELLULAR_READY` is set.
pub async fn run_mqtt_task(
    bridge: &'static CommandBridge,
    reporter: &'static StatusReporter,
    events: &'static EventGroup,
    responder: &'static ResponseSignal,
    broker: MqttBrokerConfig,
    config: MqttTaskConfig,
) -> ! {
    if !broker.is_configured() {
        log_warn!("No MQTT broker configured, telemetry publishing disabled");
        loop {
            Timer::after_secs(60).await;
        }
    }

    let mut session_up = false;

    loop {
        if !events.contains(SystemEvents::CELLULAR_READY) {
            session_up = false;
            Timer::after_millis(config.loop_tick_ms).await;
            continue;
        }

        if !session_up {
            let configured = bridge
                .submit(
                    ModemOp::ConfigureMqtt(broker.clone()),
                    responder,
                    config.queue_wait_ms,
                    config.response_wait_ms,
                )
                .await;
            if configured != Ok(true) {
                log_warn!("MQTT configure failed, retrying");
                Timer::after_millis(config.retry_delay_ms).await;
                continue;
            }

            let connected = bridge
                .submit(
                    ModemOp::ConnectMqtt,
                    responder,
                    config.queue_wait_ms,
                    config.connect_wait_ms,
                )
                .await;
            if connected != Ok(true) {
                log_warn!("MQTT connect failed, retrying");
                Timer::after_millis(config.retry_delay_ms).await;
                continue;
            }
            log_info!("MQTT session up");
            session_up = true;
        }

        if !events.take(SystemEvents::MQTT_DATA_READY).is_empty() {
            while let Some(record) = reporter.try_next() {
                let json = match record.to_json() {
                    Ok(json) => json,
                    Err(_) => continue,
                };
                // Record lines fit the payload bound by construction
                let op = match ModemOp::publish(
                    config.telemetry_topic,
                    json.as_bytes(),
                    config.qos,
                    false,
                ) {
                    Ok(op) => op,
                    Err(_) => continue,
                };

                match bridge
                    .submit(op, responder, config.queue_wait_ms, config.response_wait_ms)
                    .await
                {
                    Ok(true) => {}
                    _ => {
                        log_warn!("Publish failed, reconnecting session");
                        session_up = false;
                        break;
                    }
                }
            }
        }

        Timer::after_millis(config.loop_tick_ms).await;
    }
}
