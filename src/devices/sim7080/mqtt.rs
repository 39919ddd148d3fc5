//! MQTT over AT (SM* command set)
//!
//! The SIM7080G embeds an MQTT client controlled through `AT+SMCONF` /
//! `AT+SMCONN` / `AT+SMPUB`. Publishing is two-phase: the header announces
//! the payload length, the modem answers with a prompt, and the payload
//! bytes follow raw. Incoming messages for subscribed topics arrive as
//! `+SMSUB:` unsolicited lines with the payload on the following line.

use crate::parameters::MqttBrokerConfig;
use crate::platform::{TimerInterface, UartInterface};
use core::fmt::Write as _;
use heapless::String;

use super::at::AtOutcome;
use super::{Modem, ModemError};

/// Topic length bound, enforced at submission
pub const MAX_TOPIC_LEN: usize = 96;

/// Payload length bound, enforced at submission
pub const MAX_PAYLOAD_LEN: usize = 256;

const CONF_TIMEOUT_MS: u32 = 2_000;

/// One message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub topic: String<MAX_TOPIC_LEN>,
    pub payload: String<MAX_PAYLOAD_LEN>,
}

impl<U: UartInterface, T: TimerInterface> Modem<U, T> {
    /// Push broker settings into the embedded MQTT client
    pub fn mqtt_configure(&mut self, config: &MqttBrokerConfig) -> Result<(), ModemError> {
        if !config.is_configured() {
            return Err(ModemError::InvalidState);
        }

        let mut cmd: String<192> = String::new();
        let _ = write!(
            cmd,
            "AT+SMCONF=\"URL\",\"{},{}\"",
            config.host, config.port
        );
        self.send_expect_ok(&cmd, CONF_TIMEOUT_MS)?;

        if !config.user.is_empty() {
            cmd.clear();
            let _ = write!(cmd, "AT+SMCONF=\"USERNAME\",\"{}\"", config.user);
            self.send_expect_ok(&cmd, CONF_TIMEOUT_MS)?;
        }
        if !config.pass.is_empty() {
            cmd.clear();
            let _ = write!(cmd, "AT+SMCONF=\"PASSWORD\",\"{}\"", config.pass);
            self.send_expect_ok(&cmd, CONF_TIMEOUT_MS)?;
        }

        cmd.clear();
        let _ = write!(cmd, "AT+SMCONF=\"CLIENTID\",\"{}\"", config.client_id);
        self.send_expect_ok(&cmd, CONF_TIMEOUT_MS)?;

        // Keepalive and clean session are advisory, old firmware lacks them
        cmd.clear();
        let _ = write!(cmd, "AT+SMCONF=\"KEEPTIME\",{}", config.keepalive_secs);
        let _ = self.send_expect_ok(&cmd, CONF_TIMEOUT_MS);
        let _ = self.send_expect_ok("AT+SMCONF=\"CLEANSS\",1", CONF_TIMEOUT_MS);

        Ok(())
    }

    /// Open the MQTT session
    pub fn mqtt_connect(&mut self, timeout_ms: u32) -> Result<(), ModemError> {
        self.send_expect_ok("AT+SMCONN", timeout_ms)
    }

    /// Close the MQTT session
    pub fn mqtt_disconnect(&mut self) -> Result<(), ModemError> {
        self.send_expect_ok("AT+SMDISC", 5_000)
    }

    /// Publish one message
    ///
    /// Oversized topics or payloads are rejected before anything touches
    /// the wire, never truncated.
    pub fn mqtt_publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
        timeout_ms: u32,
    ) -> Result<(), ModemError> {
        if topic.len() > MAX_TOPIC_LEN || payload.len() > MAX_PAYLOAD_LEN {
            return Err(ModemError::InvalidState);
        }

        let mut header: String<160> = String::new();
        let _ = write!(
            header,
            "AT+SMPUB=\"{}\",{},{},{}",
            topic,
            payload.len(),
            qos,
            if retain { 1 } else { 0 }
        );

        let response = self.send_prompted(&header, payload, 2_000, timeout_ms)?;
        match response.outcome {
            AtOutcome::Ok => Ok(()),
            AtOutcome::Error => Err(ModemError::ProtocolError),
            AtOutcome::Timeout => Err(ModemError::Timeout),
        }
    }

    /// Subscribe to a topic
    pub fn mqtt_subscribe(&mut self, topic: &str, qos: u8) -> Result<(), ModemError> {
        if topic.len() > MAX_TOPIC_LEN {
            return Err(ModemError::InvalidState);
        }
        let mut cmd: String<128> = String::new();
        let _ = write!(cmd, "AT+SMSUB=\"{}\",{}", topic, qos);
        self.send_expect_ok(&cmd, 5_000)
    }

    /// Unsubscribe from a topic
    pub fn mqtt_unsubscribe(&mut self, topic: &str) -> Result<(), ModemError> {
        if topic.len() > MAX_TOPIC_LEN {
            return Err(ModemError::InvalidState);
        }
        let mut cmd: String<128> = String::new();
        let _ = write!(cmd, "AT+SMUNSUB=\"{}\"", topic);
        self.send_expect_ok(&cmd, 5_000)
    }

    /// Drain buffered unsolicited lines and return the first subscription
    /// message, if any
    ///
    /// Non-blocking; meant to be called from the orchestrator loop between
    /// exchanges. `+SMSUB: "topic",<len>` announces `<len>` payload bytes
    /// on the following line.
    pub fn mqtt_check_incoming(&mut self) -> Result<Option<IncomingMessage>, ModemError> {
        let mut handle = self.transport.acquire(&mut self.timer)?;
        if !handle.available() {
            return Ok(None);
        }

        let mut buf: heapless::Vec<u8, 512> = heapless::Vec::new();
        let mut scratch = [0u8; 64];
        while handle.available() && buf.len() < buf.capacity() {
            let n = handle.read(&mut scratch).map_err(ModemError::Platform)?;
            if n == 0 {
                break;
            }
            for &b in &scratch[..n] {
                if buf.push(b).is_err() {
                    break;
                }
            }
        }
        drop(handle);

        let text = core::str::from_utf8(&buf).map_err(|_| ModemError::ParseError)?;
        Ok(parse_smsub(text))
    }
}

/// Parse the first complete `+SMSUB:` notification in `text`
pub(crate) fn parse_smsub(text: &str) -> Option<IncomingMessage> {
    let start = text.find("+SMSUB:")?;
    let rest = &text[start..];
    let header_end = rest.find('\n')?;
    let header = rest[..header_end].trim_end_matches('\r');

    let q1 = header.find('"')? + 1;
    let q2 = header[q1..].find('"')? + q1;
    let topic_text = &header[q1..q2];

    let len: usize = header.rsplit(',').next()?.trim().parse().ok()?;
    let body = &rest[header_end + 1..];
    if body.len() < len {
        return None;
    }

    let mut topic: String<MAX_TOPIC_LEN> = String::new();
    topic.push_str(topic_text).ok()?;
    let mut payload: String<MAX_PAYLOAD_LEN> = String::new();
    payload.push_str(body.get(..len)?).ok()?;

    Some(IncomingMessage { topic, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{MockTimer, MockUart};

    fn modem(uart: MockUart) -> Modem<MockUart, MockTimer> {
        Modem::new(uart, MockTimer::new())
    }

    fn broker() -> MqttBrokerConfig {
        let mut config = MqttBrokerConfig::default();
        config.host = heapless::String::try_from("broker.example.com").unwrap();
        config.port = 1883;
        config.user = heapless::String::try_from("dev1").unwrap();
        config.pass = heapless::String::try_from("secret").unwrap();
        config.client_id = heapless::String::try_from("genset-01").unwrap();
        config
    }

    #[test]
    fn test_configure_full() {
        let mut uart = MockUart::new();
        for _ in 0..6 {
            uart.queue_response(b"\r\nOK\r\n");
        }
        let mut m = modem(uart);

        m.mqtt_configure(&broker()).unwrap();
        let tx = m.transport_tx();
        assert!(tx.contains("AT+SMCONF=\"URL\",\"broker.example.com,1883\""));
        assert!(tx.contains("AT+SMCONF=\"USERNAME\",\"dev1\""));
        assert!(tx.contains("AT+SMCONF=\"PASSWORD\",\"secret\""));
        assert!(tx.contains("AT+SMCONF=\"CLIENTID\",\"genset-01\""));
        assert!(tx.contains("AT+SMCONF=\"KEEPTIME\",60"));
    }

    #[test]
    fn test_configure_anonymous_skips_credentials() {
        let mut uart = MockUart::new();
        for _ in 0..4 {
            uart.queue_response(b"\r\nOK\r\n");
        }
        let mut m = modem(uart);

        let mut config = broker();
        config.user.clear();
        config.pass.clear();
        m.mqtt_configure(&config).unwrap();
        let tx = m.transport_tx();
        assert!(!tx.contains("USERNAME"));
        assert!(!tx.contains("PASSWORD"));
    }

    #[test]
    fn test_configure_requires_host() {
        let mut m = modem(MockUart::new());
        let mut config = broker();
        config.host.clear();
        assert_eq!(m.mqtt_configure(&config).err(), Some(ModemError::InvalidState));
    }

    #[test]
    fn test_publish_two_phase() {
        let mut uart = MockUart::new();
        uart.set_respond_on_any_write(true);
        uart.queue_response(b"> ");
        uart.queue_response(b"\r\nOK\r\n");
        let mut m = modem(uart);

        m.mqtt_publish("status/genset", b"{\"rpm\":1800}", 1, false, 10_000)
            .unwrap();
        let tx = m.transport_tx();
        assert!(tx.contains("AT+SMPUB=\"status/genset\",12,1,0"));
        assert!(tx.contains("{\"rpm\":1800}"));
    }

    #[test]
    fn test_publish_rejects_oversize_without_touching_wire() {
        let mut m = modem(MockUart::new());
        let big = [b'x'; MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            m.mqtt_publish("t", &big, 0, false, 1_000).err(),
            Some(ModemError::InvalidState)
        );
        assert!(m.transport_tx().is_empty());
    }

    #[test]
    fn test_publish_modem_rejection() {
        let mut uart = MockUart::new();
        uart.set_respond_on_any_write(true);
        uart.queue_response(b"> ");
        uart.queue_response(b"\r\nERROR\r\n");
        let mut m = modem(uart);

        assert_eq!(
            m.mqtt_publish("t", b"x", 0, false, 1_000).err(),
            Some(ModemError::ProtocolError)
        );
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let mut uart = MockUart::new();
        uart.queue_response(b"\r\nOK\r\n");
        uart.queue_response(b"\r\nOK\r\n");
        let mut m = modem(uart);

        m.mqtt_subscribe("cmd/genset", 1).unwrap();
        m.mqtt_unsubscribe("cmd/genset").unwrap();
        let tx = m.transport_tx();
        assert!(tx.contains("AT+SMSUB=\"cmd/genset\",1"));
        assert!(tx.contains("AT+SMUNSUB=\"cmd/genset\""));
    }

    #[test]
    fn test_parse_smsub() {
        let msg = parse_smsub("\r\n+SMSUB: \"cmd/genset\",5\r\nstart\r\n").unwrap();
        assert_eq!(msg.topic.as_str(), "cmd/genset");
        assert_eq!(msg.payload.as_str(), "start");
    }

    #[test]
    fn test_parse_smsub_incomplete_payload() {
        assert_eq!(parse_smsub("\r\n+SMSUB: \"cmd/genset\",50\r\nshort"), None);
    }

    #[test]
    fn test_check_incoming() {
        let mut uart = MockUart::new();
        uart.inject_rx_data(b"\r\n+SMSUB: \"cmd/genset\",4\r\nstop\r\n");
        let mut m = modem(uart);

        let msg = m.mqtt_check_incoming().unwrap().unwrap();
        assert_eq!(msg.topic.as_str(), "cmd/genset");
        assert_eq!(msg.payload.as_str(), "stop");
    }

    #[test]
    fn test_check_incoming_empty() {
        let mut m = modem(MockUart::new());
        assert_eq!(m.mqtt_check_incoming().unwrap(), None);
    }

    #[test]
    fn test_connect_disconnect() {
        let mut uart = MockUart::new();
        uart.queue_response(b"\r\nOK\r\n");
        uart.queue_response(b"\r\nOK\r\n");
        let mut m = modem(uart);

        m.mqtt_connect(30_000).unwrap();
        m.mqtt_disconnect().unwrap();
        let tx = m.transport_tx();
        assert!(tx.contains("AT+SMCONN"));
        assert!(tx.contains("AT+SMDISC"));
    }
}
