//! Runtime configuration
//!
//! Carrier and broker settings used by the cellular attach sequence and the
//! MQTT session. Defaults can be baked in at build time via environment
//! variables (`APN_NAME`, `MQTT_HOST`, ...), and overridden at runtime before
//! the orchestrator task starts.

use heapless::String;

/// Maximum APN length (3GPP TS 23.003)
pub const MAX_APN_LEN: usize = 63;

/// Maximum carrier username/password length
pub const MAX_CRED_LEN: usize = 64;

/// Maximum broker hostname length
pub const MAX_HOST_LEN: usize = 96;

/// Maximum MQTT client identifier length (MQTT 3.1 allows more, brokers vary)
pub const MAX_CLIENT_ID_LEN: usize = 64;

/// Carrier access point configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApnConfig {
    /// Access point name, empty means use the SIM's default bearer
    pub apn: String<MAX_APN_LEN>,
    /// PAP/CHAP username, empty means no authentication
    pub user: String<MAX_CRED_LEN>,
    /// PAP/CHAP password
    pub pass: String<MAX_CRED_LEN>,
}

impl ApnConfig {
    /// Create a configuration with an APN and no authentication
    pub fn new(apn: &str) -> Self {
        Self {
            apn: String::try_from(apn).unwrap_or_else(|_| String::new()),
            user: String::new(),
            pass: String::new(),
        }
    }

    /// Whether the carrier requires PAP/CHAP credentials
    pub fn has_auth(&self) -> bool {
        !self.user.is_empty()
    }
}

impl Default for ApnConfig {
    fn default() -> Self {
        let apn = option_env!("APN_NAME").unwrap_or("");
        let user = option_env!("APN_USER").unwrap_or("");
        let pass = option_env!("APN_PASS").unwrap_or("");
        Self {
            apn: String::try_from(apn).unwrap_or_else(|_| String::new()),
            user: String::try_from(user).unwrap_or_else(|_| String::new()),
            pass: String::try_from(pass).unwrap_or_else(|_| String::new()),
        }
    }
}

/// MQTT broker configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttBrokerConfig {
    /// Broker hostname or IP address
    pub host: String<MAX_HOST_LEN>,
    /// Broker TCP port
    pub port: u16,
    /// Broker username, empty means anonymous
    pub user: String<MAX_CRED_LEN>,
    /// Broker password
    pub pass: String<MAX_CRED_LEN>,
    /// Client identifier presented in CONNECT
    pub client_id: String<MAX_CLIENT_ID_LEN>,
    /// Keepalive interval in seconds
    pub keepalive_secs: u16,
}

impl MqttBrokerConfig {
    /// Whether a broker has been configured
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty()
    }
}

impl Default for MqttBrokerConfig {
    fn default() -> Self {
        let host = option_env!("MQTT_HOST").unwrap_or("");
        let port = match option_env!("MQTT_PORT") {
            Some(p) => p.parse().unwrap_or(1883),
            None => 1883,
        };
        let user = option_env!("MQTT_USER").unwrap_or("");
        let pass = option_env!("MQTT_PASS").unwrap_or("");
        let client_id = option_env!("MQTT_CLIENT_ID").unwrap_or("gentrack");
        Self {
            host: String::try_from(host).unwrap_or_else(|_| String::new()),
            port,
            user: String::try_from(user).unwrap_or_else(|_| String::new()),
            pass: String::try_from(pass).unwrap_or_else(|_| String::new()),
            client_id: String::try_from(client_id).unwrap_or_else(|_| String::new()),
            keepalive_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apn_config_new() {
        let config = ApnConfig::new("iot.carrier.example");
        assert_eq!(config.apn.as_str(), "iot.carrier.example");
        assert!(!config.has_auth());
    }

    #[test]
    fn test_apn_config_auth() {
        let mut config = ApnConfig::new("iot.carrier.example");
        config.user = String::try_from("user1").unwrap();
        config.pass = String::try_from("secret").unwrap();
        assert!(config.has_auth());
    }

    #[test]
    fn test_apn_too_long_becomes_empty() {
        let long = "x".repeat(MAX_APN_LEN + 1);
        let config = ApnConfig::new(&long);
        assert!(config.apn.is_empty());
    }

    #[test]
    fn test_broker_config_default_port() {
        let config = MqttBrokerConfig::default();
        // Unless overridden at build time, the standard unencrypted port
        assert!(config.port > 0);
        assert_eq!(config.keepalive_secs, 60);
    }

    #[test]
    fn test_broker_is_configured() {
        let mut config = MqttBrokerConfig::default();
        config.host = String::new();
        assert!(!config.is_configured());
        config.host = String::try_from("broker.example.com").unwrap();
        assert!(config.is_configured());
    }
}
