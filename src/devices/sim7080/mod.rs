//! SIM7080G combined CatM modem + GNSS driver
//!
//! The SIM7080G exposes both a cellular modem and a GNSS receiver behind a
//! single UART speaking AT commands. This driver is synchronous and generic
//! over the platform traits, so the full protocol logic runs in host tests
//! against a mock UART.
//!
//! Layering, bottom up:
//! - [`transport`]: exclusive access to the UART (one AT exchange at a time)
//! - [`at`]: send-command-await-terminator engine with timeout
//! - [`gnss`], [`cellular`], [`time`], [`mqtt`], [`http`]: protocol logic
//! - [`lifecycle`]: boot probing, SIM wait, baseline configuration, reset
//!
//! The driver is owned by exactly one task. Other tasks reach it through the
//! command bridge in `subsystems::modem`.

pub mod at;
pub mod cellular;
pub mod gnss;
pub mod http;
pub mod lifecycle;
pub mod mqtt;
pub mod time;
pub mod transport;

use crate::platform::{PlatformError, TimerInterface, UartInterface};
use heapless::String;
use transport::TransportChannel;

/// Maximum bytes captured from a single AT response
pub const MAX_RESPONSE_LEN: usize = 512;

/// Maximum length of the operator-visible last-error string
pub const MAX_ERROR_LEN: usize = 96;

/// Maximum operator name length
pub const MAX_OPERATOR_LEN: usize = 32;

/// Maximum IP address text length
pub const MAX_IP_LEN: usize = 40;

/// Maximum detach-reason text length
pub const MAX_DETACH_LEN: usize = 64;

/// Modem driver errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModemError {
    /// Transport lock could not be acquired within the bounded wait
    TransportUnavailable,
    /// No response terminator arrived within the timeout budget
    Timeout,
    /// Modem answered ERROR or +CME ERROR
    ProtocolError,
    /// GNSS engine is not running
    NotRunning,
    /// GNSS running but no position fix yet
    NoFix,
    /// Response did not match the expected structure
    ParseError,
    /// SIM requires a PIN or PUK, not retryable
    SimLocked,
    /// SIM never reported ready within the wait cap
    SimTimeout,
    /// No response to boot probes, modem treated as absent
    ModemAbsent,
    /// Network registration did not complete within the deadline
    RegistrationTimeout,
    /// PDP activation failed after all retries and RAT fallback
    PdpActivationFailed,
    /// Soft reset issued but no ready marker arrived in the watch window
    ResetTimeout,
    /// Driver called in a state that does not permit the operation
    InvalidState,
    /// Underlying platform failure
    Platform(PlatformError),
}

impl From<PlatformError> for ModemError {
    fn from(e: PlatformError) -> Self {
        ModemError::Platform(e)
    }
}

impl core::fmt::Display for ModemError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ModemError::TransportUnavailable => write!(f, "Transport lock unavailable"),
            ModemError::Timeout => write!(f, "Response timeout"),
            ModemError::ProtocolError => write!(f, "Modem returned ERROR"),
            ModemError::NotRunning => write!(f, "GNSS engine not running"),
            ModemError::NoFix => write!(f, "No GNSS fix"),
            ModemError::ParseError => write!(f, "Malformed response"),
            ModemError::SimLocked => write!(f, "SIM locked (PIN/PUK required)"),
            ModemError::SimTimeout => write!(f, "SIM not ready"),
            ModemError::ModemAbsent => write!(f, "Modem not responding"),
            ModemError::RegistrationTimeout => write!(f, "Network registration timeout"),
            ModemError::PdpActivationFailed => write!(f, "PDP activation failed"),
            ModemError::ResetTimeout => write!(f, "Modem reset timeout"),
            ModemError::InvalidState => write!(f, "Invalid state for operation"),
            ModemError::Platform(e) => write!(f, "Platform error: {}", e),
        }
    }
}

/// Modem lifecycle state
///
/// Owned exclusively by the orchestrator task. Transitions happen only
/// inside the lifecycle routines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModemState {
    /// Driver constructed, hardware untouched
    Uninitialized,
    /// Issuing boot probes
    Probing,
    /// Waiting for the SIM to report ready
    WaitingForSim,
    /// Applying baseline and network-time configuration
    Configuring,
    /// Fully configured and usable
    Ready,
    /// Parked by the orchestrator after an unrecoverable error
    Suspended,
}

/// Decoded UTC timestamp from a GNSS fix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UtcTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// One GNSS position fix
///
/// Replaced wholesale on each successful poll. A failed poll leaves the
/// previous fix untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GnssFix {
    pub valid: bool,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed: f32,
    pub course: f32,
    pub satellites: u8,
    pub hdop: f32,
    pub pdop: f32,
    pub vdop: f32,
    pub utc: UtcTime,
    /// Monotonic milliseconds when the fix was captured
    pub captured_at: u64,
}

impl Default for GnssFix {
    fn default() -> Self {
        Self {
            valid: false,
            latitude: 0.0,
            longitude: 0.0,
            altitude: 0.0,
            speed: 0.0,
            course: 0.0,
            satellites: 0,
            hdop: 0.0,
            pdop: 0.0,
            vdop: 0.0,
            utc: UtcTime::default(),
            captured_at: 0,
        }
    }
}

/// Cellular link status snapshot
///
/// Mutated only by the cellular routines. Callers get copies, never shared
/// mutable references.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CellularLink {
    pub connected: bool,
    /// CEREG <stat>: 0 idle, 1 home, 2 searching, 3 denied, 4 unknown, 5 roaming
    pub registration_state: u8,
    pub operator_name: String<MAX_OPERATOR_LEN>,
    pub ip_address: String<MAX_IP_LEN>,
    /// Received signal strength, -113..-51 dBm, -100 when unknown
    pub signal_dbm: i8,
    pub apn: String<{ crate::parameters::MAX_APN_LEN }>,
    pub imei: String<16>,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_bps: u32,
    pub rx_bps: u32,
    pub last_detach_reason: String<MAX_DETACH_LEN>,
    /// Monotonic milliseconds of the last stats sample
    pub last_update: u64,
}

/// Byte-counter sample used to derive throughput between stats polls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StatsSample {
    pub at_ms: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}

/// SIM7080G driver context
///
/// Owns the transport, the timer, and all link/fix state. Single-owner: one
/// task holds this, everyone else goes through the command bridge.
pub struct Modem<U: UartInterface, T: TimerInterface> {
    pub(crate) transport: TransportChannel<U>,
    pub(crate) timer: T,
    pub(crate) state: ModemState,
    pub(crate) fix: GnssFix,
    pub(crate) link: CellularLink,
    pub(crate) gnss_powered: bool,
    pub(crate) last_error: String<MAX_ERROR_LEN>,
    pub(crate) stats_sample: Option<StatsSample>,
    pub(crate) net_time: time::NetworkTime,
}

impl<U: UartInterface, T: TimerInterface> Modem<U, T> {
    /// Create a driver over an opened UART
    pub fn new(uart: U, timer: T) -> Self {
        Self {
            transport: TransportChannel::new(uart),
            timer,
            state: ModemState::Uninitialized,
            fix: GnssFix::default(),
            link: CellularLink::default(),
            gnss_powered: false,
            last_error: String::new(),
            stats_sample: None,
            net_time: time::NetworkTime::default(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ModemState {
        self.state
    }

    /// Copy of the most recent GNSS fix
    pub fn fix(&self) -> GnssFix {
        self.fix
    }

    /// Copy of the cellular link status
    pub fn link(&self) -> CellularLink {
        self.link.clone()
    }

    /// Whether the GNSS engine is currently powered
    pub fn is_gnss_powered(&self) -> bool {
        self.gnss_powered
    }

    /// Operator-visible text for the most recent failure
    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    /// Network time sync status
    pub fn network_time(&self) -> time::NetworkTime {
        self.net_time
    }

    pub(crate) fn record_error(&mut self, text: &str) {
        self.last_error.clear();
        for c in text.chars() {
            if self.last_error.push(c).is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
impl<T: TimerInterface> Modem<crate::platform::mock::MockUart, T> {
    /// Everything written to the mock wire, for test assertions
    pub(crate) fn transport_tx(&self) -> std::string::String {
        self.transport
            .with_uart(|u| std::string::String::from_utf8_lossy(u.tx_data()).into_owned())
    }

    /// Occurrences of `needle` in the mock transmit log
    pub(crate) fn transport_tx_count(&self, needle: &str) -> usize {
        self.transport.with_uart(|u| u.tx_count(needle.as_bytes()))
    }

    /// Queue a canned response on the mock wire mid-test
    pub(crate) fn transport_script(&self, response: &[u8]) {
        self.transport.with_uart(|u| u.queue_response(response));
    }
}
