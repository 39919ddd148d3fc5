//! Cross-task command bridge
//!
//! Caller tasks never touch the UART. They enqueue a [`PendingCommand`]
//! carrying a response signal, then wait on that signal with a timeout. The
//! orchestrator drains the queue between its own polling work, executes each
//! operation against the modem it owns, and signals the boolean outcome
//! exactly once.
//!
//! A caller that times out simply never observes the late signal. The
//! orchestrator still delivers it, nothing is leaked or double-consumed.

use crate::devices::sim7080::mqtt::{MAX_PAYLOAD_LEN, MAX_TOPIC_LEN};
use crate::parameters::MqttBrokerConfig;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};
use heapless::{String, Vec};

/// Commands queued ahead of the orchestrator's own work
pub const COMMAND_QUEUE_DEPTH: usize = 4;

/// Signal a caller blocks on for its boolean result
pub type ResponseSignal = Signal<CriticalSectionRawMutex, bool>;

/// Submission failures, never silently dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SubmitError {
    /// Queue still full when the enqueue wait elapsed
    QueueFull,
    /// No result signalled within the response wait
    ResponseTimeout,
    /// Topic or payload exceeds the fixed bounds, rejected up front
    PayloadTooLarge,
}

/// One modem operation requested by a non-owning task
#[derive(Debug, Clone, PartialEq)]
pub enum ModemOp {
    ConfigureMqtt(MqttBrokerConfig),
    ConnectMqtt,
    PublishMqtt {
        topic: String<MAX_TOPIC_LEN>,
        payload: Vec<u8, MAX_PAYLOAD_LEN>,
        qos: u8,
        retain: bool,
    },
    SubscribeMqtt {
        topic: String<MAX_TOPIC_LEN>,
        qos: u8,
    },
    UnsubscribeMqtt {
        topic: String<MAX_TOPIC_LEN>,
    },
    DisconnectMqtt,
}

impl ModemOp {
    /// Build a publish operation, rejecting oversized topics/payloads
    /// instead of truncating them
    pub fn publish(
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
    ) -> Result<Self, SubmitError> {
        let topic = String::try_from(topic).map_err(|_| SubmitError::PayloadTooLarge)?;
        let payload = Vec::from_slice(payload).map_err(|_| SubmitError::PayloadTooLarge)?;
        Ok(ModemOp::PublishMqtt {
            topic,
            payload,
            qos,
            retain,
        })
    }

    /// Build a subscribe operation with a bounds-checked topic
    pub fn subscribe(topic: &str, qos: u8) -> Result<Self, SubmitError> {
        let topic = String::try_from(topic).map_err(|_| SubmitError::PayloadTooLarge)?;
        Ok(ModemOp::SubscribeMqtt { topic, qos })
    }

    /// Build an unsubscribe operation with a bounds-checked topic
    pub fn unsubscribe(topic: &str) -> Result<Self, SubmitError> {
        let topic = String::try_from(topic).map_err(|_| SubmitError::PayloadTooLarge)?;
        Ok(ModemOp::UnsubscribeMqtt { topic })
    }
}

/// Queued operation plus the signal its result is delivered on
pub struct PendingCommand {
    pub op: ModemOp,
    pub responder: &'static ResponseSignal,
}

/// Bounded request/response bridge into the orchestrator
pub struct CommandBridge {
    channel: Channel<CriticalSectionRawMutex, PendingCommand, COMMAND_QUEUE_DEPTH>,
}

impl CommandBridge {
    /// Const constructor for static initialization
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Submit an operation and wait for its boolean result
    ///
    /// `queue_wait_ms = 0` fails fast with `QueueFull` when the queue has no
    /// free slot. A result that arrives after `response_wait_ms` is never
    /// observed by this caller.
    pub async fn submit(
        &self,
        op: ModemOp,
        responder: &'static ResponseSignal,
        queue_wait_ms: u64,
        response_wait_ms: u64,
    ) -> Result<bool, SubmitError> {
        // Clear any stale result from a previous exchange on this signal
        responder.reset();
        let command = PendingCommand { op, responder };

        if queue_wait_ms == 0 {
            self.channel
                .try_send(command)
                .map_err(|_| SubmitError::QueueFull)?;
        } else {
            with_timeout(
                Duration::from_millis(queue_wait_ms),
                self.channel.send(command),
            )
            .await
            .map_err(|_| SubmitError::QueueFull)?;
        }

        with_timeout(Duration::from_millis(response_wait_ms), responder.wait())
            .await
            .map_err(|_| SubmitError::ResponseTimeout)
    }

    /// Non-blocking drain point for the orchestrator
    pub fn try_next(&self) -> Option<PendingCommand> {
        self.channel.try_receive().ok()
    }
}

impl Default for CommandBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::join::join;

    #[test]
    fn test_publish_constructor_bounds() {
        assert!(ModemOp::publish("status/genset", b"{}", 1, false).is_ok());

        let long_topic = "t".repeat(MAX_TOPIC_LEN + 1);
        assert_eq!(
            ModemOp::publish(&long_topic, b"{}", 1, false).err(),
            Some(SubmitError::PayloadTooLarge)
        );

        let big = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            ModemOp::publish("t", &big, 1, false).err(),
            Some(SubmitError::PayloadTooLarge)
        );
    }

    #[tokio::test]
    async fn test_submit_delivers_result() {
        static BRIDGE: CommandBridge = CommandBridge::new();
        static SIG: ResponseSignal = Signal::new();

        let submit = BRIDGE.submit(ModemOp::ConnectMqtt, &SIG, 100, 1_000);
        let service = async {
            loop {
                if let Some(cmd) = BRIDGE.try_next() {
                    assert_eq!(cmd.op, ModemOp::ConnectMqtt);
                    cmd.responder.signal(true);
                    break;
                }
                embassy_time::Timer::after_millis(1).await;
            }
        };

        let (result, ()) = join(submit, service).await;
        assert_eq!(result, Ok(true));
    }

    #[tokio::test]
    async fn test_submit_delivers_failure_result() {
        static BRIDGE: CommandBridge = CommandBridge::new();
        static SIG: ResponseSignal = Signal::new();

        let submit = BRIDGE.submit(ModemOp::DisconnectMqtt, &SIG, 100, 1_000);
        let service = async {
            loop {
                if let Some(cmd) = BRIDGE.try_next() {
                    cmd.responder.signal(false);
                    break;
                }
                embassy_time::Timer::after_millis(1).await;
            }
        };

        let (result, ()) = join(submit, service).await;
        assert_eq!(result, Ok(false));
    }

    #[tokio::test]
    async fn test_full_queue_zero_wait_fails_fast() {
        static BRIDGE: CommandBridge = CommandBridge::new();
        static SIG: ResponseSignal = Signal::new();

        for _ in 0..COMMAND_QUEUE_DEPTH {
            BRIDGE
                .channel
                .try_send(PendingCommand {
                    op: ModemOp::ConnectMqtt,
                    responder: &SIG,
                })
                .ok()
                .unwrap();
        }

        let result = BRIDGE.submit(ModemOp::ConnectMqtt, &SIG, 0, 1_000).await;
        assert_eq!(result, Err(SubmitError::QueueFull));
    }

    #[tokio::test]
    async fn test_response_timeout_when_unserviced() {
        static BRIDGE: CommandBridge = CommandBridge::new();
        static SIG: ResponseSignal = Signal::new();

        let result = BRIDGE.submit(ModemOp::ConnectMqtt, &SIG, 10, 20).await;
        assert_eq!(result, Err(SubmitError::ResponseTimeout));
        // The command was still enqueued, a late drain sees it
        assert!(BRIDGE.try_next().is_some());
    }

    #[tokio::test]
    async fn test_stale_signal_not_observed_as_result() {
        static BRIDGE: CommandBridge = CommandBridge::new();
        static SIG: ResponseSignal = Signal::new();

        // A leftover value from an abandoned exchange
        SIG.signal(true);

        let result = BRIDGE.submit(ModemOp::ConnectMqtt, &SIG, 10, 20).await;
        assert_eq!(result, Err(SubmitError::ResponseTimeout));
        let _ = BRIDGE.try_next();
    }
}
