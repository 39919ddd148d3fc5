//! MQTT telemetry publishing
//!
//! A caller-side task: it never touches the modem directly, every operation
//! goes through the command bridge owned by the orchestrator.

pub mod task;

pub use task::{run_mqtt_task, MqttTaskConfig};
