#![cfg_attr(not(test), no_std)]

//! gentrack - Cellular + GNSS telemetry firmware core
//!
//! This library drives a SIM7080G-class combined CatM modem + GNSS receiver
//! over a single UART using AT commands, and exposes that hardware safely to
//! several independent tasks (telemetry, MQTT, storage) through a bounded
//! command queue owned by a single orchestrator task.

// Platform abstraction layer
pub mod platform;

// Core systems (logging, system event bits)
pub mod core;

// Runtime configuration (APN / MQTT broker credentials)
pub mod parameters;

// Device drivers using platform abstraction
pub mod devices;

// Subsystems (modem orchestrator, command bridge, status records)
pub mod subsystems;

// Cross-task communication (MQTT telemetry task)
pub mod communication;
