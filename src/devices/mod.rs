//! Device drivers
//!
//! Hardware device drivers using the platform abstraction layer.

pub mod sim7080;
