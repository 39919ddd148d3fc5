//! Modem subsystem
//!
//! The modem driver is owned by exactly one orchestrator task. Everything
//! here exists to make that single-owner design usable from the rest of the
//! system:
//!
//! - [`command`]: bounded request/response bridge other tasks submit modem
//!   operations through
//! - [`status`]: JSON status records pushed to the storage collaborator
//! - [`task`]: the orchestrator loop itself

pub mod command;
pub mod status;
pub mod task;

pub use command::{CommandBridge, ModemOp, PendingCommand, ResponseSignal, SubmitError};
pub use status::{CellRecord, GnssRecord, StatusRecord, StatusReporter};
pub use task::{OrchestratorConfig, ReattachBackoff};
