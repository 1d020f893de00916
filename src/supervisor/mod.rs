//! Worker process supervision.
//!
//! Provides the [`manager::WorkerSupervisor`] registry that starts, stops and
//! observes the sensor-control scripts, the [`spawn`] helpers that own each
//! child process, and the shared [`types`].

pub mod manager;
mod spawn;
pub mod types;

pub use manager::WorkerSupervisor;
pub use spawn::STOP_GRACE;
pub use types::{StartOutcome, StopOutcome, WorkerId, WorkerState, WorkerStatus};
