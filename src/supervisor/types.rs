//! Type definitions shared by the supervisor, the HTTP facade and tests.

use std::path::PathBuf;

use serde::Serialize;

/// Caller-chosen worker key (e.g. `"toTouch"`), independent of the executable.
pub type WorkerId = String;

/// Lifecycle state of a worker entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum WorkerState {
    /// Not running: never started, exited cleanly, or stopped by the operator.
    Stopped,
    /// A live process is owned by the entry.
    Running,
    /// Exited non-zero, died from an unrequested signal, or failed to launch.
    Failed,
}

/// Point-in-time view of a worker entry.
///
/// This is a snapshot -- the entry may change after it is returned.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub executable_path: PathBuf,
    /// Captured output lines, oldest first.
    pub recent_logs: Vec<String>,
    /// OS process id while running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// What a successful `start` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: Option<u32> },
    AlreadyRunning,
}

/// What a successful `stop` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}
