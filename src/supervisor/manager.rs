//! Central registry for worker processes.
//!
//! [`WorkerSupervisor`] is the single owner of every worker entry and of the
//! live process behind it. Entries live in a `HashMap` behind
//! `Arc<Mutex<..>>`; `start` and `stop` do their whole check-and-update under
//! that lock, so concurrent calls for the same id linearize.
//!
//! **Generation model:** every spawn takes a fresh number from a monotonic
//! counter and the entry's process handle carries it. The monitor task reports
//! exits with that number, and the report is applied only if it still matches
//! the entry's handle. A stop (which clears the handle) or a restart (which
//! installs a newer one) therefore makes the late exit a no-op.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Component, Path, PathBuf};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nix::errno::Errno;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::spawn::{LaunchRequest, STOP_GRACE, launch_worker, signal_group};
use super::types::{StartOutcome, StopOutcome, WorkerId, WorkerState, WorkerStatus};
use crate::config::SupervisorConfig;
use crate::error::SupervisorError;
use crate::ring::RingBuffer;

/// Log buffer shared between a worker's output readers and status queries.
pub(super) type SharedLog = Arc<Mutex<RingBuffer<String>>>;

/// How long `shutdown` waits for each monitor task to reap its process.
const SHUTDOWN_GRACE: Duration = STOP_GRACE.saturating_add(Duration::from_secs(3));

/// The live process behind a running entry.
struct ProcessHandle {
    pid: Option<u32>,
    generation: u64,
    /// Cancelling it makes the monitor terminate the process group.
    terminate: CancellationToken,
    monitor: JoinHandle<()>,
}

struct WorkerEntry {
    executable_path: PathBuf,
    state: WorkerState,
    /// Present only while `state == Running`.
    process: Option<ProcessHandle>,
    /// Survives restarts; see [`WorkerSupervisor::start`].
    logs: SharedLog,
}

impl WorkerEntry {
    fn snapshot(&self, max_lines: usize) -> WorkerStatus {
        WorkerStatus {
            state: self.state,
            executable_path: self.executable_path.clone(),
            recent_logs: lock(&self.logs).tail(max_lines),
            pid: self.process.as_ref().and_then(|p| p.pid),
        }
    }
}

/// Owns all worker entries and their processes.
///
/// Cheap to clone: every field is behind `Arc` (or is a token), so the HTTP
/// layer and the per-process monitor tasks each hold their own handle.
#[derive(Clone)]
pub struct WorkerSupervisor {
    entries: Arc<Mutex<HashMap<WorkerId, WorkerEntry>>>,
    /// Monitor tasks of stopped processes that may still be reaping.
    retired: Arc<Mutex<Vec<JoinHandle<()>>>>,
    next_generation: Arc<AtomicU64>,
    shutdown: CancellationToken,
    config: Arc<SupervisorConfig>,
}

impl WorkerSupervisor {
    /// Create a supervisor. Cancelling `shutdown` terminates every worker.
    ///
    /// A relative `scripts_dir` is anchored at the current directory now, so
    /// later directory changes do not move it.
    pub fn new(config: &SupervisorConfig, shutdown: CancellationToken) -> Self {
        let mut config = config.clone();
        if let Ok(abs) = std::path::absolute(&config.scripts_dir) {
            config.scripts_dir = abs;
        }
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            retired: Arc::new(Mutex::new(Vec::new())),
            next_generation: Arc::new(AtomicU64::new(0)),
            shutdown,
            config: Arc::new(config),
        }
    }

    /// Start worker `id` from `executable_path` (relative to the scripts root).
    ///
    /// A no-op if the worker is already running. Otherwise spawns a new
    /// generation and marks the entry `Running`. The log buffer of an existing
    /// entry is kept, so the operator sees one continuous trail across
    /// restarts. On spawn failure the entry becomes `Failed` and the error is
    /// returned.
    pub fn start(
        &self,
        id: &str,
        executable_path: &str,
    ) -> Result<StartOutcome, SupervisorError> {
        if id.trim().is_empty() {
            return Err(SupervisorError::InvalidId);
        }
        let program = resolve_executable(&self.config.scripts_dir, executable_path)?;

        let mut entries = lock(&self.entries);

        if let Some(entry) = entries.get(id) {
            if entry.state == WorkerState::Running {
                tracing::info!(worker = %id, "Worker already running, ignoring start");
                return Ok(StartOutcome::AlreadyRunning);
            }
        }

        let logs = entries
            .get(id)
            .map(|e| e.logs.clone())
            .unwrap_or_else(|| Arc::new(Mutex::new(RingBuffer::new(self.config.log_capacity))));
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;

        tracing::info!(worker = %id, program = %program.display(), generation, "Starting worker");

        let terminate = self.shutdown.child_token();

        let launched = launch_worker(
            self,
            LaunchRequest {
                id,
                program: &program,
                interpreter: self.config.interpreter.as_deref(),
                generation,
                logs: logs.clone(),
                terminate: terminate.clone(),
            },
        );

        match launched {
            Ok(launched) => {
                let pid = launched.pid;
                entries.insert(
                    id.to_string(),
                    WorkerEntry {
                        executable_path: program,
                        state: WorkerState::Running,
                        process: Some(ProcessHandle {
                            pid,
                            generation,
                            terminate,
                            monitor: launched.monitor,
                        }),
                        logs,
                    },
                );
                Ok(StartOutcome::Started { pid })
            }
            Err(source) => {
                tracing::warn!(worker = %id, error = %source, "Worker failed to launch");
                entries.insert(
                    id.to_string(),
                    WorkerEntry {
                        executable_path: program.clone(),
                        state: WorkerState::Failed,
                        process: None,
                        logs,
                    },
                );
                Err(SupervisorError::LaunchFailed {
                    id: id.to_string(),
                    path: program,
                    source,
                })
            }
        }
    }

    /// Stop worker `id`: its monitor sends `SIGTERM` to the process group and
    /// escalates to `SIGKILL` if the group outlives [`STOP_GRACE`].
    ///
    /// A no-op for unknown ids and entries that are not running. The entry is
    /// marked `Stopped` immediately; reaping happens in the background and its
    /// exit report is ignored.
    pub fn stop(&self, id: &str) -> Result<StopOutcome, SupervisorError> {
        let mut entries = lock(&self.entries);

        let Some(entry) = entries.get_mut(id) else {
            tracing::debug!(worker = %id, "Stop requested for unknown worker");
            return Ok(StopOutcome::NotRunning);
        };
        if entry.state != WorkerState::Running {
            tracing::debug!(worker = %id, state = ?entry.state, "Stop requested for idle worker");
            return Ok(StopOutcome::NotRunning);
        }

        if let Some(pid) = entry.process.as_ref().and_then(|p| p.pid) {
            match signal_group(pid, None) {
                // ESRCH: already gone, the monitor is about to report it.
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(source) => {
                    return Err(SupervisorError::Signal {
                        id: id.to_string(),
                        pid,
                        source,
                    });
                }
            }
        }

        if let Some(handle) = entry.process.take() {
            handle.terminate.cancel();
            self.retire(handle.monitor);
        }
        entry.state = WorkerState::Stopped;
        tracing::info!(worker = %id, "Worker stopped");

        Ok(StopOutcome::Stopped)
    }

    /// Snapshot of one worker with its full retained log. `None` if the id has
    /// never been started.
    pub fn status(&self, id: &str) -> Option<WorkerStatus> {
        let entries = lock(&self.entries);
        entries.get(id).map(|e| e.snapshot(usize::MAX))
    }

    /// Snapshots of every worker, logs capped to the most recent
    /// `status_log_lines` lines.
    pub fn status_all(&self) -> BTreeMap<WorkerId, WorkerStatus> {
        let entries = lock(&self.entries);
        entries
            .iter()
            .map(|(id, e)| (id.clone(), e.snapshot(self.config.status_log_lines)))
            .collect()
    }

    /// Terminate every running worker and wait for the monitors to reap them.
    ///
    /// Running entries are marked `Stopped` first so the exits caused by the
    /// shutdown are not recorded as failures.
    pub async fn shutdown(&self) {
        let mut handles: Vec<JoinHandle<()>> = {
            let mut entries = lock(&self.entries);
            entries
                .values_mut()
                .filter(|e| e.state == WorkerState::Running)
                .filter_map(|e| {
                    e.state = WorkerState::Stopped;
                    e.process.take().map(|p| p.monitor)
                })
                .collect()
        };
        handles.append(&mut lock(&self.retired));

        self.shutdown.cancel();

        for handle in handles {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, handle).await;
        }
        tracing::info!("All workers shut down");
    }

    /// Apply an exit report from the monitor task of `generation`.
    pub(super) fn record_exit(&self, id: &str, generation: u64, result: io::Result<ExitStatus>) {
        let mut entries = lock(&self.entries);
        let Some(entry) = entries.get_mut(id) else {
            return;
        };

        let current = entry.process.as_ref().map(|p| p.generation);
        if current != Some(generation) {
            tracing::debug!(worker = %id, generation, "Ignoring exit of superseded worker process");
            return;
        }

        entry.process = None;
        match result {
            Ok(status) if status.success() => {
                entry.state = WorkerState::Stopped;
                tracing::info!(worker = %id, "Worker exited cleanly");
            }
            Ok(status) => {
                entry.state = WorkerState::Failed;
                tracing::warn!(
                    worker = %id,
                    code = ?status.code(),
                    signal = ?status.signal(),
                    "Worker exited with failure"
                );
            }
            Err(e) => {
                entry.state = WorkerState::Failed;
                tracing::warn!(worker = %id, error = %e, "Failed to wait for worker");
            }
        }
    }

    fn retire(&self, monitor: JoinHandle<()>) {
        let mut retired = lock(&self.retired);
        retired.retain(|h| !h.is_finished());
        retired.push(monitor);
    }
}

/// Append one captured line to a worker's log buffer.
pub(super) fn push_line(logs: &SharedLog, line: String) {
    lock(logs).push(line);
}

/// Lock a mutex, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Join `executable_path` onto the scripts root, refusing anything that could
/// escape it.
fn resolve_executable(root: &Path, executable_path: &str) -> Result<PathBuf, SupervisorError> {
    let invalid = |reason: &str| SupervisorError::InvalidPath {
        path: executable_path.to_string(),
        reason: reason.to_string(),
    };

    if executable_path.trim().is_empty() {
        return Err(invalid("path is empty"));
    }

    let relative = Path::new(executable_path);
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return Err(invalid("must not contain `..`")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("must be relative to the scripts directory"));
            }
        }
    }

    Ok(root.join(relative))
}
