//! Worker process spawner.
//!
//! Spawns a worker as a tokio child with stdout and stderr piped. Both streams
//! feed the entry's shared ring buffer line by line, in arrival order and
//! without a stream prefix.
//!
//! The spawned process:
//! - Runs in its own process group (`process_group(0)`) so a stop reaches any
//!   children it forks
//! - Has `kill_on_drop(true)` as a safety net
//! - Is owned by a monitor task that reaps it and reports the exit back to the
//!   [`WorkerSupervisor`] tagged with the spawn generation
//! - Is terminated by the monitor when its token is cancelled: `SIGTERM` to the
//!   group, then `SIGKILL` if it is still alive after [`STOP_GRACE`]

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::manager::{SharedLog, WorkerSupervisor, push_line};

/// How long a worker may run its `SIGTERM` handler before the group is killed.
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// Everything needed to launch one generation of a worker.
pub(super) struct LaunchRequest<'a> {
    pub id: &'a str,
    pub program: &'a Path,
    pub interpreter: Option<&'a str>,
    pub generation: u64,
    pub logs: SharedLog,
    /// Cancelled by `stop` or by supervisor shutdown.
    pub terminate: CancellationToken,
}

/// A successfully spawned worker process.
pub(super) struct Launched {
    pub pid: Option<u32>,
    pub monitor: JoinHandle<()>,
}

/// Spawn the worker and attach its output readers and monitor task.
///
/// Must be called from within a tokio runtime. The returned error is the
/// spawn failure (missing file, permission denied, ...).
pub(super) fn launch_worker(
    supervisor: &WorkerSupervisor,
    request: LaunchRequest<'_>,
) -> io::Result<Launched> {
    // With an interpreter the OS would happily start it on a missing script,
    // so check up front to report a launch failure either way.
    if !request.program.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no such file: {}", request.program.display()),
        ));
    }

    let mut command = match request.interpreter {
        Some(interpreter) => {
            let mut c = Command::new(interpreter);
            c.arg(request.program);
            c
        }
        None => Command::new(request.program),
    };

    let mut child = command
        .process_group(0)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let pid = child.id();

    if let Some(stdout) = child.stdout.take() {
        spawn_log_reader(request.id.to_string(), "stdout", stdout, request.logs.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_log_reader(request.id.to_string(), "stderr", stderr, request.logs.clone());
    }

    let monitor = tokio::spawn(monitor_worker(
        child,
        supervisor.clone(),
        request.id.to_string(),
        request.generation,
        request.terminate,
    ));

    Ok(Launched { pid, monitor })
}

/// Send `signal` to the worker's whole process group. `None` only checks
/// that the group exists and may be signalled.
pub(super) fn signal_group(pid: u32, signal: impl Into<Option<Signal>>) -> nix::Result<()> {
    killpg(Pid::from_raw(pid as i32), signal)
}

/// Append every line of `reader` to the worker's log buffer until EOF.
fn spawn_log_reader<R>(id: String, stream: &'static str, reader: R, logs: SharedLog)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&raw)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    tracing::debug!(worker = %id, stream, "{line}");
                    push_line(&logs, line);
                }
                Err(e) => {
                    tracing::warn!(worker = %id, stream, error = %e, "Failed to read worker output");
                    break;
                }
            }
        }
    });
}

/// Own the child until it exits (or is told to terminate), then report.
async fn monitor_worker(
    mut child: Child,
    supervisor: WorkerSupervisor,
    id: String,
    generation: u64,
    terminate: CancellationToken,
) {
    let result: io::Result<ExitStatus> = tokio::select! {
        status = child.wait() => status,
        _ = terminate.cancelled() => terminate_worker(&mut child, &id).await,
    };

    supervisor.record_exit(&id, generation, result);
}

/// `SIGTERM` the worker's group, escalating to `SIGKILL` after [`STOP_GRACE`].
async fn terminate_worker(child: &mut Child, id: &str) -> io::Result<ExitStatus> {
    let Some(pid) = child.id() else {
        return child.wait().await;
    };

    let _ = signal_group(pid, Signal::SIGTERM);
    match tokio::time::timeout(STOP_GRACE, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            tracing::warn!(worker = %id, pid, "Worker ignored SIGTERM, killing its process group");
            let _ = signal_group(pid, Signal::SIGKILL);
            child.wait().await
        }
    }
}
