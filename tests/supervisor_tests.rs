use std::path::Path;
use std::time::{Duration, Instant};

use lidar_relay::config::SupervisorConfig;
use lidar_relay::error::SupervisorError;
use lidar_relay::supervisor::{
    STOP_GRACE, StartOutcome, StopOutcome, WorkerState, WorkerSupervisor,
};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ─── Helpers ──────────────────────────────────────────────────────────

fn setup_scripts_dir() -> TempDir {
    tempfile::tempdir().expect("failed to create temp dir")
}

fn write_script(dir: &Path, name: &str, body: &str) {
    std::fs::write(dir.join(name), body).expect("failed to write script");
}

/// Scripts are run through `sh` so they need no exec bit.
fn test_supervisor(dir: &Path) -> WorkerSupervisor {
    WorkerSupervisor::new(
        &SupervisorConfig {
            scripts_dir: dir.to_path_buf(),
            interpreter: Some("sh".to_string()),
            log_capacity: 1000,
            status_log_lines: 50,
        },
        CancellationToken::new(),
    )
}

/// Poll `check` until it holds or five seconds pass.
async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Whether `pid` still names a process (a reaped child does not).
fn is_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Ignores SIGTERM; `sleep` inherits the ignored disposition.
const TERM_TRAPPING_SCRIPT: &str = "trap '' TERM\necho armed\nwhile true; do sleep 0.1; done\n";

fn state_of(supervisor: &WorkerSupervisor, id: &str) -> Option<WorkerState> {
    supervisor.status(id).map(|s| s.state)
}

// ============================================================
// Start / stop lifecycle
// ============================================================

#[tokio::test]
async fn test_start_then_stop_to_touch() {
    let dir = setup_scripts_dir();
    write_script(dir.path(), "rplidar_toTouch.py", "echo scanning\nsleep 30\n");
    let supervisor = test_supervisor(dir.path());

    let outcome = supervisor.start("toTouch", "rplidar_toTouch.py").unwrap();
    assert!(matches!(outcome, StartOutcome::Started { pid: Some(_) }));

    let all = supervisor.status_all();
    assert_eq!(all["toTouch"].state, WorkerState::Running);

    assert_eq!(supervisor.stop("toTouch").unwrap(), StopOutcome::Stopped);
    let all = supervisor.status_all();
    assert_eq!(all["toTouch"].state, WorkerState::Stopped);
    assert_eq!(all["toTouch"].pid, None);
}

#[tokio::test]
async fn test_double_start_keeps_single_process() {
    let dir = setup_scripts_dir();
    write_script(dir.path(), "long.sh", "sleep 30\n");
    let supervisor = test_supervisor(dir.path());

    let first = supervisor.start("long", "long.sh").unwrap();
    let pid = supervisor.status("long").unwrap().pid;
    assert!(pid.is_some());

    let second = supervisor.start("long", "long.sh").unwrap();
    assert!(matches!(first, StartOutcome::Started { .. }));
    assert_eq!(second, StartOutcome::AlreadyRunning);
    assert_eq!(supervisor.status("long").unwrap().pid, pid);

    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_stop_is_noop_for_unknown_and_stopped() {
    let dir = setup_scripts_dir();
    write_script(dir.path(), "long.sh", "sleep 30\n");
    let supervisor = test_supervisor(dir.path());

    assert_eq!(supervisor.stop("ghost").unwrap(), StopOutcome::NotRunning);
    assert!(supervisor.status("ghost").is_none());

    supervisor.start("long", "long.sh").unwrap();
    assert_eq!(supervisor.stop("long").unwrap(), StopOutcome::Stopped);
    assert_eq!(supervisor.stop("long").unwrap(), StopOutcome::NotRunning);
    assert_eq!(state_of(&supervisor, "long"), Some(WorkerState::Stopped));
}

#[tokio::test]
async fn test_late_exit_after_stop_is_ignored() {
    let dir = setup_scripts_dir();
    write_script(dir.path(), "long.sh", "sleep 30\n");
    let supervisor = test_supervisor(dir.path());

    supervisor.start("long", "long.sh").unwrap();
    supervisor.stop("long").unwrap();

    // The SIGTERM'd process exits non-zero; that report must not turn the
    // entry into Failed or Running.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(state_of(&supervisor, "long"), Some(WorkerState::Stopped));
}

#[tokio::test]
async fn test_restart_after_stop_runs_new_process() {
    let dir = setup_scripts_dir();
    write_script(dir.path(), "long.sh", "sleep 30\n");
    let supervisor = test_supervisor(dir.path());

    supervisor.start("long", "long.sh").unwrap();
    let first_pid = supervisor.status("long").unwrap().pid;
    supervisor.stop("long").unwrap();

    let outcome = supervisor.start("long", "long.sh").unwrap();
    assert!(matches!(outcome, StartOutcome::Started { .. }));
    let second_pid = supervisor.status("long").unwrap().pid;
    assert_ne!(first_pid, second_pid);

    // The first generation's exit arrives while the second runs.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(state_of(&supervisor, "long"), Some(WorkerState::Running));

    supervisor.shutdown().await;
    assert_eq!(state_of(&supervisor, "long"), Some(WorkerState::Stopped));
}

#[tokio::test]
async fn test_rapid_start_stop_sequence_ends_consistent() {
    let dir = setup_scripts_dir();
    write_script(dir.path(), "long.sh", "sleep 30\n");
    let supervisor = test_supervisor(dir.path());

    for _ in 0..5 {
        supervisor.start("long", "long.sh").unwrap();
        supervisor.start("long", "long.sh").unwrap();
        supervisor.stop("long").unwrap();
    }
    supervisor.start("long", "long.sh").unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let status = supervisor.status("long").unwrap();
    assert_eq!(status.state, WorkerState::Running);
    assert!(status.pid.is_some());

    supervisor.stop("long").unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(state_of(&supervisor, "long"), Some(WorkerState::Stopped));
}

// ============================================================
// Exit handling
// ============================================================

#[tokio::test]
async fn test_clean_exit_marks_stopped() {
    let dir = setup_scripts_dir();
    write_script(dir.path(), "once.sh", "echo hello\nexit 0\n");
    let supervisor = test_supervisor(dir.path());

    supervisor.start("once", "once.sh").unwrap();
    assert!(wait_for(|| state_of(&supervisor, "once") == Some(WorkerState::Stopped)).await);
    assert!(wait_for(|| supervisor.status("once").unwrap().recent_logs == vec!["hello"]).await);
}

#[tokio::test]
async fn test_nonzero_exit_marks_failed() {
    let dir = setup_scripts_dir();
    write_script(dir.path(), "crash.sh", "echo 'lidar not found' >&2\nexit 3\n");
    let supervisor = test_supervisor(dir.path());

    supervisor.start("crash", "crash.sh").unwrap();
    assert!(wait_for(|| state_of(&supervisor, "crash") == Some(WorkerState::Failed)).await);
    assert!(
        wait_for(|| {
            supervisor
                .status("crash")
                .unwrap()
                .recent_logs
                .contains(&"lidar not found".to_string())
        })
        .await,
        "stderr should land in the log buffer unprefixed"
    );
}

#[tokio::test]
async fn test_failed_worker_can_be_restarted() {
    let dir = setup_scripts_dir();
    write_script(dir.path(), "crash.sh", "exit 1\n");
    let supervisor = test_supervisor(dir.path());

    supervisor.start("crash", "crash.sh").unwrap();
    assert!(wait_for(|| state_of(&supervisor, "crash") == Some(WorkerState::Failed)).await);

    write_script(dir.path(), "crash.sh", "sleep 30\n");
    let outcome = supervisor.start("crash", "crash.sh").unwrap();
    assert!(matches!(outcome, StartOutcome::Started { .. }));
    assert_eq!(state_of(&supervisor, "crash"), Some(WorkerState::Running));

    supervisor.shutdown().await;
}

// ============================================================
// Launch failures
// ============================================================

#[tokio::test]
async fn test_missing_executable_marks_failed() {
    let dir = setup_scripts_dir();
    let supervisor = test_supervisor(dir.path());

    let err = supervisor.start("boot", "rplidar_boot.py").unwrap_err();
    assert!(matches!(err, SupervisorError::LaunchFailed { .. }));
    assert_eq!(state_of(&supervisor, "boot"), Some(WorkerState::Failed));
}

#[tokio::test]
async fn test_missing_executable_without_interpreter() {
    let dir = setup_scripts_dir();
    let supervisor = WorkerSupervisor::new(
        &SupervisorConfig {
            scripts_dir: dir.path().to_path_buf(),
            interpreter: None,
            log_capacity: 1000,
            status_log_lines: 50,
        },
        CancellationToken::new(),
    );

    let err = supervisor.start("stop", "rplidar_stop.py").unwrap_err();
    assert!(matches!(err, SupervisorError::LaunchFailed { .. }));
    assert_eq!(state_of(&supervisor, "stop"), Some(WorkerState::Failed));
}

#[tokio::test]
async fn test_path_outside_scripts_dir_is_rejected() {
    let dir = setup_scripts_dir();
    let supervisor = test_supervisor(dir.path());

    let err = supervisor.start("escape", "../escape.sh").unwrap_err();
    assert!(matches!(err, SupervisorError::InvalidPath { .. }));
    assert!(supervisor.status("escape").is_none());
}

// ============================================================
// Log buffer
// ============================================================

#[tokio::test]
async fn test_log_buffer_is_bounded_and_status_all_is_capped() {
    let dir = setup_scripts_dir();
    write_script(
        dir.path(),
        "chatty.sh",
        "i=0\nwhile [ $i -lt 1100 ]; do echo line$i; i=$((i+1)); done\n",
    );
    let supervisor = test_supervisor(dir.path());

    supervisor.start("chatty", "chatty.sh").unwrap();
    assert!(
        wait_for(|| {
            supervisor
                .status("chatty")
                .unwrap()
                .recent_logs
                .last()
                .map(String::as_str)
                == Some("line1099")
        })
        .await
    );

    let full = supervisor.status("chatty").unwrap().recent_logs;
    assert_eq!(full.len(), 1000);
    assert_eq!(full[0], "line100");

    let capped = &supervisor.status_all()["chatty"].recent_logs;
    assert_eq!(capped.len(), 50);
    assert_eq!(capped[0], "line1050");
    assert_eq!(capped[49], "line1099");
}

#[tokio::test]
async fn test_logs_persist_across_restart() {
    let dir = setup_scripts_dir();
    write_script(dir.path(), "greet.sh", "echo run\n");
    let supervisor = test_supervisor(dir.path());

    supervisor.start("greet", "greet.sh").unwrap();
    assert!(wait_for(|| supervisor.status("greet").unwrap().recent_logs.len() == 1).await);
    assert!(wait_for(|| state_of(&supervisor, "greet") == Some(WorkerState::Stopped)).await);

    supervisor.start("greet", "greet.sh").unwrap();
    assert!(wait_for(|| supervisor.status("greet").unwrap().recent_logs.len() == 2).await);
    assert_eq!(supervisor.status("greet").unwrap().recent_logs, vec!["run", "run"]);
}

#[tokio::test]
async fn test_stop_kills_worker_that_ignores_sigterm() {
    let dir = setup_scripts_dir();
    write_script(dir.path(), "stubborn.sh", TERM_TRAPPING_SCRIPT);
    let supervisor = test_supervisor(dir.path());

    supervisor.start("w", "stubborn.sh").unwrap();
    let first_pid = supervisor.status("w").unwrap().pid.unwrap();
    // Wait until the trap is installed before stopping.
    assert!(wait_for(|| supervisor.status("w").unwrap().recent_logs.contains(&"armed".to_string())).await);

    supervisor.stop("w").unwrap();
    supervisor.start("w", "stubborn.sh").unwrap();
    let second_pid = supervisor.status("w").unwrap().pid.unwrap();
    assert_ne!(first_pid, second_pid);

    let deadline = STOP_GRACE + Duration::from_secs(3);
    let started = Instant::now();
    while is_alive(first_pid) && started.elapsed() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!is_alive(first_pid), "stopped worker must not outlive the grace period");
    assert!(is_alive(second_pid));
    assert_eq!(state_of(&supervisor, "w"), Some(WorkerState::Running));

    supervisor.shutdown().await;
    assert!(!is_alive(second_pid));
}

// ============================================================
// Shutdown
// ============================================================

#[tokio::test]
async fn test_shutdown_stops_all_running_workers() {
    let dir = setup_scripts_dir();
    write_script(dir.path(), "long.sh", "sleep 30\n");
    let supervisor = test_supervisor(dir.path());

    supervisor.start("a", "long.sh").unwrap();
    supervisor.start("b", "long.sh").unwrap();

    let started = Instant::now();
    supervisor.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(5), "processes should die on SIGTERM");

    for (id, status) in supervisor.status_all() {
        assert_eq!(status.state, WorkerState::Stopped, "{id} should be stopped");
        assert_eq!(status.pid, None);
    }
}

#[tokio::test]
async fn test_shutdown_kills_worker_that_ignores_sigterm() {
    let dir = setup_scripts_dir();
    write_script(dir.path(), "stubborn.sh", TERM_TRAPPING_SCRIPT);
    let supervisor = test_supervisor(dir.path());

    supervisor.start("w", "stubborn.sh").unwrap();
    let pid = supervisor.status("w").unwrap().pid.unwrap();
    assert!(wait_for(|| supervisor.status("w").unwrap().recent_logs.contains(&"armed".to_string())).await);

    supervisor.shutdown().await;
    assert!(!is_alive(pid), "shutdown must reap workers that trap SIGTERM");
    assert_eq!(state_of(&supervisor, "w"), Some(WorkerState::Stopped));
}
