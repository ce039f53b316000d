//! Daemon process management.
//!
//! The PID and log files live under `$STATE_DIR/syncrec/`. Both the `syncrec`
//! CLI (to check for and start the daemon) and `syncrecd` itself (to record
//! and signal its PID) go through this module.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::{debug, info};

/// Directory holding the PID and log files.
pub fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("syncrec")
}

/// Returns the path to the daemon PID file.
pub fn pid_file_path() -> PathBuf {
    state_dir().join("syncrecd.pid")
}

/// Returns the path to the daemon log file used in background mode.
pub fn log_file_path() -> PathBuf {
    state_dir().join("syncrecd.log")
}

/// Reads the PID from a PID file, if it exists and parses.
pub fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Writes the current process ID, creating the parent directory.
pub fn write_pid(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, std::process::id().to_string())
}

/// Removes the PID file. A missing file is fine.
pub fn remove_pid_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %path.display(), error = %e, "Failed to remove PID file"),
    }
}

/// Checks if a process with the given PID is running.
pub fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// PID of the running daemon, if any.
pub fn daemon_pid(pid_file: &Path) -> Option<u32> {
    read_pid(pid_file).filter(|&pid| is_process_running(pid))
}

/// Checks if the daemon is currently running.
pub fn is_daemon_running() -> bool {
    daemon_pid(&pid_file_path()).is_some()
}

/// Sends SIGTERM to the daemon recorded in `pid_file`.
///
/// Returns the PID that was signalled, or `None` if no daemon was running.
/// A stale PID file is removed.
pub fn stop_daemon(pid_file: &Path) -> io::Result<Option<u32>> {
    let Some(pid) = read_pid(pid_file) else {
        return Ok(None);
    };

    if !is_process_running(pid) {
        remove_pid_file(pid_file);
        return Ok(None);
    }

    let pid_t = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, format!("bad pid {pid}")))?;

    // SAFETY: kill has no memory-safety preconditions.
    let result = unsafe { libc::kill(pid_t, libc::SIGTERM) };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(Some(pid))
}

/// Starts `syncrecd start -d` as a detached process.
fn spawn_daemon() -> io::Result<()> {
    // Prefer the syncrecd next to this binary.
    let daemon_path = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join("syncrecd")))
        .filter(|p| p.exists())
        .unwrap_or_else(|| PathBuf::from("syncrecd"));

    debug!(path = %daemon_path.display(), "Starting daemon");

    Command::new(&daemon_path)
        .args(["start", "-d"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    Ok(())
}

/// Ensures the daemon is running, starting it if necessary.
///
/// Waits up to three seconds for the PID file to show a live process.
pub async fn ensure_daemon_running() -> Result<(), String> {
    if is_daemon_running() {
        debug!("Daemon already running");
        return Ok(());
    }

    info!("Daemon not running, starting it");

    spawn_daemon().map_err(|e| format!("Failed to start daemon: {e}"))?;

    for attempt in 1..=30 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if is_daemon_running() {
            info!(attempts = attempt, "Daemon started");
            return Ok(());
        }
    }

    Err("Daemon failed to start within 3 seconds".to_string())
}
