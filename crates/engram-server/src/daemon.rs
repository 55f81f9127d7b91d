//! Daemon supervisor
//!
//! PID-file based lifecycle for the HTTP server: `start` re-execs the
//! current binary detached, `stop` delivers SIGTERM and waits, `status`
//! distinguishes running daemons from stale PID files left by a crash.

use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{bail, Context};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::warn;

use engram_core::Config;

/// Daemon liveness as seen from the PID file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    /// PID file present and the process is alive
    Running(i32),
    /// PID file present but no such process (crash or unclean shutdown)
    Stale(i32),
    /// No PID file
    Stopped,
}

/// Write the current process id to the PID file
pub fn write_pid_file(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, std::process::id().to_string())
}

/// Remove the PID file, ignoring a missing one
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove PID file {:?}: {}", path, e);
        }
    }
}

fn read_pid(path: &Path) -> Option<i32> {
    fs::read_to_string(path)
        .ok()
        .and_then(|raw| raw.trim().parse::<i32>().ok())
}

/// Signal 0 probe: does the process exist?
fn is_running(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

/// Inspect the PID file and the process table
pub fn status(config: &Config) -> DaemonStatus {
    match read_pid(&config.pid_path()) {
        Some(pid) if is_running(pid) => DaemonStatus::Running(pid),
        Some(pid) => DaemonStatus::Stale(pid),
        None => DaemonStatus::Stopped,
    }
}

/// Start the daemon: spawn a detached `serve` child logging to the data-dir
/// log file. The child writes its own PID file once the listener is up.
pub fn start(config: &Config) -> anyhow::Result<()> {
    match status(config) {
        DaemonStatus::Running(pid) => bail!("daemon already running (pid {})", pid),
        DaemonStatus::Stale(pid) => {
            warn!("Removing stale PID file (pid {} is gone)", pid);
            remove_pid_file(&config.pid_path());
        }
        DaemonStatus::Stopped => {}
    }

    let exe = std::env::current_exe().context("cannot resolve current executable")?;
    let log = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_path())
        .with_context(|| format!("cannot open log file {:?}", config.log_path()))?;
    let log_err = log.try_clone()?;

    Command::new(exe)
        .arg("serve")
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .spawn()
        .context("failed to spawn daemon process")?;

    // Give the child a moment to bind and write its PID file
    for _ in 0..20 {
        std::thread::sleep(Duration::from_millis(100));
        if matches!(status(config), DaemonStatus::Running(_)) {
            return Ok(());
        }
    }
    bail!(
        "daemon did not come up within 2s; check {}",
        config.log_path().display()
    )
}

/// Stop the daemon with SIGTERM, waiting up to five seconds.
/// Returns false when nothing was running.
pub fn stop(config: &Config) -> anyhow::Result<bool> {
    let pid = match status(config) {
        DaemonStatus::Running(pid) => pid,
        DaemonStatus::Stale(pid) => {
            warn!("Removing stale PID file (pid {} is gone)", pid);
            remove_pid_file(&config.pid_path());
            return Ok(false);
        }
        DaemonStatus::Stopped => return Ok(false),
    };

    kill(Pid::from_raw(pid), Signal::SIGTERM)
        .with_context(|| format!("failed to signal pid {}", pid))?;

    for _ in 0..50 {
        std::thread::sleep(Duration::from_millis(100));
        if !is_running(pid) {
            remove_pid_file(&config.pid_path());
            return Ok(true);
        }
    }
    bail!("daemon (pid {}) did not exit within 5s", pid)
}

/// Stop (if running) then start
pub fn restart(config: &Config) -> anyhow::Result<()> {
    stop(config)?;
    start(config)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        Config {
            db_path: dir.path().join("engram.db"),
            data_dir: dir.path().to_path_buf(),
            ..Config::from_env()
        }
    }

    #[test]
    fn test_status_without_pid_file() {
        let dir = TempDir::new().unwrap();
        assert_eq!(status(&test_config(&dir)), DaemonStatus::Stopped);
    }

    #[test]
    fn test_own_pid_reads_as_running() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        write_pid_file(&config.pid_path()).unwrap();
        assert_eq!(
            status(&config),
            DaemonStatus::Running(std::process::id() as i32)
        );
        remove_pid_file(&config.pid_path());
        assert_eq!(status(&config), DaemonStatus::Stopped);
    }

    #[test]
    fn test_dead_pid_reads_as_stale() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        // PID 1 is init and never ours; an absurd value is reliably dead
        fs::write(config.pid_path(), "999999999").unwrap();
        assert_eq!(status(&config), DaemonStatus::Stale(999999999));
    }

    #[test]
    fn test_stop_when_not_running() {
        let dir = TempDir::new().unwrap();
        assert!(!stop(&test_config(&dir)).unwrap());
    }

    #[test]
    fn test_garbage_pid_file_is_stopped() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        fs::write(config.pid_path(), "not-a-pid").unwrap();
        assert_eq!(status(&config), DaemonStatus::Stopped);
    }
}
