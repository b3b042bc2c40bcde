//! Gateway daemon management — PID file, spawn, stop, status.
//!
//! `whatsblitz gateway start` re-launches the current binary as a detached
//! `gateway run` process, records its PID under the state directory, and
//! points its output at a log file. `stop` and `status` work off that PID
//! file, with stale detection via `sysinfo`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use sysinfo::{Pid, Signal, System};

// ── PID file helpers ────────────────────────────────────────────────────────

/// `<state_dir>/gateway.pid`
pub fn pid_path(state_dir: &Path) -> PathBuf {
    state_dir.join("gateway.pid")
}

/// `<state_dir>/logs/gateway.log`
pub fn log_path(state_dir: &Path) -> PathBuf {
    state_dir.join("logs").join("gateway.log")
}

fn write_pid(state_dir: &Path, pid: u32) -> Result<()> {
    let path = pid_path(state_dir);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, pid.to_string())
        .with_context(|| format!("Failed to write PID file {}", path.display()))
}

fn read_pid(state_dir: &Path) -> Option<u32> {
    fs::read_to_string(pid_path(state_dir))
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

fn remove_pid(state_dir: &Path) {
    let _ = fs::remove_file(pid_path(state_dir));
}

fn is_process_alive(pid: u32) -> bool {
    let mut sys = System::new();
    sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
    sys.process(Pid::from_u32(pid)).is_some()
}

// ── High-level daemon operations ────────────────────────────────────────────

/// Status of the gateway daemon.
#[derive(Debug, Clone)]
pub enum DaemonStatus {
    Running { pid: u32 },
    /// PID file exists but the process is dead.
    Stale { pid: u32 },
    Stopped,
}

pub fn status(state_dir: &Path) -> DaemonStatus {
    match read_pid(state_dir) {
        Some(pid) if is_process_alive(pid) => DaemonStatus::Running { pid },
        Some(pid) => DaemonStatus::Stale { pid },
        None => DaemonStatus::Stopped,
    }
}

/// Spawn `whatsblitz gateway run` as a detached background process and
/// record its PID. Output goes to the gateway log file.
pub fn start(state_dir: &Path, listen: Option<&str>) -> Result<u32> {
    if let DaemonStatus::Running { pid } = status(state_dir) {
        anyhow::bail!("Gateway is already running (PID {pid})");
    }
    remove_pid(state_dir);

    let current_exe = std::env::current_exe().context("Failed to resolve own binary path")?;

    let log = log_path(state_dir);
    if let Some(parent) = log.parent() {
        fs::create_dir_all(parent)?;
    }
    let log_file = fs::File::create(&log)
        .with_context(|| format!("Failed to create gateway log at {}", log.display()))?;
    let log_stderr = log_file.try_clone().context("Failed to clone log file handle")?;

    let mut cmd = Command::new(&current_exe);
    cmd.arg("gateway")
        .arg("run")
        .arg("--state-dir")
        .arg(state_dir)
        .stdout(log_file)
        .stderr(log_stderr);
    if let Some(listen) = listen {
        cmd.arg("--listen").arg(listen);
    }

    detach_child(&mut cmd);

    let child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {}", current_exe.display()))?;
    let pid = child.id();
    write_pid(state_dir, pid)?;
    Ok(pid)
}

#[derive(Debug)]
pub enum StopResult {
    Stopped { pid: u32 },
    WasStale { pid: u32 },
    WasNotRunning,
}

/// Stop a running gateway by terminating the recorded process.
pub fn stop(state_dir: &Path) -> Result<StopResult> {
    match status(state_dir) {
        DaemonStatus::Running { pid } => {
            kill_process(pid)?;
            for _ in 0..20 {
                std::thread::sleep(std::time::Duration::from_millis(100));
                if !is_process_alive(pid) {
                    break;
                }
            }
            remove_pid(state_dir);
            Ok(StopResult::Stopped { pid })
        }
        DaemonStatus::Stale { pid } => {
            remove_pid(state_dir);
            Ok(StopResult::WasStale { pid })
        }
        DaemonStatus::Stopped => Ok(StopResult::WasNotRunning),
    }
}

/// SIGTERM on Unix, TerminateProcess on Windows, hard kill as fallback.
fn kill_process(pid: u32) -> Result<()> {
    let sysinfo_pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[sysinfo_pid]), true);
    let process = sys
        .process(sysinfo_pid)
        .with_context(|| format!("Process {pid} not found"))?;

    if !process.kill_with(Signal::Term).unwrap_or(false) {
        process.kill();
    }
    Ok(())
}

#[cfg(unix)]
fn detach_child(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    // New process group so the child survives the parent's terminal.
    cmd.process_group(0);
}

#[cfg(windows)]
fn detach_child(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    // CREATE_NEW_PROCESS_GROUP | DETACHED_PROCESS
    cmd.creation_flags(0x0000_0208);
}

#[cfg(not(any(unix, windows)))]
fn detach_child(_cmd: &mut Command) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_pid(dir.path()).is_none());
        write_pid(dir.path(), 4242).unwrap();
        assert_eq!(read_pid(dir.path()), Some(4242));
        remove_pid(dir.path());
        assert!(read_pid(dir.path()).is_none());
    }

    #[test]
    fn dead_pid_reads_as_stale() {
        let dir = tempfile::tempdir().unwrap();
        // PID 0 / huge PIDs are never a live user process.
        write_pid(dir.path(), u32::MAX - 1).unwrap();
        match status(dir.path()) {
            DaemonStatus::Stale { pid } => assert_eq!(pid, u32::MAX - 1),
            other => panic!("unexpected status: {other:?}"),
        }
    }
}
