//! PID file utilities for daemon running detection.
//!
//! The PID file lives next to the control socket. A file whose process is
//! gone, or whose contents do not parse, is stale and is removed on read.

use std::fs;
use std::io;
use std::path::Path;

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

/// Reads the PID stored at `path`, without checking liveness.
pub fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Returns the PID of a live daemon recorded at `path`.
///
/// Cleans up stale PID files automatically.
pub fn running_pid(path: &Path) -> Option<u32> {
    if !path.exists() {
        return None;
    }

    match read_pid(path) {
        Some(pid) if is_process_running(pid) => Some(pid),
        _ => {
            tracing::debug!(path = %path.display(), "Removing stale PID file");
            cleanup_stale_pid_file(path);
            None
        }
    }
}

/// Records the current process ID at `path`.
pub fn write_pid_file(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{}\n", std::process::id()))
}

/// Removes the PID file if it still names the current process.
pub fn remove_pid_file(path: &Path) {
    if read_pid(path) == Some(std::process::id()) {
        cleanup_stale_pid_file(path);
    }
}

/// Whether a process with the given PID exists.
///
/// A process owned by another user still counts as running.
pub fn is_process_running(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

fn cleanup_stale_pid_file(path: &Path) {
    let _ = fs::remove_file(path);
}
