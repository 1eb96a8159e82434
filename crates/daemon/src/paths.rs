//! Filesystem layout and provisioning.
//!
//! Every session owns two paths partitioned by its identifier:
//!
//! - `<sessions-dir>/<id>.out`: named pipe for live output
//! - `<log-dir>/<id>.log`: append-only output log
//!
//! This module expands configured roots, creates the directories, and
//! creates, opens and removes the per-session named pipe.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Component, Path, PathBuf};

use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use thiserror::Error;

/// Extension of the per-session named pipe.
pub const PIPE_EXTENSION: &str = "out";

/// Extension of the per-session output log.
pub const LOG_EXTENSION: &str = "log";

/// Name of the PID file placed next to the control socket.
pub const PID_FILE_NAME: &str = "pty.pid";

/// Errors resolving configured paths.
#[derive(Debug, Error)]
pub enum PathError {
    /// `~` was used but the home directory is unknown.
    #[error("failed to get home directory for {0}")]
    NoHomeDir(PathBuf),
}

/// Expands a leading `~` component to the user's home directory.
///
/// `~user` forms are left untouched.
pub fn expand_tilde(path: &Path) -> Result<PathBuf, PathError> {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => {
            let home = dirs::home_dir().ok_or_else(|| PathError::NoHomeDir(path.to_path_buf()))?;
            Ok(home.join(components.as_path()))
        }
        _ => Ok(path.to_path_buf()),
    }
}

/// Configured roots after `~` expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    /// Directory of per-session named pipes.
    pub sessions_dir: PathBuf,
    /// Directory of per-session logs.
    pub log_dir: PathBuf,
    /// Control socket.
    pub socket_path: PathBuf,
}

impl ResolvedPaths {
    /// Roots nested under a single base directory. Used by tests and by
    /// embedders that want everything in one place.
    pub fn under(base: &Path) -> Self {
        Self {
            sessions_dir: base.join("sessions"),
            log_dir: base.join("log"),
            socket_path: base.join("pty.sock"),
        }
    }

    /// Path of the named pipe for `id`.
    pub fn pipe_path(&self, id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{id}.{PIPE_EXTENSION}"))
    }

    /// Path of the output log for `id`.
    pub fn log_path(&self, id: &str) -> PathBuf {
        self.log_dir.join(format!("{id}.{LOG_EXTENSION}"))
    }

    /// Path of the daemon PID file.
    pub fn pid_file(&self) -> PathBuf {
        self.socket_path
            .parent()
            .map(|dir| dir.join(PID_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(PID_FILE_NAME))
    }

    /// Creates the socket directory, sessions directory and log directory.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.ensure_session_dirs()
    }

    /// Creates the sessions and log directories.
    pub fn ensure_session_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(&self.sessions_dir)?;
        fs::create_dir_all(&self.log_dir)?;
        Ok(())
    }
}

/// Replaces whatever is at `path` with a fresh named pipe.
pub fn create_pipe(path: &Path) -> io::Result<()> {
    remove_if_exists(path)?;
    nix::unistd::mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(io::Error::from)
}

/// Opens a named pipe for non-blocking writes.
///
/// Fails with `ENXIO` while no reader has the pipe open.
pub fn open_pipe_writer(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .custom_flags(OFlag::O_NONBLOCK.bits())
        .open(path)
}

/// Opens (or creates) an append-only log file.
pub fn open_log(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(path)
}

/// Removes `path`, treating absence as success.
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::FileTypeExt;
    use tempfile::TempDir;

    #[test]
    fn test_expand_tilde_alone() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde(Path::new("~")).unwrap(), home);
    }

    #[test]
    fn test_expand_tilde_prefix() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(
            expand_tilde(Path::new("~/.webpty/pty.sock")).unwrap(),
            home.join(".webpty/pty.sock")
        );
    }

    #[test]
    fn test_expand_tilde_leaves_other_paths() {
        assert_eq!(
            expand_tilde(Path::new("/var/run/pty.sock")).unwrap(),
            PathBuf::from("/var/run/pty.sock")
        );
        assert_eq!(
            expand_tilde(Path::new("relative/~")).unwrap(),
            PathBuf::from("relative/~")
        );
        assert_eq!(
            expand_tilde(Path::new("~other/x")).unwrap(),
            PathBuf::from("~other/x")
        );
    }

    #[test]
    fn test_session_paths_partitioned_by_id() {
        let paths = ResolvedPaths::under(Path::new("/base"));
        assert_eq!(paths.pipe_path("abc"), PathBuf::from("/base/sessions/abc.out"));
        assert_eq!(paths.log_path("abc"), PathBuf::from("/base/log/abc.log"));
        assert_eq!(paths.pid_file(), PathBuf::from("/base/pty.pid"));
    }

    #[test]
    fn test_ensure_dirs_creates_all_roots() {
        let temp_dir = TempDir::new().unwrap();
        let paths = ResolvedPaths::under(&temp_dir.path().join("nested"));

        paths.ensure_dirs().unwrap();

        assert!(paths.sessions_dir.is_dir());
        assert!(paths.log_dir.is_dir());
        assert!(paths.socket_path.parent().unwrap().is_dir());
    }

    #[test]
    fn test_create_pipe_replaces_stale_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stale.out");
        fs::write(&path, b"leftover").unwrap();

        create_pipe(&path).unwrap();

        let file_type = fs::metadata(&path).unwrap().file_type();
        assert!(file_type.is_fifo());
    }

    #[test]
    fn test_open_pipe_writer_without_reader_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("noreader.out");
        create_pipe(&path).unwrap();

        let err = open_pipe_writer(&path).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(nix::libc::ENXIO));
    }

    #[test]
    fn test_open_pipe_writer_with_reader_succeeds() {
        use std::io::{Read, Write};

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("reader.out");
        create_pipe(&path).unwrap();

        let mut reader = OpenOptions::new()
            .read(true)
            .custom_flags(OFlag::O_NONBLOCK.bits())
            .open(&path)
            .unwrap();
        let mut writer = open_pipe_writer(&path).unwrap();
        writer.write_all(b"hello").unwrap();

        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn test_remove_if_exists_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("gone.out");
        fs::write(&path, b"").unwrap();

        remove_if_exists(&path).unwrap();
        remove_if_exists(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_open_log_appends() {
        use std::io::Write;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("s.log");

        open_log(&path).unwrap().write_all(b"one").unwrap();
        open_log(&path).unwrap().write_all(b"two").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"onetwo");
    }
}
