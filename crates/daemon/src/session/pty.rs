//! PTY session.
//!
//! A session owns one pty master, the shell attached to its slave side, and
//! the two output sinks. The master, writer and sinks live behind a single
//! async lock so writes, resizes and relayed output never interleave.
//!
//! Spawning is a strictly ordered allocation. Any failure rolls back every
//! step that already succeeded, so a failed spawn leaves no process, no pipe
//! file and no registry entry behind.

use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell, OwnedSemaphorePermit};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use webpty_protocol::{SessionStatus, SessionSummary};

use super::reaper::{LifecycleState, TeardownReport};
use super::shell::ShellError;
use super::sink::{LogSink, Offer, PipeSink};
use crate::paths::{self, ResolvedPaths};

/// Unique identifier for a session.
pub type SessionId = String;

/// How long a write may wait for the shell to drain its input queue.
const WRITE_STALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between attempts while the pty input queue is full.
const WRITE_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// Shared handle to the child process.
pub(crate) type SharedChild = Arc<StdMutex<Box<dyn Child + Send + Sync>>>;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// No usable shell.
    #[error(transparent)]
    Resolution(#[from] ShellError),

    /// A spawn step failed. Everything allocated before it was released.
    #[error("failed to allocate session ({stage}): {reason}")]
    Allocation {
        /// Step that failed.
        stage: &'static str,
        /// Underlying failure.
        reason: String,
    },

    /// The registry already holds the configured maximum.
    #[error("session limit reached ({max})")]
    LimitReached {
        /// Configured maximum.
        max: usize,
    },

    /// The session was not found.
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// The pty handle has already been released.
    #[error("session closed: {0}")]
    Closed(SessionId),

    /// The pty rejected an operation.
    #[error("pty error: {0}")]
    Pty(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SessionError {
    pub(crate) fn allocation(stage: &'static str, reason: impl ToString) -> Self {
        Self::Allocation {
            stage,
            reason: reason.to_string(),
        }
    }
}

/// Parameters for a single spawn.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Shell to run.
    pub shell: PathBuf,
    /// Initial width.
    pub cols: u16,
    /// Initial height.
    pub rows: u16,
    /// Pipe worker queue length.
    pub pipe_queue_capacity: usize,
}

/// State guarded by the session lock.
struct SessionIo {
    master: Option<Box<dyn MasterPty + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    log: Option<LogSink>,
    pipe: Option<PipeSink>,
    cols: u16,
    rows: u16,
}

/// A live pty-backed shell.
pub struct PtySession {
    id: SessionId,
    pid: Option<u32>,
    shell: PathBuf,
    pipe_path: PathBuf,
    log_path: PathBuf,
    created_at: SystemTime,
    io: Mutex<SessionIo>,
    child: SharedChild,
    input: Mutex<()>,
    closed: CancellationToken,
    done: CancellationToken,
    state: StdMutex<LifecycleState>,
    pub(crate) teardown: OnceCell<TeardownReport>,
    slot: StdMutex<Option<OwnedSemaphorePermit>>,
}

impl std::fmt::Debug for PtySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtySession")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("shell", &self.shell)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Resources produced by a successful allocation.
pub(crate) struct Allocation {
    pub(crate) session: PtySession,
    pub(crate) reader: File,
    pipe_writer: Option<File>,
    pipe_queue_capacity: usize,
}

impl std::fmt::Debug for Allocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocation")
            .field("session", &self.session)
            .field("reader", &self.reader)
            .field("pipe_attached", &self.pipe_writer.is_some())
            .finish_non_exhaustive()
    }
}

impl Allocation {
    /// Starts the pipe worker and returns the shared session plus the
    /// non-blocking pty reader for the relay loop.
    pub(crate) async fn into_running(self) -> (Arc<PtySession>, File) {
        let Allocation {
            session,
            reader,
            pipe_writer,
            pipe_queue_capacity,
        } = self;

        let sink = PipeSink::start(
            session.id.clone(),
            session.pipe_path.clone(),
            pipe_writer,
            pipe_queue_capacity,
        );
        session.io.lock().await.pipe = Some(sink);

        (Arc::new(session), reader)
    }
}

/// Kills and reaps the child and removes the pipe file unless disarmed.
struct SpawnRollback<'a> {
    session_id: &'a str,
    child: &'a mut Box<dyn Child + Send + Sync>,
    pipe_path: Option<PathBuf>,
    armed: bool,
}

impl<'a> SpawnRollback<'a> {
    fn new(session_id: &'a str, child: &'a mut Box<dyn Child + Send + Sync>) -> Self {
        Self {
            session_id,
            child,
            pipe_path: None,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SpawnRollback<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        if let Some(path) = self.pipe_path.take() {
            if let Err(e) = paths::remove_if_exists(&path) {
                tracing::warn!(
                    session_id = %self.session_id,
                    path = %path.display(),
                    error = %e,
                    "Failed to remove pipe during rollback"
                );
            }
        }

        if let Err(e) = self.child.kill() {
            tracing::warn!(session_id = %self.session_id, error = %e, "Failed to kill shell during rollback");
        }
        if let Err(e) = self.child.wait() {
            tracing::warn!(session_id = %self.session_id, error = %e, "Failed to reap shell during rollback");
        }

        tracing::warn!(session_id = %self.session_id, "Rolled back partial spawn");
    }
}

impl PtySession {
    /// Allocates the pty, shell, pipe and log for a new session.
    ///
    /// Blocking. Nothing is registered or started here; on error every
    /// step that succeeded has been undone.
    pub(crate) fn allocate(
        id: SessionId,
        paths: &ResolvedPaths,
        options: &SpawnOptions,
    ) -> Result<Allocation, SessionError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: options.rows,
                cols: options.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::allocation("pty", e))?;

        let cmd = CommandBuilder::new(&options.shell);
        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::allocation("process", e))?;
        drop(pair.slave);
        let master = pair.master;
        let pid = child.process_id();

        let mut rollback = SpawnRollback::new(&id, &mut child);

        let reader = clone_master_reader(&*master)
            .map_err(|e| SessionError::allocation("pty", e))?;
        let writer = master
            .take_writer()
            .map_err(|e| SessionError::allocation("pty", e))?;

        paths
            .ensure_session_dirs()
            .map_err(|e| SessionError::allocation("directories", e))?;

        let pipe_path = paths.pipe_path(&id);
        rollback.pipe_path = Some(pipe_path.clone());
        paths::create_pipe(&pipe_path).map_err(|e| SessionError::allocation("pipe", e))?;

        let pipe_writer = match paths::open_pipe_writer(&pipe_path) {
            Ok(file) => Some(file),
            Err(e) => {
                tracing::debug!(
                    session_id = %id,
                    error = %e,
                    "Pipe has no reader yet, streaming to log only"
                );
                None
            }
        };

        let log_path = paths.log_path(&id);
        let log = LogSink::open(&log_path).map_err(|e| SessionError::allocation("log", e))?;

        rollback.disarm();

        let session = PtySession {
            id,
            pid,
            shell: options.shell.clone(),
            pipe_path,
            log_path,
            created_at: SystemTime::now(),
            io: Mutex::new(SessionIo {
                master: Some(master),
                writer: Some(writer),
                log: Some(log),
                pipe: None,
                cols: options.cols,
                rows: options.rows,
            }),
            child: Arc::new(StdMutex::new(child)),
            input: Mutex::new(()),
            closed: CancellationToken::new(),
            done: CancellationToken::new(),
            state: StdMutex::new(LifecycleState::Running),
            teardown: OnceCell::new(),
            slot: StdMutex::new(None),
        };

        Ok(Allocation {
            session,
            reader,
            pipe_writer,
            pipe_queue_capacity: options.pipe_queue_capacity,
        })
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the process ID of the shell, if available.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Path of the shell executable.
    pub fn shell(&self) -> &Path {
        &self.shell
    }

    /// Path of the session's named pipe.
    pub fn pipe_path(&self) -> &Path {
        &self.pipe_path
    }

    /// Path of the session's output log.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Creation time as unix seconds.
    pub fn created_at(&self) -> u64 {
        self.created_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: LifecycleState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub(crate) fn child(&self) -> &SharedChild {
        &self.child
    }

    pub(crate) fn attach_slot(&self, permit: OwnedSemaphorePermit) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(permit);
    }

    pub(crate) fn release_slot(&self) {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Current terminal size.
    pub async fn size(&self) -> (u16, u16) {
        let io = self.io.lock().await;
        (io.cols, io.rows)
    }

    /// Whether the pty master is still open.
    pub async fn is_open(&self) -> bool {
        self.io.lock().await.master.is_some()
    }

    /// Whether the shell still answers a null signal.
    ///
    /// A zombie that has not been reaped yet still counts as alive.
    pub fn is_alive(&self) -> bool {
        match self.pid.and_then(|pid| i32::try_from(pid).ok()) {
            Some(pid) => signal::kill(Pid::from_raw(pid), None).is_ok(),
            None => false,
        }
    }

    /// List entry for this session.
    pub fn summary(&self) -> SessionSummary {
        let status = if self.is_alive() {
            SessionStatus::Active
        } else {
            SessionStatus::Exiting
        };
        SessionSummary {
            id: self.id.clone(),
            status,
            pid: self.pid,
            created_at: self.created_at(),
        }
    }

    /// Writes input to the shell.
    ///
    /// The master is non-blocking. When the shell's input queue is full the
    /// session lock is released between attempts so relayed output keeps
    /// flowing, and concurrent writes still land whole and in order.
    pub async fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        let _input = self.input.lock().await;
        let deadline = Instant::now() + WRITE_STALL_TIMEOUT;
        let mut written = 0;

        loop {
            let attempt = {
                let mut io = self.io.lock().await;
                let writer = io
                    .writer
                    .as_mut()
                    .ok_or_else(|| SessionError::Closed(self.id.clone()))?;
                if written == data.len() {
                    writer.flush()?;
                    break;
                }
                writer.write(&data[written..])
            };

            match attempt {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "shell is not reading its input",
                        )
                        .into());
                    }
                    tokio::time::sleep(WRITE_RETRY_INTERVAL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::trace!(session_id = %self.id, bytes = data.len(), "Wrote to PTY");
        Ok(())
    }

    /// Resizes the terminal window. Dimensions are validated upstream.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        let mut io = self.io.lock().await;
        let master = io
            .master
            .as_ref()
            .ok_or_else(|| SessionError::Closed(self.id.clone()))?;

        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Pty(e.to_string()))?;

        io.cols = cols;
        io.rows = rows;

        tracing::debug!(
            session_id = %self.id,
            cols = cols,
            rows = rows,
            "Resized PTY"
        );

        Ok(())
    }

    /// Dispatches one chunk of output to both sinks.
    ///
    /// The log append completes before this returns. The pipe only
    /// receives a queued copy.
    pub(crate) async fn relay_chunk(&self, chunk: &[u8]) {
        let mut io = self.io.lock().await;

        if let Some(log) = io.log.as_mut() {
            if let Err(e) = log.append(chunk) {
                tracing::warn!(session_id = %self.id, error = %e, "Log write failed");
            }
        }

        if let Some(pipe) = io.pipe.as_ref() {
            match pipe.offer(Bytes::copy_from_slice(chunk)) {
                Offer::Queued => {}
                Offer::Dropped => {
                    tracing::trace!(session_id = %self.id, "Pipe queue full, chunk dropped");
                }
                Offer::Closed => {
                    tracing::trace!(session_id = %self.id, "Pipe worker gone");
                }
            }
        }
    }

    /// Releases the pty handles and both sinks. Safe to call repeatedly.
    ///
    /// Also fires the close signal, which ends the relay loop's pending read
    /// and drops its copy of the master.
    pub(crate) async fn close_handles(&self, pipe_drain: Duration) {
        self.closed.cancel();
        let pipe = {
            let mut io = self.io.lock().await;
            io.writer = None;
            if io.master.take().is_some() {
                tracing::debug!(session_id = %self.id, "Closed PTY master");
            }
            if let Some(log) = io.log.take() {
                tracing::debug!(session_id = %self.id, path = %log.path().display(), "Closed log");
            }
            io.pipe.take()
        };

        if let Some(pipe) = pipe {
            pipe.close(pipe_drain).await;
        }
    }

    /// Sends `sig` to the shell if it has not exited yet.
    ///
    /// Returns `Ok(false)` when the shell had already exited.
    pub(crate) fn signal_if_running(
        child: &mut Box<dyn Child + Send + Sync>,
        sig: Signal,
    ) -> io::Result<bool> {
        if child.try_wait()?.is_some() {
            return Ok(false);
        }
        let pid = child
            .process_id()
            .and_then(|pid| i32::try_from(pid).ok())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "shell has no pid"))?;
        signal::kill(Pid::from_raw(pid), sig).map_err(io::Error::from)?;
        Ok(true)
    }

    /// Resolves once the pty handles have been released.
    pub(crate) async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Fires the completion signal. Called once by the relay loop.
    pub(crate) fn mark_done(&self) {
        self.done.cancel();
    }

    /// Whether the relay loop has exited.
    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Waits until the relay loop has exited.
    pub async fn wait(&self) {
        self.done.cancelled().await;
    }
}

/// Duplicates the master descriptor for the relay loop and switches it to
/// non-blocking mode.
///
/// The flag lives on the shared open file description, so the session's
/// writer becomes non-blocking too.
fn clone_master_reader(master: &(dyn MasterPty + Send)) -> io::Result<File> {
    let raw = master
        .as_raw_fd()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "pty master has no descriptor"))?;
    // SAFETY: `master` owns `raw` and outlives this borrow.
    let fd: OwnedFd = unsafe { BorrowedFd::borrow_raw(raw) }.try_clone_to_owned()?;
    set_nonblocking(&fd)?;
    Ok(File::from(fd))
}

fn set_nonblocking(fd: &OwnedFd) -> io::Result<()> {
    use nix::libc;

    // SAFETY: plain fcntl calls on a descriptor we own.
    unsafe {
        let flags = libc::fcntl(fd.as_raw_fd(), libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
