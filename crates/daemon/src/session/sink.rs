//! Output sinks.
//!
//! Every chunk read from a pty goes to two places:
//!
//! - [`LogSink`]: durable, append-only, written synchronously and synced
//!   after every chunk. It is the authoritative record of session output.
//! - [`PipeSink`]: best-effort live stream through a named pipe. Chunks are
//!   queued to one worker task per session, so a slow or absent reader
//!   never stalls the relay loop and chunk order is preserved.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::paths;

/// Durable per-session output log.
#[derive(Debug)]
pub struct LogSink {
    file: File,
    path: PathBuf,
}

impl LogSink {
    /// Opens (or creates) the log for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = paths::open_log(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Appends a chunk and syncs it to disk.
    pub fn append(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk)?;
        self.file.flush()?;
        self.file.sync_data()
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Outcome of offering a chunk to the pipe worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Queued for the worker.
    Queued,
    /// Queue full; chunk dropped from the pipe stream only.
    Dropped,
    /// Worker has exited.
    Closed,
}

/// Handle to a session's pipe worker.
#[derive(Debug)]
pub struct PipeSink {
    tx: mpsc::Sender<Bytes>,
    worker: JoinHandle<()>,
}

impl PipeSink {
    /// Starts the worker for `path`.
    ///
    /// `writer` is the write end opened at spawn time, if a reader was
    /// already attached. Otherwise the worker attaches lazily.
    pub fn start(
        session_id: String,
        path: PathBuf,
        writer: Option<File>,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(PipeWorker::new(session_id, path, writer).run(rx));
        Self { tx, worker }
    }

    /// Hands a chunk to the worker without waiting.
    pub fn offer(&self, chunk: Bytes) -> Offer {
        match self.tx.try_send(chunk) {
            Ok(()) => Offer::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Offer::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => Offer::Closed,
        }
    }

    /// Closes the queue and waits up to `timeout` for the worker to
    /// drain it. The worker is aborted if it does not finish in time.
    pub async fn close(self, timeout: Duration) {
        let Self { tx, mut worker } = self;
        drop(tx);

        match tokio::time::timeout(timeout, &mut worker).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Pipe worker failed");
            }
            Err(_) => {
                tracing::warn!("Pipe worker did not drain in time, aborting");
                worker.abort();
            }
        }
    }
}

/// Consumer side of the pipe queue.
struct PipeWorker {
    session_id: String,
    path: PathBuf,
    writer: Option<File>,
}

impl PipeWorker {
    fn new(session_id: String, path: PathBuf, writer: Option<File>) -> Self {
        Self {
            session_id,
            path,
            writer,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Bytes>) {
        while let Some(chunk) = rx.recv().await {
            self.deliver(&chunk);
        }
        tracing::trace!(session_id = %self.session_id, "Pipe worker finished");
    }

    fn deliver(&mut self, chunk: &[u8]) {
        if self.writer.is_none() {
            self.attach();
        }
        let Some(writer) = self.writer.as_mut() else {
            return;
        };

        let mut remaining = chunk;
        while !remaining.is_empty() {
            match writer.write(remaining) {
                Ok(0) => break,
                Ok(n) => remaining = &remaining[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    tracing::trace!(
                        session_id = %self.session_id,
                        dropped = remaining.len(),
                        "Pipe full, dropping output"
                    );
                    break;
                }
                Err(e) => {
                    if e.kind() == io::ErrorKind::BrokenPipe {
                        tracing::debug!(session_id = %self.session_id, "Pipe reader detached");
                    } else {
                        tracing::warn!(
                            session_id = %self.session_id,
                            error = %e,
                            "Pipe write failed (non-fatal)"
                        );
                    }
                    self.writer = None;
                    break;
                }
            }
        }
    }

    fn attach(&mut self) {
        match paths::open_pipe_writer(&self.path) {
            Ok(file) => {
                tracing::debug!(session_id = %self.session_id, "Pipe reader attached");
                self.writer = Some(file);
            }
            Err(e) => {
                tracing::trace!(
                    session_id = %self.session_id,
                    error = %e,
                    "Pipe not available for writing"
                );
            }
        }
    }
}
