//! Relay loop.
//!
//! One task per session reads the pty and hands each chunk to the session's
//! sinks. The reader is a non-blocking copy of the master registered with
//! the reactor, and every read races the session's close signal, so a
//! teardown ends the loop even while another process still holds the
//! slave open. The loop fires the session's completion signal after its
//! reader is dropped, then tears the session down.

use std::fs::File;
use std::io::{self, Read};
use std::sync::Arc;

use tokio::io::unix::AsyncFd;
use tokio::task::JoinHandle;

use super::pty::PtySession;
use super::reaper::Reaper;

/// Size of each pty read.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Starts the relay loop for a registered session.
pub fn start(session: Arc<PtySession>, reader: File, reaper: Arc<Reaper>) -> JoinHandle<()> {
    tokio::spawn(async move {
        run(&session, reader).await;
        session.mark_done();
        reaper.teardown(&session).await;
    })
}

async fn run(session: &PtySession, reader: File) {
    let session_id = session.id();
    let reader = match AsyncFd::new(reader) {
        Ok(reader) => reader,
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "Failed to register PTY reader");
            return;
        }
    };
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let result = tokio::select! {
            biased;
            _ = session.closed() => {
                tracing::debug!(session_id = %session_id, "PTY handle closed");
                return;
            }
            result = read_chunk(&reader, &mut buffer) => result,
        };

        match result {
            Ok(0) => {
                tracing::info!(session_id = %session_id, "PTY EOF - process exited");
                return;
            }
            Ok(n) => session.relay_chunk(&buffer[..n]).await,
            Err(e) if is_idle(&e) => continue,
            Err(e) if e.raw_os_error() == Some(nix::libc::EIO) => {
                // Linux reports a hung-up slave as EIO.
                tracing::info!(session_id = %session_id, "PTY closed - process exited");
                return;
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Error reading from PTY");
                return;
            }
        }
    }
}

/// Waits for the master to become readable and reads one chunk.
async fn read_chunk(reader: &AsyncFd<File>, buffer: &mut [u8]) -> io::Result<usize> {
    loop {
        let mut guard = reader.readable().await?;
        match guard.try_io(|inner| {
            let mut file: &File = inner.get_ref();
            file.read(buffer)
        }) {
            Ok(result) => return result,
            Err(_would_block) => continue,
        }
    }
}

fn is_idle(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}
