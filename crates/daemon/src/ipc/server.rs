//! IPC server for the control socket.
//!
//! The server listens on a Unix socket. Each accepted connection carries
//! exactly one newline-terminated JSON request and receives exactly one
//! JSON response before it is closed.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use webpty_protocol::{ProtocolError, Request, Response};

/// Largest request line accepted from a client.
pub const MAX_REQUEST_BYTES: u64 = 1024 * 1024;

/// A server that listens for control connections on a Unix socket.
#[derive(Debug)]
pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
}

impl IpcServer {
    /// Bind the server to the specified socket path.
    ///
    /// Creates missing parent directories and replaces a stale socket file.
    /// The socket is restricted to the owning user.
    pub async fn bind(path: &Path) -> Result<Self, io::Error> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Socket path this server is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept a new incoming connection.
    pub async fn accept(&self) -> Result<IpcConnection, io::Error> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(IpcConnection::new(stream))
    }
}

/// One accepted client connection.
pub struct IpcConnection {
    reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    writer: tokio::io::WriteHalf<UnixStream>,
}

impl IpcConnection {
    fn new(stream: UnixStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    /// Reads the connection's request line.
    ///
    /// Returns `None` if the client disconnected without sending anything.
    pub async fn read_request(&mut self) -> Result<Option<Request>, IpcError> {
        let mut line = String::new();
        let bytes_read = (&mut self.reader)
            .take(MAX_REQUEST_BYTES)
            .read_line(&mut line)
            .await
            .map_err(IpcError::Io)?;

        if bytes_read == 0 {
            return Ok(None);
        }

        let request = Request::from_json(line.trim())?;
        Ok(Some(request))
    }

    /// Reads the request line, giving up after `timeout`.
    pub async fn read_request_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Request>, IpcError> {
        tokio::time::timeout(timeout, self.read_request())
            .await
            .map_err(|_| IpcError::Timeout)?
    }

    /// Send a response to the client.
    pub async fn send_response(&mut self, response: &Response) -> Result<(), IpcError> {
        let mut json = response.to_json()?;
        json.push('\n');

        self.writer
            .write_all(json.as_bytes())
            .await
            .map_err(IpcError::Io)?;
        self.writer.flush().await.map_err(IpcError::Io)?;
        self.writer.shutdown().await.map_err(IpcError::Io)?;

        Ok(())
    }
}

/// Errors that can occur during IPC communication.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A JSON serialization/deserialization error occurred.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The request or response was not a valid protocol message.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The peer did not complete its message in time.
    #[error("operation timed out")]
    Timeout,

    /// The daemon answered with `ok: false`.
    #[error("{0}")]
    Daemon(String),
}
