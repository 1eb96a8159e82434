//! IPC client for talking to a running daemon.
//!
//! The daemon answers one request per connection, so every call opens a
//! fresh connection, sends one request line and reads one response line.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use webpty_protocol::{ListData, Request, Response, ShutdownData, SpawnData, StatusData};

use super::server::IpcError;

/// Default timeout for client operations in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// A client for the daemon's control socket.
#[derive(Debug, Clone)]
pub struct IpcClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl IpcClient {
    /// Creates a client for the socket at `path`. Nothing is connected yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: path.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Sets the per-call timeout covering connect, send and receive.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Socket path this client talks to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Sends a request and returns the raw response, whatever its `ok`.
    pub async fn send(&self, request: &Request) -> Result<Response, IpcError> {
        tokio::time::timeout(self.timeout, self.send_internal(request))
            .await
            .map_err(|_| IpcError::Timeout)?
    }

    async fn send_internal(&self, request: &Request) -> Result<Response, IpcError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(IpcError::Io)?;
        let (read_half, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        let mut json = request.to_json()?;
        json.push('\n');
        writer
            .write_all(json.as_bytes())
            .await
            .map_err(IpcError::Io)?;
        writer.flush().await.map_err(IpcError::Io)?;

        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await.map_err(IpcError::Io)?;

        if bytes_read == 0 {
            return Err(IpcError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "daemon closed connection",
            )));
        }

        Ok(Response::from_json(line.trim())?)
    }

    /// Sends a request and turns an `ok: false` response into an error.
    pub async fn call(&self, request: &Request) -> Result<Response, IpcError> {
        let response = self.send(request).await?;
        if response.ok {
            Ok(response)
        } else {
            Err(IpcError::Daemon(
                response.err.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }

    /// Checks whether the daemon is responsive.
    pub async fn ping(&self) -> Result<bool, IpcError> {
        Ok(self.send(&Request::Ping).await?.ok)
    }

    /// Spawns a session and returns its ID.
    pub async fn spawn(&self) -> Result<String, IpcError> {
        let data: SpawnData = self.call(&Request::Spawn).await?.data_as()?;
        Ok(data.id)
    }

    /// Writes input to a session.
    pub async fn write(&self, id: &str, data: &str) -> Result<(), IpcError> {
        self.call(&Request::Write {
            id: id.to_string(),
            data: data.to_string(),
        })
        .await?;
        Ok(())
    }

    /// Resizes a session.
    pub async fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), IpcError> {
        self.call(&Request::Resize {
            id: id.to_string(),
            cols,
            rows,
        })
        .await?;
        Ok(())
    }

    /// Kills a session.
    pub async fn kill(&self, id: &str) -> Result<(), IpcError> {
        self.call(&Request::Kill { id: id.to_string() }).await?;
        Ok(())
    }

    /// Lists sessions.
    pub async fn list(&self) -> Result<ListData, IpcError> {
        Ok(self.call(&Request::List).await?.data_as()?)
    }

    /// Gets daemon status.
    pub async fn status(&self) -> Result<StatusData, IpcError> {
        Ok(self.call(&Request::Status).await?.data_as()?)
    }

    /// Tears down every session, keeping the daemon running.
    pub async fn shutdown(&self) -> Result<ShutdownData, IpcError> {
        Ok(self.call(&Request::Shutdown).await?.data_as()?)
    }

    /// Asks the daemon to stop.
    pub async fn stop(&self) -> Result<(), IpcError> {
        self.call(&Request::Stop).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::server::IpcServer;
    use tempfile::tempdir;

    async fn answer_once(server: IpcServer, expected: Request, response: Response) {
        let mut conn = server.accept().await.unwrap();
        let request = conn.read_request().await.unwrap().unwrap();
        assert_eq!(request, expected);
        conn.send_response(&response).await.unwrap();
    }

    #[tokio::test]
    async fn test_client_connect_fails_when_daemon_not_running() {
        let temp_dir = tempdir().unwrap();
        let client = IpcClient::new(temp_dir.path().join("nonexistent.sock"));

        let result = client.ping().await;
        assert!(matches!(result, Err(IpcError::Io(_))));
    }

    #[tokio::test]
    async fn test_client_ping() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let server = IpcServer::bind(&socket_path).await.unwrap();

        let server_handle = tokio::spawn(answer_once(server, Request::Ping, Response::ok()));

        let client = IpcClient::new(&socket_path);
        assert!(client.ping().await.unwrap());

        server_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_spawn() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let server = IpcServer::bind(&socket_path).await.unwrap();

        let response = Response::ok_with(&SpawnData {
            id: "sess-1".to_string(),
        })
        .unwrap();
        let server_handle = tokio::spawn(answer_once(server, Request::Spawn, response));

        let client = IpcClient::new(&socket_path);
        assert_eq!(client.spawn().await.unwrap(), "sess-1");

        server_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_status() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let server = IpcServer::bind(&socket_path).await.unwrap();

        let response = Response::ok_with(&StatusData {
            pid: 42,
            uptime_secs: 100,
            session_count: 2,
        })
        .unwrap();
        let server_handle = tokio::spawn(answer_once(server, Request::Status, response));

        let client = IpcClient::new(&socket_path);
        let status = client.status().await.unwrap();
        assert_eq!(status.pid, 42);
        assert_eq!(status.uptime_secs, 100);
        assert_eq!(status.session_count, 2);

        server_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_daemon_error() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let server = IpcServer::bind(&socket_path).await.unwrap();

        let server_handle = tokio::spawn(answer_once(
            server,
            Request::Kill {
                id: "gone".to_string(),
            },
            Response::error("session not found"),
        ));

        let client = IpcClient::new(&socket_path);
        let err = client.kill("gone").await.unwrap_err();
        assert!(matches!(err, IpcError::Daemon(ref msg) if msg == "session not found"));

        server_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_timeout() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let server = IpcServer::bind(&socket_path).await.unwrap();

        let _server_handle = tokio::spawn(async move {
            let _conn = server.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let client = IpcClient::new(&socket_path).with_timeout(Duration::from_millis(100));
        let result = client.ping().await;
        assert!(matches!(result, Err(IpcError::Timeout)));
    }
}
