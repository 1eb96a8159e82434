//! Request dispatch.
//!
//! Maps each control request onto the session manager and renders the
//! outcome as a response envelope. Per-session failures become error
//! responses; nothing here can take the daemon down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use webpty_protocol::{ListData, Request, Response, ShutdownData, SpawnData, StatusData};

use super::server::{IpcConnection, IpcError};
use crate::session::{SessionError, SessionManager};

/// Dispatches requests against a shared session manager.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    manager: Arc<SessionManager>,
    started_at: Instant,
    stop: CancellationToken,
    request_timeout: Duration,
}

impl RequestHandler {
    /// Creates a handler. `stop` is cancelled after a `stop` request has
    /// been answered.
    pub fn new(
        manager: Arc<SessionManager>,
        stop: CancellationToken,
        request_timeout: Duration,
    ) -> Self {
        Self {
            manager,
            started_at: Instant::now(),
            stop,
            request_timeout,
        }
    }

    /// Serves one connection: read one request, answer it, close.
    pub async fn serve(&self, mut conn: IpcConnection) {
        let request = match conn.read_request_timeout(self.request_timeout).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                tracing::debug!("Client disconnected without a request");
                return;
            }
            Err(e) => {
                tracing::debug!(error = %e, "Rejected request");
                if let Err(e) = conn.send_response(&Response::error(e.to_string())).await {
                    tracing::debug!(error = %e, "Failed to send error response");
                }
                return;
            }
        };

        tracing::debug!(action = request.action(), session_id = ?request.session_id(), "Handling request");

        let stop_after = matches!(request, Request::Stop);
        let response = self.handle(request).await;

        if let Err(e) = conn.send_response(&response).await {
            tracing::debug!(error = %e, "Failed to send response");
        }

        if stop_after {
            tracing::info!("Stop requested by client");
            self.stop.cancel();
        }
    }

    /// Executes a request and builds its response.
    pub async fn handle(&self, request: Request) -> Response {
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => Response::error(error_message(&e)),
        }
    }

    async fn dispatch(&self, request: Request) -> Result<Response, HandlerError> {
        let response = match request {
            Request::Spawn => {
                let session = self.manager.spawn().await?;
                Response::ok_with(&SpawnData {
                    id: session.id().clone(),
                })?
            }
            Request::Write { id, data } => {
                self.manager.write(&id, data.as_bytes()).await?;
                Response::ok()
            }
            Request::Resize { id, cols, rows } => {
                self.manager.resize(&id, cols, rows).await?;
                Response::ok()
            }
            Request::Kill { id } => {
                self.manager.kill(&id).await?;
                Response::ok()
            }
            Request::List => Response::ok_with(&ListData::new(self.manager.list()))?,
            Request::Ping => Response::ok(),
            Request::Status => Response::ok_with(&StatusData {
                pid: std::process::id(),
                uptime_secs: self.started_at.elapsed().as_secs(),
                session_count: self.manager.count(),
            })?,
            Request::Shutdown => {
                let closed = self.manager.shutdown_all().await;
                Response::ok_with(&ShutdownData { closed })?
            }
            Request::Stop => Response::ok(),
        };
        Ok(response)
    }
}

#[derive(Debug, thiserror::Error)]
enum HandlerError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Ipc(#[from] IpcError),
}

impl From<webpty_protocol::ProtocolError> for HandlerError {
    fn from(err: webpty_protocol::ProtocolError) -> Self {
        HandlerError::Ipc(IpcError::Protocol(err))
    }
}

fn error_message(err: &HandlerError) -> String {
    match err {
        HandlerError::Session(SessionError::NotFound(_)) => "session not found".to_string(),
        HandlerError::Session(SessionError::Closed(_)) => "session closed".to_string(),
        HandlerError::Session(SessionError::LimitReached { .. }) => {
            "session limit reached".to_string()
        }
        other => other.to_string(),
    }
}
