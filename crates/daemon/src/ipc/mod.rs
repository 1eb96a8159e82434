//! Unix Domain Socket IPC module for CLI-daemon communication.
//!
//! ## Overview
//!
//! Every connection carries exactly one request and one response, each a
//! single JSON object followed by a newline:
//!
//! ```text
//! -> {"action":"write","data":{"id":"...","data":"echo hi\n"}}
//! <- {"ok":true}
//! ```
//!
//! ## Example
//!
//! ### Server (Daemon) Side
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use daemon::config::SessionConfig;
//! use daemon::ipc::{IpcServer, RequestHandler};
//! use daemon::paths::ResolvedPaths;
//! use daemon::session::SessionManager;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let paths = ResolvedPaths::under(Path::new("/tmp/webpty"));
//!     let server = IpcServer::bind(&paths.socket_path).await?;
//!     let manager = Arc::new(SessionManager::new(paths, SessionConfig::default()));
//!     let handler = RequestHandler::new(manager, CancellationToken::new(), Duration::from_secs(5));
//!
//!     loop {
//!         let conn = server.accept().await?;
//!         let handler = handler.clone();
//!         tokio::spawn(async move { handler.serve(conn).await });
//!     }
//! }
//! ```
//!
//! ### Client (CLI) Side
//!
//! ```rust,no_run
//! use daemon::ipc::IpcClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = IpcClient::new("/tmp/webpty/pty.sock");
//!
//!     if client.ping().await? {
//!         let id = client.spawn().await?;
//!         client.write(&id, "echo hi\n").await?;
//!     }
//!
//!     Ok(())
//! }
//! ```

mod client;
mod handler;
pub mod pidfile;
mod server;

pub use client::IpcClient;
pub use handler::RequestHandler;
pub use pidfile::{is_process_running, running_pid};
pub use server::{IpcConnection, IpcError, IpcServer, MAX_REQUEST_BYTES};
