//! # WebPTY Daemon Library
//!
//! A local daemon that multiplexes pty-backed shell sessions behind a Unix
//! control socket.
//!
//! ## Overview
//!
//! Each session owns a pseudo-terminal running the user's shell. Output is
//! relayed to two sinks:
//!
//! - **Log file** at `<log_dir>/<id>.log`, append-only and flushed per chunk
//! - **Named pipe** at `<sessions_dir>/<id>.out`, best-effort for a live reader
//!
//! Sessions are torn down exactly once, whether the shell exits on its own,
//! a client asks for it, or the daemon shuts down.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Daemon                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌────────────────┐   ┌──────────────────┐  │
//! │  │ IpcServer  │──▶│ RequestHandler │──▶│  SessionManager  │  │
//! │  └────────────┘   └────────────────┘   └──────────────────┘  │
//! │                                           │      │           │
//! │                          ┌────────────────┘      │           │
//! │                          ▼                       ▼           │
//! │                   ┌─────────────┐        ┌──────────────┐    │
//! │                   │ PtySession  │◀───────│    Reaper    │    │
//! │                   │ + RelayLoop │        │ TERM → KILL  │    │
//! │                   └─────────────┘        └──────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::config::default_config_path;
//! use daemon::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(default_config_path())?;
//!     config.validate()?;
//!
//!     // Serves until SIGINT/SIGTERM or a `stop` request.
//!     Daemon::new(config)?.run().await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`paths`]: Filesystem roots, named pipes and log files
//! - [`session`]: Shell resolution, pty sessions, relaying and teardown
//! - [`ipc`]: Control socket server, request dispatch and client
//! - [`daemon`]: Foreground daemon runtime

pub mod config;
pub mod daemon;
pub mod ipc;
pub mod paths;
pub mod session;

// Re-export protocol for convenience
pub use webpty_protocol as protocol;

pub use config::Config;
pub use daemon::Daemon;
pub use ipc::{IpcClient, IpcError, IpcServer, RequestHandler};
pub use paths::ResolvedPaths;
pub use session::{
    LifecycleState, PtySession, SessionError, SessionId, SessionManager, TeardownReport,
};
