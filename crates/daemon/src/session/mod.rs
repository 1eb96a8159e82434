//! Session management module.
//!
//! Shell resolution, pty allocation, output relaying, and teardown of
//! pty-backed shell sessions.

pub mod manager;
pub mod pty;
pub mod reaper;
pub mod registry;
pub mod relay;
pub mod shell;
pub mod sink;

pub use manager::SessionManager;
pub use pty::{PtySession, SessionError, SessionId, SpawnOptions};
pub use reaper::{LifecycleState, Reaper, TeardownReport};
pub use registry::SessionRegistry;
pub use shell::{resolve_shell, ShellError};
pub use sink::{LogSink, PipeSink};
