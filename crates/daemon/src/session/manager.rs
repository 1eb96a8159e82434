//! Session manager.
//!
//! Owns the registry and the reaper and implements every session-level
//! operation the control socket exposes: spawn, write, resize, kill, list,
//! shutdown-all and wait.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;
use webpty_protocol::SessionSummary;

use super::pty::{PtySession, SessionError, SessionId, SpawnOptions};
use super::reaper::{self, Reaper, TeardownReport};
use super::registry::SessionRegistry;
use super::{relay, shell};
use crate::config::SessionConfig;
use crate::paths::ResolvedPaths;

/// Thread-safe session manager.
///
/// Constructed once at startup and shared by every connection handler.
#[derive(Debug)]
pub struct SessionManager {
    registry: Arc<SessionRegistry<PtySession>>,
    reaper: Arc<Reaper>,
    paths: ResolvedPaths,
    settings: SessionConfig,
    slots: Arc<Semaphore>,
}

impl SessionManager {
    /// Creates a manager with an empty registry.
    pub fn new(paths: ResolvedPaths, settings: SessionConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let reaper = Arc::new(Reaper::new(
            Arc::clone(&registry),
            settings.grace_period(),
        ));
        let slots = Arc::new(Semaphore::new(settings.max_sessions));

        Self {
            registry,
            reaper,
            paths,
            settings,
            slots,
        }
    }

    /// Spawns a new shell session and starts relaying its output.
    pub async fn spawn(&self) -> Result<Arc<PtySession>, SessionError> {
        let permit = Arc::clone(&self.slots)
            .try_acquire_owned()
            .map_err(|_| SessionError::LimitReached {
                max: self.settings.max_sessions,
            })?;

        let shell = shell::resolve_from_env(&self.settings.fallback_shells)?;
        let options = SpawnOptions {
            shell,
            cols: self.settings.cols,
            rows: self.settings.rows,
            pipe_queue_capacity: self.settings.pipe_queue_capacity,
        };
        let id: SessionId = Uuid::new_v4().to_string();
        let paths = self.paths.clone();

        let allocation =
            tokio::task::spawn_blocking(move || PtySession::allocate(id, &paths, &options))
                .await
                .map_err(|e| SessionError::allocation("task", e))??;
        let (session, reader) = allocation.into_running().await;
        session.attach_slot(permit);

        if !self
            .registry
            .add(session.id().clone(), Arc::clone(&session))
        {
            tracing::error!(session_id = %session.id(), "Session ID collision");
            self.reaper.teardown(&session).await;
            return Err(SessionError::allocation("register", "duplicate session ID"));
        }

        relay::start(Arc::clone(&session), reader, Arc::clone(&self.reaper));
        reaper::watch_exit(Arc::clone(&session));

        tracing::info!(
            session_id = %session.id(),
            pid = ?session.pid(),
            shell = %session.shell().display(),
            "Spawned session"
        );

        Ok(session)
    }

    /// Looks up a session.
    pub fn get(&self, session_id: &str) -> Result<Arc<PtySession>, SessionError> {
        self.registry
            .get(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Writes input to a session's shell.
    pub async fn write(&self, session_id: &str, data: &[u8]) -> Result<(), SessionError> {
        self.get(session_id)?.write(data).await
    }

    /// Resizes a session's terminal.
    pub async fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<(), SessionError> {
        self.get(session_id)?.resize(cols, rows).await
    }

    /// Tears a session down and removes it.
    pub async fn kill(&self, session_id: &str) -> Result<TeardownReport, SessionError> {
        let session = self.get(session_id)?;
        Ok(self.reaper.teardown(&session).await)
    }

    /// Waits until a session's relay loop has exited.
    pub async fn wait(&self, session_id: &str) -> Result<(), SessionError> {
        let session = self.get(session_id)?;
        session.wait().await;
        Ok(())
    }

    /// Lists registered sessions, oldest first.
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<SessionSummary> = self
            .registry
            .list()
            .iter()
            .map(|session| session.summary())
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    /// Number of registered sessions.
    pub fn count(&self) -> usize {
        self.registry.count()
    }

    /// Tears down every registered session. Returns how many were closed.
    pub async fn shutdown_all(&self) -> usize {
        let sessions = self.registry.list();
        if sessions.is_empty() {
            return 0;
        }

        tracing::info!(count = sessions.len(), "Shutting down all sessions");

        let mut tasks = JoinSet::new();
        for session in sessions {
            let reaper = Arc::clone(&self.reaper);
            tasks.spawn(async move { reaper.teardown(&session).await });
        }

        let mut closed = 0;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(_) => closed += 1,
                Err(e) => tracing::error!(error = %e, "Teardown task failed"),
            }
        }

        closed
    }
}
