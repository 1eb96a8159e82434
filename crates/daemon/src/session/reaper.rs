//! Session teardown.
//!
//! Teardown walks a fixed sequence and never aborts part way: every step
//! logs its failure and the next step runs anyway.
//!
//! 1. Close the pty master and writer.
//! 2. Close the log.
//! 3. Close the pipe worker.
//! 4. Remove the pipe file.
//! 5. SIGTERM the shell if it is still running.
//! 6. Wait up to the grace period, then SIGKILL and reap.
//! 7. Remove the session from the registry.
//!
//! The shell moves through [`LifecycleState`] as this runs. Teardown is
//! idempotent: concurrent callers share a single run and all observe its
//! [`TeardownReport`].

use std::sync::{Arc, PoisonError, TryLockError};
use std::time::Duration;

use nix::sys::signal::Signal;
use portable_pty::ExitStatus;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::pty::{PtySession, SharedChild};
use super::registry::SessionRegistry;
use crate::paths;

/// How often the shell is polled while waiting for it to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How often the exit observer checks on a running shell.
const OBSERVER_INTERVAL: Duration = Duration::from_millis(100);

/// How long the pipe worker gets to drain queued output.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Where a session is in its termination sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Shell running, handles open.
    Running,
    /// SIGTERM delivered, waiting for exit.
    SignalSent,
    /// Grace period expired, SIGKILL delivered.
    Escalated,
    /// Exit status collected.
    Reaped,
    /// Removed from the registry.
    Unregistered,
}

/// Summary of a completed teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownReport {
    /// SIGKILL was needed.
    pub escalated: bool,
    /// Exit code, if the shell was reaped.
    pub exit_code: Option<u32>,
    /// This teardown removed the registry entry.
    pub unregistered: bool,
}

/// Runs the termination sequence against sessions of one registry.
#[derive(Debug)]
pub struct Reaper {
    registry: Arc<SessionRegistry<PtySession>>,
    grace_period: Duration,
}

impl Reaper {
    /// Creates a reaper. A zero grace period escalates as soon as the
    /// shell is seen running after SIGTERM.
    pub fn new(registry: Arc<SessionRegistry<PtySession>>, grace_period: Duration) -> Self {
        Self {
            registry,
            grace_period,
        }
    }

    /// Tears `session` down, or waits for the teardown already running.
    pub async fn teardown(&self, session: &Arc<PtySession>) -> TeardownReport {
        *session
            .teardown
            .get_or_init(|| self.run(session))
            .await
    }

    async fn run(&self, session: &Arc<PtySession>) -> TeardownReport {
        let session_id = session.id().clone();
        tracing::info!(session_id = %session_id, "Tearing down session");

        session.close_handles(PIPE_DRAIN_TIMEOUT).await;

        if let Err(e) = paths::remove_if_exists(session.pipe_path()) {
            tracing::warn!(
                session_id = %session_id,
                path = %session.pipe_path().display(),
                error = %e,
                "Failed to remove pipe"
            );
        }

        let (escalated, status) = self.terminate(session).await;

        let unregistered = self.registry.remove(&session_id, session);
        session.release_slot();
        session.set_state(LifecycleState::Unregistered);

        let report = TeardownReport {
            escalated,
            exit_code: status.map(|s| s.exit_code()),
            unregistered,
        };

        tracing::info!(
            session_id = %session_id,
            escalated = report.escalated,
            exit_code = ?report.exit_code,
            "Session cleaned up"
        );

        report
    }

    /// Steps 5 and 6. Returns whether SIGKILL was needed and the exit
    /// status if the shell was reaped.
    async fn terminate(&self, session: &PtySession) -> (bool, Option<ExitStatus>) {
        let session_id = session.id();
        let child = Arc::clone(session.child());

        let term = {
            let mut guard = child.lock().unwrap_or_else(PoisonError::into_inner);
            PtySession::signal_if_running(&mut guard, Signal::SIGTERM)
        };
        match term {
            Ok(true) => {
                tracing::debug!(session_id = %session_id, pid = ?session.pid(), "Sent SIGTERM");
                session.set_state(LifecycleState::SignalSent);
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to send SIGTERM");
            }
        }

        if let Some(status) = self.wait_for_exit(session_id, &child).await {
            session.set_state(LifecycleState::Reaped);
            return (false, Some(status));
        }

        tracing::debug!(
            session_id = %session_id,
            grace_ms = self.grace_period.as_millis() as u64,
            "Shell still running, escalating to SIGKILL"
        );
        session.set_state(LifecycleState::Escalated);

        let reaped = tokio::task::spawn_blocking(move || {
            let mut guard = child.lock().unwrap_or_else(PoisonError::into_inner);
            PtySession::signal_if_running(&mut guard, Signal::SIGKILL)?;
            guard.wait()
        })
        .await;

        match reaped {
            Ok(Ok(status)) => {
                session.set_state(LifecycleState::Reaped);
                (true, Some(status))
            }
            Ok(Err(e)) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to kill shell");
                (true, None)
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Reap task panicked");
                (true, None)
            }
        }
    }

    /// Polls for exit until the grace period runs out. Checks at least once.
    async fn wait_for_exit(&self, session_id: &str, child: &SharedChild) -> Option<ExitStatus> {
        let deadline = Instant::now() + self.grace_period;

        loop {
            let polled = {
                let mut guard = child.lock().unwrap_or_else(PoisonError::into_inner);
                guard.try_wait()
            };
            match polled {
                Ok(Some(status)) => return Some(status),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Failed to poll shell");
                    return None;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}

/// Logs the shell's exit once it happens. Purely observational.
pub(crate) fn watch_exit(session: Arc<PtySession>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(OBSERVER_INTERVAL).await;

            let finished = session.state() == LifecycleState::Unregistered;
            let polled = match session.child().try_lock() {
                Ok(mut guard) => guard.try_wait(),
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().try_wait(),
                Err(TryLockError::WouldBlock) => continue,
            };

            match polled {
                Ok(Some(status)) => {
                    if status.success() {
                        tracing::info!(session_id = %session.id(), "Shell exited");
                    } else {
                        tracing::info!(
                            session_id = %session.id(),
                            exit_code = status.exit_code(),
                            "Shell exited with error"
                        );
                    }
                    return;
                }
                Ok(None) if !finished => {}
                Ok(None) => return,
                Err(e) => {
                    tracing::debug!(session_id = %session.id(), error = %e, "Exit observer stopped");
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::ResolvedPaths;
    use crate::session::pty::SpawnOptions;
    use std::path::PathBuf;
    use tempfile::TempDir;

    async fn registered(
        temp_dir: &TempDir,
        registry: &Arc<SessionRegistry<PtySession>>,
        id: &str,
    ) -> Arc<PtySession> {
        let paths = ResolvedPaths::under(temp_dir.path());
        let options = SpawnOptions {
            shell: PathBuf::from("/bin/sh"),
            cols: 80,
            rows: 24,
            pipe_queue_capacity: 16,
        };
        let (session, _reader) = PtySession::allocate(id.to_string(), &paths, &options)
            .unwrap()
            .into_running()
            .await;
        registry.add(id.to_string(), Arc::clone(&session));
        session
    }

    fn is_reaped(pid: u32) -> bool {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_err()
    }

    #[tokio::test]
    async fn test_teardown_releases_everything() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(SessionRegistry::new());
        let reaper = Reaper::new(Arc::clone(&registry), Duration::from_millis(200));
        let session = registered(&temp_dir, &registry, "a").await;
        let pid = session.pid().unwrap();

        let report = reaper.teardown(&session).await;

        assert!(report.unregistered);
        assert!(report.exit_code.is_some());
        assert_eq!(session.state(), LifecycleState::Unregistered);
        assert_eq!(registry.count(), 0);
        assert!(!session.pipe_path().exists());
        assert!(!session.is_open().await);
        assert!(is_reaped(pid));
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(SessionRegistry::new());
        let reaper = Arc::new(Reaper::new(Arc::clone(&registry), Duration::from_millis(100)));
        let session = registered(&temp_dir, &registry, "a").await;

        let (first, second) = tokio::join!(reaper.teardown(&session), reaper.teardown(&session));
        let third = reaper.teardown(&session).await;

        assert_eq!(first, second);
        assert_eq!(first, third);
        assert!(first.unregistered);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_zero_grace_escalates_interactive_shell() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(SessionRegistry::new());
        let reaper = Reaper::new(Arc::clone(&registry), Duration::ZERO);
        let session = registered(&temp_dir, &registry, "a").await;
        let pid = session.pid().unwrap();

        let report = reaper.teardown(&session).await;

        assert!(report.escalated);
        assert!(is_reaped(pid));
    }

    #[tokio::test]
    async fn test_teardown_of_exited_shell_skips_signals() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(SessionRegistry::new());
        let reaper = Reaper::new(Arc::clone(&registry), Duration::from_millis(100));
        let session = registered(&temp_dir, &registry, "a").await;

        session.write(b"exit 3\n").await.unwrap();
        for _ in 0..50 {
            if !session.is_alive() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = session.child().lock().unwrap().try_wait();
        }

        let report = reaper.teardown(&session).await;
        assert!(!report.escalated);
        assert_eq!(report.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_teardown_unregistered_session() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(SessionRegistry::new());
        let reaper = Reaper::new(Arc::clone(&registry), Duration::from_millis(100));
        let session = registered(&temp_dir, &registry, "a").await;
        registry.remove("a", &session);

        let report = reaper.teardown(&session).await;
        assert!(!report.unregistered);
        assert!(!session.pipe_path().exists());
    }
}
