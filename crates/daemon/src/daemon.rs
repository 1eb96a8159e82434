//! Daemon runtime.
//!
//! Wires the session manager to the control socket, owns the PID file and
//! turns SIGINT/SIGTERM or a `stop` request into an orderly shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::ipc::{pidfile, IpcServer, RequestHandler};
use crate::paths::ResolvedPaths;
use crate::session::SessionManager;

/// The foreground daemon process.
#[derive(Debug)]
pub struct Daemon {
    config: Config,
    paths: ResolvedPaths,
    manager: Arc<SessionManager>,
    shutdown_token: CancellationToken,
}

impl Daemon {
    /// Creates a daemon from a validated configuration.
    pub fn new(config: Config) -> Result<Self> {
        let paths = config
            .paths
            .resolve()
            .context("Failed to resolve configured paths")?;
        Ok(Self::with_paths(config, paths))
    }

    /// Creates a daemon whose filesystem roots are already resolved.
    pub fn with_paths(config: Config, paths: ResolvedPaths) -> Self {
        let manager = Arc::new(SessionManager::new(
            paths.clone(),
            config.session.clone(),
        ));

        Self {
            config,
            paths,
            manager,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Resolved filesystem roots.
    pub fn paths(&self) -> &ResolvedPaths {
        &self.paths
    }

    /// The session manager shared with every connection.
    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Returns the shutdown token for external tasks to trigger or observe
    /// shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Runs until a termination signal or a `stop` request arrives.
    ///
    /// Every live session is torn down before this returns.
    pub async fn run(&self) -> Result<()> {
        self.paths
            .ensure_dirs()
            .context("Failed to create session directories")?;

        let pid_file = self.paths.pid_file();
        if let Some(pid) = pidfile::running_pid(&pid_file) {
            anyhow::bail!("Daemon already running (PID: {})", pid);
        }

        let server = IpcServer::bind(&self.paths.socket_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to bind control socket: {}",
                    self.paths.socket_path.display()
                )
            })?;

        if let Err(e) = pidfile::write_pid_file(&pid_file) {
            warn!(path = %pid_file.display(), error = %e, "Failed to write PID file");
        }

        self.spawn_signal_listener()?;

        info!(
            socket = %self.paths.socket_path.display(),
            sessions_dir = %self.paths.sessions_dir.display(),
            log_dir = %self.paths.log_dir.display(),
            "Daemon started"
        );

        self.serve(&server).await;

        info!("Stopping daemon...");
        let closed = self.manager.shutdown_all().await;
        debug!(closed, "Sessions closed");

        if let Err(e) = std::fs::remove_file(server.path()) {
            debug!(error = %e, "Failed to remove control socket");
        }
        pidfile::remove_pid_file(&pid_file);

        info!("Daemon stopped");
        Ok(())
    }

    async fn serve(&self, server: &IpcServer) {
        let handler = RequestHandler::new(
            Arc::clone(&self.manager),
            self.shutdown_token.clone(),
            self.config.daemon.request_timeout(),
        );

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    debug!("Accept loop received shutdown signal");
                    break;
                }
                accepted = server.accept() => match accepted {
                    Ok(conn) => {
                        let handler = handler.clone();
                        tokio::spawn(async move { handler.serve(conn).await });
                    }
                    Err(e) => error!(error = %e, "Failed to accept connection"),
                },
            }
        }
    }

    fn spawn_signal_listener(&self) -> Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
        let token = self.shutdown_token.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
                _ = token.cancelled() => return,
            }
            token.cancel();
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::ipc::IpcClient;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_daemon(temp_dir: &TempDir) -> Daemon {
        let config = Config {
            session: SessionConfig {
                fallback_shells: vec![PathBuf::from("/bin/sh")],
                grace_period_ms: 100,
                ..SessionConfig::default()
            },
            ..Config::default()
        };
        Daemon::with_paths(config, ResolvedPaths::under(temp_dir.path()))
    }

    async fn wait_for_socket(client: &IpcClient) {
        for _ in 0..50 {
            if matches!(client.ping().await, Ok(true)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("daemon did not come up");
    }

    #[tokio::test]
    async fn test_run_and_stop_via_token() {
        let temp_dir = TempDir::new().unwrap();
        let daemon = Arc::new(create_test_daemon(&temp_dir));
        let client = IpcClient::new(&daemon.paths().socket_path);
        let pid_file = daemon.paths().pid_file();

        let runner = {
            let daemon = Arc::clone(&daemon);
            tokio::spawn(async move { daemon.run().await })
        };
        wait_for_socket(&client).await;

        assert_eq!(pidfile::read_pid(&pid_file), Some(std::process::id()));
        let id = client.spawn().await.unwrap();
        let pipe = daemon.paths().pipe_path(&id);
        assert!(pipe.exists());

        daemon.shutdown_token().cancel();
        tokio::time::timeout(Duration::from_secs(10), runner)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(daemon.session_manager().count(), 0);
        assert!(!pipe.exists());
        assert!(!daemon.paths().socket_path.exists());
        assert!(!pid_file.exists());
    }

    #[tokio::test]
    async fn test_stop_request_shuts_down() {
        let temp_dir = TempDir::new().unwrap();
        let daemon = Arc::new(create_test_daemon(&temp_dir));
        let client = IpcClient::new(&daemon.paths().socket_path);

        let runner = {
            let daemon = Arc::clone(&daemon);
            tokio::spawn(async move { daemon.run().await })
        };
        wait_for_socket(&client).await;

        client.spawn().await.unwrap();
        client.stop().await.unwrap();

        tokio::time::timeout(Duration::from_secs(10), runner)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(daemon.session_manager().count(), 0);
    }

    #[tokio::test]
    async fn test_refuses_to_start_twice() {
        let temp_dir = TempDir::new().unwrap();
        let daemon = create_test_daemon(&temp_dir);
        daemon.paths().ensure_dirs().unwrap();
        std::fs::write(daemon.paths().pid_file(), "1\n").unwrap();

        let err = daemon.run().await.unwrap_err();
        assert!(err.to_string().contains("already running"));
        assert!(!daemon.paths().socket_path.exists());
    }
}
