//! Configuration management for the WebPTY daemon.
//!
//! This module provides TOML-based configuration file loading.
//! The default configuration path is `~/.webpty/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

use crate::paths::{expand_tilde, PathError, ResolvedPaths};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_sessions must be between 1 and 1000, got {0}")]
    InvalidMaxSessions(usize),

    #[error("grace_period_ms must be at most 60000, got {0}")]
    InvalidGracePeriod(u64),

    #[error("pipe_queue_capacity must be greater than 0")]
    InvalidPipeQueueCapacity,

    #[error("cols and rows must be positive, got {cols}x{rows}")]
    InvalidWindowSize { cols: u16, rows: u16 },

    #[error("request_timeout_ms must be greater than 0")]
    InvalidRequestTimeout,

    #[error("fallback_shells must not be empty")]
    NoFallbackShells,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the WebPTY daemon.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Filesystem roots for the socket, pipes and logs.
    pub paths: PathsConfig,

    /// Session spawning and teardown configuration.
    pub session: SessionConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Write daemon diagnostics to this file instead of stderr.
    pub log_file: Option<PathBuf>,

    /// Deadline for a client to deliver its request, in milliseconds.
    pub request_timeout_ms: u64,
}

/// Filesystem roots. A leading `~` is expanded once at startup.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding one named pipe per session (`<id>.out`).
    pub sessions_dir: PathBuf,

    /// Directory holding one output log per session (`<id>.log`).
    pub log_dir: PathBuf,

    /// Control socket path.
    pub socket_path: PathBuf,
}

/// Session management configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shells tried in order when `$SHELL` is unset or unusable.
    pub fallback_shells: Vec<PathBuf>,

    /// Initial terminal width.
    pub cols: u16,

    /// Initial terminal height.
    pub rows: u16,

    /// How long a shell gets to exit after SIGTERM before SIGKILL.
    /// Zero escalates immediately.
    pub grace_period_ms: u64,

    /// Number of output chunks buffered for the pipe sink.
    pub pipe_queue_capacity: usize,

    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
            request_timeout_ms: 5_000,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            sessions_dir: PathBuf::from("~/.webpty/sessions"),
            log_dir: PathBuf::from("~/.webpty/log"),
            socket_path: PathBuf::from("~/.webpty/pty.sock"),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fallback_shells: vec![
                PathBuf::from("/bin/bash"),
                PathBuf::from("/bin/zsh"),
                PathBuf::from("/bin/sh"),
            ],
            cols: 80,
            rows: 24,
            grace_period_ms: 500,
            pipe_queue_capacity: 256,
            max_sessions: 64,
        }
    }
}

impl SessionConfig {
    /// Grace period as a duration.
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl DaemonConfig {
    /// Request deadline as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl PathsConfig {
    /// Expands `~` in every root.
    pub fn resolve(&self) -> Result<ResolvedPaths, PathError> {
        Ok(ResolvedPaths {
            sessions_dir: expand_tilde(&self.sessions_dir)?,
            log_dir: expand_tilde(&self.log_dir)?,
            socket_path: expand_tilde(&self.socket_path)?,
        })
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".webpty")
        .join("config.toml")
}

/// Resolves the configuration file to load: the explicit path with `~`
/// expanded, or the default path.
pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf, PathError> {
    match explicit {
        Some(path) => expand_tilde(path),
        None => Ok(default_config_path()),
    }
}

/// A configuration value replaced from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvOverride {
    /// Environment variable that supplied the value.
    pub var: &'static str,
    /// The value applied.
    pub value: String,
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - WEBPTY_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - WEBPTY_SOCKET: Override the control socket path
    ///
    /// Returns the overrides applied. Logging is left to the caller, since
    /// this runs before the subscriber is installed.
    pub fn apply_env_overrides(&mut self) -> Vec<EnvOverride> {
        let mut applied = Vec::new();

        if let Some(level) = non_empty_var("WEBPTY_LOG_LEVEL") {
            self.daemon.log_level = level.clone();
            applied.push(EnvOverride {
                var: "WEBPTY_LOG_LEVEL",
                value: level,
            });
        }

        if let Some(socket) = non_empty_var("WEBPTY_SOCKET") {
            self.paths.socket_path = PathBuf::from(&socket);
            applied.push(EnvOverride {
                var: "WEBPTY_SOCKET",
                value: socket,
            });
        }

        applied
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.max_sessions < 1 || self.session.max_sessions > 1000 {
            return Err(ConfigError::InvalidMaxSessions(self.session.max_sessions));
        }

        if self.session.grace_period_ms > 60_000 {
            return Err(ConfigError::InvalidGracePeriod(self.session.grace_period_ms));
        }

        if self.session.pipe_queue_capacity == 0 {
            return Err(ConfigError::InvalidPipeQueueCapacity);
        }

        if self.session.cols == 0 || self.session.rows == 0 {
            return Err(ConfigError::InvalidWindowSize {
                cols: self.session.cols,
                rows: self.session.rows,
            });
        }

        if self.session.fallback_shells.is_empty() {
            return Err(ConfigError::NoFallbackShells);
        }

        if self.daemon.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidRequestTimeout);
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.daemon.log_file, None);
        assert_eq!(config.paths.socket_path, PathBuf::from("~/.webpty/pty.sock"));
        assert_eq!(config.session.fallback_shells.len(), 3);
        assert_eq!(config.session.grace_period(), Duration::from_millis(500));
        assert_eq!((config.session.cols, config.session.rows), (80, 24));
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[daemon]
log_level = "debug"

[session]
grace_period_ms = 0
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.session.grace_period(), Duration::ZERO);
        assert_eq!(config.session.max_sessions, 64);
        assert_eq!(config.paths, PathsConfig::default());
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[daemon]
log_level = "trace"
log_file = "/var/log/webpty.log"
request_timeout_ms = 1000

[paths]
sessions_dir = "/run/webpty/sessions"
log_dir = "/var/log/webpty"
socket_path = "/run/webpty/pty.sock"

[session]
fallback_shells = ["/bin/sh"]
cols = 132
rows = 50
grace_period_ms = 2000
pipe_queue_capacity = 16
max_sessions = 8
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.daemon.log_file, Some(PathBuf::from("/var/log/webpty.log")));
        assert_eq!(config.daemon.request_timeout(), Duration::from_secs(1));
        assert_eq!(config.paths.sessions_dir, PathBuf::from("/run/webpty/sessions"));
        assert_eq!(config.paths.log_dir, PathBuf::from("/var/log/webpty"));
        assert_eq!(config.session.fallback_shells, vec![PathBuf::from("/bin/sh")]);
        assert_eq!((config.session.cols, config.session.rows), (132, 50));
        assert_eq!(config.session.pipe_queue_capacity, 16);
        assert_eq!(config.session.max_sessions, 8);
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let result = Config::from_toml("[daemon\nlog_level = \"debug\"\n");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let result = Config::from_toml("[session]\ngrace_period_ms = \"soon\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "[session]\nmax_sessions = 15\n").unwrap();

        let loaded = Config::load(&config_path).unwrap();
        assert_eq!(loaded.session.max_sessions, 15);
        assert_eq!(loaded.daemon, DaemonConfig::default());
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "invalid [ toml").unwrap();

        let err = Config::load(&config_path).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with(".webpty/config.toml"));
    }

    #[test]
    fn test_config_path_expands_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(
            config_path(Some(Path::new("~/x.toml"))).unwrap(),
            home.join("x.toml")
        );
        assert_eq!(
            config_path(Some(Path::new("/etc/webpty.toml"))).unwrap(),
            PathBuf::from("/etc/webpty.toml")
        );
        assert_eq!(config_path(None).unwrap(), default_config_path());
    }

    #[test]
    fn test_resolve_absolute_paths_unchanged() {
        let paths = PathsConfig {
            sessions_dir: PathBuf::from("/a/sessions"),
            log_dir: PathBuf::from("/a/log"),
            socket_path: PathBuf::from("/a/pty.sock"),
        };
        let resolved = paths.resolve().unwrap();
        assert_eq!(resolved.sessions_dir, PathBuf::from("/a/sessions"));
        assert_eq!(resolved.log_dir, PathBuf::from("/a/log"));
        assert_eq!(resolved.socket_path, PathBuf::from("/a/pty.sock"));
    }

    #[test]
    fn test_resolve_default_paths_are_absolute() {
        let resolved = PathsConfig::default().resolve().unwrap();
        assert!(resolved.sessions_dir.is_absolute());
        assert!(resolved.log_dir.ends_with(".webpty/log"));
        assert!(resolved.socket_path.ends_with(".webpty/pty.sock"));
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        std::env::set_var("WEBPTY_LOG_LEVEL", "debug");

        let mut config = Config::default();
        let applied = config.apply_env_overrides();
        assert_eq!(config.daemon.log_level, "debug");
        assert!(applied.contains(&EnvOverride {
            var: "WEBPTY_LOG_LEVEL",
            value: "debug".to_string(),
        }));

        std::env::remove_var("WEBPTY_LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var("WEBPTY_LOG_LEVEL", "");
        std::env::set_var("WEBPTY_SOCKET", "");

        let mut config = Config::default();
        assert!(config.apply_env_overrides().is_empty());
        assert_eq!(config, Config::default());

        std::env::remove_var("WEBPTY_LOG_LEVEL");
        std::env::remove_var("WEBPTY_SOCKET");
    }

    #[test]
    #[serial]
    fn test_env_override_socket() {
        std::env::remove_var("WEBPTY_LOG_LEVEL");
        std::env::set_var("WEBPTY_SOCKET", "/tmp/webpty-test.sock");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.paths.socket_path, PathBuf::from("/tmp/webpty-test.sock"));

        std::env::remove_var("WEBPTY_SOCKET");
    }

    #[test]
    fn test_validate_default_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_max_sessions_bounds() {
        let mut config = Config::default();
        config.session.max_sessions = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxSessions(0)));

        config.session.max_sessions = 1001;
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxSessions(1001)));

        config.session.max_sessions = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_grace_period() {
        let mut config = Config::default();
        config.session.grace_period_ms = 0;
        assert!(config.validate().is_ok());

        config.session.grace_period_ms = 60_001;
        assert_eq!(config.validate(), Err(ConfigError::InvalidGracePeriod(60_001)));
    }

    #[test]
    fn test_validate_window_size() {
        let mut config = Config::default();
        config.session.rows = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidWindowSize { cols: 80, rows: 0 })
        );
    }

    #[test]
    fn test_validate_zero_capacity_and_timeout() {
        let mut config = Config::default();
        config.session.pipe_queue_capacity = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPipeQueueCapacity));

        let mut config = Config::default();
        config.daemon.request_timeout_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidRequestTimeout));
    }

    #[test]
    fn test_validate_empty_fallback_shells() {
        let mut config = Config::default();
        config.session.fallback_shells.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoFallbackShells));
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();

        config.daemon.log_level = "WARN".to_string();
        assert!(config.validate().is_ok());

        config.daemon.log_level = "warning".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("warning".to_string()))
        );
    }
}
