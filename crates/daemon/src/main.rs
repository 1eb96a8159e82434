//! WebPTY pty daemon
//!
//! Foreground daemon plus one-shot client commands for the control socket.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::{self, Config, EnvOverride};
use daemon::daemon::Daemon;
use daemon::ipc::IpcClient;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use webpty_protocol::SessionSummary;

/// WebPTY pty daemon - pty-backed shells behind a local control socket.
#[derive(Parser, Debug)]
#[command(name = "webpty-pty")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Control socket path (overrides the configuration file)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the daemon in the foreground
    Start,

    /// Spawn a new shell session and print its ID
    Spawn,

    /// Write input to a session
    Write {
        /// Session ID
        id: String,

        /// Text to send (use $'...' for control characters)
        data: String,
    },

    /// Resize a session's terminal
    Resize {
        /// Session ID
        id: String,

        /// Width in columns
        cols: u16,

        /// Height in rows
        rows: u16,
    },

    /// Terminate a session
    Kill {
        /// Session ID
        id: String,
    },

    /// List active sessions
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show daemon status
    Status,

    /// Terminate every session, keeping the daemon running
    Shutdown,

    /// Terminate every session and stop the daemon
    Stop,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = config::config_path(cli.config.as_deref())
        .context("Failed to resolve configuration path")?;
    let config_found = config_path.exists();
    let mut config = Config::load(&config_path)?;

    // Apply environment variable overrides, then explicit flags
    let overrides = config.apply_env_overrides();
    if let Some(socket) = &cli.socket {
        config.paths.socket_path = socket.clone();
    }

    config.validate()?;

    let _log_guard = init_tracing(&config, cli.verbose)?;

    if config_found {
        tracing::info!(path = %config_path.display(), "Loaded config file");
    } else {
        tracing::info!(path = %config_path.display(), "Config file not found, using defaults");
    }
    for EnvOverride { var, value } in &overrides {
        tracing::info!(var = %var, value = %value, "Overriding configuration from environment");
    }

    let paths = config
        .paths
        .resolve()
        .context("Failed to resolve configured paths")?;

    if let Commands::Start = cli.command {
        tracing::info!(version = env!("CARGO_PKG_VERSION"), "WebPTY daemon starting...");
        let daemon = Daemon::with_paths(config, paths);
        return daemon.run().await;
    }

    let client = IpcClient::new(&paths.socket_path).with_timeout(config.daemon.request_timeout());
    if let Err(e) = run_client(cli.command, &client).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Initializes tracing. RUST_LOG wins over `--verbose`, which wins over the
/// configured level.
fn init_tracing(config: &Config, verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if verbose {
        "debug"
    } else {
        config.daemon.log_level.as_str()
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match &config.daemon.log_file {
        Some(log_file) => {
            let (dir, file_name) = split_log_path(log_file)?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

fn split_log_path(path: &Path) -> anyhow::Result<(&Path, &std::ffi::OsStr)> {
    let file_name = path
        .file_name()
        .with_context(|| format!("Invalid log file path: {}", path.display()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok((dir, file_name))
}

async fn run_client(command: Commands, client: &IpcClient) -> anyhow::Result<()> {
    match command {
        Commands::Start => anyhow::bail!("start runs the daemon and is not a client command"),
        Commands::Spawn => {
            let id = client.spawn().await?;
            println!("{}", id);
        }
        Commands::Write { id, data } => {
            client.write(&id, &data).await?;
        }
        Commands::Resize { id, cols, rows } => {
            client.resize(&id, cols, rows).await?;
        }
        Commands::Kill { id } => {
            client.kill(&id).await?;
            println!("Session {} terminated", id);
        }
        Commands::List { json } => {
            let list = client.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&list)?);
            } else {
                print_sessions_table(&list.sessions);
            }
        }
        Commands::Status => {
            let status = client
                .status()
                .await
                .context("Daemon is not running (cannot query status)")?;
            println!("Daemon Status: running");
            println!("  PID:      {}", status.pid);
            println!("  Uptime:   {}", format_duration(status.uptime_secs));
            println!("  Sessions: {}", status.session_count);
        }
        Commands::Shutdown => {
            let data = client.shutdown().await?;
            println!("Closed {} session(s)", data.closed);
        }
        Commands::Stop => {
            client.stop().await?;
            println!("Daemon stopping");
        }
    }
    Ok(())
}

/// Print sessions in a formatted table.
fn print_sessions_table(sessions: &[SessionSummary]) {
    if sessions.is_empty() {
        println!("No active sessions.");
        return;
    }

    let id_width = sessions.iter().map(|s| s.id.len()).max().unwrap_or(8).max(8);

    println!(
        "{:<id_width$}  {:<8}  {:>8}  {:>12}",
        "ID",
        "STATUS",
        "PID",
        "AGE",
        id_width = id_width
    );
    println!("{}", "-".repeat(id_width + 34));

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    for session in sessions {
        let pid = session
            .pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<id_width$}  {:<8}  {:>8}  {:>12}",
            session.id,
            session.status.to_string(),
            pid,
            format_duration(now.saturating_sub(session.created_at)),
            id_width = id_width
        );
    }
}

/// Format a duration in seconds as a human-readable string.
fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
