//! Pulse Daemon
//!
//! Serves pulse streams over HTTP as Server-Sent Events.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (127.0.0.1:8080, ~/.config/pulse/pulse.toml if present)
//! pulse-daemon
//!
//! # Custom address and tick interval
//! pulse-daemon --bind 0.0.0.0:9000 --tick-interval-ms 250
//!
//! # With verbose logging
//! RUST_LOG=debug pulse-daemon
//! ```
//!
//! # Environment Variables
//!
//! - `PULSE_CONFIG`: Path to the TOML configuration file
//! - `PULSE_BIND`, `PULSE_TICK_INTERVAL_MS`, `PULSE_SIMPLE_DELAY_MS`,
//!   `PULSE_STAGE_DELAY_MS`, `PULSE_MAX_STREAMS`, `PULSE_EMITTER_TIMEOUT_MS`:
//!   override the file
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//!
//! # Signals
//!
//! - SIGTERM/SIGINT: Graceful shutdown. Every live cancelable stream receives
//!   a terminal event with status `shutdown` before the server stops.

mod server;
mod sse;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use pulse_core::config::{load_config, load_config_from_path, timeout_from_millis, PulseConfig};
use pulse_core::events::status;
use pulse_core::StreamManager;

use crate::server::{router, AppState};

/// Command-line arguments; any flag given wins over file and environment
#[derive(Debug, Parser)]
#[command(name = "pulse-daemon", version, about = "Server-Sent Events stream daemon")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "PULSE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Interval between ticks of cancelable streams, in milliseconds
    #[arg(long)]
    tick_interval_ms: Option<u64>,

    /// Maximum number of live cancelable streams
    #[arg(long)]
    max_streams: Option<usize>,

    /// Response timeout in milliseconds (0 disables it)
    #[arg(long)]
    emitter_timeout_ms: Option<u64>,
}

impl Cli {
    fn apply(&self, config: &mut PulseConfig) {
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(ms) = self.tick_interval_ms {
            config.streams.tick_interval = Duration::from_millis(ms);
        }
        if let Some(max) = self.max_streams {
            config.streams.max_concurrent_streams = max;
        }
        if let Some(ms) = self.emitter_timeout_ms {
            config.streams.emitter_timeout = timeout_from_millis(ms);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pulse_daemon=info".parse()?)
                .add_directive("pulse_core=info".parse()?),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => load_config_from_path(Some(path.as_path())),
        None => load_config(),
    }
    .context("Failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        bind = %config.bind,
        tick_interval = ?config.streams.tick_interval,
        max_streams = config.streams.max_concurrent_streams,
        config_file = ?config.config_file_path,
        "Starting Pulse Daemon"
    );

    let manager = StreamManager::with_config(config.streams.clone());
    let app = router(AppState::new(manager.clone()));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to listen on {}", config.bind))?;
    info!(addr = %config.bind, "Listening for connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(manager.clone()))
        .await
        .context("Server error")?;

    info!(
        total_streams = manager.total_streams_created(),
        "Pulse Daemon stopped"
    );
    Ok(())
}

/// Wait for SIGINT/SIGTERM, then end every live stream
async fn shutdown_signal(manager: StreamManager) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }

    let cancelled = manager.cancel_all(status::SHUTDOWN, "Server shutting down");
    info!(cancelled, "Live streams cancelled");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "pulse-daemon",
            "--bind",
            "0.0.0.0:9000",
            "--tick-interval-ms",
            "250",
            "--emitter-timeout-ms",
            "0",
        ]);
        let mut config = PulseConfig::default();
        config.streams.emitter_timeout = Some(Duration::from_secs(1));
        cli.apply(&mut config);

        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.streams.tick_interval, Duration::from_millis(250));
        assert_eq!(config.streams.emitter_timeout, None);
        assert_eq!(config.streams.max_concurrent_streams, 1024);
    }

    #[test]
    fn test_cli_defaults_leave_config_alone() {
        let cli = Cli::parse_from(["pulse-daemon"]);
        let mut config = PulseConfig::default();
        cli.apply(&mut config);
        assert_eq!(config, PulseConfig::default());
    }
}
