//! Serial-over-TCP server entry point.
//!
//! Reads a TOML configuration listing one `[[session]]` per serial device,
//! opens every device, binds one TCP listener per session and forwards
//! delimiter-framed serial messages to the client connected on each
//! listener.
//!
//! # Usage
//!
//! ```text
//! sotcp-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>         Configuration file [default: server.cfg]
//!   --scheduling <MODE>     sequential | concurrent (overrides the file)
//!   --log-level <FILTER>    tracing filter (overrides the file)
//!   --check                 Validate the configuration and exit
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable           | Description                              |
//! |--------------------|------------------------------------------|
//! | `SOTCP_CONFIG`     | Configuration file path                  |
//! | `SOTCP_SCHEDULING` | Scheduling mode                          |
//! | `RUST_LOG`         | Log filter; wins over every other source |
//!
//! A relative `--config` path is looked up next to the executable first.
//! If the file is missing or invalid the server logs a warning and runs a
//! single session named `default` with the built-in defaults (`--check`
//! reports the error instead).
//!
//! Ctrl+C stops every session gracefully.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sotcp_server::application::{BridgeSession, SessionScheduler};
use sotcp_server::domain::{load_config, resolve_config_path, SchedulingMode, ServerConfig};
use sotcp_server::infrastructure::open_session_serial;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Bridges serial devices to TCP clients.
#[derive(Debug, Parser)]
#[command(
    name = "sotcp-server",
    about = "Forwards delimiter-framed serial data to TCP clients, one listener per device",
    version
)]
struct Cli {
    /// Path of the TOML configuration file.
    #[arg(long, default_value = "server.cfg", env = "SOTCP_CONFIG")]
    config: PathBuf,

    /// Scheduling mode; overrides `[server] scheduling`.
    #[arg(long, env = "SOTCP_SCHEDULING")]
    scheduling: Option<SchedulingMode>,

    /// Log filter used when `RUST_LOG` is unset; overrides `[server] log_level`.
    #[arg(long)]
    log_level: Option<String>,

    /// Validate the configuration and exit without opening any device.
    #[arg(long)]
    check: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut ServerConfig) {
        if let Some(mode) = self.scheduling {
            config.server.scheduling = mode;
        }
        if let Some(level) = &self.log_level {
            config.server.log_level = level.clone();
        }
    }
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

/// Opens every serial device and builds its session, in configured order.
///
/// When one device fails, the sessions already built are cleaned up so their
/// devices are released before the error is returned.
async fn open_sessions(config: &ServerConfig) -> anyhow::Result<Vec<BridgeSession>> {
    let mut sessions = Vec::with_capacity(config.sessions.len());

    for spec in &config.sessions {
        let built = open_session_serial(spec)
            .and_then(|serial| BridgeSession::new(spec.clone(), serial));
        match built {
            Ok(session) => sessions.push(session),
            Err(e) => {
                for session in &mut sessions {
                    session.cleanup().await;
                }
                return Err(e).context("failed to open serial devices");
            }
        }
    }

    Ok(sessions)
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = resolve_config_path(&cli.config);
    let loaded = load_config(&config_path);

    // Logging comes up before the fallback warning so that warning is visible.
    let level = cli
        .log_level
        .clone()
        .or_else(|| loaded.as_ref().ok().map(|c| c.server.log_level.clone()))
        .unwrap_or_else(|| ServerConfig::default().server.log_level);
    init_tracing(&level);

    let mut config = match loaded {
        Ok(config) => {
            info!(
                "Loaded {} session(s) from {}",
                config.sessions.len(),
                config_path.display()
            );
            config
        }
        Err(e) if cli.check => {
            return Err(e).with_context(|| format!("invalid config {}", config_path.display()));
        }
        Err(e) => {
            warn!("{e}; falling back to a single default session");
            ServerConfig::default()
        }
    };
    cli.apply_overrides(&mut config);

    if cli.check {
        for spec in &config.sessions {
            info!(
                "[{}] {}:{} <- {} (delimiter {})",
                spec.name, spec.tcp_address, spec.tcp_port, spec.serial_port, spec.serial_send_on
            );
        }
        info!("Configuration OK");
        return Ok(());
    }

    info!(
        "Serial-over-TCP server starting with {} session(s), {} scheduling",
        config.sessions.len(),
        config.server.scheduling
    );

    let sessions = open_sessions(&config).await?;
    let mut scheduler =
        SessionScheduler::new(config.server.scheduling, config.server.queue_depth);
    scheduler
        .initialize(sessions)
        .await
        .context("failed to bind TCP listeners")?;

    let stop = scheduler.stop_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, stopping all sessions");
                stop.stop();
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    let summary = scheduler
        .run()
        .await
        .context("server stopped after a session failed")?;

    for report in &summary.sessions {
        info!(
            "[{}] forwarded {} message(s), {} byte(s)",
            report.name, report.frames_forwarded, report.bytes_forwarded
        );
    }
    info!("Serial-over-TCP server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
