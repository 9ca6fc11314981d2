//! RoadLink coordination server: entry point.
//!
//! # Usage
//!
//! ```text
//! roadlink-server [OPTIONS]
//!
//! Options:
//!   --bind <IP>               Listen address [default: 0.0.0.0]
//!   --port <PORT>             Listen port [default: 8765]
//!   --config <PATH>           TOML config file (missing file = defaults)
//!   --log-level <FILTER>      Log filter when RUST_LOG is unset [default: info]
//!   --trigger-device <PATH>   Serial device for a hardware trigger ("-" = stdin)
//!   --trigger-source <SRC>    button | radio [default: button]
//! ```
//!
//! Precedence is CLI flag, then environment variable, then config file, then
//! built-in default.
//!
//! | Variable                  | Flag               |
//! |---------------------------|--------------------|
//! | `ROADLINK_BIND`           | `--bind`           |
//! | `ROADLINK_PORT`           | `--port`           |
//! | `ROADLINK_CONFIG`         | `--config`         |
//! | `ROADLINK_LOG`            | `--log-level`      |
//! | `ROADLINK_TRIGGER_DEVICE` | `--trigger-device` |
//! | `ROADLINK_TRIGGER_SOURCE` | `--trigger-source` |

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use roadlink_core::emergency::TriggerSource;
use roadlink_server::domain::ServerConfig;
use roadlink_server::infrastructure::storage::config::{load_config, FileConfig};
use roadlink_server::infrastructure::{open_device, run_server, ServerContext, TriggerBridge};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// RoadLink connected-vehicle coordination server.
#[derive(Debug, Parser)]
#[command(
    name = "roadlink-server",
    about = "WebSocket coordination server for connected vehicles and emergency path clearing",
    version
)]
struct Cli {
    /// IP address to listen on.
    #[arg(long, env = "ROADLINK_BIND")]
    bind: Option<String>,

    /// TCP port to listen on.
    #[arg(long, env = "ROADLINK_PORT")]
    port: Option<u16>,

    /// Path to a TOML config file.
    #[arg(long, env = "ROADLINK_CONFIG")]
    config: Option<PathBuf>,

    /// `tracing` filter used when `RUST_LOG` is unset (e.g. `debug`).
    #[arg(long, env = "ROADLINK_LOG")]
    log_level: Option<String>,

    /// Device node a button or radio gateway writes trigger lines to.
    #[arg(long, env = "ROADLINK_TRIGGER_DEVICE")]
    trigger_device: Option<PathBuf>,

    /// Source tag reported for hardware triggers.
    #[arg(long, default_value = "button", env = "ROADLINK_TRIGGER_SOURCE")]
    trigger_source: TriggerSource,
}

/// Everything `main` needs after merging the CLI with the config file.
#[derive(Debug)]
struct Startup {
    server: ServerConfig,
    log_level: String,
    trigger: Option<(PathBuf, TriggerSource)>,
}

impl Cli {
    /// Loads the config file (if any) and applies CLI overrides on top.
    fn into_startup(self) -> anyhow::Result<Startup> {
        let file = match &self.config {
            Some(path) => {
                load_config(path).with_context(|| format!("failed to load config {}", path.display()))?
            }
            None => FileConfig::default(),
        };
        self.merge(file)
    }

    fn merge(self, mut file: FileConfig) -> anyhow::Result<Startup> {
        if let Some(bind) = self.bind {
            file.server.bind_address = bind;
        }
        if let Some(port) = self.port {
            file.server.port = port;
        }
        if let Some(level) = self.log_level {
            file.server.log_level = level;
        }
        if self.trigger_device.is_some() && self.trigger_source == TriggerSource::Vehicle {
            anyhow::bail!("--trigger-source must be button or radio");
        }

        let log_level = file.server.log_level.clone();
        let server = file.into_server_config().context("invalid server configuration")?;
        Ok(Startup {
            server,
            log_level,
            trigger: self.trigger_device.map(|path| (path, self.trigger_source)),
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let startup = Cli::parse().into_startup()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&startup.log_level)),
        )
        .init();

    info!(
        bind = %startup.server.bind_addr,
        placement = ?startup.server.placement,
        ack_policy = ?startup.server.ack_policy,
        "RoadLink server starting"
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    let ctx = ServerContext::new(startup.server);

    if let Some((path, source)) = startup.trigger {
        let reader = open_device(&path)
            .await
            .with_context(|| format!("failed to start trigger bridge on {}", path.display()))?;
        let bridge = TriggerBridge::new(Arc::clone(&ctx.coordinator), source);
        tokio::spawn(async move {
            match bridge.run(reader).await {
                Ok(()) => info!("trigger bridge on {} finished", path.display()),
                Err(e) => warn!("trigger bridge on {} stopped: {e}", path.display()),
            }
        });
    }

    run_server(ctx, running).await?;

    info!("RoadLink server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["roadlink-server"]);
        assert_eq!(cli.trigger_source, TriggerSource::Button);
        assert!(cli.trigger_device.is_none());
    }

    #[test]
    fn test_merge_defaults_listen_on_8765() {
        // Arrange
        let cli = Cli::parse_from(["roadlink-server"]);

        // Act
        let startup = cli.merge(FileConfig::default()).unwrap();

        // Assert
        assert_eq!(startup.server.bind_addr.to_string(), "0.0.0.0:8765");
        assert_eq!(startup.log_level, "info");
        assert!(startup.trigger.is_none());
    }

    #[test]
    fn test_cli_flags_override_file_values() {
        // Arrange: the file says port 9000 and debug logging.
        let mut file = FileConfig::default();
        file.server.port = 9000;
        file.server.log_level = "debug".into();
        let cli = Cli::parse_from(["roadlink-server", "--port", "9100", "--bind", "127.0.0.1"]);

        // Act
        let startup = cli.merge(file).unwrap();

        // Assert
        assert_eq!(startup.server.bind_addr.to_string(), "127.0.0.1:9100");
        assert_eq!(startup.log_level, "debug");
    }

    #[test]
    fn test_trigger_source_accepts_radio_alias() {
        let cli = Cli::parse_from([
            "roadlink-server",
            "--trigger-device",
            "/dev/ttyUSB0",
            "--trigger-source",
            "lora",
        ]);
        let startup = cli.merge(FileConfig::default()).unwrap();
        assert_eq!(
            startup.trigger,
            Some((PathBuf::from("/dev/ttyUSB0"), TriggerSource::Radio))
        );
    }

    #[test]
    fn test_vehicle_trigger_source_rejected_for_hardware() {
        let cli = Cli::parse_from([
            "roadlink-server",
            "--trigger-device",
            "-",
            "--trigger-source",
            "vehicle",
        ]);
        assert!(cli.merge(FileConfig::default()).is_err());
    }

    #[test]
    fn test_unknown_trigger_source_fails_to_parse() {
        let result = Cli::try_parse_from(["roadlink-server", "--trigger-source", "pigeon"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_bind_returns_error() {
        let cli = Cli::parse_from(["roadlink-server", "--bind", "not.an.ip"]);
        assert!(cli.merge(FileConfig::default()).is_err());
    }
}
