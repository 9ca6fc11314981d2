//! RoadLink vehicle simulator.
//!
//! Connects to a RoadLink server as one vehicle, prints every envelope it
//! receives, and sends the commands typed on stdin.  Run several in separate
//! terminals to exercise the emergency protocol by hand.
//!
//! ```text
//! roadlink-sim [--url ws://127.0.0.1:8765] [--emergency] [--auto-yield]
//! ```

mod command;
mod events;

use anyhow::Context;
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

use roadlink_core::protocol::InboundMsg;

use crate::command::{Command, HELP};

const DEFAULT_URL: &str = "ws://127.0.0.1:8765";

#[derive(Debug, Parser)]
#[command(name = "roadlink-sim", about = "Interactive RoadLink vehicle simulator", version)]
struct Cli {
    /// Server WebSocket URL.
    #[arg(long, default_value = DEFAULT_URL, env = "ROADLINK_URL")]
    url: String,

    /// Connect as an emergency vehicle.
    #[arg(long)]
    emergency: bool,

    /// Move right and acknowledge whenever another vehicle raises an emergency.
    #[arg(long)]
    auto_yield: bool,

    /// `tracing` filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "warn", env = "ROADLINK_LOG")]
    log_level: String,
}

impl Cli {
    /// The URL to dial, with `type=emergency` appended when requested.
    fn connect_url(&self) -> String {
        if !self.emergency {
            return self.url.clone();
        }
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{sep}type=emergency", self.url)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .init();

    let url = cli.connect_url();
    let (ws_stream, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    println!("connected to {url}\n{HELP}");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<InboundMsg>(32);

    // Writer: everything sent to the server goes through one channel so typed
    // commands and auto-yield replies never interleave mid-frame.
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    error!("failed to serialize {}: {e}", msg.tag());
                    continue;
                }
            };
            if let Err(e) = ws_tx.send(WsMessage::Text(text)).await {
                warn!("send failed: {e}");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let reader_tx = out_tx.clone();
    let auto_yield = cli.auto_yield;
    let mut reader = tokio::spawn(async move {
        let mut own_id: Option<String> = None;
        while let Some(frame) = ws_rx.next().await {
            let text = match frame {
                Ok(WsMessage::Text(text)) => text,
                Ok(WsMessage::Close(_)) => break,
                Ok(other) => {
                    debug!("non-text frame: {other:?}");
                    continue;
                }
                Err(e) => {
                    warn!("connection error: {e}");
                    break;
                }
            };
            let msg: serde_json::Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(e) => {
                    warn!("unparsable envelope: {e}");
                    continue;
                }
            };
            println!("< {}", events::summarize(&msg));

            if msg["type"] == "welcome" {
                own_id = msg["device_id"].as_str().map(str::to_owned);
            }
            if auto_yield {
                for reply in events::yield_to(&msg, own_id.as_deref()) {
                    println!("> {} (auto)", reply.tag());
                    if reader_tx.send(reply).await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = &mut reader => {
                println!("server closed the connection");
                break;
            }
            line = lines.next_line() => line.context("failed to read stdin")?,
        };
        let Some(line) = line else { break };

        match command::parse(&line) {
            Ok(None) => {}
            Ok(Some(Command::Help)) => println!("{HELP}"),
            Ok(Some(Command::Quit)) => break,
            Ok(Some(Command::Send(msg))) => {
                println!("> {}", msg.tag());
                if out_tx.send(msg).await.is_err() {
                    break;
                }
            }
            Err(e) => println!("{e}"),
        }
    }

    reader.abort();
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["roadlink-sim"]);
        assert_eq!(cli.url, "ws://127.0.0.1:8765");
        assert!(!cli.emergency);
        assert!(!cli.auto_yield);
    }

    #[test]
    fn test_connect_url_plain() {
        let cli = Cli::parse_from(["roadlink-sim", "--url", "ws://10.0.0.2:9000"]);
        assert_eq!(cli.connect_url(), "ws://10.0.0.2:9000");
    }

    #[test]
    fn test_connect_url_adds_emergency_hint() {
        let cli = Cli::parse_from(["roadlink-sim", "--emergency"]);
        assert_eq!(cli.connect_url(), "ws://127.0.0.1:8765?type=emergency");
    }

    #[test]
    fn test_connect_url_extends_existing_query() {
        let cli = Cli::parse_from(["roadlink-sim", "--emergency", "--url", "ws://h:1/?name=x"]);
        assert_eq!(cli.connect_url(), "ws://h:1/?name=x&type=emergency");
    }
}
