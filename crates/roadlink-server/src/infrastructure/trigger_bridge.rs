//! Line-oriented bridge for hardware emergency triggers.
//!
//! A push button or radio gateway writes one command per line to a serial
//! device node (or to stdin during bench testing):
//!
//! ```text
//! EMERGENCY_ON
//! EMERGENCY_OFF
//! ```
//!
//! The bridge turns each command into a coordinator call with the hardware
//! owner and its configured [`TriggerSource`].  It never touches the registry
//! or the router directly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info, warn};

use roadlink_core::emergency::{SessionOwner, TriggerSource};

use crate::application::EmergencyCoordinator;

/// Reads from stdin instead of a device node.
pub const STDIN_PATH: &str = "-";

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("failed to open trigger device {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("trigger read failed: {0}")]
    Read(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCommand {
    On,
    Off,
}

impl TriggerCommand {
    /// Parses one line.  Surrounding whitespace is ignored; matching is
    /// case-sensitive.
    pub fn parse_line(line: &str) -> Option<Self> {
        match line.trim() {
            "EMERGENCY_ON" => Some(TriggerCommand::On),
            "EMERGENCY_OFF" => Some(TriggerCommand::Off),
            _ => None,
        }
    }
}

pub struct TriggerBridge {
    coordinator: Arc<EmergencyCoordinator>,
    source: TriggerSource,
}

impl TriggerBridge {
    pub fn new(coordinator: Arc<EmergencyCoordinator>, source: TriggerSource) -> Self {
        Self { coordinator, source }
    }

    /// Applies one line.  Returns the command if the line held one.
    pub fn handle_line(&self, line: &str) -> Option<TriggerCommand> {
        let Some(command) = TriggerCommand::parse_line(line) else {
            if !line.trim().is_empty() {
                debug!(source = %self.source, line, "ignoring unrecognised trigger line");
            }
            return None;
        };

        match command {
            TriggerCommand::On => match self.coordinator.activate(SessionOwner::Hardware, self.source) {
                Ok(activation) => info!(
                    source = %self.source,
                    generation = activation.generation,
                    "hardware trigger activated emergency"
                ),
                Err(e) => warn!(source = %self.source, error = %e, "hardware activation rejected"),
            },
            TriggerCommand::Off => match self.coordinator.deactivate(SessionOwner::Hardware) {
                Ok(_) => info!(source = %self.source, "hardware trigger cleared emergency"),
                Err(e) => warn!(source = %self.source, error = %e, "hardware clear rejected"),
            },
        }
        Some(command)
    }

    /// Reads lines until end of input.
    ///
    /// # Errors
    ///
    /// Returns [`TriggerError::Read`] if the underlying stream fails.
    pub async fn run<R>(&self, reader: R) -> Result<(), TriggerError>
    where
        R: AsyncBufRead + Unpin,
    {
        info!(source = %self.source, "trigger bridge started");
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            self.handle_line(&line);
        }
        info!(source = %self.source, "trigger input closed");
        Ok(())
    }
}

/// Opens a trigger device node, or stdin for `"-"`.
pub async fn open_device(path: &Path) -> Result<Box<dyn AsyncBufRead + Send + Unpin>, TriggerError> {
    if path.as_os_str() == STDIN_PATH {
        return Ok(buffered(tokio::io::stdin()));
    }
    let file = tokio::fs::File::open(path).await.map_err(|source| TriggerError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(buffered(file))
}

fn buffered<R: AsyncRead + Send + Unpin + 'static>(inner: R) -> Box<dyn AsyncBufRead + Send + Unpin> {
    Box::new(BufReader::new(inner))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
