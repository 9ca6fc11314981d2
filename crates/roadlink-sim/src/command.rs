//! Parsing of the one-line commands typed at the simulator prompt.

use thiserror::Error;

use roadlink_core::domain::{InvalidLane, Lane};
use roadlink_core::protocol::{InboundMsg, PositionPayload};

pub const HELP: &str = "\
commands:
  e                  register emergency
  c                  clear emergency
  l <1-3>            change lane
  m <x> <y> [speed]  report position
  p                  ping
  s                  request system state
  h                  this help
  q                  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Send(InboundMsg),
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("unknown command '{0}' (h for help)")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("'{0}' is not a number")]
    NotANumber(String),

    #[error(transparent)]
    Lane(#[from] InvalidLane),
}

/// Parses one input line.  Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match (head.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("e", []) => Command::Send(InboundMsg::RegisterEmergency),
        ("c", []) => Command::Send(InboundMsg::ClearEmergency),
        ("p", []) => Command::Send(InboundMsg::Ping),
        ("s", []) => Command::Send(InboundMsg::GetSystemState),
        ("h" | "?", []) => Command::Help,
        ("q", []) => Command::Quit,
        ("l", [lane]) => {
            let n: i64 = lane.parse().map_err(|_| CommandError::NotANumber(lane.to_string()))?;
            Command::Send(InboundMsg::LaneChange {
                new_lane: Lane::try_from(n)?,
                reason: "manual".to_string(),
            })
        }
        ("l", _) => return Err(CommandError::Usage("l <1-3>")),
        ("m", [x, y, rest @ ..]) if rest.len() <= 1 => {
            let speed = match rest.first() {
                Some(s) => Some(number(s)?),
                None => None,
            };
            Command::Send(InboundMsg::PositionUpdate {
                position: PositionPayload {
                    x: number(x)?,
                    y: number(y)?,
                    speed,
                },
            })
        }
        ("m", _) => return Err(CommandError::Usage("m <x> <y> [speed]")),
        ("e" | "c" | "p" | "s" | "h" | "?" | "q", _) => return Err(CommandError::Usage("no arguments")),
        (other, _) => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn number(s: &str) -> Result<f64, CommandError> {
    s.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| CommandError::NotANumber(s.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
