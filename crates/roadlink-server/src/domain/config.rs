//! Server runtime configuration.
//!
//! [`ServerConfig`] is the resolved set of runtime settings.  It is built once
//! at startup from the config file and CLI flags, then shared via `Arc`.  No
//! code below `main` reads the environment.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use roadlink_core::domain::{
    DeviceRegistry, PlacementPolicy, RandomPlacement, RoundRobinPlacement, DEFAULT_LANE_HEIGHT,
};
use roadlink_core::emergency::{AckTracker, AssumeAllResponded, TrackedResponses, DEFAULT_RESPONSE_THRESHOLD};

pub const DEFAULT_PORT: u16 = 8765;
pub const DEFAULT_OUTBOX_CAPACITY: usize = 64;

/// How new vehicles are placed on the road.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementKind {
    #[default]
    Random,
    RoundRobin,
}

/// How the path-clearing monitor counts responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// Every device counts as having responded.
    #[default]
    AssumeAll,
    /// Only devices that sent an `emergency_response` count.
    Tracked,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown value '{value}' for {what}")]
pub struct UnknownVariant {
    pub what: &'static str,
    pub value: String,
}

impl FromStr for PlacementKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(PlacementKind::Random),
            "round_robin" => Ok(PlacementKind::RoundRobin),
            other => Err(UnknownVariant {
                what: "placement",
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for AckPolicy {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assume_all" => Ok(AckPolicy::AssumeAll),
            "tracked" => Ok(AckPolicy::Tracked),
            other => Err(UnknownVariant {
                what: "ack policy",
                value: other.to_string(),
            }),
        }
    }
}

/// Timing of the path-clearing monitor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorTimings {
    /// Wait before the first poll.
    pub grace: Duration,
    pub poll_interval: Duration,
    /// Upper bound on polling, measured from the end of the grace period.
    pub ceiling: Duration,
    /// Fraction of the population that must respond.
    pub response_threshold: f64,
}

impl Default for MonitorTimings {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(2),
            poll_interval: Duration::from_secs(1),
            ceiling: Duration::from_secs(10),
            response_threshold: DEFAULT_RESPONSE_THRESHOLD,
        }
    }
}

/// All runtime configuration for the server.
///
/// | Field           | Default        |
/// |-----------------|----------------|
/// | bind_addr       | `0.0.0.0:8765` |
/// | outbox_capacity | 64 frames      |
/// | lane_height     | 50.0           |
/// | placement       | random         |
/// | ack_policy      | assume_all     |
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Frames queued per connection before sends to it start failing.
    pub outbox_capacity: usize,
    pub lane_height: f64,
    pub placement: PlacementKind,
    pub ack_policy: AckPolicy,
    pub monitor: MonitorTimings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            lane_height: DEFAULT_LANE_HEIGHT,
            placement: PlacementKind::default(),
            ack_policy: AckPolicy::default(),
            monitor: MonitorTimings::default(),
        }
    }
}

impl ServerConfig {
    /// Builds an empty registry using the configured placement and geometry.
    pub fn build_registry(&self) -> DeviceRegistry {
        let placement: Box<dyn PlacementPolicy> = match self.placement {
            PlacementKind::Random => Box::new(RandomPlacement::new()),
            PlacementKind::RoundRobin => Box::new(RoundRobinPlacement::new()),
        };
        DeviceRegistry::new(placement, self.lane_height)
    }

    pub fn build_ack_tracker(&self) -> Arc<dyn AckTracker> {
        match self.ack_policy {
            AckPolicy::AssumeAll => Arc::new(AssumeAllResponded),
            AckPolicy::Tracked => Arc::new(TrackedResponses),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_port_is_8765() {
        assert_eq!(ServerConfig::default().bind_addr.port(), 8765);
    }

    #[test]
    fn test_default_monitor_timings() {
        let t = MonitorTimings::default();
        assert_eq!(t.grace, Duration::from_secs(2));
        assert_eq!(t.poll_interval, Duration::from_secs(1));
        assert_eq!(t.ceiling, Duration::from_secs(10));
        assert_eq!(t.response_threshold, 0.8);
    }

    #[test]
    fn test_build_registry_uses_lane_height() {
        let cfg = ServerConfig {
            lane_height: 40.0,
            placement: PlacementKind::RoundRobin,
            ..ServerConfig::default()
        };
        let mut reg = cfg.build_registry();
        let id = reg.register(None);
        // Round robin starts in lane 1.
        assert_eq!(reg.get(id).unwrap().y, 40.0);
    }

    #[test]
    fn test_placement_and_ack_policy_parse() {
        assert_eq!("round_robin".parse::<PlacementKind>(), Ok(PlacementKind::RoundRobin));
        assert_eq!("tracked".parse::<AckPolicy>(), Ok(AckPolicy::Tracked));
        assert!("sometimes".parse::<AckPolicy>().is_err());
    }
}
