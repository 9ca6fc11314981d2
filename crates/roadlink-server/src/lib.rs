//! roadlink-server library crate.
//!
//! Coordinates connected vehicles on a three-lane road over WebSocket and runs
//! the single emergency session they share.
//!
//! ```text
//! Vehicles (JSON over WebSocket)      Button / radio gateway (line protocol)
//!         ↕                                     ↓
//! [roadlink-server]
//!   ├── domain/           ServerConfig and its policies
//!   ├── application/      RoadState, BroadcastRouter, EmergencyCoordinator,
//!   │                     ConnectionSupervisor
//!   └── infrastructure/
//!         ├── ws_server/       accept loop, per-connection writer tasks
//!         ├── trigger_bridge/  EMERGENCY_ON / EMERGENCY_OFF lines
//!         └── storage/         TOML config file
//! ```
//!
//! `application` depends on `domain` and `roadlink-core`; only
//! `infrastructure` does socket or file I/O.

/// Domain layer: resolved runtime configuration.
pub mod domain;

/// Application layer: shared state, fan-out and the emergency protocol.
pub mod application;

/// Infrastructure layer: WebSocket server, trigger bridge, config file.
pub mod infrastructure;
