//! Domain layer for roadlink-server.
//!
//! Holds the resolved server configuration.  The device model and emergency
//! state machine live in `roadlink-core`; nothing here performs I/O.

pub mod config;

pub use config::{AckPolicy, MonitorTimings, PlacementKind, ServerConfig, DEFAULT_PORT};
