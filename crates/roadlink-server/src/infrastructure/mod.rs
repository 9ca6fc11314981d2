//! Infrastructure layer for roadlink-server.
//!
//! Everything that touches the outside world lives here: the WebSocket accept
//! loop, the hardware trigger bridge, and the TOML config file.
//!
//! Protocol dispatch and emergency logic belong to the application layer;
//! nothing in this module decides what a message means.

pub mod storage;
pub mod trigger_bridge;
pub mod ws_server;

pub use trigger_bridge::{open_device, TriggerBridge, TriggerError};
pub use ws_server::{run_server, serve, ServerContext};
