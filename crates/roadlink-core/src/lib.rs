//! # roadlink-core
//!
//! Shared library for RoadLink, a coordination server for a simulated road
//! where connected vehicles report their state and one at a time can raise an
//! emergency that every other vehicle must react to.
//!
//! This crate holds everything that does not touch a socket or a clock
//! driver:
//!
//! - **`domain`** – Devices, lanes and the [`DeviceRegistry`] that owns them.
//!   Placement of new vehicles is a pluggable policy.
//!
//! - **`emergency`** – The single system-wide [`EmergencySession`] state
//!   machine and the [`AckTracker`] seam the path-clearing monitor measures
//!   responses through.
//!
//! - **`protocol`** – The JSON envelopes exchanged with devices and the text
//!   frame codec.
//!
//! The server crate wraps these types in its own locking and transport.

pub mod domain;
pub mod emergency;
pub mod protocol;

pub use domain::{Device, DeviceId, DeviceRegistry, Lane, VehicleClass};
pub use emergency::{AckTracker, EmergencyError, EmergencySession, EmergencyState, SessionOwner, TriggerSource};
pub use protocol::{decode_inbound, encode_outbound, DecodeError, InboundMsg, OutboundMsg};
