//! Application layer for roadlink-server.
//!
//! - **`broadcast_router`** – identity → outbox map and lock-free fan-out.
//! - **`state`** – registry, router and emergency session behind one lock.
//! - **`coordinator`** – the emergency entry point and path-clearing monitor.
//! - **`supervisor`** – per-connection join, envelope dispatch and leave.
//!
//! Nothing here touches a socket.  The infrastructure layer feeds text frames
//! in and drains outboxes out.

pub mod broadcast_router;
pub mod coordinator;
pub mod state;
pub mod supervisor;

pub use broadcast_router::{BroadcastRouter, ConnectionHandle, DeliveryError, Outbox};
pub use coordinator::EmergencyCoordinator;
pub use state::RoadState;
pub use supervisor::ConnectionSupervisor;
