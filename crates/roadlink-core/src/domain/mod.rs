//! Domain layer: devices, lanes, and the registry that owns them.
//!
//! Nothing in here performs I/O or knows about connections.

pub mod device;
pub mod placement;
pub mod registry;

pub use device::{ConnectionStatus, Device, DeviceId, InvalidLane, Lane, VehicleClass, DEFAULT_LANE_HEIGHT};
pub use placement::{PlacementPolicy, RandomPlacement, RoundRobinPlacement, Spawn};
pub use registry::{DeviceRegistry, LaneChange, RoadSummary};
