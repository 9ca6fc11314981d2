//! DeviceRegistry: the in-memory map of every connected device.
//!
//! The registry is pure data plus mutation operations.  It performs no I/O and
//! never broadcasts: callers that mutate a device are responsible for telling
//! the other devices about it, using the change records returned here.
//!
//! # Lane / position coupling
//!
//! The two write paths couple lane and y differently, and both behaviours are
//! deliberate:
//!
//! | Path               | Writes     | Derived field                                   |
//! |--------------------|------------|-------------------------------------------------|
//! | `update_lane`      | lane       | y = lane × lane_height (always consistent)      |
//! | `update_position`  | x, y       | lane = round(y / lane_height) if that is a lane |
//!
//! When a position update lands outside the road (`round(y / h)` not in
//! `1..=3`) the previous lane is kept and y is stored as sent, so lane and y
//! may disagree until the next in-range update or lane change.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::{debug, info};

use super::device::{ConnectionStatus, Device, DeviceId, Lane, VehicleClass, DEFAULT_LANE_HEIGHT};
use super::placement::{PlacementPolicy, RandomPlacement};

/// Result of a lane change, carrying what observers need to render it.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneChange {
    pub device_id: DeviceId,
    pub old_lane: Lane,
    pub new_lane: Lane,
    pub reason: String,
}

/// Aggregated view of the road used in full-state sync.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoadSummary {
    /// Lane name (`left`, `middle`, `right`) → devices currently in it.
    pub lanes: BTreeMap<&'static str, Vec<DeviceId>>,
    pub emergency_active: bool,
    pub total_vehicles: usize,
}

/// In-memory registry of all connected devices.
pub struct DeviceRegistry {
    devices: HashMap<DeviceId, Device>,
    lane_height: f64,
    placement: Box<dyn PlacementPolicy>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(Box::new(RandomPlacement::new()), DEFAULT_LANE_HEIGHT)
    }
}

impl DeviceRegistry {
    pub fn new(placement: Box<dyn PlacementPolicy>, lane_height: f64) -> Self {
        Self {
            devices: HashMap::new(),
            lane_height,
            placement,
        }
    }

    pub fn lane_height(&self) -> f64 {
        self.lane_height
    }

    /// Registers a new device and returns its freshly minted identity.
    ///
    /// The class hint selects the vehicle class; the placement policy picks
    /// lane, x and speed.  Never fails.
    pub fn register(&mut self, class_hint: Option<VehicleClass>) -> DeviceId {
        self.register_device(class_hint).device_id
    }

    /// Same as [`register`](Self::register), returning the stored device.
    pub fn register_device(&mut self, class_hint: Option<VehicleClass>) -> &Device {
        let mut device_id = DeviceId::new();
        // Identities must be unique for the registry's lifetime; re-roll on collision.
        while self.devices.contains_key(&device_id) {
            device_id = DeviceId::new();
        }

        let spawn = self.placement.place(class_hint);
        let device = Device {
            device_id,
            class: spawn.class,
            lane: spawn.lane,
            x: spawn.x,
            y: spawn.lane.y(self.lane_height),
            speed: spawn.speed,
            emergency_active: spawn.class == VehicleClass::Emergency,
            connection_status: ConnectionStatus::Connected,
        };

        info!(%device_id, class = %device.class, lane = device.lane.number(), "registered device");
        self.devices.entry(device_id).or_insert(device)
    }

    /// Removes a device.  Unknown identities are a no-op.
    pub fn unregister(&mut self, device_id: DeviceId) -> Option<Device> {
        let removed = self.devices.remove(&device_id);
        if let Some(device) = &removed {
            info!(%device_id, class = %device.class, "unregistered device");
        }
        removed
    }

    pub fn get(&self, device_id: DeviceId) -> Option<&Device> {
        self.devices.get(&device_id)
    }

    pub fn contains(&self, device_id: DeviceId) -> bool {
        self.devices.contains_key(&device_id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Moves a device to `(x, y)` and optionally changes its speed.
    ///
    /// The lane is recomputed from `y`; see the module docs for what happens
    /// when `y` is off the road.  A speed that is not a positive finite number
    /// is ignored.  Returns the updated device, or `None` for an unknown
    /// identity.
    pub fn update_position(
        &mut self,
        device_id: DeviceId,
        x: f64,
        y: f64,
        speed: Option<f64>,
    ) -> Option<&Device> {
        let lane_height = self.lane_height;
        let device = self.devices.get_mut(&device_id)?;
        device.x = x;
        device.y = y;
        if let Some(speed) = speed.filter(|s| s.is_finite() && *s > 0.0) {
            device.speed = speed;
        }
        match Lane::from_y(y, lane_height) {
            Some(lane) => device.lane = lane,
            None => debug!(%device_id, y, lane = device.lane.number(), "y is off the road; keeping lane"),
        }
        Some(&*device)
    }

    /// Puts a device into `lane` and snaps its y to the lane centre.
    ///
    /// `reason` is passed through to observers unchanged.  Returns `None` for
    /// an unknown identity.
    pub fn update_lane(&mut self, device_id: DeviceId, lane: Lane, reason: &str) -> Option<LaneChange> {
        let lane_height = self.lane_height;
        let device = self.devices.get_mut(&device_id)?;
        let old_lane = device.lane;
        device.lane = lane;
        device.y = lane.y(lane_height);
        info!(
            %device_id,
            from = old_lane.number(),
            to = lane.number(),
            reason,
            "lane change"
        );
        Some(LaneChange {
            device_id,
            old_lane,
            new_lane: lane,
            reason: reason.to_string(),
        })
    }

    /// Sets the mirrored emergency flag.  Unknown identities are a no-op.
    pub fn set_emergency_flag(&mut self, device_id: DeviceId, active: bool) {
        if let Some(device) = self.devices.get_mut(&device_id) {
            device.emergency_active = active;
        }
    }

    /// Copies every device, ordered by identity.
    pub fn snapshot(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.values().cloned().collect();
        devices.sort_by_key(|d| d.device_id);
        devices
    }

    /// Identities of devices currently in `lane`, ordered.
    pub fn devices_in_lane(&self, lane: Lane) -> Vec<DeviceId> {
        self.filter_ids(|d| d.lane == lane)
    }

    /// Identities of devices of `class`, ordered.
    pub fn devices_of_class(&self, class: VehicleClass) -> Vec<DeviceId> {
        self.filter_ids(|d| d.class == class)
    }

    /// Identities of devices whose emergency flag is set, ordered.
    pub fn emergency_devices(&self) -> Vec<DeviceId> {
        self.filter_ids(|d| d.emergency_active)
    }

    pub fn road_summary(&self) -> RoadSummary {
        RoadSummary {
            lanes: Lane::ALL
                .iter()
                .map(|&lane| (lane.name(), self.devices_in_lane(lane)))
                .collect(),
            emergency_active: self.devices.values().any(|d| d.emergency_active),
            total_vehicles: self.devices.len(),
        }
    }

    fn filter_ids(&self, pred: impl Fn(&Device) -> bool) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self
            .devices
            .values()
            .filter(|d| pred(d))
            .map(|d| d.device_id)
            .collect();
        ids.sort();
        ids
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
