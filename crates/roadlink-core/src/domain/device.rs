//! Device entities: identity, vehicle class, lane geometry, and per-device state.
//!
//! A *device* is one connected vehicle.  Its [`DeviceId`] is minted by the
//! registry when the connection handshake completes and never changes for the
//! lifetime of that connection.
//!
//! # Lane geometry
//!
//! The road has three lanes numbered `1` (left) to `3` (right).  Lanes are
//! stacked vertically, so a lane's canonical y-coordinate is
//! `lane_number * lane_height`:
//!
//! ```text
//!   y =  50  ─────────  lane 1 (left)
//!   y = 100  ─────────  lane 2 (middle)
//!   y = 150  ─────────  lane 3 (right)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Vertical distance between two adjacent lanes, in simulation units.
pub const DEFAULT_LANE_HEIGHT: f64 = 50.0;

// ── Identity ──────────────────────────────────────────────────────────────────

/// Opaque, unique identity of one connected device.
///
/// Serialises as the hyphenated UUID string so clients can echo it back
/// verbatim in the `device_id` field of their envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(Uuid);

impl DeviceId {
    /// Mints a fresh random identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses the textual form a client sent back to us.
    ///
    /// Returns `None` for anything that is not a canonical UUID string.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ── Vehicle class ─────────────────────────────────────────────────────────────

/// The kind of vehicle a device simulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    #[serde(rename = "regular_car")]
    Regular,
    Truck,
    Motorcycle,
    #[serde(rename = "emergency_vehicle")]
    Emergency,
}

impl VehicleClass {
    /// Classes a device may be assigned when it connects without a hint.
    pub const CIVILIAN: [VehicleClass; 3] = [
        VehicleClass::Regular,
        VehicleClass::Truck,
        VehicleClass::Motorcycle,
    ];

    /// Wire name, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            VehicleClass::Regular => "regular_car",
            VehicleClass::Truck => "truck",
            VehicleClass::Motorcycle => "motorcycle",
            VehicleClass::Emergency => "emergency_vehicle",
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Lane ──────────────────────────────────────────────────────────────────────

/// Error returned when a lane number is outside `1..=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("lane {0} does not exist (expected 1, 2 or 3)")]
pub struct InvalidLane(pub i64);

/// One of the three fixed lanes, ordered left to right.
///
/// On the wire a lane is its number (`1`, `2` or `3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Lane {
    Left = 1,
    Middle = 2,
    Right = 3,
}

impl Lane {
    /// All lanes in left-to-right order.
    pub const ALL: [Lane; 3] = [Lane::Left, Lane::Middle, Lane::Right];

    /// The lane an emergency vehicle never needs: every other vehicle moves here.
    pub const RIGHTMOST: Lane = Lane::Right;

    /// 1-based lane number.
    pub fn number(self) -> u8 {
        self as u8
    }

    /// Canonical y-coordinate of the lane centre line.
    pub fn y(self, lane_height: f64) -> f64 {
        f64::from(self.number()) * lane_height
    }

    /// Derives the lane from a y-coordinate by rounding to the nearest lane.
    /// Exact halves round to the even lane number, so `y = 125` is lane 2 and
    /// `y = 25` rounds to 0, which is off the road.
    ///
    /// Returns `None` when the rounded value is not a representable lane, for
    /// example `y = 0` or `y = 400` with the default lane height.
    pub fn from_y(y: f64, lane_height: f64) -> Option<Lane> {
        if !y.is_finite() || lane_height <= 0.0 {
            return None;
        }
        Lane::try_from(round_half_even(y / lane_height) as i64).ok()
    }

    /// Short name used as the key of the road-state lane summary.
    pub fn name(self) -> &'static str {
        match self {
            Lane::Left => "left",
            Lane::Middle => "middle",
            Lane::Right => "right",
        }
    }
}

fn round_half_even(v: f64) -> f64 {
    let rounded = v.round();
    if (v - v.trunc()).abs() == 0.5 && rounded % 2.0 != 0.0 {
        rounded - v.signum()
    } else {
        rounded
    }
}

impl TryFrom<i64> for Lane {
    type Error = InvalidLane;

    fn try_from(n: i64) -> Result<Self, Self::Error> {
        match n {
            1 => Ok(Lane::Left),
            2 => Ok(Lane::Middle),
            3 => Ok(Lane::Right),
            other => Err(InvalidLane(other)),
        }
    }
}

impl From<Lane> for i64 {
    fn from(lane: Lane) -> i64 {
        i64::from(lane.number())
    }
}

// ── Device ────────────────────────────────────────────────────────────────────

/// Connection status reported for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
}

/// Full state of one registered device.
///
/// Serialises with the field names the rendering client expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub device_id: DeviceId,
    #[serde(rename = "vehicle_type")]
    pub class: VehicleClass,
    #[serde(rename = "current_lane")]
    pub lane: Lane,
    #[serde(rename = "position_x")]
    pub x: f64,
    #[serde(rename = "position_y")]
    pub y: f64,
    pub speed: f64,
    /// Mirrors the coordinator; never consulted to make decisions.
    #[serde(rename = "is_emergency_active")]
    pub emergency_active: bool,
    pub connection_status: ConnectionStatus,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
