//! Placement policies: where a freshly registered vehicle appears on the road.
//!
//! The policy is pluggable because nothing downstream depends on where a
//! vehicle starts.  The server uses [`RandomPlacement`] by default, which
//! mirrors a live demo where cars scatter across the lanes; tests use
//! [`RoundRobinPlacement`] to get reproducible positions.

use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};

use super::device::{Lane, VehicleClass};

/// Initial attributes chosen for a new vehicle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spawn {
    pub class: VehicleClass,
    pub lane: Lane,
    pub x: f64,
    pub speed: f64,
}

/// Chooses the class, lane, x-position and speed of a new vehicle.
///
/// `hint` is the class requested during the handshake; implementations must
/// honour it when present and pick a civilian class otherwise.
pub trait PlacementPolicy: Send {
    fn place(&mut self, hint: Option<VehicleClass>) -> Spawn;
}

/// Uniformly random lane, x in `[0, 100)` and speed in `[0.8, 1.2)`.
pub struct RandomPlacement {
    rng: StdRng,
}

impl RandomPlacement {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Deterministic variant for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomPlacement {
    fn default() -> Self {
        Self::new()
    }
}

impl PlacementPolicy for RandomPlacement {
    fn place(&mut self, hint: Option<VehicleClass>) -> Spawn {
        let class = match hint {
            Some(class) => class,
            None => *VehicleClass::CIVILIAN
                .choose(&mut self.rng)
                .unwrap_or(&VehicleClass::Regular),
        };
        let lane = *Lane::ALL.choose(&mut self.rng).unwrap_or(&Lane::Middle);
        Spawn {
            class,
            lane,
            x: self.rng.random_range(0.0..100.0),
            speed: self.rng.random_range(0.8..1.2),
        }
    }
}

/// Cycles through the lanes and civilian classes in order, spacing vehicles
/// 20 units apart along the x axis.
#[derive(Debug, Default)]
pub struct RoundRobinPlacement {
    next: usize,
}

impl RoundRobinPlacement {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlacementPolicy for RoundRobinPlacement {
    fn place(&mut self, hint: Option<VehicleClass>) -> Spawn {
        let n = self.next;
        self.next = self.next.wrapping_add(1);
        Spawn {
            class: hint.unwrap_or(VehicleClass::CIVILIAN[n % VehicleClass::CIVILIAN.len()]),
            lane: Lane::ALL[n % Lane::ALL.len()],
            x: (n % 5) as f64 * 20.0,
            speed: 1.0,
        }
    }
}
