//! The emergency session: a single, system-wide, mutually exclusive episode.
//!
//! # State machine
//!
//! ```text
//!            activate (guarded)
//!   NORMAL ───────────────────► EMERGENCY_ACTIVE
//!     ▲                              │ begin_clearing (automatic)
//!     │                              ▼
//!     │                         CLEARING_PATH
//!     │                              │ complete_clearing (monitor satisfied)
//!     │                              ▼
//!     └──── deactivate / ────── PATH_CLEARED
//!           owner vanished
//!       (from any non-NORMAL state)
//! ```
//!
//! Every transition is a method taking `&mut self`, so whoever owns the
//! session behind a lock gets check-and-set atomicity for free: two callers
//! can never both observe `Normal` and both activate.
//!
//! # Generations
//!
//! Each activation bumps a generation counter.  The timed transitions
//! (`begin_clearing`, `complete_clearing`) only apply when the caller's
//! generation matches, so a monitor left over from an earlier session can
//! never advance a newer one.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{DeviceId, DeviceRegistry, Lane};

// ── States and tags ───────────────────────────────────────────────────────────

/// Phase of the emergency session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyState {
    #[default]
    Normal,
    EmergencyActive,
    ClearingPath,
    PathCleared,
}

impl EmergencyState {
    pub fn as_str(self) -> &'static str {
        match self {
            EmergencyState::Normal => "normal",
            EmergencyState::EmergencyActive => "emergency_active",
            EmergencyState::ClearingPath => "clearing_path",
            EmergencyState::PathCleared => "path_cleared",
        }
    }
}

impl fmt::Display for EmergencyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which external trigger started or ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    /// A connected vehicle sent `register_emergency`.
    Vehicle,
    /// A physical push button on a serial line.
    Button,
    /// A radio relay gateway forwarding an over-the-air broadcast.
    Radio,
}

impl TriggerSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerSource::Vehicle => "vehicle",
            TriggerSource::Button => "button",
            TriggerSource::Radio => "radio",
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown source tag.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown trigger source '{0}' (expected vehicle, button or radio)")]
pub struct UnknownTriggerSource(pub String);

impl FromStr for TriggerSource {
    type Err = UnknownTriggerSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vehicle" => Ok(TriggerSource::Vehicle),
            "button" => Ok(TriggerSource::Button),
            "radio" | "lora" => Ok(TriggerSource::Radio),
            _ => Err(UnknownTriggerSource(s.to_string())),
        }
    }
}

/// Who holds the session.
///
/// Vehicles hold it under their own identity.  Hardware triggers share one
/// sentinel owner that needs no registered device, so a button press and a
/// radio relay can clear each other's sessions but never a vehicle's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionOwner {
    Device(DeviceId),
    Hardware,
}

impl SessionOwner {
    /// Wire identity used in the `device_id` field of outbound envelopes.
    pub const HARDWARE_ID: &'static str = "hardware";

    pub fn device(self) -> Option<DeviceId> {
        match self {
            SessionOwner::Device(id) => Some(id),
            SessionOwner::Hardware => None,
        }
    }
}

impl fmt::Display for SessionOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOwner::Device(id) => id.fmt(f),
            SessionOwner::Hardware => f.write_str(Self::HARDWARE_ID),
        }
    }
}

impl Serialize for SessionOwner {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ── Errors and transition records ─────────────────────────────────────────────

/// Why a transition request was refused.  None of these change any state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmergencyError {
    #[error("an emergency session is already {0}")]
    AlreadyActive(EmergencyState),

    #[error("device {0} is not registered")]
    UnknownDevice(DeviceId),

    #[error("no emergency session is active")]
    NoSession,

    #[error("{requester} does not own the active session (owner: {owner})")]
    NotOwner {
        requester: SessionOwner,
        owner: SessionOwner,
    },
}

/// Emitted by a successful activation; carries what the broadcast needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub owner: SessionOwner,
    pub source: TriggerSource,
    pub generation: u64,
    pub target_lanes: BTreeMap<Lane, Lane>,
}

/// How a session came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearCause {
    /// The owner asked for it.
    Deactivated,
    /// The owning device left the road while the session was open.
    OwnerVanished,
}

/// Emitted whenever a session returns to `Normal`.
#[derive(Debug, Clone, PartialEq)]
pub struct Clearance {
    pub owner: SessionOwner,
    pub source: TriggerSource,
    pub generation: u64,
    pub cause: ClearCause,
}

/// Read-only summary of the session for full-state sync.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmergencyStatus {
    pub state: EmergencyState,
    pub active_emergency_device: Option<SessionOwner>,
    pub source: Option<TriggerSource>,
    /// Seconds since activation; `None` in `Normal`.
    pub time_since_activation: Option<f64>,
    pub target_lanes: BTreeMap<u8, u8>,
    /// Devices that have answered the current session.
    pub acknowledged: usize,
}

/// The target-lane table: every lane clears to the rightmost lane.
pub fn target_lanes() -> BTreeMap<Lane, Lane> {
    Lane::ALL.iter().map(|&lane| (lane, Lane::RIGHTMOST)).collect()
}

/// Converts a lane table to its numeric wire form.
pub fn lane_table_numbers(table: &BTreeMap<Lane, Lane>) -> BTreeMap<u8, u8> {
    table.iter().map(|(from, to)| (from.number(), to.number())).collect()
}

// ── Session ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Holder {
    owner: SessionOwner,
    source: TriggerSource,
    activated_at: Instant,
    responders: HashSet<DeviceId>,
}

/// The single emergency session.
///
/// Invariant: `holder` is `Some` exactly when `state != Normal`.
#[derive(Debug, Default)]
pub struct EmergencySession {
    state: EmergencyState,
    holder: Option<Holder>,
    generation: u64,
}

impl EmergencySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> EmergencyState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != EmergencyState::Normal
    }

    pub fn owner(&self) -> Option<SessionOwner> {
        self.holder.as_ref().map(|h| h.owner)
    }

    pub fn source(&self) -> Option<TriggerSource> {
        self.holder.as_ref().map(|h| h.source)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Devices that have answered the current session.
    pub fn responders(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.holder.iter().flat_map(|h| h.responders.iter().copied())
    }

    /// `true` iff `activate` would succeed right now.
    pub fn can_activate(&self, owner: SessionOwner, registry: &DeviceRegistry) -> bool {
        self.check_activation(owner, registry).is_ok()
    }

    /// Reports why `activate` would be rejected right now, without changing
    /// anything.
    pub fn check_activation(&self, owner: SessionOwner, registry: &DeviceRegistry) -> Result<(), EmergencyError> {
        if self.state != EmergencyState::Normal {
            return Err(EmergencyError::AlreadyActive(self.state));
        }
        match owner {
            SessionOwner::Device(id) if !registry.contains(id) => Err(EmergencyError::UnknownDevice(id)),
            _ => Ok(()),
        }
    }

    /// Opens a session.  Check and set happen in this one call.
    ///
    /// # Errors
    ///
    /// [`EmergencyError::AlreadyActive`] outside `Normal`;
    /// [`EmergencyError::UnknownDevice`] when a device owner is not registered.
    pub fn activate(
        &mut self,
        owner: SessionOwner,
        source: TriggerSource,
        registry: &mut DeviceRegistry,
        now: Instant,
    ) -> Result<Activation, EmergencyError> {
        if let Err(e) = self.check_activation(owner, registry) {
            warn!(%owner, %source, error = %e, "emergency activation rejected");
            return Err(e);
        }

        self.generation = self.generation.wrapping_add(1);
        self.state = EmergencyState::EmergencyActive;
        self.holder = Some(Holder {
            owner,
            source,
            activated_at: now,
            responders: HashSet::new(),
        });
        if let Some(id) = owner.device() {
            registry.set_emergency_flag(id, true);
        }

        info!(%owner, %source, generation = self.generation, "emergency activated");
        Ok(Activation {
            owner,
            source,
            generation: self.generation,
            target_lanes: target_lanes(),
        })
    }

    /// `EmergencyActive` → `ClearingPath` for the given generation.
    pub fn begin_clearing(&mut self, generation: u64) -> bool {
        self.advance(generation, EmergencyState::EmergencyActive, EmergencyState::ClearingPath)
    }

    /// `ClearingPath` → `PathCleared` for the given generation.
    pub fn complete_clearing(&mut self, generation: u64) -> bool {
        self.advance(generation, EmergencyState::ClearingPath, EmergencyState::PathCleared)
    }

    fn advance(&mut self, generation: u64, from: EmergencyState, to: EmergencyState) -> bool {
        if self.generation != generation || self.state != from {
            return false;
        }
        self.state = to;
        info!(generation, state = %to, "emergency state advanced");
        true
    }

    /// Closes the session on the owner's request.
    ///
    /// # Errors
    ///
    /// [`EmergencyError::NoSession`] in `Normal`; [`EmergencyError::NotOwner`]
    /// when `requester` is not the recorded owner.
    pub fn deactivate(
        &mut self,
        requester: SessionOwner,
        registry: &mut DeviceRegistry,
    ) -> Result<Clearance, EmergencyError> {
        let owner = self.owner().ok_or(EmergencyError::NoSession)?;
        if owner != requester {
            warn!(%requester, %owner, "emergency deactivation from non-owner rejected");
            return Err(EmergencyError::NotOwner { requester, owner });
        }
        self.clear(ClearCause::Deactivated, registry).ok_or(EmergencyError::NoSession)
    }

    /// Closes the session if `device_id` owns it; used when a device leaves.
    pub fn release_device(&mut self, device_id: DeviceId, registry: &mut DeviceRegistry) -> Option<Clearance> {
        if self.owner() != Some(SessionOwner::Device(device_id)) {
            return None;
        }
        self.clear(ClearCause::OwnerVanished, registry)
    }

    /// Returns to `Normal`.  `None` when there was no session to close.
    fn clear(&mut self, cause: ClearCause, registry: &mut DeviceRegistry) -> Option<Clearance> {
        let holder = self.holder.take()?;
        let previous = std::mem::take(&mut self.state);
        if let Some(id) = holder.owner.device() {
            registry.set_emergency_flag(id, false);
        }
        info!(owner = %holder.owner, from = %previous, ?cause, "emergency cleared");
        Some(Clearance {
            owner: holder.owner,
            source: holder.source,
            generation: self.generation,
            cause,
        })
    }

    /// Records that `device_id` answered the current session.
    ///
    /// Ignored in `Normal` and for the owner itself.  Returns whether the
    /// response was counted for the first time.
    pub fn record_response(&mut self, device_id: DeviceId) -> bool {
        match self.holder.as_mut() {
            Some(holder) if holder.owner != SessionOwner::Device(device_id) => {
                holder.responders.insert(device_id)
            }
            _ => false,
        }
    }

    pub fn status(&self, now: Instant) -> EmergencyStatus {
        EmergencyStatus {
            state: self.state,
            active_emergency_device: self.owner(),
            source: self.source(),
            time_since_activation: self
                .holder
                .as_ref()
                .map(|h| now.saturating_duration_since(h.activated_at).as_secs_f64()),
            target_lanes: lane_table_numbers(&target_lanes()),
            acknowledged: self.holder.as_ref().map_or(0, |h| h.responders.len()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RoundRobinPlacement, DEFAULT_LANE_HEIGHT};

    fn registry_with(n: usize) -> (DeviceRegistry, Vec<DeviceId>) {
        let mut reg = DeviceRegistry::new(Box::new(RoundRobinPlacement::new()), DEFAULT_LANE_HEIGHT);
        let ids = (0..n).map(|_| reg.register(None)).collect();
        (reg, ids)
    }

    #[test]
    fn test_new_session_is_normal_without_owner() {
        let session = EmergencySession::new();
        assert_eq!(session.state(), EmergencyState::Normal);
        assert!(session.owner().is_none());
    }

    #[test]
    fn test_activate_records_owner_and_target_lanes() {
        // Arrange
        let (mut reg, ids) = registry_with(2);
        let mut session = EmergencySession::new();

        // Act
        let activation = session
            .activate(SessionOwner::Device(ids[0]), TriggerSource::Vehicle, &mut reg, Instant::now())
            .unwrap();

        // Assert
        assert_eq!(session.state(), EmergencyState::EmergencyActive);
        assert_eq!(session.owner(), Some(SessionOwner::Device(ids[0])));
        assert_eq!(
            lane_table_numbers(&activation.target_lanes),
            BTreeMap::from([(1, 3), (2, 3), (3, 3)])
        );
        assert!(reg.get(ids[0]).unwrap().emergency_active);
    }

    #[test]
    fn test_activate_unknown_device_is_rejected() {
        let (mut reg, _) = registry_with(1);
        let mut session = EmergencySession::new();
        let stranger = DeviceId::new();

        let result = session.activate(SessionOwner::Device(stranger), TriggerSource::Vehicle, &mut reg, Instant::now());

        assert_eq!(result, Err(EmergencyError::UnknownDevice(stranger)));
        assert_eq!(session.state(), EmergencyState::Normal);
    }

    #[test]
    fn test_second_activation_is_rejected_in_every_non_normal_state() {
        let (mut reg, ids) = registry_with(2);
        let mut session = EmergencySession::new();
        let first = SessionOwner::Device(ids[0]);
        let second = SessionOwner::Device(ids[1]);
        let gen = session
            .activate(first, TriggerSource::Vehicle, &mut reg, Instant::now())
            .unwrap()
            .generation;

        for advance in [None, Some(EmergencyState::ClearingPath), Some(EmergencyState::PathCleared)] {
            match advance {
                Some(EmergencyState::ClearingPath) => assert!(session.begin_clearing(gen)),
                Some(EmergencyState::PathCleared) => assert!(session.complete_clearing(gen)),
                _ => {}
            }
            let state = session.state();
            let result = session.activate(second, TriggerSource::Vehicle, &mut reg, Instant::now());
            assert_eq!(result, Err(EmergencyError::AlreadyActive(state)));
            assert_eq!(session.owner(), Some(first));
            assert_eq!(session.state(), state);
        }
    }

    #[test]
    fn test_hardware_owner_needs_no_registered_device() {
        let (mut reg, _) = registry_with(0);
        let mut session = EmergencySession::new();
        assert!(session.can_activate(SessionOwner::Hardware, &reg));
        session
            .activate(SessionOwner::Hardware, TriggerSource::Button, &mut reg, Instant::now())
            .unwrap();
        assert_eq!(session.source(), Some(TriggerSource::Button));
    }

    #[test]
    fn test_hardware_and_vehicle_share_one_exclusion() {
        let (mut reg, ids) = registry_with(1);
        let mut session = EmergencySession::new();
        session
            .activate(SessionOwner::Hardware, TriggerSource::Radio, &mut reg, Instant::now())
            .unwrap();
        assert!(!session.can_activate(SessionOwner::Device(ids[0]), &reg));
        assert!(session
            .activate(SessionOwner::Device(ids[0]), TriggerSource::Vehicle, &mut reg, Instant::now())
            .is_err());
    }

    #[test]
    fn test_deactivate_by_non_owner_is_rejected() {
        let (mut reg, ids) = registry_with(2);
        let mut session = EmergencySession::new();
        session
            .activate(SessionOwner::Device(ids[0]), TriggerSource::Vehicle, &mut reg, Instant::now())
            .unwrap();

        let result = session.deactivate(SessionOwner::Device(ids[1]), &mut reg);

        assert!(matches!(result, Err(EmergencyError::NotOwner { .. })));
        assert_eq!(session.state(), EmergencyState::EmergencyActive);
    }

    #[test]
    fn test_deactivate_without_session_is_rejected() {
        let (mut reg, ids) = registry_with(1);
        let mut session = EmergencySession::new();
        assert_eq!(
            session.deactivate(SessionOwner::Device(ids[0]), &mut reg),
            Err(EmergencyError::NoSession)
        );
    }

    #[test]
    fn test_deactivate_by_owner_returns_to_normal() {
        let (mut reg, ids) = registry_with(1);
        let mut session = EmergencySession::new();
        let owner = SessionOwner::Device(ids[0]);
        session.activate(owner, TriggerSource::Vehicle, &mut reg, Instant::now()).unwrap();

        let clearance = session.deactivate(owner, &mut reg).unwrap();

        assert_eq!(clearance.cause, ClearCause::Deactivated);
        assert_eq!(session.state(), EmergencyState::Normal);
        assert!(session.owner().is_none());
        assert!(!reg.get(ids[0]).unwrap().emergency_active);
    }

    #[test]
    fn test_clearance_names_the_recorded_holder() {
        // Arrange
        let (mut reg, _) = registry_with(1);
        let mut session = EmergencySession::new();
        session
            .activate(SessionOwner::Hardware, TriggerSource::Radio, &mut reg, Instant::now())
            .unwrap();

        // Act
        let clearance = session.deactivate(SessionOwner::Hardware, &mut reg).unwrap();

        // Assert
        assert_eq!((clearance.owner, clearance.source), (SessionOwner::Hardware, TriggerSource::Radio));
        assert!(session.release_device(DeviceId::new(), &mut reg).is_none());
        assert_eq!(
            session.deactivate(SessionOwner::Hardware, &mut reg),
            Err(EmergencyError::NoSession)
        );
    }

    #[test]
    fn test_release_device_only_clears_own_session() {
        let (mut reg, ids) = registry_with(2);
        let mut session = EmergencySession::new();
        session
            .activate(SessionOwner::Device(ids[0]), TriggerSource::Vehicle, &mut reg, Instant::now())
            .unwrap();

        assert!(session.release_device(ids[1], &mut reg).is_none());
        let clearance = session.release_device(ids[0], &mut reg).unwrap();

        assert_eq!(clearance.cause, ClearCause::OwnerVanished);
        assert_eq!(session.state(), EmergencyState::Normal);
    }

    #[test]
    fn test_stale_generation_cannot_advance_new_session() {
        let (mut reg, ids) = registry_with(1);
        let mut session = EmergencySession::new();
        let owner = SessionOwner::Device(ids[0]);
        let old = session.activate(owner, TriggerSource::Vehicle, &mut reg, Instant::now()).unwrap();
        session.deactivate(owner, &mut reg).unwrap();
        session.activate(owner, TriggerSource::Vehicle, &mut reg, Instant::now()).unwrap();

        assert!(!session.begin_clearing(old.generation));
        assert_eq!(session.state(), EmergencyState::EmergencyActive);
    }

    #[test]
    fn test_clearing_transitions_are_ordered() {
        let (mut reg, _) = registry_with(0);
        let mut session = EmergencySession::new();
        let gen = session
            .activate(SessionOwner::Hardware, TriggerSource::Button, &mut reg, Instant::now())
            .unwrap()
            .generation;

        assert!(!session.complete_clearing(gen), "cannot skip CLEARING_PATH");
        assert!(session.begin_clearing(gen));
        assert!(session.complete_clearing(gen));
        assert_eq!(session.state(), EmergencyState::PathCleared);
    }

    #[test]
    fn test_record_response_ignores_owner_and_normal_state() {
        let (mut reg, ids) = registry_with(2);
        let mut session = EmergencySession::new();
        assert!(!session.record_response(ids[1]));

        session
            .activate(SessionOwner::Device(ids[0]), TriggerSource::Vehicle, &mut reg, Instant::now())
            .unwrap();

        assert!(!session.record_response(ids[0]));
        assert!(session.record_response(ids[1]));
        assert!(!session.record_response(ids[1]), "duplicates are not counted twice");
        assert_eq!(session.responders().collect::<Vec<_>>(), vec![ids[1]]);
    }

    #[test]
    fn test_status_reports_owner_and_elapsed_time() {
        let (mut reg, _) = registry_with(0);
        let mut session = EmergencySession::new();
        let start = Instant::now();
        assert_eq!(session.status(start).time_since_activation, None);

        session.activate(SessionOwner::Hardware, TriggerSource::Radio, &mut reg, start).unwrap();
        let status = session.status(start + std::time::Duration::from_secs(3));

        assert_eq!(status.state, EmergencyState::EmergencyActive);
        assert_eq!(status.active_emergency_device, Some(SessionOwner::Hardware));
        assert_eq!(status.time_since_activation, Some(3.0));
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["active_emergency_device"], "hardware");
        assert_eq!(json["source"], "radio");
        assert_eq!(json["target_lanes"]["1"], 3);
    }

    #[test]
    fn test_trigger_source_parses_aliases() {
        assert_eq!("button".parse::<TriggerSource>(), Ok(TriggerSource::Button));
        assert_eq!("LoRa".parse::<TriggerSource>(), Ok(TriggerSource::Radio));
        assert!("siren".parse::<TriggerSource>().is_err());
    }
}
