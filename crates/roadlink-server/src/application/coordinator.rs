//! EmergencyCoordinator: the one entry point for every emergency transition.
//!
//! Vehicles, push buttons and radio relays all go through [`activate`] and
//! [`deactivate`], parameterised by a [`SessionOwner`] and a
//! [`TriggerSource`].  There is exactly one state machine regardless of where
//! the trigger came from.
//!
//! # Path-clearing monitor
//!
//! Each successful activation spawns a monitor task tied to the session's
//! generation:
//!
//! ```text
//! EMERGENCY_ACTIVE ──► CLEARING_PATH ── grace ──► poll every interval
//!                                                   │  owner gone?   → NORMAL (+ emergency_cleared)
//!                                                   │  threshold met → PATH_CLEARED
//!                                                   │  ceiling hit   → PATH_CLEARED
//!                                                   └  session moved on → stop quietly
//! ```
//!
//! The monitor is owned by the runtime, not by any connection, so closing a
//! connection never cancels it.
//!
//! [`activate`]: EmergencyCoordinator::activate
//! [`deactivate`]: EmergencyCoordinator::deactivate

use std::sync::Arc;
use std::time::Instant;

use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, info, warn};

use roadlink_core::domain::DeviceId;
use roadlink_core::emergency::{
    population, threshold_met, AckTracker, Activation, Clearance, EmergencyError, EmergencyState, EmergencyStatus,
    SessionOwner, TriggerSource,
};
use roadlink_core::protocol::{unix_timestamp, OutboundMsg};

use super::state::{RoadState, Shared};
use crate::domain::MonitorTimings;

pub struct EmergencyCoordinator {
    state: Arc<RoadState>,
    ack: Arc<dyn AckTracker>,
    timings: MonitorTimings,
}

impl EmergencyCoordinator {
    pub fn new(state: Arc<RoadState>, ack: Arc<dyn AckTracker>, timings: MonitorTimings) -> Self {
        Self { state, ack, timings }
    }

    pub fn road(&self) -> &Arc<RoadState> {
        &self.state
    }

    /// `true` iff the session is `Normal` and `owner` resolves.
    pub fn can_activate(&self, owner: SessionOwner) -> bool {
        self.check_activation(owner).is_ok()
    }

    /// Why an activation by `owner` would be rejected right now.
    pub fn check_activation(&self, owner: SessionOwner) -> Result<(), EmergencyError> {
        self.state.with(|s| s.session.check_activation(owner, &s.registry))
    }

    /// Opens the session, broadcasts `emergency_signal` to everyone except the
    /// activating device, and starts the monitor.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn activate(&self, owner: SessionOwner, source: TriggerSource) -> Result<Activation, EmergencyError> {
        let activation = self.state.with(|s| {
            let activation = s.session.activate(owner, source, &mut s.registry, Instant::now())?;
            s.broadcast(
                &OutboundMsg::emergency_signal(&activation, unix_timestamp()),
                owner.device(),
            );
            Ok::<_, EmergencyError>(activation)
        })?;

        tokio::spawn(run_monitor(
            Arc::clone(&self.state),
            Arc::clone(&self.ack),
            self.timings,
            activation.generation,
        ));
        Ok(activation)
    }

    /// Closes the session on the owner's request and broadcasts
    /// `emergency_cleared` to every connection, the requester included.
    pub fn deactivate(&self, requester: SessionOwner) -> Result<Clearance, EmergencyError> {
        self.state.with(|s| {
            let clearance = s.session.deactivate(requester, &mut s.registry)?;
            s.announce_clearance(&clearance);
            Ok(clearance)
        })
    }

    /// Runs the leave path for a device whose connection ended.
    pub fn release(&self, device_id: DeviceId) {
        self.state.leave(device_id);
    }

    /// Records a vehicle's response to the current session.
    pub fn record_response(&self, device_id: DeviceId) -> bool {
        self.state.with(|s| s.session.record_response(device_id))
    }

    pub fn status(&self) -> EmergencyStatus {
        self.state.with(|s| s.session.status(Instant::now()))
    }

    pub fn current_state(&self) -> EmergencyState {
        self.state.with(|s| s.session.state())
    }
}

// ── Monitor ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Poll {
    /// The session this monitor belongs to is gone.
    Stale,
    /// The owning device left the registry without going through the leave
    /// path.  `Shared::leave` normally releases the session first, so this is
    /// a guard rather than an expected outcome.
    OwnerVanished(Clearance),
    Satisfied { responded: usize, population: usize },
    Waiting { responded: usize, population: usize },
}

fn poll(s: &mut Shared, ack: &dyn AckTracker, ratio: f64, generation: u64) -> Poll {
    if s.session.generation() != generation || s.session.state() != EmergencyState::ClearingPath {
        return Poll::Stale;
    }
    if let Some(SessionOwner::Device(owner)) = s.session.owner() {
        if !s.registry.contains(owner) {
            if let Some(clearance) = s.session.release_device(owner, &mut s.registry) {
                s.announce_clearance(&clearance);
                return Poll::OwnerVanished(clearance);
            }
        }
    }
    let population = population(&s.session, &s.registry);
    let responded = ack.responded(&s.session, &s.registry);
    if threshold_met(responded, population, ratio) {
        Poll::Satisfied { responded, population }
    } else {
        Poll::Waiting { responded, population }
    }
}

async fn run_monitor(state: Arc<RoadState>, ack: Arc<dyn AckTracker>, timings: MonitorTimings, generation: u64) {
    if !state.with(|s| s.session.begin_clearing(generation)) {
        return;
    }
    time::sleep(timings.grace).await;

    let deadline = TokioInstant::now() + timings.ceiling;
    loop {
        if TokioInstant::now() >= deadline {
            info!(generation, "path-clearing ceiling reached");
            break;
        }
        match state.with(|s| poll(s, ack.as_ref(), timings.response_threshold, generation)) {
            Poll::Stale => {
                debug!(generation, "monitor stopped; session moved on");
                return;
            }
            Poll::OwnerVanished(clearance) => {
                warn!(generation, owner = %clearance.owner, "emergency device vanished during path clearing");
                return;
            }
            Poll::Satisfied { responded, population } => {
                info!(generation, responded, population, "enough vehicles responded");
                break;
            }
            Poll::Waiting { responded, population } => {
                debug!(generation, responded, population, "waiting for responses");
            }
        }
        time::sleep(timings.poll_interval).await;
    }

    if state.with(|s| s.session.complete_clearing(generation)) {
        info!(generation, "path cleared");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
