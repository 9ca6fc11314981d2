//! Acknowledgement tracking for the path-clearing monitor.
//!
//! The monitor asks an [`AckTracker`] how many devices have responded to the
//! current session and compares that with the population it is measured
//! against: every registered device except the session's owner.

use crate::domain::{DeviceId, DeviceRegistry};

use super::session::EmergencySession;

/// Fraction of the population that must respond before the path is considered
/// clear.
pub const DEFAULT_RESPONSE_THRESHOLD: f64 = 0.8;

/// Counts the devices that have responded to the current session.
#[cfg_attr(test, mockall::automock)]
pub trait AckTracker: Send + Sync {
    fn responded(&self, session: &EmergencySession, registry: &DeviceRegistry) -> usize;
}

/// Reports the whole population as having responded.
///
/// This is the default: vehicles are simulated and nothing guarantees they
/// send explicit responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeAllResponded;

impl AckTracker for AssumeAllResponded {
    fn responded(&self, session: &EmergencySession, registry: &DeviceRegistry) -> usize {
        population(session, registry)
    }
}

/// Counts only recorded responders that are still registered.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackedResponses;

impl AckTracker for TrackedResponses {
    fn responded(&self, session: &EmergencySession, registry: &DeviceRegistry) -> usize {
        session.responders().filter(|id| registry.contains(*id)).count()
    }
}

/// Registered devices the threshold is measured against.
pub fn population(session: &EmergencySession, registry: &DeviceRegistry) -> usize {
    let owner: Option<DeviceId> = session.owner().and_then(|o| o.device());
    match owner {
        Some(id) if registry.contains(id) => registry.len() - 1,
        _ => registry.len(),
    }
}

/// `true` once `responded / population >= ratio`.  An empty population is
/// satisfied immediately.
pub fn threshold_met(responded: usize, population: usize, ratio: f64) -> bool {
    if population == 0 {
        return true;
    }
    responded as f64 >= ratio * population as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RoundRobinPlacement, DEFAULT_LANE_HEIGHT};
    use crate::emergency::{SessionOwner, TriggerSource};
    use std::time::Instant;

    fn road(n: usize) -> (DeviceRegistry, Vec<DeviceId>) {
        let mut reg = DeviceRegistry::new(Box::new(RoundRobinPlacement::new()), DEFAULT_LANE_HEIGHT);
        let ids = (0..n).map(|_| reg.register(None)).collect();
        (reg, ids)
    }

    #[test]
    fn test_population_excludes_owner() {
        let (mut reg, ids) = road(4);
        let mut session = EmergencySession::new();
        session
            .activate(SessionOwner::Device(ids[0]), TriggerSource::Vehicle, &mut reg, Instant::now())
            .unwrap();
        assert_eq!(population(&session, &reg), 3);
    }

    #[test]
    fn test_population_counts_everyone_for_hardware_owner() {
        let (mut reg, _) = road(4);
        let mut session = EmergencySession::new();
        session
            .activate(SessionOwner::Hardware, TriggerSource::Button, &mut reg, Instant::now())
            .unwrap();
        assert_eq!(population(&session, &reg), 4);
    }

    #[test]
    fn test_assume_all_matches_population() {
        let (mut reg, ids) = road(3);
        let mut session = EmergencySession::new();
        session
            .activate(SessionOwner::Device(ids[0]), TriggerSource::Vehicle, &mut reg, Instant::now())
            .unwrap();
        assert_eq!(AssumeAllResponded.responded(&session, &reg), 2);
    }

    #[test]
    fn test_tracked_ignores_responders_that_left() {
        // Arrange
        let (mut reg, ids) = road(4);
        let mut session = EmergencySession::new();
        session
            .activate(SessionOwner::Device(ids[0]), TriggerSource::Vehicle, &mut reg, Instant::now())
            .unwrap();
        session.record_response(ids[1]);
        session.record_response(ids[2]);

        // Act
        reg.unregister(ids[2]);

        // Assert
        assert_eq!(TrackedResponses.responded(&session, &reg), 1);
    }

    #[test]
    fn test_threshold_at_eighty_percent() {
        assert!(!threshold_met(3, 4, DEFAULT_RESPONSE_THRESHOLD));
        assert!(threshold_met(4, 5, DEFAULT_RESPONSE_THRESHOLD));
        assert!(threshold_met(0, 0, DEFAULT_RESPONSE_THRESHOLD));
    }

    #[test]
    fn test_mock_tracker_can_stand_in_for_monitor() {
        let (reg, _) = road(5);
        let session = EmergencySession::new();
        let mut tracker = MockAckTracker::new();
        tracker.expect_responded().times(1).return_const(4usize);

        let responded = tracker.responded(&session, &reg);

        assert!(threshold_met(responded, population(&session, &reg), DEFAULT_RESPONSE_THRESHOLD));
    }
}
