//! Integration tests for the registry and emergency session working together
//! through the public API.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use roadlink_core::domain::{DeviceRegistry, RoundRobinPlacement, DEFAULT_LANE_HEIGHT};
use roadlink_core::emergency::{
    population, threshold_met, AckTracker, ClearCause, EmergencyError, EmergencySession, EmergencyState,
    SessionOwner, TrackedResponses, TriggerSource, DEFAULT_RESPONSE_THRESHOLD,
};
use roadlink_core::{DeviceId, Lane};

struct Road {
    registry: DeviceRegistry,
    session: EmergencySession,
}

fn road() -> Road {
    Road {
        registry: DeviceRegistry::new(Box::new(RoundRobinPlacement::new()), DEFAULT_LANE_HEIGHT),
        session: EmergencySession::new(),
    }
}

#[test]
fn test_identities_are_pairwise_distinct_across_churn() {
    let mut road = road();
    let mut seen = HashSet::new();
    for round in 0..50 {
        let id = road.registry.register(None);
        assert!(seen.insert(id), "identity reused in round {round}");
        if round % 3 == 0 {
            road.registry.unregister(id);
        }
    }
}

#[test]
fn test_concurrent_activation_admits_exactly_one_owner() {
    // Arrange: 16 devices race to activate under one lock.
    let mut initial = road();
    let ids: Vec<DeviceId> = (0..16).map(|_| initial.registry.register(None)).collect();
    let shared = Arc::new(Mutex::new(initial));

    // Act
    let handles: Vec<_> = ids
        .iter()
        .map(|&id| {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                let mut guard = shared.lock().unwrap();
                let Road { registry, session } = &mut *guard;
                session
                    .activate(SessionOwner::Device(id), TriggerSource::Vehicle, registry, Instant::now())
                    .is_ok()
            })
        })
        .collect();
    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();

    // Assert
    assert_eq!(successes, 1);
    let guard = shared.lock().unwrap();
    assert_eq!(guard.session.state(), EmergencyState::EmergencyActive);
    let owner = guard.session.owner().and_then(|o| o.device()).unwrap();
    assert!(ids.contains(&owner));
    assert_eq!(guard.registry.emergency_devices(), vec![owner]);
}

#[test]
fn test_owner_leaving_forces_normal() {
    let mut road = road();
    let a = road.registry.register(None);
    let b = road.registry.register(None);
    road.session
        .activate(SessionOwner::Device(a), TriggerSource::Vehicle, &mut road.registry, Instant::now())
        .unwrap();

    road.registry.unregister(a);
    let clearance = road.session.release_device(a, &mut road.registry).unwrap();

    assert_eq!(clearance.cause, ClearCause::OwnerVanished);
    assert_eq!(road.session.state(), EmergencyState::Normal);
    assert!(road.session.can_activate(SessionOwner::Device(b), &road.registry));
}

#[test]
fn test_rejections_leave_state_untouched() {
    let mut road = road();
    let a = road.registry.register(None);
    let b = road.registry.register(None);
    road.session
        .activate(SessionOwner::Device(a), TriggerSource::Vehicle, &mut road.registry, Instant::now())
        .unwrap();

    let second = road.session.activate(SessionOwner::Hardware, TriggerSource::Radio, &mut road.registry, Instant::now());
    let foreign_clear = road.session.deactivate(SessionOwner::Device(b), &mut road.registry);
    let hardware_clear = road.session.deactivate(SessionOwner::Hardware, &mut road.registry);

    assert!(matches!(second, Err(EmergencyError::AlreadyActive(_))));
    assert!(matches!(foreign_clear, Err(EmergencyError::NotOwner { .. })));
    assert!(matches!(hardware_clear, Err(EmergencyError::NotOwner { .. })));
    assert_eq!(road.session.owner(), Some(SessionOwner::Device(a)));
    assert_eq!(road.session.state(), EmergencyState::EmergencyActive);
}

#[test]
fn test_tracked_responses_reach_threshold() {
    // Arrange: owner plus five responders.
    let mut road = road();
    let owner = road.registry.register(None);
    let others: Vec<DeviceId> = (0..5).map(|_| road.registry.register(None)).collect();
    road.session
        .activate(SessionOwner::Device(owner), TriggerSource::Vehicle, &mut road.registry, Instant::now())
        .unwrap();
    let pop = population(&road.session, &road.registry);

    // Act / Assert
    for (i, id) in others.iter().enumerate() {
        road.registry.update_lane(*id, Lane::Right, "emergency");
        road.session.record_response(*id);
        let responded = TrackedResponses.responded(&road.session, &road.registry);
        assert_eq!(responded, i + 1);
        assert_eq!(threshold_met(responded, pop, DEFAULT_RESPONSE_THRESHOLD), i + 1 >= 4);
    }
}
