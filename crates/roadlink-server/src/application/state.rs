//! Shared road state: registry, router and emergency session behind one lock.
//!
//! Every mutation of shared state runs inside [`RoadState::with`], which holds
//! a single `std::sync::Mutex` for the duration of a synchronous closure.
//! Nothing awaits while the lock is held.  Two consequences:
//!
//! - Activation is one atomic check-and-set; two connections can never both
//!   observe `Normal` and both activate.
//! - A device and its connection handle are added and removed together, so
//!   the registry and router always agree on who is present.
//!
//! Frames are queued in the same critical section as the change they
//! announce.  Queuing is a non-blocking `try_deliver` into each outbox, and
//! the actual socket writes happen later on each connection's writer task.
//! Every outbox therefore sees events in the order they were committed.
//!
//! Recipients whose outbox rejects a frame are purged after the pass.
//! Purging is the same leave path as a disconnect, including the forced clear
//! when that recipient owned the emergency session.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use roadlink_core::domain::{Device, DeviceId, DeviceRegistry, VehicleClass};
use roadlink_core::emergency::{Clearance, EmergencySession};
use roadlink_core::protocol::{encode_outbound, unix_timestamp, OutboundMsg};

use super::broadcast_router::{fan_out, BroadcastRouter, ConnectionHandle};

/// Everything guarded by the road lock.
pub struct Shared {
    pub registry: DeviceRegistry,
    pub router: BroadcastRouter,
    pub session: EmergencySession,
}

impl Shared {
    /// Registers a device, attaches its handle, and queues `welcome`
    /// followed by a full `system_state` ahead of any later broadcast.
    pub fn join(&mut self, class_hint: Option<VehicleClass>, handle: ConnectionHandle) -> Device {
        let device = self.registry.register_device(class_hint).clone();
        self.router.attach(device.device_id, handle);
        if self.send_to(device.device_id, &OutboundMsg::welcome(&device)) {
            let snapshot = self.system_state();
            self.send_to(device.device_id, &snapshot);
        }
        device
    }

    /// Removes a device from the registry and router together, and closes the
    /// emergency session if the device owned it.
    ///
    /// The caller is responsible for announcing the returned clearance.
    pub fn leave(&mut self, device_id: DeviceId) -> Option<Clearance> {
        let removed = self.registry.unregister(device_id).is_some();
        let detached = self.router.detach(device_id);
        if removed || detached {
            debug!(%device_id, "device left the road");
        }
        self.session.release_device(device_id, &mut self.registry)
    }

    pub fn system_state(&self) -> OutboundMsg {
        OutboundMsg::system_state(
            self.registry.snapshot(),
            self.session.status(Instant::now()),
            self.registry.road_summary(),
        )
    }

    /// Queues `emergency_cleared` for `clearance` on every connection.
    pub fn announce_clearance(&mut self, clearance: &Clearance) {
        self.broadcast(&OutboundMsg::emergency_cleared(clearance, unix_timestamp()), None);
    }

    /// Queues `msg` on every attached connection except `exclude`.
    pub fn broadcast(&mut self, msg: &OutboundMsg, exclude: Option<DeviceId>) {
        let Some(frame) = encode(msg) else { return };
        self.broadcast_frame(msg.tag(), &frame, exclude);
    }

    fn broadcast_frame(&mut self, tag: &str, frame: &Arc<String>, exclude: Option<DeviceId>) {
        let recipients = self.router.recipients(exclude);
        let failed = fan_out(&recipients, frame);
        debug!(tag, recipients = recipients.len(), failed = failed.len(), "broadcast");
        self.purge(failed);
    }

    /// Queues `msg` on one connection.  A failed send detaches it.
    pub fn send_to(&mut self, device_id: DeviceId, msg: &OutboundMsg) -> bool {
        let Some(handle) = self.router.handle(device_id) else {
            debug!(%device_id, tag = msg.tag(), "send to detached device skipped");
            return false;
        };
        let Some(frame) = encode(msg) else { return false };
        match handle.try_deliver(frame) {
            Ok(()) => true,
            Err(e) => {
                warn!(%device_id, tag = msg.tag(), error = %e, "send failed; detaching");
                self.purge(vec![device_id]);
                false
            }
        }
    }

    /// Detaches dead recipients.  A purge that clears the emergency session
    /// announces the clearance, which may in turn find more dead recipients;
    /// those are handled in the same loop rather than by recursion.
    fn purge(&mut self, mut dead: Vec<DeviceId>) {
        while let Some(device_id) = dead.pop() {
            let Some(clearance) = self.leave(device_id) else { continue };
            info!(owner = %clearance.owner, "emergency owner unreachable; session cleared");
            let msg = OutboundMsg::emergency_cleared(&clearance, unix_timestamp());
            let Some(frame) = encode(&msg) else { continue };
            dead.extend(fan_out(&self.router.recipients(None), &frame));
        }
    }
}

/// The single serialization point for all shared mutable state.
pub struct RoadState {
    shared: Mutex<Shared>,
}

impl RoadState {
    pub fn new(registry: DeviceRegistry) -> Self {
        Self {
            shared: Mutex::new(Shared {
                registry,
                router: BroadcastRouter::new(),
                session: EmergencySession::new(),
            }),
        }
    }

    /// Runs `f` with exclusive access to the shared state.
    ///
    /// `f` must not block or await.  A poisoned lock is recovered: every
    /// mutation leaves the state consistent before it can panic.
    pub fn with<R>(&self, f: impl FnOnce(&mut Shared) -> R) -> R {
        let mut guard = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// See [`Shared::join`].
    pub fn join(&self, class_hint: Option<VehicleClass>, handle: ConnectionHandle) -> Device {
        self.with(|s| s.join(class_hint, handle))
    }

    /// Runs the leave path for `device_id` and announces a forced clear.
    pub fn leave(&self, device_id: DeviceId) {
        self.with(|s| {
            if let Some(clearance) = s.leave(device_id) {
                warn!(%device_id, "emergency owner left; session cleared");
                s.announce_clearance(&clearance);
            }
        });
    }

    pub fn system_state(&self) -> OutboundMsg {
        self.with(|s| s.system_state())
    }

    /// Sends `msg` to every attached connection except `exclude`.
    pub fn broadcast(&self, msg: &OutboundMsg, exclude: Option<DeviceId>) {
        let Some(frame) = encode(msg) else { return };
        self.with(|s| s.broadcast_frame(msg.tag(), &frame, exclude));
    }

    /// Sends `msg` to one connection.  A failed send detaches it.
    pub fn send_to(&self, device_id: DeviceId, msg: &OutboundMsg) -> bool {
        self.with(|s| s.send_to(device_id, msg))
    }
}

fn encode(msg: &OutboundMsg) -> Option<Arc<String>> {
    match encode_outbound(msg) {
        Ok(text) => Some(Arc::new(text)),
        Err(e) => {
            error!(tag = msg.tag(), error = %e, "failed to serialize envelope");
            None
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
