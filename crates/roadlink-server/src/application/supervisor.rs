//! ConnectionSupervisor: per-connection join, dispatch and leave.
//!
//! The supervisor is transport-agnostic.  The WebSocket layer hands it text
//! frames; it decodes them and routes each envelope to the registry or the
//! coordinator, then notifies peers through the router.
//!
//! | Tag                  | Action                                                  |
//! |----------------------|---------------------------------------------------------|
//! | `register_emergency` | check, then activate; rejection goes to requester only  |
//! | `emergency_signal`   | same as `register_emergency`                            |
//! | `clear_emergency`    | deactivate; rejection goes to requester only            |
//! | `position_update`    | update registry, broadcast device to everyone else      |
//! | `lane_change`        | update registry, broadcast change to everyone else      |
//! | `ping`               | `pong` to requester                                     |
//! | `get_system_state`   | full snapshot to requester                              |
//! | `emergency_response` | record as a response to the current session             |
//! | `device_info`        | relay to everyone else                                  |
//! | anything else        | ignored                                                 |
//!
//! Dropping the supervisor runs the leave path, so cleanup happens on every
//! exit route including task cancellation.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use roadlink_core::domain::{Device, DeviceId, Lane, VehicleClass};
use roadlink_core::emergency::{EmergencyError, SessionOwner, TriggerSource};
use roadlink_core::protocol::{
    decode_inbound, unix_timestamp, InboundMsg, OutboundMsg, PositionPayload, ResponseKind,
};

use super::broadcast_router::ConnectionHandle;
use super::coordinator::EmergencyCoordinator;
use super::state::RoadState;

pub struct ConnectionSupervisor {
    device_id: DeviceId,
    class: VehicleClass,
    coordinator: Arc<EmergencyCoordinator>,
}

impl ConnectionSupervisor {
    /// Registers the device, attaches `outbox`, and queues `welcome` followed
    /// by a full `system_state`.
    pub fn join(
        coordinator: Arc<EmergencyCoordinator>,
        class_hint: Option<VehicleClass>,
        outbox: ConnectionHandle,
    ) -> Self {
        let device = coordinator.road().join(class_hint, outbox);
        info!(device_id = %device.device_id, class = %device.class, "device joined");
        Self {
            device_id: device.device_id,
            class: device.class,
            coordinator,
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn class(&self) -> VehicleClass {
        self.class
    }

    fn road(&self) -> &RoadState {
        self.coordinator.road()
    }

    fn reply(&self, msg: &OutboundMsg) {
        self.road().send_to(self.device_id, msg);
    }

    /// Decodes and dispatches one text frame.  Malformed frames are dropped.
    pub fn handle_text(&self, text: &str) {
        let envelope = match decode_inbound(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(device_id = %self.device_id, error = %e, "dropping malformed envelope");
                return;
            }
        };
        if let Some(claimed) = envelope.device_id.as_deref() {
            if DeviceId::parse(claimed) != Some(self.device_id) {
                warn!(
                    device_id = %self.device_id,
                    claimed,
                    tag = envelope.msg.tag(),
                    "envelope names another device; ignored"
                );
                return;
            }
        }
        self.dispatch(envelope.msg);
    }

    pub fn dispatch(&self, msg: InboundMsg) {
        debug!(device_id = %self.device_id, tag = msg.tag(), "dispatch");
        match msg {
            InboundMsg::RegisterEmergency => self.register_emergency(),
            InboundMsg::ClearEmergency => self.clear_emergency(),
            InboundMsg::PositionUpdate { position } => self.position_update(position),
            InboundMsg::LaneChange { new_lane, reason } => self.lane_change(new_lane, &reason),
            InboundMsg::Ping => self.reply(&OutboundMsg::Pong {
                timestamp: unix_timestamp(),
            }),
            InboundMsg::GetSystemState => self.reply(&self.road().system_state()),
            InboundMsg::EmergencyResponse { response_type, .. } => self.emergency_response(response_type),
            InboundMsg::DeviceInfo { info } => self.device_info(info),
            InboundMsg::Unknown => debug!(device_id = %self.device_id, "unknown envelope ignored"),
        }
    }

    fn register_emergency(&self) {
        let owner = SessionOwner::Device(self.device_id);
        let result = self
            .coordinator
            .check_activation(owner)
            .and_then(|()| self.coordinator.activate(owner, TriggerSource::Vehicle));
        if let Err(e) = result {
            self.reject(e);
        }
    }

    fn clear_emergency(&self) {
        if let Err(e) = self.coordinator.deactivate(SessionOwner::Device(self.device_id)) {
            self.reject(e);
        }
    }

    fn reject(&self, error: EmergencyError) {
        debug!(device_id = %self.device_id, %error, "emergency request rejected");
        self.reply(&OutboundMsg::EmergencyRejected {
            device_id: self.device_id,
            reason: error.to_string(),
        });
    }

    fn position_update(&self, position: PositionPayload) {
        self.road().with(|s| {
            let updated: Option<Device> = s
                .registry
                .update_position(self.device_id, position.x, position.y, position.speed)
                .cloned();
            if let Some(device) = updated {
                s.broadcast(
                    &OutboundMsg::PositionUpdate {
                        device_id: self.device_id,
                        position: device,
                    },
                    Some(self.device_id),
                );
            }
        });
    }

    fn lane_change(&self, lane: Lane, reason: &str) {
        self.road().with(|s| {
            if let Some(change) = s.registry.update_lane(self.device_id, lane, reason) {
                s.broadcast(
                    &OutboundMsg::LaneChange {
                        device_id: change.device_id,
                        old_lane: change.old_lane,
                        new_lane: change.new_lane,
                        reason: change.reason,
                    },
                    Some(self.device_id),
                );
            }
        });
    }

    fn emergency_response(&self, kind: ResponseKind) {
        match kind {
            ResponseKind::EmergencyAcknowledged | ResponseKind::LaneChangeCompleted => {
                if self.coordinator.record_response(self.device_id) {
                    info!(device_id = %self.device_id, ?kind, "vehicle responded to emergency");
                }
            }
            ResponseKind::Other => debug!(device_id = %self.device_id, "unrecognised response type ignored"),
        }
    }

    fn device_info(&self, info: Value) {
        self.road().broadcast(
            &OutboundMsg::DeviceInfo {
                device_id: self.device_id,
                info,
            },
            Some(self.device_id),
        );
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        info!(device_id = %self.device_id, "device leaving");
        self.coordinator.release(self.device_id);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
