//! JSON envelopes exchanged between devices and the server.
//!
//! Every envelope is a JSON object with a `"type"` field naming the variant;
//! the remaining fields sit next to it in the same object:
//!
//! ```json
//! {"type":"lane_change","device_id":"…","new_lane":3,"reason":"emergency"}
//! ```
//!
//! Inbound and outbound directions use separate enums.  A device can never
//! send a `welcome`, and the server never needs to parse one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Device, DeviceId, Lane, RoadSummary, VehicleClass};
use crate::emergency::{
    lane_table_numbers, Activation, Clearance, EmergencyState, EmergencyStatus, SessionOwner, TriggerSource,
};

pub const EMERGENCY_SIGNAL_TEXT: &str = "Emergency vehicle approaching - clear path immediately";
pub const EMERGENCY_CLEARED_TEXT: &str = "Emergency vehicle passed - resume normal operation";

// ── Device → Server ───────────────────────────────────────────────────────────

/// Position payload of an inbound `position_update`.  Missing coordinates
/// default to zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PositionPayload {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

/// What a vehicle reports back during an emergency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    EmergencyAcknowledged,
    LaneChangeCompleted,
    #[serde(other)]
    Other,
}

/// Every envelope a device may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMsg {
    /// Also accepted under the outbound `emergency_signal` tag.
    #[serde(alias = "emergency_signal")]
    RegisterEmergency,
    ClearEmergency,
    PositionUpdate {
        #[serde(default)]
        position: PositionPayload,
    },
    LaneChange {
        new_lane: Lane,
        #[serde(default = "default_reason")]
        reason: String,
    },
    Ping,
    GetSystemState,
    EmergencyResponse {
        response_type: ResponseKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    DeviceInfo {
        #[serde(default)]
        info: Value,
    },
    /// Any tag this server does not understand.
    #[serde(other)]
    Unknown,
}

fn default_reason() -> String {
    "manual".to_string()
}

impl InboundMsg {
    /// Wire tag, for logging.
    pub fn tag(&self) -> &'static str {
        match self {
            InboundMsg::RegisterEmergency => "register_emergency",
            InboundMsg::ClearEmergency => "clear_emergency",
            InboundMsg::PositionUpdate { .. } => "position_update",
            InboundMsg::LaneChange { .. } => "lane_change",
            InboundMsg::Ping => "ping",
            InboundMsg::GetSystemState => "get_system_state",
            InboundMsg::EmergencyResponse { .. } => "emergency_response",
            InboundMsg::DeviceInfo { .. } => "device_info",
            InboundMsg::Unknown => "unknown",
        }
    }
}

// ── Server → Device ───────────────────────────────────────────────────────────

/// Every envelope the server may send.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMsg {
    /// First envelope on every connection.
    Welcome {
        device_id: DeviceId,
        vehicle_type: VehicleClass,
        message: String,
    },
    /// Full-state sync: sent after `welcome` and on `get_system_state`.
    SystemState {
        devices: BTreeMap<DeviceId, Device>,
        emergency_status: EmergencyStatus,
        road_state: RoadSummary,
    },
    EmergencySignal {
        device_id: SessionOwner,
        source: TriggerSource,
        state: EmergencyState,
        message: String,
        target_lanes: BTreeMap<u8, u8>,
        timestamp: f64,
    },
    EmergencyCleared {
        device_id: SessionOwner,
        source: TriggerSource,
        state: EmergencyState,
        message: String,
        timestamp: f64,
    },
    /// Sent to the requester only, never broadcast.
    EmergencyRejected {
        device_id: DeviceId,
        reason: String,
    },
    PositionUpdate {
        device_id: DeviceId,
        position: Device,
    },
    LaneChange {
        device_id: DeviceId,
        old_lane: Lane,
        new_lane: Lane,
        reason: String,
    },
    DeviceInfo {
        device_id: DeviceId,
        info: Value,
    },
    Pong {
        timestamp: f64,
    },
}

impl OutboundMsg {
    pub fn welcome(device: &Device) -> Self {
        OutboundMsg::Welcome {
            device_id: device.device_id,
            vehicle_type: device.class,
            message: format!("Device {} connected successfully", device.device_id),
        }
    }

    pub fn system_state(devices: Vec<Device>, emergency_status: EmergencyStatus, road_state: RoadSummary) -> Self {
        OutboundMsg::SystemState {
            devices: devices.into_iter().map(|d| (d.device_id, d)).collect(),
            emergency_status,
            road_state,
        }
    }

    pub fn emergency_signal(activation: &Activation, timestamp: f64) -> Self {
        OutboundMsg::EmergencySignal {
            device_id: activation.owner,
            source: activation.source,
            state: EmergencyState::EmergencyActive,
            message: EMERGENCY_SIGNAL_TEXT.to_string(),
            target_lanes: lane_table_numbers(&activation.target_lanes),
            timestamp,
        }
    }

    pub fn emergency_cleared(clearance: &Clearance, timestamp: f64) -> Self {
        OutboundMsg::EmergencyCleared {
            device_id: clearance.owner,
            source: clearance.source,
            state: EmergencyState::Normal,
            message: EMERGENCY_CLEARED_TEXT.to_string(),
            timestamp,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            OutboundMsg::Welcome { .. } => "welcome",
            OutboundMsg::SystemState { .. } => "system_state",
            OutboundMsg::EmergencySignal { .. } => "emergency_signal",
            OutboundMsg::EmergencyCleared { .. } => "emergency_cleared",
            OutboundMsg::EmergencyRejected { .. } => "emergency_rejected",
            OutboundMsg::PositionUpdate { .. } => "position_update",
            OutboundMsg::LaneChange { .. } => "lane_change",
            OutboundMsg::DeviceInfo { .. } => "device_info",
            OutboundMsg::Pong { .. } => "pong",
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
