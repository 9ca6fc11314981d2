//! Rendering of server envelopes and the optional auto-yield reaction.

use serde_json::Value;

use roadlink_core::domain::Lane;
use roadlink_core::protocol::{InboundMsg, ResponseKind};

/// One human-readable line for a server envelope.
pub fn summarize(msg: &Value) -> String {
    let field = |name: &str| -> String {
        match &msg[name] {
            Value::String(s) => s.clone(),
            Value::Null => "-".to_string(),
            other => other.to_string(),
        }
    };

    match msg["type"].as_str().unwrap_or("") {
        "welcome" => format!("connected as {} ({})", field("device_id"), field("vehicle_type")),
        "system_state" => {
            let vehicles = msg["road_state"]["total_vehicles"].as_u64().unwrap_or(0);
            let status = &msg["emergency_status"];
            format!(
                "road: {vehicles} vehicle(s), emergency {} (owner {})",
                status["state"].as_str().unwrap_or("?"),
                status["active_emergency_device"].as_str().unwrap_or("-"),
            )
        }
        "emergency_signal" => format!(
            "EMERGENCY from {} via {}: {}",
            field("device_id"),
            field("source"),
            field("message")
        ),
        "emergency_cleared" => format!("cleared by {}: {}", field("device_id"), field("message")),
        "emergency_rejected" => format!("request rejected: {}", field("reason")),
        "position_update" => {
            let p = &msg["position"];
            format!(
                "{} at ({}, {}) lane {}",
                field("device_id"),
                p["position_x"],
                p["position_y"],
                p["current_lane"]
            )
        }
        "lane_change" => format!(
            "{} lane {} -> {} ({})",
            field("device_id"),
            field("old_lane"),
            field("new_lane"),
            field("reason")
        ),
        "device_info" => format!("{} info {}", field("device_id"), msg["info"]),
        "pong" => format!("pong {}", field("timestamp")),
        "" => format!("untyped envelope {msg}"),
        other => format!("{other}: {msg}"),
    }
}

/// What a yielding vehicle sends when another vehicle's emergency starts:
/// move to the rightmost lane, then acknowledge.
pub fn yield_to(msg: &Value, own_id: Option<&str>) -> Vec<InboundMsg> {
    if msg["type"] != "emergency_signal" {
        return Vec::new();
    }
    if own_id.is_some() && msg["device_id"].as_str() == own_id {
        return Vec::new();
    }
    vec![
        InboundMsg::LaneChange {
            new_lane: Lane::RIGHTMOST,
            reason: "emergency".to_string(),
        },
        InboundMsg::EmergencyResponse {
            response_type: ResponseKind::EmergencyAcknowledged,
            data: None,
        },
    ]
}

// ── Tests ─────────────────────────────────────────────────────────────────────
