//! The emergency session state machine and its acknowledgement seam.

pub mod ack;
pub mod session;

pub use ack::{population, threshold_met, AckTracker, AssumeAllResponded, TrackedResponses, DEFAULT_RESPONSE_THRESHOLD};
pub use session::{
    lane_table_numbers, target_lanes, Activation, ClearCause, Clearance, EmergencyError, EmergencySession,
    EmergencyState, EmergencyStatus, SessionOwner, TriggerSource, UnknownTriggerSource,
};
