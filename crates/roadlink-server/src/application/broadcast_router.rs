//! BroadcastRouter: identity → outbound channel bookkeeping and fan-out.
//!
//! The router owns one [`ConnectionHandle`] per attached device.  It never
//! blocks and never awaits: a handle accepts a frame immediately or fails.
//!
//! Fan-out is split in two so the caller can drop its lock in between:
//!
//! 1. [`BroadcastRouter::recipients`] copies the handles under the lock.
//! 2. [`fan_out`] delivers to each copy without any lock held and returns
//!    the identities whose delivery failed.
//!
//! The caller then detaches the failures in a separate step, so the
//! connection set is never mutated while it is being iterated.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use roadlink_core::DeviceId;

/// Why a frame could not be queued for one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("connection outbox is closed")]
    Closed,
    #[error("connection outbox is full")]
    Full,
}

/// Send capability for one connection.
///
/// Implementations must not block.  Frames accepted by one outbox are written
/// to the peer in the order they were accepted.
#[cfg_attr(test, mockall::automock)]
pub trait Outbox: Send + Sync {
    fn try_deliver(&self, frame: Arc<String>) -> Result<(), DeliveryError>;
}

/// A bounded channel drained by the connection's single writer task.
impl Outbox for mpsc::Sender<Arc<String>> {
    fn try_deliver(&self, frame: Arc<String>) -> Result<(), DeliveryError> {
        self.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

pub type ConnectionHandle = Arc<dyn Outbox>;

/// Attached connections, keyed by device identity.
#[derive(Default)]
pub struct BroadcastRouter {
    connections: HashMap<DeviceId, ConnectionHandle>,
}

impl BroadcastRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `handle` for `device_id`, replacing any previous handle.
    pub fn attach(&mut self, device_id: DeviceId, handle: ConnectionHandle) {
        self.connections.insert(device_id, handle);
    }

    /// Detaches `device_id`.  Returns whether it was attached.
    pub fn detach(&mut self, device_id: DeviceId) -> bool {
        self.connections.remove(&device_id).is_some()
    }

    pub fn contains(&self, device_id: DeviceId) -> bool {
        self.connections.contains_key(&device_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn handle(&self, device_id: DeviceId) -> Option<ConnectionHandle> {
        self.connections.get(&device_id).cloned()
    }

    /// Copies every attached handle except `exclude`.
    pub fn recipients(&self, exclude: Option<DeviceId>) -> Vec<(DeviceId, ConnectionHandle)> {
        self.connections
            .iter()
            .filter(|(id, _)| Some(**id) != exclude)
            .map(|(id, handle)| (*id, Arc::clone(handle)))
            .collect()
    }
}

/// Delivers `frame` to every recipient and returns the identities that failed.
///
/// One failure never stops delivery to the rest.
pub fn fan_out(recipients: &[(DeviceId, ConnectionHandle)], frame: &Arc<String>) -> Vec<DeviceId> {
    let mut failed = Vec::new();
    for (device_id, handle) in recipients {
        if let Err(e) = handle.try_deliver(Arc::clone(frame)) {
            debug!(%device_id, error = %e, "delivery failed");
            failed.push(*device_id);
        }
    }
    failed
}

// ── Tests ─────────────────────────────────────────────────────────────────────
