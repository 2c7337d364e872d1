// ── Fabric link contract ──
//
// The runtime and the forwarding plane talk exclusively through a
// bounded channel pair. Requests flow toward the fabric, updates flow
// back; nothing on either side touches the other's state directly, so
// all agent-side mutation stays on the runtime's event loop task.

use tokio::sync::mpsc;

use crate::model::{FlowEntry, FlowStatus, IntfId, OperStatus};

/// A programming request posted by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FabricRequest {
    /// Install or replace the entry under its name.
    Install(FlowEntry),
    /// Remove the entry with the given name.
    Remove { name: String },
}

/// An update posted by the fabric into the runtime's queue.
///
/// On link establishment a backend sends `IntfSnapshot`, then
/// `FlowSnapshot` (possibly empty), then `Synced`; after that it sends
/// acks and status transitions as they happen. Updates from one fabric
/// arrive in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FabricUpdate {
    /// All interfaces known to the device and their current status.
    IntfSnapshot(Vec<(IntfId, OperStatus)>),
    /// Flow entries already programmed before the agent attached.
    FlowSnapshot(Vec<FlowEntry>),
    /// Initial synchronization is complete.
    Synced,
    /// Acknowledgment for an install/remove, or a later state change.
    FlowAck(FlowStatus),
    /// An interface's operational status changed.
    OperStatus { intf: IntfId, state: OperStatus },
    /// The fabric connection is gone; no further updates will arrive.
    Closed,
}

/// The runtime's end of a fabric connection.
#[derive(Debug)]
pub struct FabricLink {
    pub requests: mpsc::Sender<FabricRequest>,
    pub updates: mpsc::Receiver<FabricUpdate>,
}

/// The backend's end of a fabric connection.
#[derive(Debug)]
pub struct FabricEndpoint {
    pub requests: mpsc::Receiver<FabricRequest>,
    pub updates: mpsc::Sender<FabricUpdate>,
}

impl FabricLink {
    /// Create a connected link/endpoint pair with the given capacities.
    pub fn channel(request_capacity: usize, update_capacity: usize) -> (Self, FabricEndpoint) {
        let (req_tx, req_rx) = mpsc::channel(request_capacity);
        let (upd_tx, upd_rx) = mpsc::channel(update_capacity);

        (
            Self {
                requests: req_tx,
                updates: upd_rx,
            },
            FabricEndpoint {
                requests: req_rx,
                updates: upd_tx,
            },
        )
    }
}
