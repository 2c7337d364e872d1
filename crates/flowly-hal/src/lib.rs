// flowly-hal: Boundary between the agent framework and the forwarding plane.
//
// Defines the domain primitives that cross the fabric seam (interfaces,
// flow match/action/entry, programming acks), the message contract a
// runtime uses to talk to a forwarding plane, and `SimFabric`, an
// in-process backend for tests and local runs.

pub mod link;
pub mod model;
pub mod sim;

// ── Primary re-exports ──────────────────────────────────────────────
pub use link::{FabricLink, FabricRequest, FabricUpdate};
pub use model::{
    ActionSet, EthAddr, FlowAction, FlowEntry, FlowMatch, FlowState, FlowStatus, IntfId,
    MatchFieldSet, OperStatus, RejectReason, ValidationError,
};
pub use sim::{SimConfig, SimFabric, SimHandle};
