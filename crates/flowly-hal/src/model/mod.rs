// ── Domain primitives shared across the fabric seam ──

mod eth;
mod flow;
mod intf;

pub use eth::{EthAddr, ParseEthAddrError};
pub use flow::{
    ActionSet, FlowAction, FlowEntry, FlowMatch, FlowState, FlowStatus, MatchFieldSet,
    RejectReason, ValidationError,
};
pub use intf::{IntfId, OperStatus};
