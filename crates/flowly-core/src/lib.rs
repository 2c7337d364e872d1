// flowly-core: Agent framework between flowly-hal and consumers (CLI, daemons).

pub mod config;
pub mod control;
pub mod error;
pub mod handler;
pub mod runtime;
pub mod status;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::AgentConfig;
pub use control::{ControlCommand, ControlEndpoint, ProtocolParseError, parse_line};
pub use error::CoreError;
pub use handler::{AgentHandler, FaultRecord, FlowHandler, HandlerError, IntfHandler};
pub use runtime::{Agent, AgentContext, Lifecycle};
pub use status::StatusRegistry;
pub use store::{FlowRecord, FlowTable, IntfState, IntfTable};

// Re-export the hal primitives at the crate root for ergonomics.
pub use flowly_hal::{
    ActionSet, EthAddr, FabricLink, FlowAction, FlowEntry, FlowMatch, FlowState, FlowStatus,
    IntfId, MatchFieldSet, OperStatus, RejectReason, ValidationError,
};
