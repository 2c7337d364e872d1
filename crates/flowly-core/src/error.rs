// ── Core error types ──
//
// Synchronous failures returned to callers of the agent API. Parse
// errors live in `control` (they are diagnostics, not API results) and
// handler faults in `handler` (they are logged, never returned).

use thiserror::Error;

use flowly_hal::{IntfId, ValidationError};

use crate::runtime::Lifecycle;

/// Unified error type for agent operations.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Store errors ─────────────────────────────────────────────────
    #[error("invalid flow entry '{name}': {source}")]
    InvalidEntry {
        name: String,
        #[source]
        source: ValidationError,
    },

    #[error("no flow entry named '{name}'")]
    FlowNotFound { name: String },

    #[error("unknown interface '{intf}'")]
    UnknownIntf { intf: IntfId },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("operation '{operation}' is not valid while the agent is {state}")]
    NotReady {
        operation: &'static str,
        state: Lifecycle,
    },

    #[error("agent already started")]
    AlreadyStarted,

    #[error("agent event loop has stopped")]
    AgentStopped,

    // ── Fabric errors ────────────────────────────────────────────────
    #[error("fabric unavailable: {reason}")]
    FabricUnavailable { reason: String },
}
