// ── Handler contract ──
//
// Three independent callback capabilities, registered by composition:
// an implementation provides only the traits it cares about, and a
// single type may implement any combination. The runtime invokes
// callbacks one at a time from the event loop; a returned error is a
// handler fault -- logged with the event context, recorded in a
// bounded ring for offline inspection, and never allowed to take the
// loop down.

use chrono::{DateTime, Utc};
use thiserror::Error;

use flowly_hal::{FlowState, IntfId, OperStatus};

use crate::error::CoreError;
use crate::runtime::AgentContext;

// ── HandlerError ────────────────────────────────────────────────────

/// A failure escaping a handler callback.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// Lets handler code use `?` on agent operations.
impl From<CoreError> for HandlerError {
    fn from(err: CoreError) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

// ── Callback traits ─────────────────────────────────────────────────

/// Agent lifecycle notifications.
pub trait AgentHandler: Send {
    /// Called exactly once, after all externally-sourced state
    /// (interfaces, pre-existing flow entries) has been delivered.
    /// Mutating operations are valid from this point on.
    fn on_initialized(&mut self, ctx: &AgentContext) -> Result<(), HandlerError> {
        let _ = ctx;
        Ok(())
    }
}

/// Interface operational-status notifications.
///
/// Delivery is gated by `watch_all_intfs(true)`; state is tracked
/// either way.
pub trait IntfHandler: Send {
    fn on_oper_status(
        &mut self,
        ctx: &AgentContext,
        intf: &IntfId,
        state: OperStatus,
    ) -> Result<(), HandlerError> {
        let _ = (ctx, intf, state);
        Ok(())
    }
}

/// Flow programming-status notifications.
///
/// Delivery is gated by `watch_all_flows(true)`. One callback per
/// hardware acknowledgment.
pub trait FlowHandler: Send {
    fn on_flow_status(
        &mut self,
        ctx: &AgentContext,
        name: &str,
        state: FlowState,
    ) -> Result<(), HandlerError> {
        let _ = (ctx, name, state);
        Ok(())
    }
}

/// Registered callback sets, grouped per event category.
#[derive(Default)]
pub(crate) struct Handlers {
    pub(crate) agent: Vec<Box<dyn AgentHandler>>,
    pub(crate) intf: Vec<Box<dyn IntfHandler>>,
    pub(crate) flow: Vec<Box<dyn FlowHandler>>,
}

// ── Fault records ───────────────────────────────────────────────────

/// A recorded handler fault: which callback failed, on what event.
#[derive(Debug, Clone)]
pub struct FaultRecord {
    pub at: DateTime<Utc>,
    /// Callback name, e.g. `"on_oper_status"`.
    pub callback: &'static str,
    /// Rendered description of the event being delivered.
    pub event: String,
    pub message: String,
}
