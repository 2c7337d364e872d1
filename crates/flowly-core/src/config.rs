// ── Agent runtime configuration ──

use std::time::Duration;

/// Tuning knobs for an [`Agent`](crate::Agent). Construct via
/// `AgentConfig::default()` and override what you need; the
/// `flowly-config` crate builds one of these from TOML + environment.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent name, used in logs and status output.
    pub name: String,

    /// Priority assigned to flow entries created from the control
    /// stream, which carries no priority field.
    pub default_priority: u16,

    /// Capacity of the runtime's event queue.
    pub event_capacity: usize,

    /// How long to wait for a fabric ack before retrying.
    pub ack_timeout: Duration,

    /// Retries after an ack deadline expires; exhaustion rejects the
    /// entry with an ack-timeout status.
    pub ack_retries: u32,

    /// How many handler fault records to keep for inspection.
    pub fault_log_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "flowly-agent".into(),
            default_priority: 100,
            event_capacity: 256,
            ack_timeout: Duration::from_secs(5),
            ack_retries: 2,
            fault_log_capacity: 32,
        }
    }
}
