//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text and distinct exit codes.

use miette::Diagnostic;
use thiserror::Error;

use flowly_config::ConfigError;
use flowly_core::CoreError;

/// Exit codes for process termination (0 is implicit success).
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const FABRIC: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Agent / fabric ───────────────────────────────────────────────
    #[error("Fabric unavailable: {reason}")]
    #[diagnostic(
        code(flowly::fabric),
        help("The forwarding plane is not accepting requests. Check the fabric settings in your config.")
    )]
    Fabric { reason: String },

    #[error("Agent error: {message}")]
    #[diagnostic(code(flowly::agent))]
    Agent { message: String },

    #[error("Flow entry '{name}' not found")]
    #[diagnostic(code(flowly::not_found))]
    FlowNotFound { name: String },

    // ── Control scripts ──────────────────────────────────────────────
    #[error("Control script '{path}' has {errors} malformed line(s)")]
    #[diagnostic(
        code(flowly::script_invalid),
        help("Each line must be '<name> (add|delete) <ipv4> <interface>'. See the diagnostics above.")
    )]
    ScriptInvalid { path: String, errors: usize },

    // ── Validation / configuration ───────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(flowly::validation))]
    Validation { field: String, reason: String },

    #[error("Configuration file already exists at {path}")]
    #[diagnostic(
        code(flowly::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(flowly::config))]
    Config(#[from] ConfigError),

    // ── IO ───────────────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Fabric { .. } => exit_code::FABRIC,
            Self::FlowNotFound { .. } => exit_code::NOT_FOUND,
            Self::ScriptInvalid { .. } | Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::FlowNotFound { name } => CliError::FlowNotFound { name },

            CoreError::FabricUnavailable { reason } => CliError::Fabric { reason },

            CoreError::InvalidEntry { name, source } => CliError::Validation {
                field: format!("flow entry '{name}'"),
                reason: source.to_string(),
            },

            other => CliError::Agent {
                message: other.to_string(),
            },
        }
    }
}
