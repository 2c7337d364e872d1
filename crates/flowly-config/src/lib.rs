//! Shared configuration for flowly binaries.
//!
//! TOML file + `FLOWLY_`-prefixed environment overrides, translated to
//! the runtime types (`flowly_core::AgentConfig`, `flowly_hal::SimConfig`,
//! `flowly_core::ControlEndpoint`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use flowly_core::{AgentConfig, ControlEndpoint};
use flowly_hal::{IntfId, SimConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── Duration fields ─────────────────────────────────────────────────

// Humantime strings ("5s", "250ms") in TOML, `Duration` in code.
mod duration_str {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentSection,

    #[serde(default)]
    pub control: ControlSection,

    #[serde(default)]
    pub fabric: FabricSection,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AgentSection {
    /// Agent name, used in logs and status output.
    #[serde(default = "default_name")]
    pub name: String,

    /// Priority for flow entries created from the control stream.
    #[serde(default = "default_priority")]
    pub default_priority: u16,

    /// Event queue capacity.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Fabric ack deadline.
    #[serde(default = "default_ack_timeout", with = "duration_str")]
    pub ack_timeout: Duration,

    /// Retries after the ack deadline expires.
    #[serde(default = "default_ack_retries")]
    pub ack_retries: u32,

    /// Handler fault records kept for inspection.
    #[serde(default = "default_fault_log")]
    pub fault_log_capacity: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            default_priority: default_priority(),
            event_capacity: default_event_capacity(),
            ack_timeout: default_ack_timeout(),
            ack_retries: default_ack_retries(),
            fault_log_capacity: default_fault_log(),
        }
    }
}

fn default_name() -> String {
    "flowly".into()
}
fn default_priority() -> u16 {
    100
}
fn default_event_capacity() -> usize {
    256
}
fn default_ack_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_ack_retries() -> u32 {
    2
}
fn default_fault_log() -> usize {
    32
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ControlSection {
    /// Control stream source: `stdin`, `tcp://HOST:PORT`, or a path.
    #[serde(default = "default_endpoint")]
    pub endpoint: ControlEndpoint,
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
        }
    }
}

fn default_endpoint() -> ControlEndpoint {
    ControlEndpoint::Stdin
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FabricSection {
    /// Programming request channel capacity.
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,

    /// Fabric update channel capacity.
    #[serde(default = "default_update_capacity")]
    pub update_capacity: usize,

    #[serde(default)]
    pub sim: SimSection,
}

impl Default for FabricSection {
    fn default() -> Self {
        Self {
            request_capacity: default_request_capacity(),
            update_capacity: default_update_capacity(),
            sim: SimSection::default(),
        }
    }
}

fn default_request_capacity() -> usize {
    64
}
fn default_update_capacity() -> usize {
    256
}

/// Simulated fabric parameters (used by `flowly run`).
#[derive(Debug, Deserialize, Serialize)]
pub struct SimSection {
    /// Interface roster reported by the simulated device.
    #[serde(default = "default_interfaces")]
    pub interfaces: Vec<String>,

    /// Hardware table capacity.
    #[serde(default = "default_table_capacity")]
    pub table_capacity: usize,

    /// Per-request ack latency.
    #[serde(default = "default_ack_latency", with = "duration_str")]
    pub ack_latency: Duration,
}

impl Default for SimSection {
    fn default() -> Self {
        Self {
            interfaces: default_interfaces(),
            table_capacity: default_table_capacity(),
            ack_latency: default_ack_latency(),
        }
    }
}

fn default_interfaces() -> Vec<String> {
    (1..=4).map(|i| format!("Ethernet{i}")).collect()
}
fn default_table_capacity() -> usize {
    1024
}
fn default_ack_latency() -> Duration {
    Duration::ZERO
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("net", "flowly", "flowly").map_or_else(
        || {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".config");
            p.push("flowly");
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load configuration: defaults, then the TOML file, then `FLOWLY_*`
/// environment overrides (double underscore separates nesting, e.g.
/// `FLOWLY_AGENT__NAME`).
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("FLOWLY_").split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

/// Load config, falling back to defaults if anything goes wrong.
pub fn load_config_or_default(path: Option<&Path>) -> Config {
    load_config(path).unwrap_or_default()
}

/// Serialize config to TOML and write it to the given path.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation to runtime types ────────────────────────────────────

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.name.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: "agent.name".into(),
                reason: "must not be empty".into(),
            });
        }
        if self.agent.event_capacity == 0 {
            return Err(ConfigError::Validation {
                field: "agent.event_capacity".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.fabric.request_capacity == 0 || self.fabric.update_capacity == 0 {
            return Err(ConfigError::Validation {
                field: "fabric.request_capacity / fabric.update_capacity".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.fabric.sim.table_capacity == 0 {
            return Err(ConfigError::Validation {
                field: "fabric.sim.table_capacity".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Build the runtime configuration.
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            name: self.agent.name.clone(),
            default_priority: self.agent.default_priority,
            event_capacity: self.agent.event_capacity,
            ack_timeout: self.agent.ack_timeout,
            ack_retries: self.agent.ack_retries,
            fault_log_capacity: self.agent.fault_log_capacity,
        }
    }

    /// Build the simulated-fabric configuration.
    pub fn sim_config(&self) -> SimConfig {
        SimConfig {
            interfaces: self
                .fabric
                .sim
                .interfaces
                .iter()
                .map(|name| IntfId::new(name.clone()))
                .collect(),
            table_capacity: self.fabric.sim.table_capacity,
            ack_latency: self.fabric.sim.ack_latency,
            preinstalled: Vec::new(),
            request_capacity: self.fabric.request_capacity,
            update_capacity: self.fabric.update_capacity,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.agent.name, "flowly");
        assert_eq!(cfg.agent.default_priority, 100);
        assert_eq!(cfg.control.endpoint, ControlEndpoint::Stdin);
        assert_eq!(cfg.fabric.sim.interfaces.len(), 4);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(cfg.agent.name, "flowly");
    }

    #[test]
    fn toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [agent]
            name = "edge-agent"
            default_priority = 42
            ack_timeout = "250ms"

            [control]
            endpoint = "tcp://127.0.0.1:9000"

            [fabric.sim]
            interfaces = ["Ethernet1", "Ethernet2"]
            ack_latency = "10ms"
            "#,
        )
        .unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.agent.name, "edge-agent");
        assert_eq!(cfg.agent.default_priority, 42);
        assert_eq!(cfg.agent.ack_timeout, Duration::from_millis(250));
        assert_eq!(
            cfg.control.endpoint,
            ControlEndpoint::Tcp("127.0.0.1:9000".into())
        );

        let sim = cfg.sim_config();
        assert_eq!(sim.interfaces, vec![IntfId::from("Ethernet1"), IntfId::from("Ethernet2")]);
        assert_eq!(sim.ack_latency, Duration::from_millis(10));
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent]\nname = \"partial\"\n").unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.agent.name, "partial");
        assert_eq!(cfg.agent.event_capacity, 256);
        assert_eq!(cfg.fabric.request_capacity, 64);
    }

    #[test]
    fn invalid_capacity_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent]\nevent_capacity = 0\n").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn bad_duration_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent]\nack_timeout = \"sideways\"\n").unwrap();

        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut cfg = Config::default();
        cfg.agent.name = "saved".into();
        cfg.agent.ack_timeout = Duration::from_secs(9);
        save_config(&cfg, &path).unwrap();

        let loaded = load_config(Some(&path)).unwrap();
        assert_eq!(loaded.agent.name, "saved");
        assert_eq!(loaded.agent.ack_timeout, Duration::from_secs(9));
    }
}
