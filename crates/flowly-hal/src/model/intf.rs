// ── Interface identity and operational status ──

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── IntfId ──────────────────────────────────────────────────────────

/// Opaque identifier for a physical or logical interface.
///
/// Stable for the lifetime of the device configuration and used as the
/// mapping key everywhere an interface is referenced (flow matches,
/// actions, the interface tracker). The textual form is whatever the
/// platform reports, e.g. `"Ethernet1"` or `"Port-Channel4"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntfId(String);

impl IntfId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IntfId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for IntfId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for IntfId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for IntfId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── OperStatus ──────────────────────────────────────────────────────

/// Operational status of an interface as reported by the device.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OperStatus {
    Up,
    Down,
    #[default]
    Unknown,
}

impl OperStatus {
    pub fn is_up(self) -> bool {
        matches!(self, Self::Up)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn intf_id_round_trips_text() {
        let id: IntfId = "Ethernet1".parse().unwrap();
        assert_eq!(id.as_str(), "Ethernet1");
        assert_eq!(id.to_string(), "Ethernet1");
    }

    #[test]
    fn oper_status_display() {
        assert_eq!(OperStatus::Up.to_string(), "up");
        assert_eq!(OperStatus::Down.to_string(), "down");
        assert_eq!(OperStatus::Unknown.to_string(), "unknown");
    }

    #[test]
    fn oper_status_defaults_to_unknown() {
        assert_eq!(OperStatus::default(), OperStatus::Unknown);
    }
}
