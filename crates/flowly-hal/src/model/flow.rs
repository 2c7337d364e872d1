// ── Flow table primitives ──
//
// A flow entry pairs a match predicate with a set of rewrite/forward
// actions. Which fields participate is recorded explicitly in a field
// set, because an unset field is semantically distinct from a field
// that happens to hold its default value: `eth_type == 0` with the bit
// enabled matches EtherType zero; with the bit clear it matches
// anything. Setter methods keep the field set and the populated fields
// in agreement; `validate()` catches hand-assembled values that don't.

use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::eth::EthAddr;
use super::intf::IntfId;

// ── Validation ──────────────────────────────────────────────────────

/// A flow entry whose field/action sets disagree with the populated fields.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("match field '{field}' is populated but not enabled in the field set")]
    MatchFieldNotEnabled { field: &'static str },

    #[error("match field set enables input_intfs but no input interfaces are given")]
    EmptyInputIntfs,

    #[error("action '{field}' is populated but not enabled in the action set")]
    ActionFieldNotEnabled { field: &'static str },
}

// ── FlowMatch ───────────────────────────────────────────────────────

/// Records which [`FlowMatch`] fields are active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFieldSet {
    #[serde(default)]
    pub input_intfs: bool,
    #[serde(default)]
    pub eth_src: bool,
    #[serde(default)]
    pub eth_dst: bool,
    #[serde(default)]
    pub eth_type: bool,
    #[serde(default)]
    pub ip_src: bool,
    #[serde(default)]
    pub ip_dst: bool,
}

/// Match predicate over packet header fields.
///
/// Masks default to all-ones (exact match); a broader match is
/// expressed by narrowing the mask, e.g. `0.0.0.0/0.0.0.0` for any
/// IPv4 destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowMatch {
    pub field_set: MatchFieldSet,

    pub input_intfs: BTreeSet<IntfId>,

    pub eth_src: EthAddr,
    pub eth_src_mask: EthAddr,
    pub eth_dst: EthAddr,
    pub eth_dst_mask: EthAddr,
    pub eth_type: u16,

    pub ip_src: Ipv4Addr,
    pub ip_src_mask: Ipv4Addr,
    pub ip_dst: Ipv4Addr,
    pub ip_dst_mask: Ipv4Addr,
}

impl Default for FlowMatch {
    fn default() -> Self {
        Self {
            field_set: MatchFieldSet::default(),
            input_intfs: BTreeSet::new(),
            eth_src: EthAddr::ZERO,
            eth_src_mask: EthAddr::BROADCAST,
            eth_dst: EthAddr::ZERO,
            eth_dst_mask: EthAddr::BROADCAST,
            eth_type: 0,
            ip_src: Ipv4Addr::UNSPECIFIED,
            ip_src_mask: Ipv4Addr::BROADCAST,
            ip_dst: Ipv4Addr::UNSPECIFIED,
            ip_dst_mask: Ipv4Addr::BROADCAST,
        }
    }
}

impl FlowMatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the match to packets arriving on the given interfaces.
    pub fn set_input_intfs(&mut self, intfs: impl IntoIterator<Item = IntfId>) {
        self.input_intfs = intfs.into_iter().collect();
        self.field_set.input_intfs = true;
    }

    /// Match on source MAC under the given mask.
    pub fn set_eth_src(&mut self, addr: EthAddr, mask: EthAddr) {
        self.eth_src = addr;
        self.eth_src_mask = mask;
        self.field_set.eth_src = true;
    }

    /// Match on destination MAC under the given mask.
    pub fn set_eth_dst(&mut self, addr: EthAddr, mask: EthAddr) {
        self.eth_dst = addr;
        self.eth_dst_mask = mask;
        self.field_set.eth_dst = true;
    }

    /// Match on EtherType.
    pub fn set_eth_type(&mut self, eth_type: u16) {
        self.eth_type = eth_type;
        self.field_set.eth_type = true;
    }

    /// Match on source IPv4 address under the given mask.
    pub fn set_ip_src(&mut self, addr: Ipv4Addr, mask: Ipv4Addr) {
        self.ip_src = addr;
        self.ip_src_mask = mask;
        self.field_set.ip_src = true;
    }

    /// Match on destination IPv4 address under the given mask.
    pub fn set_ip_dst(&mut self, addr: Ipv4Addr, mask: Ipv4Addr) {
        self.ip_dst = addr;
        self.ip_dst_mask = mask;
        self.field_set.ip_dst = true;
    }

    /// Check that every populated field has its field-set bit and vice
    /// versa. A field holding its default value with the bit enabled is
    /// fine (an explicit match on the default); a non-default value
    /// without the bit is not.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let fs = &self.field_set;

        if fs.input_intfs && self.input_intfs.is_empty() {
            return Err(ValidationError::EmptyInputIntfs);
        }
        if !fs.input_intfs && !self.input_intfs.is_empty() {
            return Err(ValidationError::MatchFieldNotEnabled {
                field: "input_intfs",
            });
        }
        if !fs.eth_src && (!self.eth_src.is_zero() || self.eth_src_mask != EthAddr::BROADCAST) {
            return Err(ValidationError::MatchFieldNotEnabled { field: "eth_src" });
        }
        if !fs.eth_dst && (!self.eth_dst.is_zero() || self.eth_dst_mask != EthAddr::BROADCAST) {
            return Err(ValidationError::MatchFieldNotEnabled { field: "eth_dst" });
        }
        if !fs.eth_type && self.eth_type != 0 {
            return Err(ValidationError::MatchFieldNotEnabled { field: "eth_type" });
        }
        if !fs.ip_src
            && (!self.ip_src.is_unspecified() || self.ip_src_mask != Ipv4Addr::BROADCAST)
        {
            return Err(ValidationError::MatchFieldNotEnabled { field: "ip_src" });
        }
        if !fs.ip_dst
            && (!self.ip_dst.is_unspecified() || self.ip_dst_mask != Ipv4Addr::BROADCAST)
        {
            return Err(ValidationError::MatchFieldNotEnabled { field: "ip_dst" });
        }
        Ok(())
    }
}

// ── FlowAction ──────────────────────────────────────────────────────

/// Records which [`FlowAction`] operations are active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSet {
    #[serde(default)]
    pub output_intfs: bool,
    #[serde(default)]
    pub eth_src: bool,
    #[serde(default)]
    pub eth_dst: bool,
    #[serde(default)]
    pub ip_src: bool,
    #[serde(default)]
    pub ip_dst: bool,
}

/// Rewrite and forward operations applied to matched packets.
///
/// Enabling `output_intfs` with an empty set is the drop action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowAction {
    pub action_set: ActionSet,

    pub output_intfs: BTreeSet<IntfId>,

    pub eth_src: EthAddr,
    pub eth_dst: EthAddr,

    #[serde(default = "unspecified_ip")]
    pub ip_src: Ipv4Addr,
    #[serde(default = "unspecified_ip")]
    pub ip_dst: Ipv4Addr,
}

fn unspecified_ip() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

impl Default for FlowAction {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowAction {
    pub fn new() -> Self {
        Self {
            action_set: ActionSet::default(),
            output_intfs: BTreeSet::new(),
            eth_src: EthAddr::ZERO,
            eth_dst: EthAddr::ZERO,
            ip_src: Ipv4Addr::UNSPECIFIED,
            ip_dst: Ipv4Addr::UNSPECIFIED,
        }
    }

    /// Forward matched packets out the given interfaces.
    pub fn forward(intfs: impl IntoIterator<Item = IntfId>) -> Self {
        let mut action = Self::new();
        action.set_output_intfs(intfs);
        action
    }

    /// Drop matched packets (an enabled, empty output set).
    pub fn drop_traffic() -> Self {
        Self::forward([])
    }

    pub fn set_output_intfs(&mut self, intfs: impl IntoIterator<Item = IntfId>) {
        self.output_intfs = intfs.into_iter().collect();
        self.action_set.output_intfs = true;
    }

    pub fn set_eth_src(&mut self, addr: EthAddr) {
        self.eth_src = addr;
        self.action_set.eth_src = true;
    }

    pub fn set_eth_dst(&mut self, addr: EthAddr) {
        self.eth_dst = addr;
        self.action_set.eth_dst = true;
    }

    pub fn set_ip_src(&mut self, addr: Ipv4Addr) {
        self.ip_src = addr;
        self.action_set.ip_src = true;
    }

    pub fn set_ip_dst(&mut self, addr: Ipv4Addr) {
        self.ip_dst = addr;
        self.action_set.ip_dst = true;
    }

    /// True when this action drops traffic rather than forwarding it.
    pub fn is_drop(&self) -> bool {
        self.action_set.output_intfs && self.output_intfs.is_empty()
    }

    /// Check action-set / populated-field agreement. Unlike the match
    /// side, an enabled empty output set is legal: it is the drop action.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let set = &self.action_set;

        if !set.output_intfs && !self.output_intfs.is_empty() {
            return Err(ValidationError::ActionFieldNotEnabled {
                field: "output_intfs",
            });
        }
        if !set.eth_src && !self.eth_src.is_zero() {
            return Err(ValidationError::ActionFieldNotEnabled { field: "eth_src" });
        }
        if !set.eth_dst && !self.eth_dst.is_zero() {
            return Err(ValidationError::ActionFieldNotEnabled { field: "eth_dst" });
        }
        if !set.ip_src && !self.ip_src.is_unspecified() {
            return Err(ValidationError::ActionFieldNotEnabled { field: "ip_src" });
        }
        if !set.ip_dst && !self.ip_dst.is_unspecified() {
            return Err(ValidationError::ActionFieldNotEnabled { field: "ip_dst" });
        }
        Ok(())
    }
}

// ── FlowEntry ───────────────────────────────────────────────────────

/// A named flow table entry: match + action + priority.
///
/// Names are unique within a flow table; setting an entry under an
/// existing name replaces it. When two entries with overlapping
/// matches compete, higher priority wins; at equal priority the
/// lexicographically smaller name wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEntry {
    pub name: String,
    pub matches: FlowMatch,
    pub action: FlowAction,
    pub priority: u16,
}

impl FlowEntry {
    pub fn new(
        name: impl Into<String>,
        matches: FlowMatch,
        action: FlowAction,
        priority: u16,
    ) -> Self {
        Self {
            name: name.into(),
            matches,
            action,
            priority,
        }
    }

    /// Validate both halves of the entry.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.matches.validate()?;
        self.action.validate()
    }

    /// True when `other` competes for the same traffic. The simulated
    /// fabric detects overlap as exact match equality; see `SimFabric`.
    pub fn same_match(&self, other: &Self) -> bool {
        self.matches == other.matches
    }

    /// True when this entry beats `other` under the priority /
    /// name-tie-break rule.
    pub fn wins_over(&self, other: &Self) -> bool {
        self.priority > other.priority
            || (self.priority == other.priority && self.name < other.name)
    }
}

// ── FlowState / FlowStatus ──────────────────────────────────────────

/// Why the fabric refused to program an entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    /// The hardware flow table is full.
    TableFull,
    /// No acknowledgment arrived within the configured deadline.
    AckTimeout,
    /// The fabric connection closed while the request was outstanding.
    FabricClosed,
}

/// Programming state of a flow entry, as acknowledged by the fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlowState {
    /// Request forwarded, no ack yet.
    Pending,
    /// Programmed and winning its match.
    Installed,
    /// Removed from hardware.
    Removed,
    /// Programmed, but a higher-precedence entry with the same match wins.
    Shadowed,
    /// Refused by the fabric.
    Rejected(RejectReason),
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Installed => write!(f, "installed"),
            Self::Removed => write!(f, "removed"),
            Self::Shadowed => write!(f, "shadowed"),
            Self::Rejected(reason) => write!(f, "rejected ({reason})"),
        }
    }
}

/// One hardware acknowledgment: transient, delivered to handlers, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStatus {
    pub name: String,
    pub state: FlowState,
}
