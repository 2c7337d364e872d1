// ── Control protocol ──
//
// Line-oriented command stream driving flow add/delete from an
// external controller:
//
//     <name> (add|delete) <ipv4> <interface>
//
// Four whitespace-separated fields, surrounding whitespace ignored,
// empty lines skipped. `add` installs a destination-IP /32 match
// forwarding to the named interface; `delete` removes by name (the
// address and interface fields are still required and validated).
// Malformed lines are diagnostics, not failures: they are reported and
// skipped. End of stream asks the agent to terminate gracefully.
//
// The byte source is swappable -- stdin, a file, or a TCP endpoint --
// so the same protocol serves interactive use, replayed scripts, and a
// remote controller.

use std::fmt;
use std::io;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::net::TcpListener;
use tracing::info;

use flowly_hal::{FlowAction, FlowEntry, FlowMatch, IntfId};

// ── Commands ────────────────────────────────────────────────────────

/// A parsed control-stream command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Add {
        name: String,
        ip_dst: Ipv4Addr,
        output_intf: IntfId,
    },
    Delete {
        name: String,
    },
}

impl ControlCommand {
    /// Build the flow entry an `add` command asks for: exact /32
    /// destination match, forward to the named interface. `None` for
    /// `delete`.
    pub fn flow_entry(&self, priority: u16) -> Option<FlowEntry> {
        match self {
            Self::Add {
                name,
                ip_dst,
                output_intf,
            } => {
                let mut matches = FlowMatch::new();
                matches.set_ip_dst(*ip_dst, Ipv4Addr::BROADCAST);
                Some(FlowEntry::new(
                    name.clone(),
                    matches,
                    FlowAction::forward([output_intf.clone()]),
                    priority,
                ))
            }
            Self::Delete { .. } => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Add { name, .. } | Self::Delete { name } => name,
        }
    }
}

// ── Parse errors ────────────────────────────────────────────────────

/// A malformed control line. Reported and skipped, never fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolParseError {
    #[error("expected '<name> <add|delete> <ipv4> <interface>', got {found} fields")]
    WrongArity { found: usize },

    #[error("unknown operation '{op}' (expected 'add' or 'delete')")]
    UnknownOperation { op: String },

    #[error("invalid IPv4 address '{addr}'")]
    InvalidAddress { addr: String },
}

/// Parse one line. `Ok(None)` for blank lines.
pub fn parse_line(line: &str) -> Result<Option<ControlCommand>, ProtocolParseError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() != 4 {
        return Err(ProtocolParseError::WrongArity {
            found: fields.len(),
        });
    }

    let operation = fields[1];
    if operation != "add" && operation != "delete" {
        return Err(ProtocolParseError::UnknownOperation {
            op: operation.to_owned(),
        });
    }

    let ip_dst: Ipv4Addr = fields[2]
        .parse()
        .map_err(|_| ProtocolParseError::InvalidAddress {
            addr: fields[2].to_owned(),
        })?;

    let name = fields[0].to_owned();
    Ok(Some(if operation == "add" {
        ControlCommand::Add {
            name,
            ip_dst,
            output_intf: IntfId::from(fields[3]),
        }
    } else {
        ControlCommand::Delete { name }
    }))
}

// ── Endpoints ───────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid control endpoint '{input}': {reason}")]
pub struct ParseEndpointError {
    pub input: String,
    pub reason: String,
}

/// Where the control stream comes from.
///
/// Textual forms: `stdin` (or `-`), `tcp://HOST:PORT`, `file://PATH`,
/// or a bare filesystem path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEndpoint {
    Stdin,
    File(PathBuf),
    /// Listen on the given address and read from the first connection.
    Tcp(String),
}

impl ControlEndpoint {
    /// Open the endpoint as a buffered line source.
    ///
    /// For `Tcp` this binds, waits for one connection, and reads from
    /// it; the control channel is a single-controller protocol.
    pub async fn open(&self) -> io::Result<Box<dyn AsyncBufRead + Send + Unpin>> {
        match self {
            Self::Stdin => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
            Self::File(path) => {
                let file = tokio::fs::File::open(path).await?;
                Ok(Box::new(BufReader::new(file)))
            }
            Self::Tcp(addr) => {
                let listener = TcpListener::bind(addr.as_str()).await?;
                info!(%addr, "waiting for control connection");
                let (stream, peer) = listener.accept().await?;
                info!(%peer, "control connection established");
                Ok(Box::new(BufReader::new(stream)))
            }
        }
    }
}

impl fmt::Display for ControlEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdin => write!(f, "stdin"),
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

impl FromStr for ControlEndpoint {
    type Err = ParseEndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason: &str| ParseEndpointError {
            input: s.to_owned(),
            reason: reason.to_owned(),
        };

        if s == "stdin" || s == "-" {
            return Ok(Self::Stdin);
        }

        if s.contains("://") {
            let url = url::Url::parse(s).map_err(|e| err(&e.to_string()))?;
            return match url.scheme() {
                "tcp" => {
                    let host = url.host_str().ok_or_else(|| err("missing host"))?;
                    let port = url.port().ok_or_else(|| err("missing port"))?;
                    Ok(Self::Tcp(format!("{host}:{port}")))
                }
                "file" => Ok(Self::File(PathBuf::from(url.path()))),
                other => Err(err(&format!("unsupported scheme '{other}'"))),
            };
        }

        Ok(Self::File(PathBuf::from(s)))
    }
}

impl Serialize for ControlEndpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ControlEndpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
