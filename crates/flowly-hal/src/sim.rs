// ── Simulated fabric backend ──
//
// An in-process forwarding plane for tests and local runs: answers
// install/remove requests with acks, models a bounded hardware table,
// resolves same-match competition by priority (name tie-break), and
// lets a test controller flap links or drop the connection.
//
// Overlap detection is exact match equality. Real hardware does
// TCAM-range overlap; the sim's job is a deterministic, observable
// rendition of the precedence contract, not TCAM emulation.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::link::{FabricEndpoint, FabricLink, FabricRequest, FabricUpdate};
use crate::model::{FlowEntry, FlowState, FlowStatus, IntfId, OperStatus, RejectReason};

// ── Configuration ───────────────────────────────────────────────────

/// Simulated fabric parameters.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Interface roster reported in the initial snapshot, all `Up`.
    pub interfaces: Vec<IntfId>,

    /// Hardware flow table capacity. Installed and shadowed entries
    /// both occupy a slot.
    pub table_capacity: usize,

    /// Delay before each request is processed and acked.
    pub ack_latency: Duration,

    /// Entries already programmed before the agent attaches, reported
    /// in the initial flow snapshot.
    pub preinstalled: Vec<FlowEntry>,

    /// Request channel capacity.
    pub request_capacity: usize,

    /// Update channel capacity.
    pub update_capacity: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            interfaces: (1..=4).map(|i| IntfId::new(format!("Ethernet{i}"))).collect(),
            table_capacity: 1024,
            ack_latency: Duration::ZERO,
            preinstalled: Vec::new(),
            request_capacity: 64,
            update_capacity: 256,
        }
    }
}

// ── Controller handle ───────────────────────────────────────────────

#[derive(Debug)]
enum SimCommand {
    SetOperStatus(IntfId, OperStatus),
    FlowStates(oneshot::Sender<Vec<(String, FlowState)>>),
    Close,
}

/// Test/driver handle to a running [`SimFabric`].
#[derive(Debug, Clone)]
pub struct SimHandle {
    commands: mpsc::Sender<SimCommand>,
}

impl SimHandle {
    /// Report an operational status transition for an interface.
    /// Interfaces outside the configured roster are valid: they appear
    /// to the agent as newly observed.
    pub async fn set_oper_status(&self, intf: IntfId, state: OperStatus) {
        let _ = self
            .commands
            .send(SimCommand::SetOperStatus(intf, state))
            .await;
    }

    /// Snapshot of the simulated hardware table, sorted by name.
    pub async fn flow_states(&self) -> Vec<(String, FlowState)> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(SimCommand::FlowStates(tx)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Drop the fabric connection: a `Closed` update is emitted and the
    /// sim task stops.
    pub async fn close(&self) {
        let _ = self.commands.send(SimCommand::Close).await;
    }
}

// ── SimFabric ───────────────────────────────────────────────────────

/// Factory for the simulated backend task.
pub struct SimFabric;

impl SimFabric {
    /// Spawn the sim task and return the runtime's link plus the
    /// controller handle.
    pub fn spawn(config: SimConfig) -> (FabricLink, SimHandle) {
        let (link, endpoint) = FabricLink::channel(config.request_capacity, config.update_capacity);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);

        tokio::spawn(sim_task(config, endpoint, cmd_rx));

        (link, SimHandle { commands: cmd_tx })
    }
}

// ── Sim task ────────────────────────────────────────────────────────

struct SimTable {
    entries: BTreeMap<String, (FlowEntry, FlowState)>,
    capacity: usize,
}

impl SimTable {
    /// Recompute winner/shadowed states for every entry sharing
    /// `matches`, returning the acks for entries whose state changed.
    fn resolve_group(&mut self, matches: &crate::model::FlowMatch) -> Vec<FlowStatus> {
        let mut members: Vec<FlowEntry> = self
            .entries
            .values()
            .filter(|(e, _)| e.matches == *matches)
            .map(|(e, _)| e.clone())
            .collect();
        if members.is_empty() {
            return Vec::new();
        }

        // Winner first: priority descending, then name ascending.
        members.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.name.cmp(&b.name)));

        let mut acks = Vec::new();
        for (idx, member) in members.iter().enumerate() {
            let new_state = if idx == 0 {
                FlowState::Installed
            } else {
                FlowState::Shadowed
            };
            if let Some((_, state)) = self.entries.get_mut(&member.name) {
                if *state != new_state {
                    *state = new_state;
                    acks.push(FlowStatus {
                        name: member.name.clone(),
                        state: new_state,
                    });
                }
            }
        }
        acks
    }

    fn install(&mut self, entry: FlowEntry) -> Vec<FlowStatus> {
        let is_new = !self.entries.contains_key(&entry.name);
        if is_new && self.entries.len() >= self.capacity {
            return vec![FlowStatus {
                name: entry.name,
                state: FlowState::Rejected(RejectReason::TableFull),
            }];
        }

        // A replace may move the entry to a different match group;
        // re-resolve the group it leaves behind.
        let old_matches = self
            .entries
            .insert(entry.name.clone(), (entry.clone(), FlowState::Shadowed))
            .map(|(old, _)| old.matches);

        let mut acks = Vec::new();
        if let Some(old) = old_matches {
            if old != entry.matches {
                acks.extend(self.resolve_group(&old));
            }
        }
        acks.extend(self.resolve_group(&entry.matches));

        // The new entry always gets an ack, even if resolve_group saw
        // no state change (replace with identical outcome).
        if !acks.iter().any(|a| a.name == entry.name) {
            let state = self
                .entries
                .get(&entry.name)
                .map_or(FlowState::Installed, |(_, s)| *s);
            acks.push(FlowStatus {
                name: entry.name,
                state,
            });
        }
        acks
    }

    fn remove(&mut self, name: &str) -> Vec<FlowStatus> {
        let mut acks = vec![FlowStatus {
            name: name.to_owned(),
            state: FlowState::Removed,
        }];
        // Removal is idempotent: an unknown name still acks Removed.
        if let Some((old, _)) = self.entries.remove(name) {
            acks.extend(self.resolve_group(&old.matches));
        }
        acks
    }

    fn states(&self) -> Vec<(String, FlowState)> {
        self.entries
            .iter()
            .map(|(name, (_, state))| (name.clone(), *state))
            .collect()
    }
}

async fn sim_task(
    config: SimConfig,
    mut endpoint: FabricEndpoint,
    mut commands: mpsc::Receiver<SimCommand>,
) {
    let mut table = SimTable {
        entries: BTreeMap::new(),
        capacity: config.table_capacity,
    };

    // Seed the preinstalled entries and resolve their precedence
    // quietly -- the snapshot carries the result, not acks.
    for entry in &config.preinstalled {
        table
            .entries
            .insert(entry.name.clone(), (entry.clone(), FlowState::Shadowed));
    }
    let seeded: Vec<crate::model::FlowMatch> = config
        .preinstalled
        .iter()
        .map(|e| e.matches.clone())
        .collect();
    for matches in &seeded {
        let _ = table.resolve_group(matches);
    }

    let intf_snapshot = config
        .interfaces
        .iter()
        .map(|id| (id.clone(), OperStatus::Up))
        .collect();
    let flow_snapshot = table.entries.values().map(|(e, _)| e.clone()).collect();

    let updates = endpoint.updates.clone();
    if updates
        .send(FabricUpdate::IntfSnapshot(intf_snapshot))
        .await
        .is_err()
    {
        return;
    }
    let _ = updates.send(FabricUpdate::FlowSnapshot(flow_snapshot)).await;
    let _ = updates.send(FabricUpdate::Synced).await;

    loop {
        tokio::select! {
            biased;

            cmd = commands.recv() => {
                match cmd {
                    Some(SimCommand::SetOperStatus(intf, state)) => {
                        debug!(%intf, %state, "sim link transition");
                        if updates
                            .send(FabricUpdate::OperStatus { intf, state })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(SimCommand::FlowStates(reply)) => {
                        let _ = reply.send(table.states());
                    }
                    Some(SimCommand::Close) | None => {
                        let _ = updates.send(FabricUpdate::Closed).await;
                        break;
                    }
                }
            }

            req = endpoint.requests.recv() => {
                let Some(req) = req else { break };
                if !config.ack_latency.is_zero() {
                    tokio::time::sleep(config.ack_latency).await;
                }
                let acks = match req {
                    FabricRequest::Install(entry) => {
                        debug!(name = %entry.name, priority = entry.priority, "sim install");
                        table.install(entry)
                    }
                    FabricRequest::Remove { name } => {
                        debug!(%name, "sim remove");
                        table.remove(&name)
                    }
                };
                for ack in acks {
                    if updates.send(FabricUpdate::FlowAck(ack)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
