// ── Interface state tracker ──
//
// One record per known interface, created on first observation and
// never removed while the session lives. Operational status is mutated
// only by the runtime's notification path; descriptions are agent
// metadata and may be overwritten freely.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;

use flowly_hal::{IntfId, OperStatus};

use crate::error::CoreError;

/// Observed state of one interface.
#[derive(Debug, Clone, Serialize)]
pub struct IntfState {
    pub id: IntfId,
    pub oper_status: OperStatus,
    pub description: String,
    /// When the last oper-status transition was delivered. `None` until
    /// the first transition (snapshot seeding is observation, not a
    /// transition).
    pub last_change: Option<DateTime<Utc>>,
}

/// Per-interface operational state with reactive snapshots.
pub struct IntfTable {
    intfs: DashMap<IntfId, Arc<IntfState>>,

    /// Total delivered oper-status transitions, exactly one per event.
    changes: AtomicU64,

    snapshot: watch::Sender<Arc<Vec<Arc<IntfState>>>>,
}

impl IntfTable {
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            intfs: DashMap::new(),
            changes: AtomicU64::new(0),
            snapshot,
        }
    }

    // ── Mutation (runtime loop only) ─────────────────────────────────

    /// Seed an interface from the initial snapshot. Does not count as a
    /// transition. Already-known interfaces are left untouched.
    pub(crate) fn observe(&self, id: IntfId, status: OperStatus) {
        if self.intfs.contains_key(&id) {
            return;
        }
        self.intfs.insert(
            id.clone(),
            Arc::new(IntfState {
                id,
                oper_status: status,
                description: String::new(),
                last_change: None,
            }),
        );
        self.publish();
    }

    /// Apply a delivered oper-status transition, creating the interface
    /// on first observation. Bumps the change counter exactly once.
    pub(crate) fn apply_oper_status(&self, id: &IntfId, status: OperStatus) {
        let description = self
            .intfs
            .get(id)
            .map(|r| r.description.clone())
            .unwrap_or_default();

        self.intfs.insert(
            id.clone(),
            Arc::new(IntfState {
                id: id.clone(),
                oper_status: status,
                description,
                last_change: Some(Utc::now()),
            }),
        );
        self.changes.fetch_add(1, Ordering::Relaxed);
        self.publish();
    }

    /// Overwrite an interface's description.
    pub(crate) fn set_description(&self, id: &IntfId, text: &str) -> Result<(), CoreError> {
        let current = self
            .intfs
            .get(id)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| CoreError::UnknownIntf { intf: id.clone() })?;

        self.intfs.insert(
            id.clone(),
            Arc::new(IntfState {
                description: text.to_owned(),
                ..(*current).clone()
            }),
        );
        self.publish();
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get(&self, id: &IntfId) -> Option<Arc<IntfState>> {
        self.intfs.get(id).map(|r| Arc::clone(r.value()))
    }

    pub fn len(&self) -> usize {
        self.intfs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intfs.is_empty()
    }

    /// Total delivered transitions since the agent started.
    pub fn change_count(&self) -> u64 {
        self.changes.load(Ordering::Relaxed)
    }

    /// Current snapshot, sorted by interface id.
    pub fn snapshot(&self) -> Arc<Vec<Arc<IntfState>>> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<IntfState>>>> {
        self.snapshot.subscribe()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn publish(&self) {
        let mut states: Vec<Arc<IntfState>> =
            self.intfs.iter().map(|r| Arc::clone(r.value())).collect();
        states.sort_by(|a, b| a.id.cmp(&b.id));
        self.snapshot.send_modify(|snap| *snap = Arc::new(states));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn eth(n: u8) -> IntfId {
        IntfId::new(format!("Ethernet{n}"))
    }

    #[test]
    fn observe_creates_without_counting() {
        let table = IntfTable::new();
        table.observe(eth(1), OperStatus::Up);
        table.observe(eth(2), OperStatus::Down);

        assert_eq!(table.len(), 2);
        assert_eq!(table.change_count(), 0);
        assert_eq!(table.get(&eth(1)).unwrap().oper_status, OperStatus::Up);
    }

    #[test]
    fn observe_does_not_clobber_known_interface() {
        let table = IntfTable::new();
        table.apply_oper_status(&eth(1), OperStatus::Down);
        table.observe(eth(1), OperStatus::Up);
        assert_eq!(table.get(&eth(1)).unwrap().oper_status, OperStatus::Down);
    }

    #[test]
    fn counter_increments_once_per_delivered_event() {
        let table = IntfTable::new();
        table.apply_oper_status(&eth(1), OperStatus::Up);
        table.apply_oper_status(&eth(1), OperStatus::Down);
        // A repeated state still counts: events are not coalesced.
        table.apply_oper_status(&eth(1), OperStatus::Down);

        assert_eq!(table.change_count(), 3);
        assert_eq!(table.get(&eth(1)).unwrap().oper_status, OperStatus::Down);
    }

    #[test]
    fn transition_creates_on_first_observation() {
        let table = IntfTable::new();
        table.apply_oper_status(&eth(7), OperStatus::Up);

        let state = table.get(&eth(7)).unwrap();
        assert_eq!(state.oper_status, OperStatus::Up);
        assert!(state.last_change.is_some());
        assert_eq!(table.change_count(), 1);
    }

    #[test]
    fn set_description_on_unknown_interface_fails() {
        let table = IntfTable::new();
        let err = table.set_description(&eth(9), "uplink").unwrap_err();
        assert!(matches!(err, CoreError::UnknownIntf { .. }));
    }

    #[test]
    fn set_description_preserves_status() {
        let table = IntfTable::new();
        table.apply_oper_status(&eth(1), OperStatus::Down);
        table.set_description(&eth(1), "core uplink").unwrap();

        let state = table.get(&eth(1)).unwrap();
        assert_eq!(state.description, "core uplink");
        assert_eq!(state.oper_status, OperStatus::Down);
    }

    #[test]
    fn transition_preserves_description() {
        let table = IntfTable::new();
        table.observe(eth(1), OperStatus::Up);
        table.set_description(&eth(1), "peering").unwrap();
        table.apply_oper_status(&eth(1), OperStatus::Down);

        assert_eq!(table.get(&eth(1)).unwrap().description, "peering");
    }

    #[test]
    fn snapshot_sorted_by_id() {
        let table = IntfTable::new();
        table.observe(eth(2), OperStatus::Up);
        table.observe(eth(1), OperStatus::Up);

        let snap = table.snapshot();
        let ids: Vec<&str> = snap.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["Ethernet1", "Ethernet2"]);
    }
}
