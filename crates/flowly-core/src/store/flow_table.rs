// ── Flow table store ──
//
// Source of truth for what should be programmed into the forwarding
// hardware: named entries, upsert/delete by name, snapshot + watch
// subscription, and a resync window for reconciliation after restart.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::watch;

use flowly_hal::{FlowEntry, FlowState};

/// A stored entry plus its last acknowledged programming state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRecord {
    pub entry: FlowEntry,
    pub state: FlowState,
}

/// Named flow entries with reactive snapshots.
///
/// The table records desired state only -- programming requests are
/// forwarded by the runtime, and acknowledged states flow back in via
/// [`note_state`](Self::note_state).
pub struct FlowTable {
    entries: DashMap<String, Arc<FlowRecord>>,

    /// Names re-affirmed since `resync_begin`, `None` outside a window.
    affirmed: Mutex<Option<HashSet<String>>>,

    version: watch::Sender<u64>,
    snapshot: watch::Sender<Arc<Vec<Arc<FlowRecord>>>>,
}

impl FlowTable {
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            entries: DashMap::new(),
            affirmed: Mutex::new(None),
            version,
            snapshot,
        }
    }

    // ── Mutation (runtime loop only) ─────────────────────────────────

    /// Insert or replace an entry. Returns `true` if the name was new.
    /// Inside a resync window the name counts as re-affirmed.
    pub(crate) fn upsert(&self, entry: FlowEntry) -> bool {
        if let Ok(mut affirmed) = self.affirmed.lock() {
            if let Some(set) = affirmed.as_mut() {
                set.insert(entry.name.clone());
            }
        }

        let is_new = !self.entries.contains_key(&entry.name);
        self.entries.insert(
            entry.name.clone(),
            Arc::new(FlowRecord {
                entry,
                state: FlowState::Pending,
            }),
        );
        self.publish();
        is_new
    }

    /// Adopt an entry reported by the fabric's initial snapshot: it is
    /// already programmed, so it starts out `Installed`.
    pub(crate) fn adopt(&self, entry: FlowEntry) {
        self.entries.insert(
            entry.name.clone(),
            Arc::new(FlowRecord {
                entry,
                state: FlowState::Installed,
            }),
        );
        self.publish();
    }

    /// Remove an entry by name, returning it if present.
    pub(crate) fn remove(&self, name: &str) -> Option<Arc<FlowRecord>> {
        let removed = self.entries.remove(name).map(|(_, record)| record);
        if removed.is_some() {
            self.publish();
        }
        removed
    }

    /// Record an acknowledged programming state for an entry.
    /// A no-op for names no longer in the table (e.g. `Removed` acks).
    pub(crate) fn note_state(&self, name: &str, state: FlowState) {
        let Some(record) = self.entries.get(name).map(|r| Arc::clone(r.value())) else {
            return;
        };
        if record.state != state {
            self.entries.insert(
                name.to_owned(),
                Arc::new(FlowRecord {
                    entry: record.entry.clone(),
                    state,
                }),
            );
            self.publish();
        }
    }

    // ── Resync ───────────────────────────────────────────────────────

    /// Open a reconciliation window. Idempotent: an already-open window
    /// keeps its affirmations.
    pub(crate) fn resync_begin(&self) {
        if let Ok(mut affirmed) = self.affirmed.lock() {
            if affirmed.is_none() {
                *affirmed = Some(HashSet::new());
            }
        }
    }

    /// Close the window, removing every entry that was not re-affirmed
    /// inside it. Returns the removed names. A no-op (empty result)
    /// when no window is open -- first boot calls this unconditionally.
    pub(crate) fn resync_end(&self) -> Vec<String> {
        let affirmed = match self.affirmed.lock() {
            Ok(mut guard) => match guard.take() {
                Some(set) => set,
                None => return Vec::new(),
            },
            Err(_) => return Vec::new(),
        };

        let stale: Vec<String> = self
            .entries
            .iter()
            .map(|r| r.key().clone())
            .filter(|name| !affirmed.contains(name))
            .collect();

        for name in &stale {
            self.entries.remove(name);
        }
        if !stale.is_empty() {
            self.publish();
        }
        stale
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn get(&self, name: &str) -> Option<Arc<FlowRecord>> {
        self.entries.get(name).map(|r| Arc::clone(r.value()))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current snapshot, sorted by name (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<Vec<Arc<FlowRecord>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<FlowRecord>>>> {
        self.snapshot.subscribe()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn publish(&self) {
        let mut records: Vec<Arc<FlowRecord>> =
            self.entries.iter().map(|r| Arc::clone(r.value())).collect();
        records.sort_by(|a, b| a.entry.name.cmp(&b.entry.name));
        self.snapshot.send_modify(|snap| *snap = Arc::new(records));
        self.version.send_modify(|v| *v += 1);
    }
}
