// ── Agent status registry ──
//
// Named key/value status fields an agent publishes about itself
// (change counters, last-seen timestamps, whatever its author finds
// useful to surface). Insertion-ordered so periodic dumps read the way
// the agent wrote them.

use std::sync::RwLock;

use indexmap::IndexMap;
use tokio::sync::watch;

/// Insertion-ordered key/value status fields with change notification.
pub struct StatusRegistry {
    fields: RwLock<IndexMap<String, String>>,
    version: watch::Sender<u64>,
}

impl StatusRegistry {
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            fields: RwLock::new(IndexMap::new()),
            version,
        }
    }

    /// Set a field, overwriting in place (insertion order is kept from
    /// the first write of the key).
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut fields) = self.fields.write() {
            fields.insert(key.into(), value.into());
        }
        self.version.send_modify(|v| *v += 1);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.fields.read().ok()?.get(key).cloned()
    }

    /// All fields in insertion order.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        self.fields
            .read()
            .map(|fields| {
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Subscribe to a version counter bumped on every write.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}
