//! Append-only provenance recording, shared between workers of one run.
use super::entry::ProvenanceEntry;
use crate::graph::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Write;
use std::sync::{Mutex, MutexGuard};
use tracing::trace;

/// Collects entries while a run is in flight.
///
/// The only shared mutable state of a run; appends are serialized by a mutex
/// and entries are never changed once recorded.
#[derive(Debug, Default)]
pub struct ProvenanceTracker {
    entries: Mutex<Vec<ProvenanceEntry>>,
}

impl ProvenanceTracker {
    pub fn new() -> Self { Self::default() }

    /// Appends `entry`, assigning its sequence number, which is returned.
    pub fn record(&self, mut entry: ProvenanceEntry) -> u64 {
        let mut entries = self.lock();
        let sequence = entries.len() as u64;
        entry.sequence = sequence;
        trace!(sequence, node = %entry.node_name, "provenance recorded");
        entries.push(entry);
        sequence
    }

    pub fn len(&self) -> usize { self.lock().len() }
    pub fn is_empty(&self) -> bool { self.lock().is_empty() }

    /// An immutable copy of everything recorded so far.
    pub fn snapshot(&self) -> ProvenanceLog { ProvenanceLog { entries: self.lock().clone() } }

    pub fn into_log(self) -> ProvenanceLog {
        let entries = self.entries.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        ProvenanceLog { entries }
    }

    // A panic while holding the lock cannot leave a half-written entry behind,
    // so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Vec<ProvenanceEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The finished, read-only log of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvenanceLog {
    entries: Vec<ProvenanceEntry>,
}

impl ProvenanceLog {
    pub fn entries(&self) -> &[ProvenanceEntry] { &self.entries }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn iter(&self) -> impl Iterator<Item = &ProvenanceEntry> { self.entries.iter() }

    pub fn for_node(&self, id: NodeId) -> Option<&ProvenanceEntry> {
        self.entries.iter().find(|e| e.node_id == id)
    }

    /// Entries of `id` and of every node upstream of it, in log order.
    pub fn lineage_of(&self, id: NodeId) -> Vec<&ProvenanceEntry> {
        let by_node: HashMap<NodeId, &ProvenanceEntry> = self.entries.iter().map(|e| (e.node_id, e)).collect();
        let mut lineage = HashSet::new();
        let mut queue = VecDeque::from([id]);

        while let Some(node) = queue.pop_front() {
            if let Some(entry) = by_node.get(&node) {
                if lineage.insert(node) {
                    queue.extend(entry.producers.iter().copied());
                }
            }
        }
        self.entries.iter().filter(|e| lineage.contains(&e.node_id)).collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ProvenanceEntry> {
        self.entries.iter().filter(|e| !e.succeeded())
    }

    pub fn to_json(&self) -> serde_json::Result<String> { serde_json::to_string_pretty(self) }

    pub fn write_json<W: Write>(&self, writer: W) -> serde_json::Result<()> {
        serde_json::to_writer_pretty(writer, self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> { serde_json::from_str(text) }
}

impl<'a> IntoIterator for &'a ProvenanceLog {
    type Item = &'a ProvenanceEntry;
    type IntoIter = std::slice::Iter<'a, ProvenanceEntry>;
    fn into_iter(self) -> Self::IntoIter { self.entries.iter() }
}
