//! Records what ran, with which inputs and parameters, and how it ended.
pub mod entry;
pub mod tracker;

pub use entry::{EntryStatus, ProvenanceEntry};
pub use tracker::{ProvenanceLog, ProvenanceTracker};
