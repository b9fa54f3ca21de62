//! A single immutable record of one node invocation.
use crate::graph::{NodeId, Parameters};
use crate::type_system::SemanticType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntryStatus {
    Succeeded,
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    /// Position in the log, assigned on append.
    pub sequence: u64,
    pub node_id: NodeId,
    pub node_name: String,
    /// Name of the node declaration the instance was placed from.
    pub operation: String,
    /// Distinct upstream nodes whose outputs fed this invocation.
    pub producers: Vec<NodeId>,
    pub input_types: Vec<SemanticType>,
    /// Types actually produced; empty when the node failed.
    pub output_types: Vec<SemanticType>,
    /// The resolved parameter set the computation ran with.
    pub parameters: Parameters,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// True when the node ran once per element of a sliced input.
    pub sliced: bool,
    #[serde(flatten)]
    pub status: EntryStatus,
}

impl ProvenanceEntry {
    pub fn succeeded(&self) -> bool { self.status == EntryStatus::Succeeded }
}
