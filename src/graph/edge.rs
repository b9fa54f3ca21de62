//! Defines the `Edge` type, a directed connection between two node ports.
use super::storage::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A producer output port feeding a consumer input port.
///
/// Ports are stored as indices into the nodes' declared port lists; the
/// assembler resolves names to indices once, at `connect` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub producer: NodeId,
    pub output_port: usize,
    pub consumer: NodeId,
    pub input_port: usize,
}

/// A human-readable edge description used in diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeLabel {
    pub producer: String,
    pub output_port: String,
    pub consumer: String,
    pub input_port: String,
}

impl fmt::Display for EdgeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} -> {}.{}", self.producer, self.output_port, self.consumer, self.input_port)
    }
}
