//! Defines the error types for the validation module.
use crate::graph::{EdgeLabel, NodeId};
use crate::type_system::SemanticType;
use thiserror::Error;

/// The specific category of a validation error.
///
// This enum allows for programmatic inspection of errors, which is more
// robust than string matching on the error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    CycleDetected,
    DisconnectedNode,
    UnboundInput,
    PortConflict,
    TypeMismatch,
    UnknownType,
    MissingCollectionType,
}

/// A structured error report from pipeline validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Node names along the cycle, first name repeated at the end.
    #[error("Cycle detected: {}", .path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("Node '{node_name}' ({node_id}) is disconnected: {reason}")]
    DisconnectedNode { node_id: NodeId, node_name: String, reason: String },

    #[error("Input '{port}' of non-source node '{node_name}' ({node_id}) has no incoming edge")]
    UnboundInput { node_id: NodeId, node_name: String, port: String },

    #[error("Input '{port}' of node '{node_name}' ({node_id}) is fed by {edges} edges")]
    PortConflict { node_id: NodeId, node_name: String, port: String, edges: usize },

    #[error("Type mismatch on edge {edge}: '{producer_type}' is not compatible with '{consumer_type}'")]
    TypeMismatch { edge: EdgeLabel, producer_type: SemanticType, consumer_type: SemanticType },

    #[error("Node '{node_name}' ({node_id}) refers to unregistered type '{semantic_type}'")]
    UnknownType { node_id: NodeId, node_name: String, semantic_type: SemanticType },

    #[error("Node '{node_name}' ({node_id}) runs element-wise but no collection type is registered for output '{port}' of type '{element}'")]
    MissingCollectionType { node_id: NodeId, node_name: String, port: String, element: SemanticType },
}

impl ValidationError {
    pub fn kind(&self) -> ValidationErrorKind {
        match self {
            ValidationError::CycleDetected { .. } => ValidationErrorKind::CycleDetected,
            ValidationError::DisconnectedNode { .. } => ValidationErrorKind::DisconnectedNode,
            ValidationError::UnboundInput { .. } => ValidationErrorKind::UnboundInput,
            ValidationError::PortConflict { .. } => ValidationErrorKind::PortConflict,
            ValidationError::TypeMismatch { .. } => ValidationErrorKind::TypeMismatch,
            ValidationError::UnknownType { .. } => ValidationErrorKind::UnknownType,
            ValidationError::MissingCollectionType { .. } => ValidationErrorKind::MissingCollectionType,
        }
    }

    /// The node the error is attached to, if it concerns a single node.
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            ValidationError::CycleDetected { .. } | ValidationError::TypeMismatch { .. } => None,
            ValidationError::DisconnectedNode { node_id, .. }
            | ValidationError::UnboundInput { node_id, .. }
            | ValidationError::PortConflict { node_id, .. }
            | ValidationError::UnknownType { node_id, .. }
            | ValidationError::MissingCollectionType { node_id, .. } => Some(*node_id),
        }
    }
}
