//! Defines the error types raised while declaring nodes and assembling pipelines.
use super::params::ParameterSchemaError;
use super::storage::NodeId;
use crate::type_system::SemanticType;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeDefinitionError {
    #[error("Node '{node}' declares unregistered semantic type '{semantic_type}' on port '{port}'")]
    UnknownType { node: String, port: String, semantic_type: SemanticType },
    #[error("Node '{node}' declares port '{port}' more than once")]
    DuplicatePort { node: String, port: String },
    #[error("Node '{node}' declares no output ports")]
    NoOutputs { node: String },
    #[error("Probe node '{node}' must have exactly one input and one output of the same type")]
    ProbeShape { node: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssemblyError {
    #[error("Node {0} is not part of this pipeline")]
    UnknownNode(NodeId),
    #[error("Node '{node}' has no input port '{port}'")]
    UnknownInputPort { node: String, port: String },
    #[error("Node '{node}' has no output port '{port}'")]
    UnknownOutputPort { node: String, port: String },
    #[error("Invalid parameters for node '{node}': {source}")]
    Parameters { node: String, source: ParameterSchemaError },
    #[error("Semantic type '{0}' is not registered")]
    UnknownType(SemanticType),
}
