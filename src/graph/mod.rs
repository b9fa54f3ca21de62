//! Defines the core data structures for pipeline assembly.
pub mod dag;
pub mod edge;
pub mod error;
pub mod node;
pub mod params;
pub mod storage;

// Re-export key types for convenient access
pub use dag::Pipeline;
pub use edge::{Edge, EdgeLabel};
pub use error::{AssemblyError, NodeDefinitionError};
pub use node::{Node, NodeBuilder, NodeHandle, NodeInputs, NodeOutputs, Operation, OperationError, Port, Produced};
pub use params::{ParamKind, ParamSpec, ParameterSchema, ParameterSchemaError, Parameters};
pub use storage::{NodeId, NodeInstance};
