//! semantic_pipeline_core
//!
//! A pipeline engine for scientific data processing. Computations are wrapped
//! as nodes with semantically typed ports; pipelines are assembled as DAGs,
//! validated for structure and type compatibility before anything runs, then
//! executed sequentially or branch-parallel with a provenance record of every
//! node invocation.
//!
//! The typical flow:
//! 1. Register types in a `SemanticTypeRegistry`.
//! 2. Build nodes with `Node::builder`.
//! 3. Assemble and `validate()` a `Pipeline`.
//! 4. `run` it with a `RunConfig` and read outputs and provenance from the `RunResult`.

pub mod analysis;
pub mod computation;
pub mod display;
pub mod graph;
pub mod provenance;
pub mod type_system;
pub mod validation;

pub use computation::{
    run, CancellationToken, Context, Engine, ExecutionError, ExecutionMode, FailurePolicy, Metadata, NodeErrorKind,
    NodeExecutionError, Payload, RunConfig, RunResult, RunStatus,
};
pub use graph::{
    AssemblyError, Node, NodeDefinitionError, NodeHandle, NodeId, NodeInputs, NodeOutputs, Operation, OperationError,
    ParamKind, ParamSpec, ParameterSchema, ParameterSchemaError, Parameters, Pipeline, Produced,
};
pub use provenance::{EntryStatus, ProvenanceEntry, ProvenanceLog};
pub use type_system::{Binding, RegistryError, SemanticType, SemanticTypeRegistry};
pub use validation::{ValidationError, ValidationErrorKind};

#[cfg(test)]
pub(crate) mod test_support;
