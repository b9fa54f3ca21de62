//! Defines the error types for the type system module.
use super::registry::SemanticType;
use thiserror::Error;

/// Failures raised while building the semantic type catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Semantic type '{0}' is already registered")]
    DuplicateType(SemanticType),
    #[error("Semantic type '{type_id}' declares unregistered parent '{parent}'")]
    UnknownParent { type_id: SemanticType, parent: SemanticType },
    #[error("Collection type '{type_id}' declares unregistered element type '{element}'")]
    UnknownElement { type_id: SemanticType, element: SemanticType },
    #[error("Semantic type '{0}' is not registered")]
    UnknownType(SemanticType),
}
