//! Rule for the effective output type of a node that runs element-wise.
use crate::type_system::registry::{SemanticType, SemanticTypeRegistry};

/// A node with any sliced input gathers each output port back into the
/// collection type registered for the port's declared element type.
///
/// Returns `Err(declared)` when no such collection type exists.
pub(crate) fn effective_output(
    registry: &SemanticTypeRegistry,
    declared: &SemanticType,
    sliced: bool,
) -> Result<SemanticType, SemanticType> {
    if !sliced {
        return Ok(declared.clone());
    }
    registry.collection_of(declared.as_str()).cloned().ok_or_else(|| declared.clone())
}
