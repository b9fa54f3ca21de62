//! Rule for binding a producer type to a consumer port type.
use crate::type_system::registry::SemanticTypeRegistry;
use serde::{Deserialize, Serialize};

/// How a value of the producer's type reaches a consumer port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Binding {
    /// The producer type is the consumer type or one of its descendants.
    #[default]
    Direct,
    /// The producer is a collection whose element type is compatible with the
    /// consumer; the consumer runs once per element.
    Sliced,
}

/// Binds `producer` to `consumer`, preferring a direct binding.
///
/// Returns `None` when neither the type itself nor (for collection types) its
/// element type is compatible with the consumer.
pub(crate) fn bind(registry: &SemanticTypeRegistry, producer: &str, consumer: &str) -> Option<Binding> {
    if registry.is_compatible(producer, consumer) {
        return Some(Binding::Direct);
    }
    match registry.element_type(producer) {
        Some(element) if registry.is_compatible(element.as_str(), consumer) => Some(Binding::Sliced),
        _ => None,
    }
}
