//! The semantic type system.
//!
//! `SemanticTypeRegistry` is the catalog of declared types and their parent
//! relations. `TypeChecker` applies the compatibility rules to a pipeline
//! *before* anything runs, so an incompatible edge is never executed.

pub use self::checker::TypeChecker;
pub(crate) use self::checker::TypeAssignment;
pub use self::error::RegistryError;
pub use self::registry::{SemanticType, SemanticTypeRegistry, TypeEntry};
pub use self::rules::compatibility::Binding;

// --- MODULE DECLARATIONS ---
mod checker;
mod error;
mod registry;
mod rules {
    pub mod collections;
    pub mod compatibility;
}
