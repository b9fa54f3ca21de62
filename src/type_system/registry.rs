//! registry.rs
//! The canonical catalog of semantic types and their compatibility relation.
//!
//! Ancestor sets are closed once at registration time. Parents must already be
//! registered, so the hierarchy can never contain a cycle and every lookup in
//! `is_compatible` is a single set probe.

use super::error::RegistryError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;
use std::borrow::Borrow;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// An ontology class identifier (a name or URI).
///
/// Cheap to clone; the identifier text is shared.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SemanticType(Arc<str>);

impl SemanticType {
    pub fn new(id: impl AsRef<str>) -> Self { Self(Arc::from(id.as_ref())) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Debug for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SemanticType({:?})", self.as_str())
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl Borrow<str> for SemanticType {
    fn borrow(&self) -> &str { &self.0 }
}

impl AsRef<str> for SemanticType {
    fn as_ref(&self) -> &str { &self.0 }
}

impl From<&str> for SemanticType {
    fn from(s: &str) -> Self { Self::new(s) }
}

impl From<String> for SemanticType {
    fn from(s: String) -> Self { Self(Arc::from(s)) }
}

impl From<&SemanticType> for SemanticType {
    fn from(t: &SemanticType) -> Self { t.clone() }
}

impl Serialize for SemanticType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SemanticType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(SemanticType::from)
    }
}

/// A registered type together with its closed ancestor set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeEntry {
    pub id: SemanticType,
    /// Parents exactly as declared, in declaration order.
    pub parents: SmallVec<[SemanticType; 2]>,
    /// Set when this type is a collection of another type.
    pub element: Option<SemanticType>,
    ancestors: BTreeSet<SemanticType>,
}

impl TypeEntry {
    /// Every transitive ancestor, excluding the type itself.
    pub fn ancestors(&self) -> impl Iterator<Item = &SemanticType> { self.ancestors.iter() }
    pub fn is_collection(&self) -> bool { self.element.is_some() }
}

/// An explicit, constructible type catalog.
///
/// Build it once per pipeline-definition session, share it read-only behind an
/// `Arc` while pipelines are assembled and run, and `clear` it (or drop it)
/// before starting an unrelated session.
#[derive(Debug, Clone, Default)]
pub struct SemanticTypeRegistry {
    entries: Vec<TypeEntry>,
    index: HashMap<SemanticType, usize>,
    // element type -> first collection type registered for it
    collections: HashMap<SemanticType, SemanticType>,
}

impl SemanticTypeRegistry {
    pub fn new() -> Self { Self::default() }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Registers `id` with the given direct parents.
    pub fn register(&mut self, id: impl Into<SemanticType>, parents: &[&str]) -> Result<SemanticType, RegistryError> {
        self.insert(id.into(), parents, None)
    }

    /// Registers `id` as a collection whose elements are of type `element`.
    ///
    /// Edges from a collection into a consumer of its element type are bound
    /// as element-wise (sliced) bindings by the type checker.
    pub fn register_collection(
        &mut self,
        id: impl Into<SemanticType>,
        element: &str,
        parents: &[&str],
    ) -> Result<SemanticType, RegistryError> {
        let id = id.into();
        if !self.index.contains_key(element) {
            return Err(RegistryError::UnknownElement { type_id: id, element: SemanticType::new(element) });
        }
        self.insert(id, parents, Some(SemanticType::new(element)))
    }

    fn insert(
        &mut self,
        id: SemanticType,
        parents: &[&str],
        element: Option<SemanticType>,
    ) -> Result<SemanticType, RegistryError> {
        if self.index.contains_key(id.as_str()) {
            return Err(RegistryError::DuplicateType(id));
        }

        // 1. Resolve parents and close the ancestor set.
        let mut declared = SmallVec::new();
        let mut ancestors = BTreeSet::new();
        for &parent in parents {
            let idx = *self.index.get(parent).ok_or_else(|| RegistryError::UnknownParent {
                type_id: id.clone(),
                parent: SemanticType::new(parent),
            })?;
            let entry = &self.entries[idx];
            ancestors.insert(entry.id.clone());
            ancestors.extend(entry.ancestors.iter().cloned());
            declared.push(entry.id.clone());
        }

        // 2. Index the collection relation (first registration wins).
        if let Some(elem) = &element {
            self.collections.entry(elem.clone()).or_insert_with(|| id.clone());
        }

        debug!(type_id = %id, parents = declared.len(), collection = element.is_some(), "semantic type registered");
        self.index.insert(id.clone(), self.entries.len());
        self.entries.push(TypeEntry { id: id.clone(), parents: declared, element, ancestors });
        Ok(id)
    }

    pub fn contains(&self, id: &str) -> bool { self.index.contains_key(id) }

    pub fn get(&self, id: &str) -> Option<&TypeEntry> {
        self.index.get(id).map(|&idx| &self.entries[idx])
    }

    /// All registered types, in registration order.
    pub fn types(&self) -> impl Iterator<Item = &TypeEntry> { self.entries.iter() }

    /// Returns true iff `producer` equals `consumer` or transitively declares it
    /// as an ancestor.
    pub fn is_compatible(&self, producer: &str, consumer: &str) -> bool {
        if producer == consumer {
            return true;
        }
        self.get(producer).is_some_and(|entry| entry.ancestors.contains(consumer))
    }

    pub fn ancestors(&self, id: &str) -> Result<Vec<SemanticType>, RegistryError> {
        self.get(id)
            .map(|entry| entry.ancestors.iter().cloned().collect())
            .ok_or_else(|| RegistryError::UnknownType(SemanticType::new(id)))
    }

    /// The element type of a collection type, if `id` is one.
    pub fn element_type(&self, id: &str) -> Option<&SemanticType> {
        self.get(id).and_then(|entry| entry.element.as_ref())
    }

    /// The collection type registered for elements of type `element`.
    pub fn collection_of(&self, element: &str) -> Option<&SemanticType> {
        self.collections.get(element)
    }

    /// Drops every registration, returning the registry to its freshly
    /// constructed state.
    pub fn clear(&mut self) {
        info!(types = self.entries.len(), "semantic type registry cleared");
        self.entries.clear();
        self.index.clear();
        self.collections.clear();
    }
}
