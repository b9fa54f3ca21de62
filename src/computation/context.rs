//! context.rs
//! The unit of data flowing along pipeline edges.
//!
//! Payload data is shared through `Arc`, so handing a `Context` to several
//! consumers is a reference-count bump; no consumer can mutate what another
//! sees. Builder-style methods take `self` and return a new `Context`.

use crate::type_system::SemanticType;
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Auxiliary key -> value data travelling with a payload.
pub type Metadata = BTreeMap<String, Value>;

/// The untyped data slot of a context.
#[derive(Clone, Default)]
pub enum Payload {
    #[default]
    Empty,
    Scalar(f64),
    Series(Arc<Vec<f64>>),
    /// Row-major dense matrix (e.g. a single-channel image).
    Matrix { rows: usize, cols: usize, data: Arc<Vec<f64>> },
    Text(Arc<str>),
    /// Ordered elements, processed element-wise by sliced bindings.
    Collection(Arc<Vec<Payload>>),
    /// Anything else a computation kernel wants to pass along.
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Payload {
    pub fn series(values: Vec<f64>) -> Self { Payload::Series(Arc::new(values)) }

    pub fn matrix(rows: usize, cols: usize, data: Vec<f64>) -> Option<Self> {
        (rows * cols == data.len()).then(|| Payload::Matrix { rows, cols, data: Arc::new(data) })
    }

    pub fn text(value: impl AsRef<str>) -> Self { Payload::Text(Arc::from(value.as_ref())) }
    pub fn collection(items: Vec<Payload>) -> Self { Payload::Collection(Arc::new(items)) }
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self { Payload::Opaque(Arc::new(value)) }

    /// Number of scalar cells, or number of elements for a collection.
    pub fn len(&self) -> usize {
        match self {
            Payload::Empty | Payload::Opaque(_) => 0,
            Payload::Scalar(_) | Payload::Text(_) => 1,
            Payload::Series(v) => v.len(),
            Payload::Matrix { data, .. } => data.len(),
            Payload::Collection(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn as_scalar(&self) -> Option<f64> {
        match self { Payload::Scalar(s) => Some(*s), _ => None }
    }

    /// Numeric cells of a series or matrix.
    pub fn as_slice(&self) -> Option<&[f64]> {
        match self {
            Payload::Series(v) => Some(v.as_slice()),
            Payload::Matrix { data, .. } => Some(data.as_slice()),
            _ => None,
        }
    }

    pub fn elements(&self) -> Option<&[Payload]> {
        match self { Payload::Collection(items) => Some(items.as_slice()), _ => None }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self { Payload::Opaque(value) => value.downcast_ref::<T>(), _ => None }
    }

    /// Applies `f` to every numeric cell, keeping the payload's shape.
    pub fn map_values(&self, f: impl Fn(f64) -> f64) -> Option<Self> {
        match self {
            Payload::Scalar(s) => Some(Payload::Scalar(f(*s))),
            Payload::Series(v) => Some(Payload::series(v.iter().map(|&x| f(x)).collect())),
            Payload::Matrix { rows, cols, data } => Some(Payload::Matrix {
                rows: *rows,
                cols: *cols,
                data: Arc::new(data.iter().map(|&x| f(x)).collect()),
            }),
            _ => None,
        }
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Payload::Empty, Payload::Empty) => true,
            (Payload::Scalar(a), Payload::Scalar(b)) => a == b,
            (Payload::Series(a), Payload::Series(b)) => a == b,
            (
                Payload::Matrix { rows: r1, cols: c1, data: d1 },
                Payload::Matrix { rows: r2, cols: c2, data: d2 },
            ) => r1 == r2 && c1 == c2 && d1 == d2,
            (Payload::Text(a), Payload::Text(b)) => a == b,
            (Payload::Collection(a), Payload::Collection(b)) => a == b,
            // Opaque values compare by identity.
            (Payload::Opaque(a), Payload::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Empty => f.write_str("Empty"),
            Payload::Scalar(s) => write!(f, "Scalar({})", s),
            Payload::Series(v) => write!(f, "Series(len={})", v.len()),
            Payload::Matrix { rows, cols, .. } => write!(f, "Matrix({}x{})", rows, cols),
            Payload::Text(t) => write!(f, "Text({:?})", t),
            Payload::Collection(items) => write!(f, "Collection(len={})", items.len()),
            Payload::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

/// A payload tagged with its semantic type plus auxiliary metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    payload: Payload,
    semantic_type: SemanticType,
    metadata: Metadata,
}

impl Context {
    pub fn new(payload: Payload, semantic_type: impl Into<SemanticType>) -> Self {
        Self { payload, semantic_type: semantic_type.into(), metadata: Metadata::new() }
    }

    pub fn payload(&self) -> &Payload { &self.payload }
    pub fn semantic_type(&self) -> &SemanticType { &self.semantic_type }
    pub fn metadata(&self) -> &Metadata { &self.metadata }
    pub fn get(&self, key: &str) -> Option<&Value> { self.metadata.get(key) }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_all_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// A new context carrying `payload` with this context's type and metadata.
    pub fn derive(&self, payload: Payload) -> Self {
        Self { payload, semantic_type: self.semantic_type.clone(), metadata: self.metadata.clone() }
    }

    /// The same payload and metadata under a different semantic type.
    pub fn retag(mut self, semantic_type: SemanticType) -> Self {
        self.semantic_type = semantic_type;
        self
    }

    pub fn into_parts(self) -> (Payload, SemanticType, Metadata) {
        (self.payload, self.semantic_type, self.metadata)
    }
}
