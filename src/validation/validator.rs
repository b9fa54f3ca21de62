//! The central validator that orchestrates the execution of all validation rules.
use super::error::ValidationError;
use super::rules::{cycles, structure};
use crate::analysis::topology;
use crate::graph::storage::GraphRegistry;
use crate::graph::NodeId;
use crate::type_system::{Binding, SemanticType, SemanticTypeRegistry, TypeAssignment, TypeChecker};
use smallvec::SmallVec;
use tracing::debug;

/// The execution plan cached by a successful validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    order: Vec<NodeId>,
    // Position of each node within `order`, indexed by NodeId
    position: Vec<usize>,
    input_bindings: Vec<SmallVec<[Binding; 2]>>,
    output_types: Vec<SmallVec<[SemanticType; 1]>>,
    sliced: Vec<bool>,
    sources: Vec<NodeId>,
    sinks: Vec<NodeId>,
}

impl Schedule {
    /// Topological order; ties broken by insertion order.
    pub fn order(&self) -> &[NodeId] { &self.order }
    pub fn position(&self, id: NodeId) -> usize { self.position[id.index()] }
    /// Nodes without incoming edges; they receive the initial context.
    pub fn sources(&self) -> &[NodeId] { &self.sources }
    /// Declared sinks, or every node without outgoing edges when none are declared.
    pub fn sinks(&self) -> &[NodeId] { &self.sinks }
    pub fn is_sliced(&self, id: NodeId) -> bool { self.sliced[id.index()] }
    pub fn input_binding(&self, id: NodeId, port: usize) -> Binding {
        self.input_bindings[id.index()].get(port).copied().unwrap_or_default()
    }
    pub fn input_bindings(&self, id: NodeId) -> &[Binding] { &self.input_bindings[id.index()] }
    /// The type a downstream edge sees on `port` (a collection type when sliced).
    pub fn output_type(&self, id: NodeId, port: usize) -> Option<&SemanticType> {
        self.output_types[id.index()].get(port)
    }
    pub fn len(&self) -> usize { self.order.len() }
    pub fn is_empty(&self) -> bool { self.order.is_empty() }
}

/// The orchestrator for pipeline validation.
///
/// Cycles are checked first and end validation on their own: the remaining
/// rules walk the topological order, which does not exist for a cyclic graph.
/// Structure and type errors are then collected together.
pub struct Validator<'a> {
    store: &'a GraphRegistry,
    registry: &'a SemanticTypeRegistry,
    sources: &'a [NodeId],
    sinks: &'a [NodeId],
    input_type: Option<&'a SemanticType>,
}

impl<'a> Validator<'a> {
    pub fn new(
        store: &'a GraphRegistry,
        registry: &'a SemanticTypeRegistry,
        sources: &'a [NodeId],
        sinks: &'a [NodeId],
        input_type: Option<&'a SemanticType>,
    ) -> Self {
        Self { store, registry, sources, sinks, input_type }
    }

    /// Executes all validation rules against the pipeline.
    ///
    /// # Returns
    /// - `Ok(Schedule)` if no validation errors are found.
    /// - `Err(Vec<ValidationError>)` containing every error discovered.
    pub fn validate(&self) -> Result<Schedule, Vec<ValidationError>> {
        // --- PHASE 1: ACYCLICITY ---
        let order = match topology::sort(self.store) {
            Ok(order) => order,
            Err(unordered) => {
                debug!(unordered = unordered.len(), "topological sort failed");
                return Err(cycles::detect_cycles(self.store));
            }
        };

        // --- PHASE 2: STRUCTURE ---
        let mut errors = structure::validate_ports(self.store);
        errors.extend(structure::validate_reachability(self.store, self.sources, self.sinks));

        // --- PHASE 3: TYPES ---
        let (types, type_errors) = TypeChecker::new(self.store, self.registry, self.input_type).check(&order);
        errors.extend(type_errors);

        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(self.schedule(order, types))
    }

    fn schedule(&self, order: Vec<NodeId>, types: TypeAssignment) -> Schedule {
        let mut position = vec![0; order.len()];
        for (pos, id) in order.iter().enumerate() {
            position[id.index()] = pos;
        }

        let sources = order.iter().copied().filter(|&id| !self.store.has_incoming(id)).collect();
        let sinks = if self.sinks.is_empty() {
            order.iter().copied().filter(|&id| !self.store.has_outgoing(id)).collect()
        } else {
            self.sinks.to_vec()
        };

        Schedule {
            order,
            position,
            input_bindings: types.input_bindings,
            output_types: types.output_types,
            sliced: types.sliced,
            sources,
            sinks,
        }
    }
}
