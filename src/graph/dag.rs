//! dag.rs
//! The pipeline assembler: wraps the low-level `GraphRegistry` arena with
//! node placement, port connection and the validation lifecycle.
//!
//! Any structural change drops a previously cached validation, so a pipeline
//! can only ever be executed in the exact shape that was validated.

use super::edge::{Edge, EdgeLabel};
use super::error::AssemblyError;
use super::node::NodeHandle;
use super::params::Parameters;
use super::storage::{GraphRegistry, NodeId, NodeInstance};
use crate::analysis::topology;
use crate::type_system::{SemanticType, SemanticTypeRegistry};
use crate::validation::{Schedule, ValidationError, Validator};
use smallvec::SmallVec;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Pipeline {
    registry: Arc<SemanticTypeRegistry>,
    pub(crate) store: GraphRegistry,
    sources: Vec<NodeId>,
    sinks: Vec<NodeId>,
    input_type: Option<SemanticType>,
    schedule: Option<Arc<Schedule>>,
}

impl Pipeline {
    pub fn new(registry: Arc<SemanticTypeRegistry>) -> Self {
        Self {
            registry,
            store: GraphRegistry::new(),
            sources: Vec::new(),
            sinks: Vec::new(),
            input_type: None,
            schedule: None,
        }
    }

    pub fn registry(&self) -> &Arc<SemanticTypeRegistry> { &self.registry }

    // --- Assembly ---

    /// Places `node` under its declared name (suffixed if already taken).
    pub fn add_node(&mut self, node: &NodeHandle, params: Parameters) -> Result<NodeId, AssemblyError> {
        self.add_node_named(node.name(), node, params)
    }

    pub fn add_node_named(&mut self, name: &str, node: &NodeHandle, params: Parameters) -> Result<NodeId, AssemblyError> {
        node.schema()
            .validate_configured(&params)
            .map_err(|source| AssemblyError::Parameters { node: name.to_string(), source })?;

        self.invalidate();
        let id = self.store.add_node(NodeInstance { name: name.to_string(), node: Arc::clone(node), params });
        debug!(node = %self.store.instance(id).name, id = %id, "node added");
        Ok(id)
    }

    /// Connects `producer.output_port` to `consumer.input_port`.
    pub fn connect(&mut self, producer: NodeId, output_port: &str, consumer: NodeId, input_port: &str) -> Result<(), AssemblyError> {
        self.ensure_known(producer)?;
        self.ensure_known(consumer)?;

        let p = self.store.instance(producer);
        let out_idx = p.node.output_index(output_port).ok_or_else(|| AssemblyError::UnknownOutputPort {
            node: p.name.clone(),
            port: output_port.to_string(),
        })?;
        let c = self.store.instance(consumer);
        let in_idx = c.node.input_index(input_port).ok_or_else(|| AssemblyError::UnknownInputPort {
            node: c.name.clone(),
            port: input_port.to_string(),
        })?;

        self.invalidate();
        self.store.add_edge(Edge { producer, output_port: out_idx, consumer, input_port: in_idx });
        Ok(())
    }

    /// Connects the first output port of `producer` to the first input port of `consumer`.
    pub fn link(&mut self, producer: NodeId, consumer: NodeId) -> Result<(), AssemblyError> {
        self.ensure_known(producer)?;
        self.ensure_known(consumer)?;
        let out = self.store.instance(producer).node.outputs()[0].name.clone();
        let input = match self.store.instance(consumer).node.inputs().first() {
            Some(port) => port.name.clone(),
            None => {
                return Err(AssemblyError::UnknownInputPort {
                    node: self.store.instance(consumer).name.clone(),
                    port: "<first>".to_string(),
                })
            }
        };
        self.connect(producer, &out, consumer, &input)
    }

    /// Declares a node from which every other node must be reachable.
    pub fn declare_source(&mut self, id: NodeId) -> Result<(), AssemblyError> {
        self.ensure_known(id)?;
        if !self.sources.contains(&id) {
            self.invalidate();
            self.sources.push(id);
        }
        Ok(())
    }

    /// Declares a node every other node must have a path to. Declared sinks
    /// also define which outputs a run reports.
    pub fn declare_sink(&mut self, id: NodeId) -> Result<(), AssemblyError> {
        self.ensure_known(id)?;
        if !self.sinks.contains(&id) {
            self.invalidate();
            self.sinks.push(id);
        }
        Ok(())
    }

    /// Declares the semantic type of the initial context. Source inputs are
    /// then type checked (and may be sliced) at validation time.
    pub fn set_input_type(&mut self, semantic_type: &str) -> Result<(), AssemblyError> {
        if !self.registry.contains(semantic_type) {
            return Err(AssemblyError::UnknownType(SemanticType::new(semantic_type)));
        }
        self.invalidate();
        self.input_type = Some(SemanticType::new(semantic_type));
        Ok(())
    }

    // --- Validation ---

    /// Runs every assembly-time check. On success the schedule (topological
    /// order and edge bindings) is cached and the pipeline becomes runnable.
    pub fn validate(&mut self) -> Result<(), Vec<ValidationError>> {
        self.schedule = None;
        let validator = Validator::new(&self.store, &self.registry, &self.sources, &self.sinks, self.input_type.as_ref());
        match validator.validate() {
            Ok(schedule) => {
                info!(nodes = self.store.count(), edges = self.store.edges.len(), "pipeline validated");
                self.schedule = Some(Arc::new(schedule));
                Ok(())
            }
            Err(errors) => {
                warn!(errors = errors.len(), "pipeline validation failed");
                Err(errors)
            }
        }
    }

    pub fn is_validated(&self) -> bool { self.schedule.is_some() }
    pub fn schedule(&self) -> Option<&Schedule> { self.schedule.as_deref() }

    fn invalidate(&mut self) {
        if self.schedule.take().is_some() {
            debug!("pipeline modified; cached validation dropped");
        }
    }

    fn ensure_known(&self, id: NodeId) -> Result<(), AssemblyError> {
        if self.store.contains(id) { Ok(()) } else { Err(AssemblyError::UnknownNode(id)) }
    }

    // --- Accessors ---
    pub fn node_count(&self) -> usize { self.store.count() }
    pub fn edge_count(&self) -> usize { self.store.edges.len() }
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> { (0..self.store.count()).map(NodeId::new) }
    pub fn instance(&self, id: NodeId) -> Option<&NodeInstance> { self.store.instances.get(id.index()) }
    pub fn name_of(&self, id: NodeId) -> Option<&str> { self.instance(id).map(|i| i.name.as_str()) }
    pub fn edges(&self) -> &[Edge] { &self.store.edges }
    pub fn edge_label(&self, edge: &Edge) -> EdgeLabel { self.store.label(edge) }
    pub fn input_type(&self) -> Option<&SemanticType> { self.input_type.as_ref() }
    pub fn declared_sources(&self) -> &[NodeId] { &self.sources }
    pub fn declared_sinks(&self) -> &[NodeId] { &self.sinks }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.store.instances.iter().position(|i| i.name == name).map(NodeId::new)
    }

    pub fn producers(&self, id: NodeId) -> SmallVec<[NodeId; 2]> { self.store.producers(id) }
    pub fn consumers(&self, id: NodeId) -> SmallVec<[NodeId; 4]> { self.store.consumers(id) }

    pub fn downstream_from(&self, start: &[NodeId]) -> HashSet<NodeId> { topology::downstream_from(&self.store, start) }
    pub fn upstream_from(&self, start: &[NodeId]) -> HashSet<NodeId> { topology::upstream_from(&self.store, start) }

    /// True when neither node is an ancestor of the other.
    pub fn are_independent(&self, a: NodeId, b: NodeId) -> bool { topology::independent(&self.store, a, b) }
}
