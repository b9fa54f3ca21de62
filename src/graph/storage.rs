//! storage.rs
//! Arena of node instances and edges.
//!
//! Incoming edges are kept per consumer in declaration order; outgoing edges use
//! the linked-list child layout (`first_child` / `next_child`) so that appending
//! an edge never moves existing records.

use super::edge::{Edge, EdgeLabel};
use super::node::NodeHandle;
use super::params::Parameters;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashSet;
use std::fmt;

const NO_EDGE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline(always)]
    pub fn index(&self) -> usize { self.0 as usize }
    pub fn new(idx: usize) -> Self { Self(idx as u32) }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "#{}", self.0) }
}

/// A node placed into a pipeline with its configured parameters.
#[derive(Debug, Clone)]
pub struct NodeInstance {
    /// Unique within the pipeline.
    pub name: String,
    pub node: NodeHandle,
    pub params: Parameters,
}

#[derive(Debug, Clone, Default)]
pub struct GraphRegistry {
    pub instances: Vec<NodeInstance>,
    pub edges: Vec<Edge>,

    // Incoming edge indices per consumer, in connection order
    pub incoming: Vec<SmallVec<[u32; 2]>>,

    // Adjacency List (outgoing edges)
    pub first_child: Vec<u32>,
    pub next_child: Vec<u32>,

    pub used_names: HashSet<String>,
}

impl GraphRegistry {
    pub fn new() -> Self { Self::default() }
    pub fn count(&self) -> usize { self.instances.len() }

    pub fn contains(&self, id: NodeId) -> bool { id.index() < self.instances.len() }

    pub fn add_node(&mut self, mut instance: NodeInstance) -> NodeId {
        let id = NodeId::new(self.instances.len());

        // --- Unique Name Enforcement ---
        let original_name = instance.name.clone();
        let mut candidate_name = original_name.clone();
        let mut counter = 1;

        while self.used_names.contains(&candidate_name) {
            candidate_name = format!("{}_{}", original_name, counter);
            counter += 1;
        }
        self.used_names.insert(candidate_name.clone());
        instance.name = candidate_name;
        // -------------------------------

        self.instances.push(instance);
        self.incoming.push(SmallVec::new());
        self.first_child.push(NO_EDGE);
        id
    }

    pub fn add_edge(&mut self, edge: Edge) -> usize {
        let idx = self.edges.len();
        let p_idx = edge.producer.index();

        // 1. Children (Adjacency List prepend)
        self.next_child.push(self.first_child[p_idx]);
        self.first_child[p_idx] = idx as u32;

        // 2. Parents (ordered append)
        self.incoming[edge.consumer.index()].push(idx as u32);

        self.edges.push(edge);
        idx
    }

    #[inline(always)]
    pub fn instance(&self, id: NodeId) -> &NodeInstance { &self.instances[id.index()] }

    /// Incoming edges of `id`, in connection order.
    pub fn incoming_edges(&self, id: NodeId) -> impl Iterator<Item = &Edge> + '_ {
        self.incoming[id.index()].iter().map(move |&e| &self.edges[e as usize])
    }

    /// Outgoing edges of `id` (most recently connected first).
    pub fn outgoing_edges(&self, id: NodeId) -> OutgoingEdges<'_> {
        OutgoingEdges { store: self, cursor: self.first_child[id.index()] }
    }

    /// The edge feeding input port `port` of `id`, if any.
    pub fn input_edge(&self, id: NodeId, port: usize) -> Option<&Edge> {
        self.incoming_edges(id).find(|e| e.input_port == port)
    }

    /// Distinct producers of `id`, in connection order.
    pub fn producers(&self, id: NodeId) -> SmallVec<[NodeId; 2]> {
        let mut out: SmallVec<[NodeId; 2]> = SmallVec::new();
        for edge in self.incoming_edges(id) {
            if !out.contains(&edge.producer) {
                out.push(edge.producer);
            }
        }
        out
    }

    /// Distinct consumers of `id`.
    pub fn consumers(&self, id: NodeId) -> SmallVec<[NodeId; 4]> {
        let mut out: SmallVec<[NodeId; 4]> = SmallVec::new();
        for edge in self.outgoing_edges(id) {
            if !out.contains(&edge.consumer) {
                out.push(edge.consumer);
            }
        }
        out
    }

    pub fn has_incoming(&self, id: NodeId) -> bool { !self.incoming[id.index()].is_empty() }
    pub fn has_outgoing(&self, id: NodeId) -> bool { self.first_child[id.index()] != NO_EDGE }

    pub fn label(&self, edge: &Edge) -> EdgeLabel {
        let producer = self.instance(edge.producer);
        let consumer = self.instance(edge.consumer);
        EdgeLabel {
            producer: producer.name.clone(),
            output_port: producer.node.outputs()[edge.output_port].name.to_string(),
            consumer: consumer.name.clone(),
            input_port: consumer.node.inputs()[edge.input_port].name.to_string(),
        }
    }
}

/// Linked-list traversal over a node's outgoing edges.
pub struct OutgoingEdges<'a> {
    store: &'a GraphRegistry,
    cursor: u32,
}

impl<'a> Iterator for OutgoingEdges<'a> {
    type Item = &'a Edge;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NO_EDGE {
            return None;
        }
        let idx = self.cursor as usize;
        self.cursor = self.store.next_child[idx];
        Some(&self.store.edges[idx])
    }
}
