//! Validation rules for the wiring of an acyclic pipeline: every input is fed
//! exactly once, and every node takes part in a source-to-sink flow.

use crate::analysis::topology;
use crate::graph::storage::GraphRegistry;
use crate::graph::NodeId;
use crate::validation::error::ValidationError;

/// `UnboundInput` for ports of non-source nodes without an edge, and
/// `PortConflict` for ports fed by more than one edge.
///
/// A node without incoming edges is a source: it receives the initial context
/// on every input port, so its ports are never unbound.
pub(crate) fn validate_ports(store: &GraphRegistry) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for i in 0..store.count() {
        let id = NodeId::new(i);
        if !store.has_incoming(id) {
            continue;
        }
        let instance = store.instance(id);
        for (port_idx, port) in instance.node.inputs().iter().enumerate() {
            let feeding = store.incoming_edges(id).filter(|e| e.input_port == port_idx).count();
            match feeding {
                0 => errors.push(ValidationError::UnboundInput {
                    node_id: id,
                    node_name: instance.name.clone(),
                    port: port.name.to_string(),
                }),
                1 => {}
                n => errors.push(ValidationError::PortConflict {
                    node_id: id,
                    node_name: instance.name.clone(),
                    port: port.name.to_string(),
                    edges: n,
                }),
            }
        }
    }
    errors
}

/// `DisconnectedNode` for nodes outside the flow between the declared
/// endpoints. With no declared sources (or sinks) that side is unconstrained.
pub(crate) fn validate_reachability(store: &GraphRegistry, sources: &[NodeId], sinks: &[NodeId]) -> Vec<ValidationError> {
    let from_sources = (!sources.is_empty()).then(|| topology::downstream_from(store, sources));
    let to_sinks = (!sinks.is_empty()).then(|| topology::upstream_from(store, sinks));

    let mut errors = Vec::new();
    for i in 0..store.count() {
        let id = NodeId::new(i);
        let reason = if from_sources.as_ref().is_some_and(|set| !set.contains(&id)) {
            "not reachable from any declared source"
        } else if to_sinks.as_ref().is_some_and(|set| !set.contains(&id)) {
            "no path to any declared sink"
        } else {
            continue;
        };
        errors.push(ValidationError::DisconnectedNode {
            node_id: id,
            node_name: store.instance(id).name.clone(),
            reason: reason.to_string(),
        });
    }
    errors
}
