use crate::graph::storage::GraphRegistry;
use crate::graph::NodeId;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet, VecDeque};

/// Performs a Topological Sort using Kahn's Algorithm.
///
/// Returns a list of NodeIds where every producer appears before its consumers.
/// Among nodes that are ready at the same time the one added first wins, so the
/// order is a deterministic function of insertion order.
///
/// On failure returns the nodes that could not be ordered (members of a cycle
/// and everything downstream of one).
pub fn sort(store: &GraphRegistry) -> Result<Vec<NodeId>, Vec<NodeId>> {
    let count = store.count();
    let mut in_degree = vec![0usize; count];
    let mut ready = BinaryHeap::with_capacity(count);
    let mut order = Vec::with_capacity(count);

    // 1. Initialize In-Degrees (parallel edges count once per edge)
    for (i, degree) in in_degree.iter_mut().enumerate() {
        *degree = store.incoming[i].len();
        if *degree == 0 {
            ready.push(Reverse(NodeId::new(i)));
        }
    }

    // 2. Process ready nodes, smallest id first
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for edge in store.outgoing_edges(node) {
            let child = edge.consumer.index();
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                ready.push(Reverse(edge.consumer));
            }
        }
    }

    if order.len() != count {
        let placed: HashSet<NodeId> = order.into_iter().collect();
        return Err((0..count).map(NodeId::new).filter(|id| !placed.contains(id)).collect());
    }

    Ok(order)
}

/// Finds one representative cycle per strongly connected component.
///
/// Each cycle is returned as a closed walk `[a, b, ..., a]` starting at the
/// component's smallest id.
pub fn cycles(store: &GraphRegistry) -> Vec<Vec<NodeId>> {
    let mut graph: DiGraph<NodeId, ()> = DiGraph::with_capacity(store.count(), store.edges.len());
    for i in 0..store.count() {
        graph.add_node(NodeId::new(i));
    }
    for edge in &store.edges {
        graph.update_edge(NodeIndex::new(edge.producer.index()), NodeIndex::new(edge.consumer.index()), ());
    }

    let mut found: Vec<Vec<NodeId>> = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .map(|scc| {
            let members: HashSet<NodeId> = scc.iter().map(|&ix| graph[ix]).collect();
            trace_cycle(store, &members)
        })
        .collect();
    found.sort();
    found
}

/// Walks successors inside one component until a node repeats.
fn trace_cycle(store: &GraphRegistry, members: &HashSet<NodeId>) -> Vec<NodeId> {
    let start = members.iter().copied().min().unwrap_or_default();
    let mut path = vec![start];
    let mut current = start;

    loop {
        // Every member of a non-trivial component has a successor inside it.
        let next = store
            .outgoing_edges(current)
            .map(|e| e.consumer)
            .filter(|c| members.contains(c))
            .min()
            .unwrap_or(start);

        if let Some(pos) = path.iter().position(|&n| n == next) {
            let mut cycle = path.split_off(pos);
            cycle.push(next);
            return cycle;
        }
        path.push(next);
        current = next;
    }
}

/// Identifies all nodes downstream from the given start nodes (inclusive).
pub fn downstream_from(store: &GraphRegistry, start_nodes: &[NodeId]) -> HashSet<NodeId> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from(start_nodes.to_vec());

    while let Some(node) = queue.pop_front() {
        if visited.insert(node) {
            queue.extend(store.outgoing_edges(node).map(|e| e.consumer));
        }
    }
    visited
}

/// Identifies all nodes upstream from the given start nodes (inclusive).
pub fn upstream_from(store: &GraphRegistry, start_nodes: &[NodeId]) -> HashSet<NodeId> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from(start_nodes.to_vec());

    while let Some(node) = queue.pop_front() {
        if visited.insert(node) {
            queue.extend(store.incoming_edges(node).map(|e| e.producer));
        }
    }
    visited
}

/// True when there is no directed path between `a` and `b` in either direction.
pub fn independent(store: &GraphRegistry, a: NodeId, b: NodeId) -> bool {
    a != b && !downstream_from(store, &[a]).contains(&b) && !downstream_from(store, &[b]).contains(&a)
}
