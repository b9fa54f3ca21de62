//! ledger.rs
//! Per-run record of node outcomes, and the execution error taxonomy.

use super::context::Context;
use crate::graph::NodeId;
use smallvec::SmallVec;

pub use self::error::{ExecutionError, NodeErrorKind, NodeExecutionError};
mod error {
    use crate::graph::{NodeId, ParameterSchemaError, Parameters};
    use std::time::Duration;
    use thiserror::Error;

    /// What went wrong inside a single node invocation.
    #[derive(Error, Debug, Clone, PartialEq)]
    pub enum NodeErrorKind {
        #[error("{0}")]
        Operation(String),
        #[error(transparent)]
        Parameters(#[from] ParameterSchemaError),
        #[error("declared output port '{0}' was not produced")]
        MissingOutput(String),
        #[error("input port '{0}' is bound element-wise but did not receive a collection")]
        NotACollection(String),
        #[error("sliced inputs differ in length ({expected} vs {actual})")]
        SliceLengthMismatch { expected: usize, actual: usize },
        #[error("timed out after {0:?}")]
        Timeout(Duration),
        #[error("computation panicked: {0}")]
        Panicked(String),
    }

    /// A node failure, carrying the node's identity and the parameters it ran with.
    #[derive(Error, Debug, Clone, PartialEq)]
    #[error("Node '{node_name}' ({node_id}) failed: {kind}")]
    pub struct NodeExecutionError {
        pub node_id: NodeId,
        pub node_name: String,
        pub parameters: Parameters,
        #[source]
        pub kind: NodeErrorKind,
    }

    impl NodeExecutionError {
        pub fn is_timeout(&self) -> bool { matches!(self.kind, NodeErrorKind::Timeout(_)) }
    }

    #[derive(Error, Debug, Clone, PartialEq)]
    pub enum ExecutionError {
        #[error("Pipeline has not been validated")]
        NotValidated,
        #[error("Initial context of type '{actual}' cannot feed input '{port}' of '{node_name}' (expects '{expected}')")]
        InputTypeMismatch { node_name: String, port: String, expected: String, actual: String },
        #[error(transparent)]
        Node(#[from] NodeExecutionError),
        #[error("Run cancelled")]
        Cancelled,
        #[error("Failed to start worker pool: {0}")]
        WorkerPool(String),
    }
}

/// Final state of one node in a run.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// One context per declared output port.
    Completed(SmallVec<[Context; 1]>),
    Failed,
    /// Never scheduled: an upstream node failed, the run stopped, or it was cancelled.
    Skipped,
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    // Dense storage indexed by NodeId
    values: Vec<Option<NodeOutcome>>,
}

impl Ledger {
    pub fn new() -> Self { Self::default() }

    pub fn ensure_capacity(&mut self, size: usize) {
        if self.values.len() < size {
            self.values.resize(size, None);
        }
    }

    #[inline(always)]
    pub fn get(&self, node_id: NodeId) -> Option<&NodeOutcome> {
        self.values.get(node_id.index())?.as_ref()
    }

    #[inline(always)]
    pub fn insert(&mut self, node_id: NodeId, outcome: NodeOutcome) {
        let idx = node_id.index();
        if idx >= self.values.len() {
            self.values.resize(idx + 1, None);
        }
        self.values[idx] = Some(outcome);
    }

    /// The context produced on `port` by a completed node.
    pub fn output(&self, node_id: NodeId, port: usize) -> Option<&Context> {
        match self.get(node_id) {
            Some(NodeOutcome::Completed(outputs)) => outputs.get(port),
            _ => None,
        }
    }

    pub fn is_completed(&self, node_id: NodeId) -> bool {
        matches!(self.get(node_id), Some(NodeOutcome::Completed(_)))
    }

    /// True when the node failed or was skipped, so dependents must not run.
    pub fn is_blocked(&self, node_id: NodeId) -> bool {
        matches!(self.get(node_id), Some(NodeOutcome::Failed | NodeOutcome::Skipped))
    }

    /// Marks every node without an outcome as skipped.
    pub fn skip_unresolved(&mut self, count: usize) {
        self.ensure_capacity(count);
        for slot in &mut self.values {
            if slot.is_none() {
                *slot = Some(NodeOutcome::Skipped);
            }
        }
    }

    pub fn completed(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.ids_where(|o| matches!(o, NodeOutcome::Completed(_)))
    }

    pub fn failed(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.ids_where(|o| matches!(o, NodeOutcome::Failed))
    }

    pub fn skipped(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.ids_where(|o| matches!(o, NodeOutcome::Skipped))
    }

    fn ids_where(&self, pred: impl Fn(&NodeOutcome) -> bool + 'static) -> impl Iterator<Item = NodeId> + '_ {
        self.values
            .iter()
            .enumerate()
            .filter(move |(_, slot)| slot.as_ref().is_some_and(&pred))
            .map(|(i, _)| NodeId::new(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computation::context::Payload;
    use smallvec::smallvec;

    #[test]
    fn test_outcome_bookkeeping() {
        let mut ledger = Ledger::new();
        let ctx = Context::new(Payload::Scalar(1.0), "Scalar");
        ledger.insert(NodeId(0), NodeOutcome::Completed(smallvec![ctx.clone()]));
        ledger.insert(NodeId(2), NodeOutcome::Failed);
        ledger.skip_unresolved(4);

        assert_eq!(ledger.output(NodeId(0), 0), Some(&ctx));
        assert_eq!(ledger.output(NodeId(0), 1), None);
        assert!(ledger.is_blocked(NodeId(1)));
        assert!(ledger.is_blocked(NodeId(2)));
        assert_eq!(ledger.completed().collect::<Vec<_>>(), vec![NodeId(0)]);
        assert_eq!(ledger.failed().collect::<Vec<_>>(), vec![NodeId(2)]);
        assert_eq!(ledger.skipped().collect::<Vec<_>>(), vec![NodeId(1), NodeId(3)]);
    }
}
