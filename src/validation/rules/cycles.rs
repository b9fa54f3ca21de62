//! Validation rule for acyclicity.

use crate::analysis::topology;
use crate::graph::storage::GraphRegistry;
use crate::validation::error::ValidationError;

/// Reports one `CycleDetected` per strongly connected component, naming the
/// nodes along a closed walk through it.
pub(crate) fn detect_cycles(store: &GraphRegistry) -> Vec<ValidationError> {
    topology::cycles(store)
        .into_iter()
        .map(|cycle| ValidationError::CycleDetected {
            path: cycle.iter().map(|&id| store.instance(id).name.clone()).collect(),
        })
        .collect()
}
