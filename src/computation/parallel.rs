//! parallel.rs
//! Branch-parallel scheduling on a rayon worker pool.
//!
//! The caller thread acts as coordinator: it owns the ledger, dispatches every
//! node whose producers are complete, and releases dependents as completions
//! come back over a channel. Workers only ever see their own task.

use super::cancel::CancellationToken;
use super::engine::RunState;
use super::invoke::Invoker;
use super::ledger::{ExecutionError, NodeExecutionError};
use crate::graph::storage::GraphRegistry;
use crate::graph::{NodeId, Produced};
use crate::validation::Schedule;
use rayon::ThreadPoolBuilder;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::mpsc;
use tracing::{debug, trace};

type Completion = (NodeId, Result<Produced, NodeExecutionError>);

/// Ready nodes, smallest topological position first.
struct ReadyQueue {
    heap: BinaryHeap<Reverse<(usize, NodeId)>>,
    // Unfinished producers per node
    pending: Vec<usize>,
}

impl ReadyQueue {
    fn new(store: &GraphRegistry, schedule: &Schedule) -> Self {
        let pending: Vec<usize> = (0..store.count()).map(|i| store.producers(NodeId::new(i)).len()).collect();
        let heap = schedule
            .order()
            .iter()
            .filter(|id| pending[id.index()] == 0)
            .map(|&id| Reverse((schedule.position(id), id)))
            .collect();
        Self { heap, pending }
    }

    fn pop(&mut self) -> Option<NodeId> { self.heap.pop().map(|Reverse((_, id))| id) }

    /// Marks `id` as resolved, queueing consumers whose producers are all resolved.
    fn release(&mut self, store: &GraphRegistry, schedule: &Schedule, id: NodeId) {
        for consumer in store.consumers(id) {
            let left = &mut self.pending[consumer.index()];
            *left -= 1;
            if *left == 0 {
                self.heap.push(Reverse((schedule.position(consumer), consumer)));
            }
        }
    }
}

pub(crate) fn run(
    invoker: &Invoker<'_>,
    schedule: &Schedule,
    state: &mut RunState,
    cancel: &CancellationToken,
    max_workers: usize,
) -> Result<(), ExecutionError> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(max_workers)
        .thread_name(|i| format!("pipeline-worker-{}", i))
        .build()
        .map_err(|e| ExecutionError::WorkerPool(e.to_string()))?;
    debug!(workers = pool.current_num_threads(), "worker pool started");

    let store = &invoker.pipeline().store;
    let mut ready = ReadyQueue::new(store, schedule);
    let (tx, rx) = mpsc::channel::<Completion>();
    let mut in_flight = 0usize;

    pool.in_place_scope(|scope| loop {
        // 1. Dispatch everything that is ready
        while !state.should_stop() {
            if cancel.is_cancelled() {
                state.cancel();
                break;
            }
            let Some(id) = ready.pop() else { break };
            if state.is_blocked(store, id) {
                state.skip(id);
                ready.release(store, schedule, id);
                continue;
            }

            let task = invoker.prepare(id, &state.ledger);
            let tx = tx.clone();
            in_flight += 1;
            trace!(node = %id, in_flight, "dispatched");
            scope.spawn(move |_| {
                let result = invoker.invoke(task);
                let _ = tx.send((id, result));
            });
        }

        // 2. Wait for one completion; running nodes always finish
        if in_flight == 0 {
            break;
        }
        match rx.recv() {
            Ok((id, result)) => {
                in_flight -= 1;
                state.complete(id, result);
                ready.release(store, schedule, id);
            }
            Err(_) => break,
        }
    });

    Ok(())
}
