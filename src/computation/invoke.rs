//! invoke.rs
//! A single node invocation, shared by the sequential and parallel schedulers.
//!
//! Preparing a task (reading producer outputs out of the ledger) happens on the
//! scheduling thread. Running it only needs the task itself, so it can be moved
//! to a worker or to a helper thread guarded by a timeout.

use super::context::{Context, Metadata, Payload};
use super::ledger::{Ledger, NodeErrorKind, NodeExecutionError};
use crate::graph::{NodeHandle, NodeId, NodeInputs, Parameters, Pipeline, Produced};
use crate::provenance::{EntryStatus, ProvenanceEntry, ProvenanceTracker};
use crate::type_system::{Binding, SemanticType, SemanticTypeRegistry};
use crate::validation::Schedule;
use chrono::Utc;
use serde_json::Value;
use smallvec::SmallVec;
use std::any::Any;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// The inputs of one node, detached from the ledger.
#[derive(Debug)]
pub(crate) struct Task {
    pub id: NodeId,
    inputs: NodeInputs,
}

pub(crate) struct Invoker<'a> {
    pipeline: &'a Pipeline,
    schedule: &'a Schedule,
    initial: &'a Context,
    timeout: Option<Duration>,
    tracker: &'a ProvenanceTracker,
}

impl<'a> Invoker<'a> {
    pub fn new(
        pipeline: &'a Pipeline,
        schedule: &'a Schedule,
        initial: &'a Context,
        timeout: Option<Duration>,
        tracker: &'a ProvenanceTracker,
    ) -> Self {
        Self { pipeline, schedule, initial, timeout, tracker }
    }

    pub fn pipeline(&self) -> &'a Pipeline { self.pipeline }

    /// Collects the node's inputs: producer outputs along its edges, or the
    /// initial context on every port of a source. All producers must have
    /// completed.
    pub fn prepare(&self, id: NodeId, ledger: &Ledger) -> Task {
        let store = &self.pipeline.store;
        let mut inputs = NodeInputs::new();
        for (port_idx, port) in store.instance(id).node.inputs().iter().enumerate() {
            let ctx = match store.input_edge(id, port_idx) {
                Some(edge) => ledger.output(edge.producer, edge.output_port),
                None => Some(self.initial),
            };
            if let Some(ctx) = ctx {
                inputs.push(port.name.clone(), ctx.clone());
            }
        }
        Task { id, inputs }
    }

    /// Runs the task and appends its provenance entry, success or failure.
    pub fn invoke(&self, task: Task) -> Result<Produced, NodeExecutionError> {
        let Task { id, inputs } = task;
        let instance = self.pipeline.store.instance(id);

        // 1. Resolve parameters: configured, then primary input metadata, then defaults
        let params = instance.node.schema().resolve(&instance.params, inputs.primary().map(Context::metadata));
        let input_types: Vec<SemanticType> = inputs.iter().map(|(_, ctx)| ctx.semantic_type().clone()).collect();
        let sliced = self.schedule.is_sliced(id);

        let work = Work {
            node: Arc::clone(&instance.node),
            inputs,
            params: params.clone(),
            bindings: SmallVec::from_slice(self.schedule.input_bindings(id)),
            sliced,
            output_types: (0..instance.node.outputs().len())
                .filter_map(|port| self.schedule.output_type(id, port).cloned())
                .collect(),
            registry: Arc::clone(self.pipeline.registry()),
        };

        // 2. Execute under the configured guard
        let started_at = Utc::now();
        let clock = Instant::now();
        let result = match self.timeout {
            Some(limit) => run_with_timeout(work, limit, &instance.name),
            None => guarded(move || work.run()),
        };
        let elapsed = clock.elapsed();

        // 3. Record
        let (output_types, status) = match &result {
            Ok(produced) => (produced.outputs.iter().map(|c| c.semantic_type().clone()).collect(), EntryStatus::Succeeded),
            Err(kind) => (Vec::new(), EntryStatus::Failed { message: kind.to_string() }),
        };
        self.tracker.record(ProvenanceEntry {
            sequence: 0,
            node_id: id,
            node_name: instance.name.clone(),
            operation: instance.node.name().to_string(),
            producers: self.pipeline.producers(id).into_vec(),
            input_types,
            output_types,
            parameters: params.clone(),
            started_at,
            finished_at: Utc::now(),
            elapsed,
            sliced,
            status,
        });

        match result {
            Ok(produced) => {
                debug!(node = %instance.name, elapsed_us = elapsed.as_micros() as u64, sliced, "node completed");
                Ok(produced)
            }
            Err(kind) => {
                warn!(node = %instance.name, error = %kind, "node failed");
                Err(NodeExecutionError { node_id: id, node_name: instance.name.clone(), parameters: params, kind })
            }
        }
    }
}

/// An owned, thread-movable unit of computation.
struct Work {
    node: NodeHandle,
    inputs: NodeInputs,
    params: Parameters,
    bindings: SmallVec<[Binding; 2]>,
    sliced: bool,
    // Effective output types; collection types when sliced
    output_types: SmallVec<[SemanticType; 1]>,
    registry: Arc<SemanticTypeRegistry>,
}

impl Work {
    fn run(&self) -> Result<Produced, NodeErrorKind> {
        if self.sliced {
            self.run_sliced()
        } else {
            self.node.invoke(&self.inputs, &self.params)
        }
    }

    /// Runs the node once per element of its sliced inputs and gathers each
    /// output port back into a collection. Non-sliced inputs are broadcast.
    ///
    /// Gathered metadata starts from the merged input metadata. A key the
    /// elements agree on keeps that single value; a key that differs between
    /// elements, or one the node creates, becomes an array in element order
    /// with `null` where an element lacks it. Observed values are kept in
    /// element order.
    fn run_sliced(&self) -> Result<Produced, NodeErrorKind> {
        // 1. All sliced inputs must be collections of one length
        let mut count: Option<usize> = None;
        for ((port, ctx), binding) in self.inputs.iter().zip(&self.bindings) {
            if *binding != Binding::Sliced {
                continue;
            }
            let elements = ctx.payload().elements().ok_or_else(|| NodeErrorKind::NotACollection(port.to_string()))?;
            match count {
                None => count = Some(elements.len()),
                Some(expected) if expected != elements.len() => {
                    return Err(NodeErrorKind::SliceLengthMismatch { expected, actual: elements.len() })
                }
                Some(_) => {}
            }
        }
        let count = count.unwrap_or(0);

        // 2. Element-wise execution
        let ports = self.node.outputs().len();
        let mut gathered: Vec<Vec<Payload>> = vec![Vec::with_capacity(count); ports];
        let mut element_metadata: Vec<Vec<Metadata>> = vec![Vec::with_capacity(count); ports];
        let mut observed = SmallVec::new();
        for i in 0..count {
            let mut element_inputs = NodeInputs::new();
            for ((port, ctx), binding) in self.inputs.iter().zip(&self.bindings) {
                let ctx = match binding {
                    Binding::Direct => ctx.clone(),
                    Binding::Sliced => self.element(ctx, i),
                };
                element_inputs.push(Arc::from(port), ctx);
            }
            let produced = self.node.invoke(&element_inputs, &self.params)?;
            for (port, ctx) in produced.outputs.into_iter().enumerate() {
                let (payload, _, meta) = ctx.into_parts();
                gathered[port].push(payload);
                element_metadata[port].push(meta);
            }
            observed.extend(produced.observed);
        }

        // 3. Gather
        let base = self.inputs.merged_metadata();
        let outputs = gathered
            .into_iter()
            .zip(element_metadata)
            .zip(&self.output_types)
            .map(|((items, metas), collection)| {
                let meta = gather_metadata(base.clone(), &metas, self.node.created_keys());
                Context::new(Payload::collection(items), collection.clone()).with_all_metadata(meta)
            })
            .collect();
        Ok(Produced { outputs, observed })
    }

    fn element(&self, ctx: &Context, index: usize) -> Context {
        let payload = ctx.payload().elements().and_then(|e| e.get(index)).cloned().unwrap_or_default();
        let element_type = self
            .registry
            .element_type(ctx.semantic_type().as_str())
            .cloned()
            .unwrap_or_else(|| ctx.semantic_type().clone());
        ctx.derive(payload).retag(element_type)
    }
}

fn gather_metadata(mut base: Metadata, elements: &[Metadata], created: &[String]) -> Metadata {
    let keys: BTreeSet<&String> = elements.iter().flat_map(|meta| meta.keys()).collect();
    for key in keys {
        let values: Vec<Value> = elements.iter().map(|meta| meta.get(key).cloned().unwrap_or(Value::Null)).collect();
        let agreed = values.windows(2).all(|pair| pair[0] == pair[1]) && !created.contains(key);
        let value = match values.first() {
            Some(first) if agreed => first.clone(),
            _ => Value::Array(values),
        };
        base.insert(key.clone(), value);
    }
    base
}

/// Runs `work` on a helper thread and gives up after `limit`. A late result
/// is dropped with the channel.
fn run_with_timeout(work: Work, limit: Duration, node_name: &str) -> Result<Produced, NodeErrorKind> {
    let (tx, rx) = mpsc::sync_channel(1);
    let spawned = thread::Builder::new().name(format!("node-{}", node_name)).spawn(move || {
        let _ = tx.send(guarded(move || work.run()));
    });
    if let Err(e) = spawned {
        return Err(NodeErrorKind::Operation(format!("failed to spawn node thread: {}", e)));
    }

    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(NodeErrorKind::Timeout(limit)),
        Err(RecvTimeoutError::Disconnected) => Err(NodeErrorKind::Panicked("node thread exited without a result".into())),
    }
}

/// Converts a panic inside a computation into a node failure.
fn guarded(f: impl FnOnce() -> Result<Produced, NodeErrorKind>) -> Result<Produced, NodeErrorKind> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(NodeErrorKind::Panicked(panic_message(payload))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}
