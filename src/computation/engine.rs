//! The execution engine: runs a validated pipeline under a `RunConfig`.
use super::cancel::CancellationToken;
use super::config::{ExecutionMode, FailurePolicy, RunConfig};
use super::context::Context;
use super::invoke::Invoker;
use super::ledger::{ExecutionError, Ledger, NodeExecutionError, NodeOutcome};
use super::parallel;
use crate::graph::storage::GraphRegistry;
use crate::graph::{NodeId, Pipeline, Produced};
use crate::provenance::{ProvenanceLog, ProvenanceTracker};
use crate::validation::Schedule;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    /// At least one node failed.
    Failed,
    Cancelled,
}

/// Everything a run produced, including the partial state of a failed or
/// cancelled run.
#[derive(Debug, Clone)]
pub struct RunResult {
    status: RunStatus,
    ledger: Ledger,
    sinks: Vec<NodeId>,
    errors: Vec<ExecutionError>,
    provenance: ProvenanceLog,
    probe_results: BTreeMap<NodeId, Vec<Value>>,
}

impl RunResult {
    pub fn status(&self) -> RunStatus { self.status }
    pub fn is_success(&self) -> bool { self.status == RunStatus::Succeeded }
    pub fn errors(&self) -> &[ExecutionError] { &self.errors }
    pub fn provenance(&self) -> &ProvenanceLog { &self.provenance }
    pub fn ledger(&self) -> &Ledger { &self.ledger }
    pub fn sinks(&self) -> &[NodeId] { &self.sinks }
    pub fn outcome(&self, id: NodeId) -> Option<&NodeOutcome> { self.ledger.get(id) }

    /// The first output port of a completed node.
    pub fn output(&self, id: NodeId) -> Option<&Context> { self.ledger.output(id, 0) }
    pub fn output_port(&self, id: NodeId, port: usize) -> Option<&Context> { self.ledger.output(id, port) }

    /// First-port outputs of the sinks that completed.
    pub fn sink_outputs(&self) -> Vec<(NodeId, &Context)> {
        self.sinks.iter().filter_map(|&id| self.output(id).map(|ctx| (id, ctx))).collect()
    }

    /// The output of the first sink, the usual result of a linear pipeline.
    pub fn final_output(&self) -> Option<&Context> { self.sinks.first().and_then(|&id| self.output(id)) }

    /// Values observed by collector probes, per node in invocation order.
    pub fn probe_results(&self) -> &BTreeMap<NodeId, Vec<Value>> { &self.probe_results }
    pub fn probe_result(&self, id: NodeId) -> Option<&[Value]> { self.probe_results.get(&id).map(Vec::as_slice) }

    pub fn completed(&self) -> Vec<NodeId> { self.ledger.completed().collect() }
    pub fn failed(&self) -> Vec<NodeId> { self.ledger.failed().collect() }
    pub fn skipped(&self) -> Vec<NodeId> { self.ledger.skipped().collect() }

    pub fn node_errors(&self) -> impl Iterator<Item = &NodeExecutionError> {
        self.errors.iter().filter_map(|e| match e {
            ExecutionError::Node(err) => Some(err),
            _ => None,
        })
    }

    /// Converts a non-successful run into its first error.
    pub fn into_result(self) -> Result<Self, ExecutionError> {
        match self.errors.first() {
            Some(err) => Err(err.clone()),
            None => Ok(self),
        }
    }
}

/// Bookkeeping shared by both schedulers.
#[derive(Debug)]
pub(crate) struct RunState {
    pub ledger: Ledger,
    errors: Vec<ExecutionError>,
    probe_results: BTreeMap<NodeId, Vec<Value>>,
    policy: FailurePolicy,
    stopped: bool,
    cancelled: bool,
}

impl RunState {
    fn new(nodes: usize, policy: FailurePolicy) -> Self {
        let mut ledger = Ledger::new();
        ledger.ensure_capacity(nodes);
        Self { ledger, errors: Vec::new(), probe_results: BTreeMap::new(), policy, stopped: false, cancelled: false }
    }

    /// True once fail-fast tripped or the run was cancelled.
    pub fn should_stop(&self) -> bool { self.stopped || self.cancelled }

    pub fn cancel(&mut self) {
        if !self.cancelled {
            info!("run cancelled; no further nodes will be scheduled");
            self.cancelled = true;
            self.errors.push(ExecutionError::Cancelled);
        }
    }

    /// True when some producer of `id` failed or was skipped.
    pub fn is_blocked(&self, store: &GraphRegistry, id: NodeId) -> bool {
        store.producers(id).iter().any(|&p| self.ledger.is_blocked(p))
    }

    pub fn skip(&mut self, id: NodeId) {
        debug!(node = %id, "skipped: upstream failure");
        self.ledger.insert(id, NodeOutcome::Skipped);
    }

    pub fn complete(&mut self, id: NodeId, result: Result<Produced, NodeExecutionError>) {
        match result {
            Ok(Produced { outputs, observed }) => {
                if !observed.is_empty() {
                    self.probe_results.entry(id).or_default().extend(observed);
                }
                self.ledger.insert(id, NodeOutcome::Completed(outputs));
            }
            Err(err) => {
                self.ledger.insert(id, NodeOutcome::Failed);
                self.errors.push(ExecutionError::Node(err));
                if self.policy == FailurePolicy::FailFast {
                    self.stopped = true;
                }
            }
        }
    }

    fn finish(mut self, schedule: &Schedule, provenance: ProvenanceLog) -> RunResult {
        self.ledger.skip_unresolved(schedule.len());
        let status = if self.cancelled {
            RunStatus::Cancelled
        } else if self.errors.is_empty() {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        RunResult {
            status,
            ledger: self.ledger,
            sinks: schedule.sinks().to_vec(),
            errors: self.errors,
            provenance,
            probe_results: self.probe_results,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: RunConfig,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(config: RunConfig) -> Self { Self { config, cancel: CancellationToken::new() } }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &RunConfig { &self.config }
    pub fn cancellation_token(&self) -> &CancellationToken { &self.cancel }

    /// Runs a validated pipeline from `initial`.
    ///
    /// Node failures do not make this return `Err`; they are reported in the
    /// `RunResult` according to the failure policy. `Err` means nothing ran.
    #[instrument(skip_all, fields(nodes = pipeline.node_count(), mode = ?self.config.mode))]
    pub fn run(&self, pipeline: &Pipeline, initial: Context) -> Result<RunResult, ExecutionError> {
        // 1. Preconditions
        let schedule = pipeline.schedule().ok_or(ExecutionError::NotValidated)?;
        check_initial_context(pipeline, schedule, &initial)?;

        // 2. Schedule
        let tracker = ProvenanceTracker::new();
        let mut state = RunState::new(pipeline.node_count(), self.config.failure_policy);
        {
            let invoker = Invoker::new(pipeline, schedule, &initial, self.config.per_node_timeout(), &tracker);
            match self.config.mode {
                ExecutionMode::Sequential => self.run_sequential(&invoker, schedule, &mut state),
                ExecutionMode::Parallel => {
                    parallel::run(&invoker, schedule, &mut state, &self.cancel, self.config.max_workers)?
                }
            }
        }

        // 3. Collect
        let result = state.finish(schedule, tracker.into_log());
        match result.status {
            RunStatus::Succeeded => info!(entries = result.provenance.len(), "run succeeded"),
            status => warn!(?status, errors = result.errors.len(), "run did not succeed"),
        }
        Ok(result)
    }

    fn run_sequential(&self, invoker: &Invoker<'_>, schedule: &Schedule, state: &mut RunState) {
        let store = &invoker.pipeline().store;
        for &id in schedule.order() {
            if self.cancel.is_cancelled() {
                state.cancel();
            }
            if state.should_stop() {
                break;
            }
            if state.is_blocked(store, id) {
                state.skip(id);
                continue;
            }
            let task = invoker.prepare(id, &state.ledger);
            let result = invoker.invoke(task);
            state.complete(id, result);
        }
    }
}

/// Runs `pipeline` once with a fresh engine.
pub fn run(pipeline: &Pipeline, initial: Context, config: &RunConfig) -> Result<RunResult, ExecutionError> {
    Engine::new(config.clone()).run(pipeline, initial)
}

/// The initial context must fit every source port: directly against the
/// port type, or against the declared input type whose bindings (possibly
/// sliced) were fixed at validation.
fn check_initial_context(pipeline: &Pipeline, schedule: &Schedule, initial: &Context) -> Result<(), ExecutionError> {
    let registry = pipeline.registry();
    let actual = initial.semantic_type();

    for &id in schedule.sources() {
        let instance = pipeline.store.instance(id);
        for port in instance.node.inputs() {
            let expected = pipeline.input_type().unwrap_or(&port.semantic_type);
            if !registry.is_compatible(actual.as_str(), expected.as_str()) {
                return Err(ExecutionError::InputTypeMismatch {
                    node_name: instance.name.clone(),
                    port: port.name.to_string(),
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computation::{NodeErrorKind, Payload};
    use crate::graph::{Node, NodeInputs, NodeOutputs, OperationError, Parameters};
    use crate::test_support::*;
    use serde_json::json;
    use std::time::Duration;

    fn chain(reg: &std::sync::Arc<crate::type_system::SemanticTypeRegistry>, nodes: &[crate::graph::NodeHandle]) -> (Pipeline, Vec<NodeId>) {
        let mut p = Pipeline::new(reg.clone());
        let ids: Vec<NodeId> = nodes.iter().map(|n| p.add_node(n, Parameters::new()).unwrap()).collect();
        for pair in ids.windows(2) {
            p.link(pair[0], pair[1]).unwrap();
        }
        (p, ids)
    }

    #[test]
    fn test_unvalidated_pipeline_is_rejected() {
        let reg = imaging_registry();
        let (p, _) = chain(&reg, &[identity("a", "Image", &reg)]);
        let err = run(&p, image(&[1.0]), &RunConfig::default()).unwrap_err();
        assert_eq!(err, ExecutionError::NotValidated);
    }

    #[test]
    fn test_identity_chain_preserves_payload_and_logs_in_order() {
        let reg = imaging_registry();
        let node = identity("step", "Image", &reg);
        let (mut p, ids) = chain(&reg, &vec![node; 5]);
        p.validate().unwrap();

        let input = image(&[1.0, 2.0, 3.0]).with_metadata("source", "camera");
        let result = run(&p, input.clone(), &RunConfig::default()).unwrap();

        assert_eq!(result.status(), RunStatus::Succeeded);
        assert_eq!(result.final_output(), Some(&input));
        let logged: Vec<NodeId> = result.provenance().iter().map(|e| e.node_id).collect();
        assert_eq!(logged, ids);
        assert_eq!(result.provenance().entries()[1].producers, vec![ids[0]]);
    }

    #[test]
    fn test_type_mismatch_leaves_pipeline_unrunnable() {
        let reg = imaging_registry();
        let (mut p, _) = chain(&reg, &[identity("image", "Image", &reg), identity("gray", "GrayscaleImage", &reg)]);
        assert!(p.validate().is_err());
        assert_eq!(run(&p, image(&[1.0]), &RunConfig::default()).unwrap_err(), ExecutionError::NotValidated);
    }

    #[test]
    fn test_initial_context_must_fit_sources() {
        let reg = imaging_registry();
        let (mut p, _) = chain(&reg, &[identity("a", "GrayscaleImage", &reg)]);
        p.validate().unwrap();

        let err = run(&p, image(&[1.0]), &RunConfig::default()).unwrap_err();
        assert!(matches!(err, ExecutionError::InputTypeMismatch { ref expected, .. } if expected == "GrayscaleImage"));

        // A descendant type is accepted.
        let gray = Context::new(Payload::series(vec![1.0]), "GrayscaleImage");
        assert!(run(&p, gray, &RunConfig::default()).unwrap().is_success());
    }

    fn branching(reg: &std::sync::Arc<crate::type_system::SemanticTypeRegistry>) -> (Pipeline, [NodeId; 4]) {
        // load -> broken -> after, load -> other (after `broken` in order)
        let mut p = Pipeline::new(reg.clone());
        let load = p.add_node(&identity("load", "Image", reg), Parameters::new()).unwrap();
        let broken = p.add_node(&failing("broken", reg), Parameters::new()).unwrap();
        let other = p.add_node(&identity("other", "Image", reg), Parameters::new()).unwrap();
        let after = p.add_node(&identity("after", "Image", reg), Parameters::new()).unwrap();
        p.link(load, broken).unwrap();
        p.link(load, other).unwrap();
        p.link(broken, after).unwrap();
        p.validate().unwrap();
        (p, [load, broken, other, after])
    }

    #[test]
    fn test_fail_fast_stops_scheduling() {
        let reg = imaging_registry();
        let (p, [load, broken, other, after]) = branching(&reg);
        let result = run(&p, image(&[1.0]), &RunConfig::default()).unwrap();

        assert_eq!(result.status(), RunStatus::Failed);
        assert_eq!(result.completed(), vec![load]);
        assert_eq!(result.failed(), vec![broken]);
        assert_eq!(result.skipped(), vec![other, after]);
        assert_eq!(result.provenance().len(), 2);
        assert!(result.provenance().for_node(other).is_none());

        let err = result.node_errors().next().unwrap();
        assert_eq!(err.node_name, "broken");
        assert_eq!(err.kind, NodeErrorKind::Operation("boom".into()));
    }

    #[test]
    fn test_best_effort_keeps_independent_branches() {
        let reg = imaging_registry();
        let (p, [load, broken, other, after]) = branching(&reg);
        let config = RunConfig::new().with_failure_policy(FailurePolicy::BestEffort);
        let result = run(&p, image(&[1.0]), &config).unwrap();

        assert_eq!(result.status(), RunStatus::Failed);
        assert_eq!(result.completed(), vec![load, other]);
        assert_eq!(result.failed(), vec![broken]);
        assert_eq!(result.skipped(), vec![after]);
        assert!(result.provenance().for_node(other).is_some_and(|e| e.succeeded()));
        assert_eq!(result.provenance().failures().count(), 1);
        assert_eq!(result.errors().len(), 1);
        assert!(result.into_result().is_err());
    }

    #[test]
    fn test_parameters_resolve_from_configuration_then_context() {
        let reg = imaging_registry();
        let node = scale("scale", &reg);
        let mut p = Pipeline::new(reg.clone());
        let from_context = p.add_node(&node, Parameters::new()).unwrap();
        let configured = p.add_node(&node, Parameters::from([("factor".to_string(), json!(10.0))])).unwrap();
        p.link(from_context, configured).unwrap();
        p.validate().unwrap();

        let input = image(&[1.0, 2.0]).with_metadata("factor", 3.0);
        let result = run(&p, input, &RunConfig::default()).unwrap();
        assert_eq!(result.output(from_context).unwrap().payload(), &Payload::series(vec![3.0, 6.0]));
        assert_eq!(result.output(configured).unwrap().payload(), &Payload::series(vec![30.0, 60.0]));
        assert_eq!(result.provenance().for_node(from_context).unwrap().parameters["factor"], json!(3.0));

        // Neither configured nor in the context.
        let result = run(&p, image(&[1.0]), &RunConfig::default()).unwrap();
        let err = result.node_errors().next().unwrap();
        assert!(matches!(err.kind, NodeErrorKind::Parameters(_)));
    }

    #[test]
    fn test_probe_result_reaches_downstream_context() {
        let reg = imaging_registry();
        let probe = Node::builder("measure")
            .input("in", "Image")
            .output("out", "Image")
            .build_probe("cells", |payload: &Payload, _: &Parameters| Ok(json!(payload.len())), &reg)
            .unwrap();
        let (mut p, ids) = chain(&reg, &[probe, identity("after", "Image", &reg)]);
        p.validate().unwrap();

        let result = run(&p, image(&[1.0, 2.0, 3.0, 4.0]), &RunConfig::default()).unwrap();
        let out = result.output(ids[1]).unwrap();
        assert_eq!(out.get("cells"), Some(&json!(4)));
        assert_eq!(out.payload(), &Payload::series(vec![1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn test_sliced_probe_keeps_every_element_measurement() {
        let reg = imaging_registry();
        let probe = Node::probe("measure", "Image", "cells", |payload: &Payload, _: &Parameters| Ok(json!(payload.len())), &reg)
            .unwrap();
        let mut p = Pipeline::new(reg.clone());
        let id = p.add_node(&probe, Parameters::new()).unwrap();
        p.set_input_type("ImageStack").unwrap();
        p.validate().unwrap();

        let input = stack(&[&[1.0], &[1.0, 2.0], &[1.0, 2.0, 3.0]]).with_metadata("source", "camera");
        let result = run(&p, input, &RunConfig::default()).unwrap();
        let out = result.output(id).unwrap();
        assert_eq!(out.get("cells"), Some(&json!([1, 2, 3])));
        // Keys every element agrees on stay scalar.
        assert_eq!(out.get("source"), Some(&json!("camera")));
    }

    #[test]
    fn test_collector_results_come_back_per_node() {
        let reg = imaging_registry();
        let count = |payload: &Payload, _: &Parameters| -> Result<serde_json::Value, OperationError> { Ok(json!(payload.len())) };
        let collector = Node::collector("count", "Image", count, &reg).unwrap();
        let (mut p, ids) = chain(&reg, &[collector.clone(), identity("after", "Image", &reg)]);
        p.validate().unwrap();

        let input = image(&[1.0, 2.0]);
        let result = run(&p, input.clone(), &RunConfig::default()).unwrap();
        assert_eq!(result.probe_result(ids[0]), Some(&[json!(2)][..]));
        assert!(result.probe_result(ids[1]).is_none());
        assert_eq!(result.output(ids[1]), Some(&input));

        // Sliced, one value per element in order.
        let mut sliced = Pipeline::new(reg.clone());
        let id = sliced.add_node(&collector, Parameters::new()).unwrap();
        sliced.set_input_type("ImageStack").unwrap();
        sliced.validate().unwrap();
        let result = run(&sliced, stack(&[&[1.0, 2.0, 3.0], &[], &[4.0]]), &RunConfig::parallel(2)).unwrap();
        assert_eq!(result.probe_results().len(), 1);
        assert_eq!(result.probe_result(id), Some(&[json!(3), json!(0), json!(1)][..]));
    }

    #[test]
    fn test_sliced_source_runs_per_element() {
        let reg = imaging_registry();
        let mut p = Pipeline::new(reg.clone());
        let id = p.add_node(&scale("scale", &reg), Parameters::from([("factor".to_string(), json!(2.0))])).unwrap();
        p.set_input_type("ImageStack").unwrap();
        p.validate().unwrap();

        let result = run(&p, stack(&[&[1.0], &[2.0, 3.0], &[]]), &RunConfig::default()).unwrap();
        let out = result.output(id).unwrap();
        assert_eq!(out.semantic_type().as_str(), "ImageStack");
        assert_eq!(
            out.payload(),
            &Payload::collection(vec![Payload::series(vec![2.0]), Payload::series(vec![4.0, 6.0]), Payload::series(vec![])])
        );
        let entry = result.provenance().for_node(id).unwrap();
        assert!(entry.sliced);
        assert_eq!(entry.input_types[0].as_str(), "ImageStack");
    }

    #[test]
    fn test_slice_length_mismatch_fails_node() {
        let reg = imaging_registry();
        let crop = Node::builder("drop_first")
            .input("in", "ImageStack")
            .output("out", "ImageStack")
            .build(
                |inputs: &NodeInputs, _: &Parameters| -> Result<NodeOutputs, OperationError> {
                    let ctx = inputs.primary().unwrap();
                    let rest = ctx.payload().elements().unwrap()[1..].to_vec();
                    Ok(NodeOutputs::single(ctx.derive(Payload::collection(rest))))
                },
                &reg,
            )
            .unwrap();
        let mut p = Pipeline::new(reg.clone());
        let load = p.add_node(&identity("load", "ImageStack", &reg), Parameters::new()).unwrap();
        let cropped = p.add_node(&crop, Parameters::new()).unwrap();
        let sum = p.add_node(&add("sum", &reg), Parameters::new()).unwrap();
        p.link(load, cropped).unwrap();
        p.connect(load, "out", sum, "a").unwrap();
        p.connect(cropped, "out", sum, "b").unwrap();
        p.validate().unwrap();

        let result = run(&p, stack(&[&[1.0], &[2.0], &[3.0]]), &RunConfig::default()).unwrap();
        let err = result.node_errors().next().unwrap();
        assert_eq!(err.node_id, sum);
        assert_eq!(err.kind, NodeErrorKind::SliceLengthMismatch { expected: 3, actual: 2 });
    }

    #[test]
    fn test_timeout_fails_node_and_discards_late_result() {
        let reg = imaging_registry();
        let (mut p, ids) = chain(&reg, &[sleeping("slow", Duration::from_millis(500), &reg)]);
        p.validate().unwrap();

        let config = RunConfig::new().with_timeout(Duration::from_millis(20));
        let result = run(&p, image(&[1.0]), &config).unwrap();
        let err = result.node_errors().next().unwrap();
        assert!(err.is_timeout());
        assert_eq!(result.failed(), vec![ids[0]]);
        assert!(result.output(ids[0]).is_none());
    }

    #[test]
    fn test_panicking_computation_becomes_node_error() {
        let reg = imaging_registry();
        let node = Node::builder("explode")
            .input("in", "Image")
            .output("out", "Image")
            .build(|_: &NodeInputs, _: &Parameters| -> Result<NodeOutputs, OperationError> { panic!("kernel bug") }, &reg)
            .unwrap();
        let (mut p, _) = chain(&reg, &[node]);
        p.validate().unwrap();

        let result = run(&p, image(&[1.0]), &RunConfig::default()).unwrap();
        let err = result.node_errors().next().unwrap();
        assert_eq!(err.kind, NodeErrorKind::Panicked("kernel bug".into()));
        assert_eq!(result.provenance().failures().count(), 1);
    }

    #[test]
    fn test_cancellation_between_nodes() {
        let reg = imaging_registry();
        let token = CancellationToken::new();
        let (mut p, ids) = chain(
            &reg,
            &[identity("first", "Image", &reg), cancelling("second", token.clone(), &reg), identity("third", "Image", &reg)],
        );
        p.validate().unwrap();

        let result = Engine::new(RunConfig::default()).with_cancellation(token).run(&p, image(&[1.0])).unwrap();
        assert_eq!(result.status(), RunStatus::Cancelled);
        assert_eq!(result.errors(), &[ExecutionError::Cancelled]);
        assert_eq!(result.completed(), vec![ids[0], ids[1]]);
        assert_eq!(result.skipped(), vec![ids[2]]);
        assert_eq!(result.provenance().len(), 2);
    }
}
