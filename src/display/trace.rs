use crate::analysis::topology;
use crate::graph::{NodeId, Pipeline};
use crate::provenance::{EntryStatus, ProvenanceLog};
use crate::type_system::Binding;
use std::collections::{BTreeSet, HashSet};
use std::fmt::Write;

/// Structural summary of a pipeline: for every node, its ports, where each
/// parameter comes from, and which context keys it adds.
///
/// Parameters that are neither configured, defaulted, nor created by an
/// upstream probe must be present in the initial context; they are listed as
/// the pipeline's required context keys.
pub fn inspect(pipeline: &Pipeline) -> String {
    let order: Vec<NodeId> = match pipeline.schedule() {
        Some(schedule) => schedule.order().to_vec(),
        None => topology::sort(&pipeline.store).unwrap_or_else(|_| pipeline.node_ids().collect()),
    };

    let mut created: HashSet<&str> = HashSet::new();
    let mut required: BTreeSet<&str> = BTreeSet::new();
    let mut body = String::new();

    for (step, &id) in order.iter().enumerate() {
        let instance = pipeline.store.instance(id);
        let node = &instance.node;
        let _ = writeln!(body, "\t{}. Node: {} ({}) [{}]", step + 1, instance.name, id, node.name());

        // --- Ports ---
        for (port_idx, port) in node.inputs().iter().enumerate() {
            let origin = match pipeline.store.input_edge(id, port_idx) {
                Some(edge) => pipeline.edge_label(edge).to_string(),
                None if !pipeline.store.has_incoming(id) => "initial context".to_string(),
                None => "unbound".to_string(),
            };
            let sliced = pipeline
                .schedule()
                .is_some_and(|s| s.input_binding(id, port_idx) == Binding::Sliced);
            let _ = writeln!(
                body,
                "\t\tInput {}: {} <- {}{}",
                port.name,
                port.semantic_type,
                origin,
                if sliced { " (sliced)" } else { "" }
            );
        }
        for port in node.outputs() {
            let _ = writeln!(body, "\t\tOutput {}: {}", port.name, port.semantic_type);
        }

        // --- Parameters ---
        let mut configured = Vec::new();
        let mut from_context = Vec::new();
        for name in node.schema().names() {
            if let Some(value) = instance.params.get(name) {
                configured.push(format!("{}={}", name, value));
                continue;
            }
            match node.schema().get(name).and_then(|spec| spec.default.as_ref()) {
                Some(default) => from_context.push(format!("{} (default: {})", name, default)),
                None => {
                    from_context.push(name.to_string());
                    if !created.contains(name) {
                        required.insert(name);
                    }
                }
            }
        }
        let _ = writeln!(body, "\t\tParameters from pipeline configuration: {}", list_or_none(&configured));
        let _ = writeln!(body, "\t\tParameters from context: {}", list_or_none(&from_context));
        let _ = writeln!(body, "\t\tContext additions: {}", list_or_none(node.created_keys()));
        created.extend(node.created_keys().iter().map(String::as_str));
    }

    let mut output = String::new();
    let _ = writeln!(output, "Pipeline Structure:");
    let required: Vec<&str> = required.into_iter().collect();
    let _ = writeln!(output, "\tRequired context keys: {}", list_or_none(&required));
    output.push_str(&body);
    output
}

/// Per-node wall-clock durations from a run's provenance log, in log order,
/// followed by the summed node time and the run's wall-clock span.
pub fn timings(log: &ProvenanceLog) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "Node timings:");

    for entry in log {
        let status = match &entry.status {
            EntryStatus::Succeeded => "ok",
            EntryStatus::Failed { .. } => "FAILED",
        };
        let _ = writeln!(
            output,
            "\t{} ({}): {:.3} ms{} [{}]",
            entry.node_name,
            entry.node_id,
            entry.elapsed.as_secs_f64() * 1e3,
            if entry.sliced { " sliced" } else { "" },
            status
        );
    }

    let busy: f64 = log.iter().map(|e| e.elapsed.as_secs_f64()).sum();
    let span = match (log.iter().map(|e| e.started_at).min(), log.iter().map(|e| e.finished_at).max()) {
        (Some(start), Some(end)) => (end - start).num_microseconds().unwrap_or(0) as f64 / 1e3,
        _ => 0.0,
    };
    let _ = writeln!(output, "\tTotal node time: {:.3} ms, wall clock: {:.3} ms", busy * 1e3, span);
    output
}

fn list_or_none<S: AsRef<str>>(items: &[S]) -> String {
    if items.is_empty() {
        "None".to_string()
    } else {
        items.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(", ")
    }
}
