//! The central checker that binds every input port to its producer's type.
use super::registry::{SemanticType, SemanticTypeRegistry};
use super::rules::collections;
use super::rules::compatibility::{self, Binding};
use crate::graph::storage::GraphRegistry;
use crate::graph::{EdgeLabel, NodeId};
use crate::validation::ValidationError;
use smallvec::SmallVec;

/// What the checker learned about each node, indexed by `NodeId`.
#[derive(Debug, Clone, Default)]
pub(crate) struct TypeAssignment {
    pub input_bindings: Vec<SmallVec<[Binding; 2]>>,
    pub output_types: Vec<SmallVec<[SemanticType; 1]>>,
    pub sliced: Vec<bool>,
}

/// Walks an acyclic pipeline in topological order, binding each input port
/// and inferring the effective output types that downstream edges see.
pub struct TypeChecker<'a> {
    store: &'a GraphRegistry,
    registry: &'a SemanticTypeRegistry,
    input_type: Option<&'a SemanticType>,
    assignment: TypeAssignment,
    errors: Vec<ValidationError>,
}

impl<'a> TypeChecker<'a> {
    pub fn new(store: &'a GraphRegistry, registry: &'a SemanticTypeRegistry, input_type: Option<&'a SemanticType>) -> Self {
        let n = store.count();
        Self {
            store,
            registry,
            input_type,
            assignment: TypeAssignment {
                input_bindings: vec![SmallVec::new(); n],
                output_types: vec![SmallVec::new(); n],
                sliced: vec![false; n],
            },
            errors: Vec::new(),
        }
    }

    /// Checks every node of `order`, which must be a topological order of the
    /// whole pipeline. Errors are collected, never short-circuited.
    pub(crate) fn check(mut self, order: &[NodeId]) -> (TypeAssignment, Vec<ValidationError>) {
        for &id in order {
            self.check_node(id);
        }
        (self.assignment, self.errors)
    }

    fn check_node(&mut self, id: NodeId) {
        let instance = self.store.instance(id);
        let is_source = !self.store.has_incoming(id);

        // 1. Declared types must exist in this pipeline's registry
        for port in instance.node.inputs().iter().chain(instance.node.outputs()) {
            if !self.registry.contains(port.semantic_type.as_str()) {
                self.errors.push(ValidationError::UnknownType {
                    node_id: id,
                    node_name: instance.name.clone(),
                    semantic_type: port.semantic_type.clone(),
                });
            }
        }

        // 2. Bind each input port
        let mut bindings: SmallVec<[Binding; 2]> = SmallVec::with_capacity(instance.node.inputs().len());
        for (port_idx, port) in instance.node.inputs().iter().enumerate() {
            let (producer_type, label) = match self.store.input_edge(id, port_idx) {
                Some(edge) => {
                    let produced = self.assignment.output_types[edge.producer.index()].get(edge.output_port).cloned();
                    (produced, self.store.label(edge))
                }
                None if is_source => (
                    self.input_type.cloned(),
                    EdgeLabel {
                        producer: "<input>".to_string(),
                        output_port: "context".to_string(),
                        consumer: instance.name.clone(),
                        input_port: port.name.to_string(),
                    },
                ),
                // Unbound port; reported by the structure rules.
                None => (None, EdgeLabel::default()),
            };

            let binding = match producer_type {
                Some(producer_type) => {
                    match compatibility::bind(self.registry, producer_type.as_str(), port.semantic_type.as_str()) {
                        Some(binding) => binding,
                        None => {
                            self.errors.push(ValidationError::TypeMismatch {
                                edge: label,
                                producer_type,
                                consumer_type: port.semantic_type.clone(),
                            });
                            Binding::Direct
                        }
                    }
                }
                None => Binding::Direct,
            };
            bindings.push(binding);
        }

        // 3. Infer effective outputs
        let sliced = bindings.contains(&Binding::Sliced);
        let mut outputs: SmallVec<[SemanticType; 1]> = SmallVec::with_capacity(instance.node.outputs().len());
        for port in instance.node.outputs() {
            match collections::effective_output(self.registry, &port.semantic_type, sliced) {
                Ok(effective) => outputs.push(effective),
                Err(element) => {
                    self.errors.push(ValidationError::MissingCollectionType {
                        node_id: id,
                        node_name: instance.name.clone(),
                        port: port.name.to_string(),
                        element: element.clone(),
                    });
                    outputs.push(element);
                }
            }
        }

        // 4. Store for downstream nodes
        let idx = id.index();
        self.assignment.input_bindings[idx] = bindings;
        self.assignment.output_types[idx] = outputs;
        self.assignment.sliced[idx] = sliced;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::topology;
    use crate::graph::{Parameters, Pipeline};
    use crate::test_support::{identity, imaging_registry, node_with};
    use crate::validation::ValidationErrorKind;

    fn run(pipeline: &Pipeline) -> (TypeAssignment, Vec<ValidationError>) {
        let order = topology::sort(&pipeline.store).unwrap();
        TypeChecker::new(&pipeline.store, pipeline.registry(), pipeline.input_type()).check(&order)
    }

    #[test]
    fn test_sliced_producer_propagates_collection_type() {
        let reg = imaging_registry();
        let stack_source = identity("load", "ImageStack", &reg);
        let blur = identity("blur", "Image", &reg);
        let mut p = Pipeline::new(reg);
        let a = p.add_node(&stack_source, Parameters::new()).unwrap();
        let b = p.add_node(&blur, Parameters::new()).unwrap();
        let c = p.add_node(&blur, Parameters::new()).unwrap();
        p.link(a, b).unwrap();
        p.link(b, c).unwrap();

        let (types, errors) = run(&p);
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(types.input_bindings[b.index()].as_slice(), &[Binding::Sliced]);
        assert_eq!(types.output_types[b.index()][0].as_str(), "ImageStack");
        // The gathered stack is sliced again by the next element-wise consumer.
        assert_eq!(types.input_bindings[c.index()].as_slice(), &[Binding::Sliced]);
        assert!(types.sliced[c.index()]);
    }

    #[test]
    fn test_missing_collection_type_is_reported() {
        let reg = imaging_registry();
        let stack_source = identity("load", "ImageStack", &reg);
        let measure = node_with("measure", &[("in", "Image")], &[("out", "Histogram")], &reg);
        let mut p = Pipeline::new(reg);
        let a = p.add_node(&stack_source, Parameters::new()).unwrap();
        let b = p.add_node(&measure, Parameters::new()).unwrap();
        p.link(a, b).unwrap();

        let (_, errors) = run(&p);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), ValidationErrorKind::MissingCollectionType);
    }

    #[test]
    fn test_source_ports_checked_against_declared_input_type() {
        let reg = imaging_registry();
        let gray = identity("threshold", "GrayscaleImage", &reg);
        let mut p = Pipeline::new(reg);
        p.add_node(&gray, Parameters::new()).unwrap();
        p.set_input_type("Image").unwrap();

        let (_, errors) = run(&p);
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            ValidationError::TypeMismatch { edge, producer_type, consumer_type } => {
                assert_eq!(edge.to_string(), "<input>.context -> threshold.in");
                assert_eq!(producer_type.as_str(), "Image");
                assert_eq!(consumer_type.as_str(), "GrayscaleImage");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
