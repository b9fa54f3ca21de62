//! Defines the `Node` abstraction: an opaque computation wrapped with declared
//! semantic input/output types and a parameter schema.
//!
//! A `Node` is immutable once built and is shared through `NodeHandle`, so the
//! same declaration can be placed into several pipelines, or several times into
//! one pipeline with different parameters.

use super::error::NodeDefinitionError;
use super::params::{ParamSpec, ParameterSchema, ParameterSchemaError, Parameters};
use crate::computation::context::{Context, Metadata, Payload};
use crate::computation::ledger::NodeErrorKind;
use crate::type_system::{SemanticType, SemanticTypeRegistry};
use serde_json::Value;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Shared, immutable handle returned by node registration.
pub type NodeHandle = Arc<Node>;

/// What one invocation produced: a context per declared output port, plus
/// any values the computation observed for the run's probe results.
#[derive(Debug, Clone, Default)]
pub struct Produced {
    pub outputs: SmallVec<[Context; 1]>,
    pub observed: SmallVec<[Value; 1]>,
}

/// A named, typed connection point on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub name: Arc<str>,
    pub semantic_type: SemanticType,
}

/// Failure reported by a wrapped computation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct OperationError {
    message: String,
}

impl OperationError {
    pub fn new(message: impl Into<String>) -> Self { Self { message: message.into() } }
    pub fn message(&self) -> &str { &self.message }
}

impl From<String> for OperationError {
    fn from(message: String) -> Self { Self { message } }
}

impl From<&str> for OperationError {
    fn from(message: &str) -> Self { Self::new(message) }
}

/// The executable unit of a node.
///
/// Implementations must be pure with respect to engine state: they read the
/// input contexts and return fresh output contexts. The engine never looks
/// inside an operation.
pub trait Operation: Send + Sync + 'static {
    fn execute(&self, inputs: &NodeInputs, params: &Parameters) -> Result<NodeOutputs, OperationError>;
}

impl<F> Operation for F
where
    F: Fn(&NodeInputs, &Parameters) -> Result<NodeOutputs, OperationError> + Send + Sync + 'static,
{
    fn execute(&self, inputs: &NodeInputs, params: &Parameters) -> Result<NodeOutputs, OperationError> {
        self(inputs, params)
    }
}

/// Input contexts of one invocation, keyed by input port, in declared order.
#[derive(Debug, Clone, Default)]
pub struct NodeInputs {
    ports: SmallVec<[(Arc<str>, Context); 2]>,
}

impl NodeInputs {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, port: impl AsRef<str>, context: Context) -> Self {
        self.push(Arc::from(port.as_ref()), context);
        self
    }

    pub(crate) fn push(&mut self, port: Arc<str>, context: Context) { self.ports.push((port, context)); }

    pub fn get(&self, port: &str) -> Option<&Context> {
        self.ports.iter().find(|(name, _)| name.as_ref() == port).map(|(_, ctx)| ctx)
    }

    /// The context on the first declared input port.
    pub fn primary(&self) -> Option<&Context> { self.ports.first().map(|(_, ctx)| ctx) }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Context)> {
        self.ports.iter().map(|(name, ctx)| (name.as_ref(), ctx))
    }

    pub fn len(&self) -> usize { self.ports.len() }
    pub fn is_empty(&self) -> bool { self.ports.is_empty() }

    /// Union of all input metadata; later ports win on key collisions.
    pub fn merged_metadata(&self) -> Metadata {
        let mut merged = Metadata::new();
        for (_, ctx) in &self.ports {
            merged.extend(ctx.metadata().iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        merged
    }
}

/// Output contexts produced by an operation.
///
/// `single` fills the first declared output port; `with` addresses ports by
/// name. `observe` hands a value to the run's probe results instead of the
/// output context.
#[derive(Debug, Clone, Default)]
pub struct NodeOutputs {
    entries: SmallVec<[(Option<String>, Context); 1]>,
    observed: SmallVec<[Value; 1]>,
}

impl NodeOutputs {
    pub fn new() -> Self { Self::default() }

    pub fn single(context: Context) -> Self {
        let mut out = Self::default();
        out.entries.push((None, context));
        out
    }

    pub fn with(mut self, port: impl Into<String>, context: Context) -> Self {
        self.entries.push((Some(port.into()), context));
        self
    }

    pub fn observe(mut self, value: Value) -> Self {
        self.observed.push(value);
        self
    }

    fn take(&mut self, port: &str, is_first: bool) -> Option<Context> {
        let pos = self
            .entries
            .iter()
            .position(|(name, _)| name.as_deref() == Some(port))
            .or_else(|| if is_first { self.entries.iter().position(|(name, _)| name.is_none()) } else { None })?;
        Some(self.entries.remove(pos).1)
    }
}

pub struct Node {
    name: String,
    inputs: SmallVec<[Port; 2]>,
    outputs: SmallVec<[Port; 1]>,
    schema: ParameterSchema,
    created_keys: Vec<String>,
    operation: Arc<dyn Operation>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("schema", &self.schema)
            .field("created_keys", &self.created_keys)
            .finish_non_exhaustive()
    }
}

impl Node {
    pub fn builder(name: impl Into<String>) -> NodeBuilder {
        NodeBuilder {
            name: name.into(),
            inputs: SmallVec::new(),
            outputs: SmallVec::new(),
            schema: ParameterSchema::new(),
            created_keys: Vec::new(),
        }
    }

    /// A pass-through probe with ports `in` and `out` of `semantic_type`.
    pub fn probe<F>(
        name: &str,
        semantic_type: &str,
        keyword: &str,
        probe: F,
        registry: &SemanticTypeRegistry,
    ) -> Result<NodeHandle, NodeDefinitionError>
    where
        F: Fn(&Payload, &Parameters) -> Result<Value, OperationError> + Send + Sync + 'static,
    {
        Node::builder(name)
            .input("in", semantic_type)
            .output("out", semantic_type)
            .build_probe(keyword, probe, registry)
    }

    /// A pass-through probe whose results are collected per run rather than
    /// written into the context.
    pub fn collector<F>(name: &str, semantic_type: &str, probe: F, registry: &SemanticTypeRegistry) -> Result<NodeHandle, NodeDefinitionError>
    where
        F: Fn(&Payload, &Parameters) -> Result<Value, OperationError> + Send + Sync + 'static,
    {
        Node::builder(name)
            .input("in", semantic_type)
            .output("out", semantic_type)
            .build_collector(probe, registry)
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn inputs(&self) -> &[Port] { &self.inputs }
    pub fn outputs(&self) -> &[Port] { &self.outputs }
    pub fn schema(&self) -> &ParameterSchema { &self.schema }
    /// Context metadata keys this node adds (probe keywords).
    pub fn created_keys(&self) -> &[String] { &self.created_keys }

    pub fn input_index(&self, port: &str) -> Option<usize> {
        self.inputs.iter().position(|p| p.name.as_ref() == port)
    }

    pub fn output_index(&self, port: &str) -> Option<usize> {
        self.outputs.iter().position(|p| p.name.as_ref() == port)
    }

    pub fn validate_parameters(&self, values: &Parameters) -> Result<(), ParameterSchemaError> {
        self.schema.validate(values)
    }

    /// Runs the wrapped computation once.
    ///
    /// Returns one context per declared output port, in declared order, each
    /// re-tagged with that port's declared type.
    pub fn execute(&self, inputs: &NodeInputs, params: &Parameters) -> Result<SmallVec<[Context; 1]>, NodeErrorKind> {
        self.invoke(inputs, params).map(|produced| produced.outputs)
    }

    /// Like `execute`, keeping the observed values as well.
    pub fn invoke(&self, inputs: &NodeInputs, params: &Parameters) -> Result<Produced, NodeErrorKind> {
        self.validate_parameters(params)?;
        let mut produced = self
            .operation
            .execute(inputs, params)
            .map_err(|e| NodeErrorKind::Operation(e.message))?;

        let mut out = SmallVec::with_capacity(self.outputs.len());
        for (i, port) in self.outputs.iter().enumerate() {
            let ctx = produced
                .take(&port.name, i == 0)
                .ok_or_else(|| NodeErrorKind::MissingOutput(port.name.to_string()))?;
            out.push(ctx.retag(port.semantic_type.clone()));
        }
        Ok(Produced { outputs: out, observed: produced.observed })
    }
}

/// Collects a node declaration before it is checked against a registry.
#[derive(Debug, Clone)]
pub struct NodeBuilder {
    name: String,
    inputs: SmallVec<[Port; 2]>,
    outputs: SmallVec<[Port; 1]>,
    schema: ParameterSchema,
    created_keys: Vec<String>,
}

impl NodeBuilder {
    pub fn input(mut self, port: &str, semantic_type: &str) -> Self {
        self.inputs.push(Port { name: Arc::from(port), semantic_type: SemanticType::new(semantic_type) });
        self
    }

    pub fn output(mut self, port: &str, semantic_type: &str) -> Self {
        self.outputs.push(Port { name: Arc::from(port), semantic_type: SemanticType::new(semantic_type) });
        self
    }

    pub fn param(mut self, name: &str, spec: ParamSpec) -> Self {
        self.schema.insert(name, spec);
        self
    }

    /// Records a context metadata key the computation adds.
    pub fn creates(mut self, key: &str) -> Self {
        self.created_keys.push(key.to_string());
        self
    }

    /// Registers a closure as the node's computation.
    pub fn build<F>(self, operation: F, registry: &SemanticTypeRegistry) -> Result<NodeHandle, NodeDefinitionError>
    where
        F: Fn(&NodeInputs, &Parameters) -> Result<NodeOutputs, OperationError> + Send + Sync + 'static,
    {
        self.build_operation(operation, registry)
    }

    /// Registers any `Operation` implementation as the node's computation.
    pub fn build_operation<O: Operation>(self, operation: O, registry: &SemanticTypeRegistry) -> Result<NodeHandle, NodeDefinitionError> {
        self.check(registry)?;
        Ok(Arc::new(Node {
            name: self.name,
            inputs: self.inputs,
            outputs: self.outputs,
            schema: self.schema,
            created_keys: self.created_keys,
            operation: Arc::new(operation),
        }))
    }

    /// Builds a pass-through probe: the payload and type are forwarded
    /// unchanged and the probe's result is stored in the output context under
    /// `keyword`.
    pub fn build_probe<F>(self, keyword: &str, probe: F, registry: &SemanticTypeRegistry) -> Result<NodeHandle, NodeDefinitionError>
    where
        F: Fn(&Payload, &Parameters) -> Result<Value, OperationError> + Send + Sync + 'static,
    {
        self.check_probe_shape()?;
        let key = keyword.to_string();
        let builder = self.creates(keyword);
        builder.build(
            move |inputs: &NodeInputs, params: &Parameters| -> Result<NodeOutputs, OperationError> {
                let ctx = inputs.primary().ok_or_else(|| OperationError::new("probe received no input"))?;
                let observed = probe(ctx.payload(), params)?;
                Ok(NodeOutputs::single(ctx.clone().with_metadata(key.clone(), observed)))
            },
            registry,
        )
    }

    /// Builds a pass-through probe whose result is observed, not stored in the
    /// context. Every invocation adds one value to the run's probe results
    /// for this node.
    pub fn build_collector<F>(self, probe: F, registry: &SemanticTypeRegistry) -> Result<NodeHandle, NodeDefinitionError>
    where
        F: Fn(&Payload, &Parameters) -> Result<Value, OperationError> + Send + Sync + 'static,
    {
        self.check_probe_shape()?;
        self.build(
            move |inputs: &NodeInputs, params: &Parameters| -> Result<NodeOutputs, OperationError> {
                let ctx = inputs.primary().ok_or_else(|| OperationError::new("probe received no input"))?;
                let observed = probe(ctx.payload(), params)?;
                Ok(NodeOutputs::single(ctx.clone()).observe(observed))
            },
            registry,
        )
    }

    fn check_probe_shape(&self) -> Result<(), NodeDefinitionError> {
        let same_shape = self.inputs.len() == 1
            && self.outputs.len() == 1
            && self.inputs[0].semantic_type == self.outputs[0].semantic_type;
        if !same_shape {
            return Err(NodeDefinitionError::ProbeShape { node: self.name.clone() });
        }
        Ok(())
    }

    fn check(&self, registry: &SemanticTypeRegistry) -> Result<(), NodeDefinitionError> {
        if self.outputs.is_empty() {
            return Err(NodeDefinitionError::NoOutputs { node: self.name.clone() });
        }
        for ports in [&self.inputs[..], &self.outputs[..]] {
            for (i, port) in ports.iter().enumerate() {
                if ports[..i].iter().any(|p| p.name == port.name) {
                    return Err(NodeDefinitionError::DuplicatePort { node: self.name.clone(), port: port.name.to_string() });
                }
                if !registry.contains(port.semantic_type.as_str()) {
                    return Err(NodeDefinitionError::UnknownType {
                        node: self.name.clone(),
                        port: port.name.to_string(),
                        semantic_type: port.semantic_type.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::params::ParamKind;
    use serde_json::json;

    fn registry() -> SemanticTypeRegistry {
        let mut reg = SemanticTypeRegistry::new();
        reg.register("Image", &[]).unwrap();
        reg.register("Mask", &[]).unwrap();
        reg
    }

    fn image(values: Vec<f64>) -> Context {
        Context::new(Payload::series(values), "Image")
    }

    #[test]
    fn test_execute_retags_with_declared_output_type() {
        let reg = registry();
        let node = Node::builder("to_mask")
            .input("in", "Image")
            .output("out", "Mask")
            .build(|inputs: &NodeInputs, _: &Parameters| Ok(NodeOutputs::single(inputs.primary().unwrap().clone())), &reg)
            .unwrap();

        let inputs = NodeInputs::new().with("in", image(vec![1.0]));
        let out = node.execute(&inputs, &Parameters::new()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].semantic_type().as_str(), "Mask");
        // The input context is untouched.
        assert_eq!(inputs.primary().unwrap().semantic_type().as_str(), "Image");
    }

    #[test]
    fn test_execute_validates_parameters_first() {
        let reg = registry();
        let node = Node::builder("scale")
            .input("in", "Image")
            .output("out", "Image")
            .param("factor", ParamSpec::new(ParamKind::Number))
            .build(|_: &NodeInputs, _: &Parameters| panic!("must not run"), &reg)
            .unwrap();

        let inputs = NodeInputs::new().with("in", image(vec![1.0]));
        let err = node.execute(&inputs, &Parameters::new()).unwrap_err();
        assert!(matches!(err, NodeErrorKind::Parameters(ParameterSchemaError::Missing { .. })));
    }

    #[test]
    fn test_named_outputs_and_missing_output() {
        let reg = registry();
        let node = Node::builder("split")
            .input("in", "Image")
            .output("image", "Image")
            .output("mask", "Mask")
            .build(
                |inputs: &NodeInputs, _: &Parameters| {
                    let ctx = inputs.primary().unwrap().clone();
                    Ok(NodeOutputs::new().with("mask", ctx.clone()).with("image", ctx))
                },
                &reg,
            )
            .unwrap();
        let out = node.execute(&NodeInputs::new().with("in", image(vec![2.0])), &Parameters::new()).unwrap();
        assert_eq!(out[0].semantic_type().as_str(), "Image");
        assert_eq!(out[1].semantic_type().as_str(), "Mask");

        let partial = Node::builder("partial")
            .input("in", "Image")
            .output("image", "Image")
            .output("mask", "Mask")
            .build(|inputs: &NodeInputs, _: &Parameters| Ok(NodeOutputs::single(inputs.primary().unwrap().clone())), &reg)
            .unwrap();
        let err = partial.execute(&NodeInputs::new().with("in", image(vec![2.0])), &Parameters::new()).unwrap_err();
        assert_eq!(err, NodeErrorKind::MissingOutput("mask".into()));
    }

    #[test]
    fn test_operation_error_is_wrapped() {
        let reg = registry();
        let node = Node::builder("broken")
            .input("in", "Image")
            .output("out", "Image")
            .build(|_: &NodeInputs, _: &Parameters| Err(OperationError::new("kernel exploded")), &reg)
            .unwrap();
        let err = node.execute(&NodeInputs::new().with("in", image(vec![])), &Parameters::new()).unwrap_err();
        assert_eq!(err, NodeErrorKind::Operation("kernel exploded".into()));
    }

    #[test]
    fn test_definition_errors() {
        let reg = registry();
        let identity = |inputs: &NodeInputs, _: &Parameters| -> Result<NodeOutputs, OperationError> {
            Ok(NodeOutputs::single(inputs.primary().unwrap().clone()))
        };

        let err = Node::builder("a").input("in", "Volume").output("out", "Image").build(identity, &reg).unwrap_err();
        assert!(matches!(err, NodeDefinitionError::UnknownType { .. }));

        let err = Node::builder("b").input("in", "Image").input("in", "Image").output("out", "Image").build(identity, &reg).unwrap_err();
        assert!(matches!(err, NodeDefinitionError::DuplicatePort { .. }));

        let err = Node::builder("c").input("in", "Image").build(identity, &reg).unwrap_err();
        assert!(matches!(err, NodeDefinitionError::NoOutputs { .. }));
    }

    #[test]
    fn test_probe_writes_keyword_and_passes_payload_through() {
        let reg = registry();
        let probe = Node::builder("count")
            .input("in", "Image")
            .output("out", "Image")
            .build_probe("pixel_count", |payload: &Payload, _: &Parameters| Ok(json!(payload.len())), &reg)
            .unwrap();
        assert_eq!(probe.created_keys(), ["pixel_count".to_string()]);

        let input = image(vec![1.0, 2.0, 3.0]);
        let out = probe.execute(&NodeInputs::new().with("in", input.clone()), &Parameters::new()).unwrap();
        assert_eq!(out[0].payload(), input.payload());
        assert_eq!(out[0].get("pixel_count"), Some(&json!(3)));
        assert!(input.get("pixel_count").is_none());

        let err = Node::builder("bad")
            .input("in", "Image")
            .output("out", "Mask")
            .build_probe("k", |_: &Payload, _: &Parameters| Ok(json!(null)), &reg)
            .unwrap_err();
        assert!(matches!(err, NodeDefinitionError::ProbeShape { .. }));
    }

    #[test]
    fn test_collector_observes_without_touching_context() {
        let reg = registry();
        let mean = |payload: &Payload, _: &Parameters| -> Result<Value, OperationError> {
            let values = payload.as_slice().unwrap_or(&[]);
            Ok(json!(values.iter().sum::<f64>() / values.len() as f64))
        };
        let probe = Node::collector("mean", "Image", mean, &reg).unwrap();
        assert!(probe.created_keys().is_empty());

        let input = image(vec![1.0, 2.0, 3.0]);
        let produced = probe.invoke(&NodeInputs::new().with("in", input.clone()), &Parameters::new()).unwrap();
        assert_eq!(produced.outputs[0], input);
        assert_eq!(produced.observed.as_slice(), &[json!(2.0)]);

        let err = Node::builder("bad")
            .input("in", "Image")
            .output("out", "Mask")
            .build_collector(|_: &Payload, _: &Parameters| Ok(json!(null)), &reg)
            .unwrap_err();
        assert!(matches!(err, NodeDefinitionError::ProbeShape { .. }));
    }
}
