//! Fixture registries, nodes and contexts shared by unit tests.
use crate::computation::{CancellationToken, Context, Payload};
use crate::graph::{Node, NodeHandle, NodeInputs, NodeOutputs, OperationError, ParamKind, ParamSpec, Parameters};
use crate::type_system::SemanticTypeRegistry;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Image, GrayscaleImage <: Image, Histogram, and stacks of both image types.
pub(crate) fn imaging_registry() -> Arc<SemanticTypeRegistry> {
    let mut reg = SemanticTypeRegistry::new();
    reg.register("Image", &[]).unwrap();
    reg.register("GrayscaleImage", &["Image"]).unwrap();
    reg.register("Histogram", &[]).unwrap();
    reg.register_collection("ImageStack", "Image", &[]).unwrap();
    reg.register_collection("GrayscaleStack", "GrayscaleImage", &["ImageStack"]).unwrap();
    Arc::new(reg)
}

pub(crate) fn image(values: &[f64]) -> Context {
    Context::new(Payload::series(values.to_vec()), "Image")
}

pub(crate) fn stack(images: &[&[f64]]) -> Context {
    let items = images.iter().map(|values| Payload::series(values.to_vec())).collect();
    Context::new(Payload::collection(items), "ImageStack")
}

fn pass_through(inputs: &NodeInputs, _: &Parameters) -> Result<NodeOutputs, OperationError> {
    let ctx = inputs.primary().ok_or_else(|| OperationError::new("no input"))?;
    Ok(NodeOutputs::single(ctx.clone()))
}

/// Ports `in` and `out`, both of `semantic_type`; forwards its input.
pub(crate) fn identity(name: &str, semantic_type: &str, reg: &SemanticTypeRegistry) -> NodeHandle {
    Node::builder(name).input("in", semantic_type).output("out", semantic_type).build(pass_through, reg).unwrap()
}

/// Arbitrary ports; the primary input is forwarded to every output.
pub(crate) fn node_with(name: &str, inputs: &[(&str, &str)], outputs: &[(&str, &str)], reg: &SemanticTypeRegistry) -> NodeHandle {
    let mut builder = Node::builder(name);
    for (port, ty) in inputs {
        builder = builder.input(port, ty);
    }
    for (port, ty) in outputs {
        builder = builder.output(port, ty);
    }
    let names: Vec<String> = outputs.iter().map(|(port, _)| port.to_string()).collect();
    builder
        .build(
            move |inputs: &NodeInputs, _: &Parameters| -> Result<NodeOutputs, OperationError> {
                let ctx = inputs.primary().cloned().unwrap_or_else(|| Context::new(Payload::Empty, "Image"));
                Ok(names.iter().fold(NodeOutputs::new(), |out, port| out.with(port.clone(), ctx.clone())))
            },
            reg,
        )
        .unwrap()
}

/// Multiplies every cell by the required `factor` parameter.
pub(crate) fn scale(name: &str, reg: &SemanticTypeRegistry) -> NodeHandle {
    Node::builder(name)
        .input("in", "Image")
        .output("out", "Image")
        .param("factor", ParamSpec::new(ParamKind::Number))
        .build(
            |inputs: &NodeInputs, params: &Parameters| -> Result<NodeOutputs, OperationError> {
                let ctx = inputs.primary().ok_or_else(|| OperationError::new("no input"))?;
                let factor = params.get("factor").and_then(|v| v.as_f64()).unwrap_or(1.0);
                let payload = ctx.payload().map_values(|x| x * factor).ok_or_else(|| OperationError::new("not numeric"))?;
                Ok(NodeOutputs::single(ctx.derive(payload)))
            },
            reg,
        )
        .unwrap()
}

/// Element-wise sum of ports `a` and `b`.
pub(crate) fn add(name: &str, reg: &SemanticTypeRegistry) -> NodeHandle {
    Node::builder(name)
        .input("a", "Image")
        .input("b", "Image")
        .output("out", "Image")
        .build(
            |inputs: &NodeInputs, _: &Parameters| -> Result<NodeOutputs, OperationError> {
                let a = inputs.get("a").and_then(|c| c.payload().as_slice()).ok_or_else(|| OperationError::new("a"))?;
                let b = inputs.get("b").and_then(|c| c.payload().as_slice()).ok_or_else(|| OperationError::new("b"))?;
                let sum = a.iter().zip(b).map(|(x, y)| x + y).collect();
                Ok(NodeOutputs::single(Context::new(Payload::series(sum), "Image")))
            },
            reg,
        )
        .unwrap()
}

pub(crate) fn failing(name: &str, reg: &SemanticTypeRegistry) -> NodeHandle {
    Node::builder(name)
        .input("in", "Image")
        .output("out", "Image")
        .build(|_: &NodeInputs, _: &Parameters| -> Result<NodeOutputs, OperationError> { Err(OperationError::new("boom")) }, reg)
        .unwrap()
}

pub(crate) fn sleeping(name: &str, delay: Duration, reg: &SemanticTypeRegistry) -> NodeHandle {
    Node::builder(name)
        .input("in", "Image")
        .output("out", "Image")
        .build(
            move |inputs: &NodeInputs, params: &Parameters| {
                thread::sleep(delay);
                pass_through(inputs, params)
            },
            reg,
        )
        .unwrap()
}

/// Cancels `token` from inside its computation, then forwards its input.
pub(crate) fn cancelling(name: &str, token: CancellationToken, reg: &SemanticTypeRegistry) -> NodeHandle {
    Node::builder(name)
        .input("in", "Image")
        .output("out", "Image")
        .build(
            move |inputs: &NodeInputs, params: &Parameters| {
                token.cancel();
                pass_through(inputs, params)
            },
            reg,
        )
        .unwrap()
}
