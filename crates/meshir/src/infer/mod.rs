//! Shape and element-type inference.
//!
//! Every primitive is described by an [`OpDef`] record: its input names, a
//! coarse category used by the partitioner, and a pure inference function.
//! Registries are plain values; [`InferRegistry::builtin`] returns the set of
//! primitives this crate understands.

mod broadcast;
mod engine;
pub mod ops;
mod padding;

use std::collections::HashMap;

use thiserror::Error;

use crate::ir::{AbstractValue, Dim, Primitive, Shape, TensorSpec, Value};

pub use broadcast::broadcast_shapes;
pub use engine::{infer_graph, infer_node, InferStats};
pub use padding::{
    conv_output_dim, pad_needed, same_pad, Conv3dWindow, PadMode,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferError {
    /// Not enough is known about the inputs yet; callers skip rather than abort.
    #[error("{op}: cannot decide output: {reason}")]
    Undecided { op: String, reason: String },
    #[error("{op}: shape mismatch: {detail}")]
    ShapeMismatch { op: String, detail: String },
    #[error("{op}: input '{input}' has unsupported element type {dtype}")]
    TypeMismatch {
        op: String,
        input: String,
        dtype: String,
    },
    #[error("{op}: expected {expected} inputs, got {actual}")]
    InputCount {
        op: String,
        expected: String,
        actual: usize,
    },
    #[error("{op}: invalid attribute '{attr}': {detail}")]
    InvalidAttr {
        op: String,
        attr: String,
        detail: String,
    },
    #[error("no inference rule registered for '{op}'")]
    UnknownOp { op: String },
    #[error("graph @{graph} is malformed: {detail}")]
    Malformed { graph: String, detail: String },
    #[error("while inferring {node}: {source}")]
    Node {
        node: String,
        #[source]
        source: Box<InferError>,
    },
}

impl InferError {
    pub fn is_undecided(&self) -> bool {
        match self {
            InferError::Undecided { .. } => true,
            InferError::Node { source, .. } => source.is_undecided(),
            _ => false,
        }
    }

    pub(crate) fn undecided(op: &str, reason: impl Into<String>) -> Self {
        InferError::Undecided {
            op: op.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn mismatch(op: &str, detail: impl Into<String>) -> Self {
        InferError::ShapeMismatch {
            op: op.to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn attr(op: &str, attr: &str, detail: impl Into<String>) -> Self {
        InferError::InvalidAttr {
            op: op.to_string(),
            attr: attr.to_string(),
            detail: detail.into(),
        }
    }
}

pub type InferResult = Result<AbstractValue, InferError>;

/// Abstract value of one input together with its compile-time value when the
/// producer is a literal.
#[derive(Debug, Clone, PartialEq)]
pub struct InferInput {
    pub value: AbstractValue,
    pub literal: Option<Value>,
}

impl InferInput {
    pub fn new(value: AbstractValue) -> Self {
        Self {
            value,
            literal: None,
        }
    }

    pub fn literal(value: Value) -> Self {
        Self {
            value: value.abstract_value(),
            literal: Some(value),
        }
    }
}

pub type InferFn = fn(&Primitive, &[InferInput]) -> InferResult;

/// Coarse operator family, used to pick sharding transfer rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCategory {
    Elementwise,
    MatMul,
    BiasAdd,
    Reduce,
    Reshape,
    Transpose,
    ExpandDims,
    Squeeze,
    Softmax,
    Gather,
    Tile,
    Conv,
    Virtual,
    Communication,
    Other,
}

#[derive(Debug, Clone, Copy)]
pub struct OpDef {
    pub name: &'static str,
    pub inputs: &'static [&'static str],
    pub category: OpCategory,
    /// Shape-preserving ops the partitioner may look through.
    pub eliminable: bool,
    pub infer: InferFn,
}

impl OpDef {
    pub const fn new(
        name: &'static str,
        inputs: &'static [&'static str],
        category: OpCategory,
        infer: InferFn,
    ) -> Self {
        Self {
            name,
            inputs,
            category,
            eliminable: false,
            infer,
        }
    }

    pub const fn eliminable(mut self) -> Self {
        self.eliminable = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct InferRegistry {
    ops: HashMap<String, OpDef>,
}

impl InferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for def in ops::builtin_defs() {
            registry.register(def);
        }
        registry
    }

    pub fn register(&mut self, def: OpDef) -> &mut Self {
        self.ops.insert(def.name.to_string(), def);
        self
    }

    pub fn get(&self, name: &str) -> Option<&OpDef> {
        self.ops.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    pub fn input_names(&self, name: &str) -> Option<&'static [&'static str]> {
        self.get(name).map(|def| def.inputs)
    }

    pub fn category(&self, name: &str) -> OpCategory {
        self.get(name).map_or(OpCategory::Other, |def| def.category)
    }

    pub fn is_eliminable(&self, name: &str) -> bool {
        self.get(name).is_some_and(|def| def.eliminable)
    }

    pub fn infer(&self, prim: &Primitive, inputs: &[InferInput]) -> InferResult {
        let def = self.get(&prim.name).ok_or_else(|| InferError::UnknownOp {
            op: prim.name.clone(),
        })?;
        (def.infer)(prim, inputs)
    }
}

pub(crate) fn expect_inputs(
    prim: &Primitive,
    inputs: &[InferInput],
    min: usize,
) -> Result<(), InferError> {
    if inputs.len() < min {
        return Err(InferError::InputCount {
            op: prim.name.clone(),
            expected: format!("at least {min}"),
            actual: inputs.len(),
        });
    }
    Ok(())
}

/// Tensor view of input `index`; scalars are rank-0 tensors.
pub(crate) fn tensor_arg(
    prim: &Primitive,
    inputs: &[InferInput],
    index: usize,
) -> Result<TensorSpec, InferError> {
    expect_inputs(prim, inputs, index + 1)?;
    match &inputs[index].value {
        AbstractValue::Tensor(spec) => Ok(spec.clone()),
        AbstractValue::Scalar(dtype) => Ok(TensorSpec::new(*dtype, Shape::scalar())),
        other => Err(InferError::TypeMismatch {
            op: prim.name.clone(),
            input: format!("#{index}"),
            dtype: other.to_string(),
        }),
    }
}

/// Dimensions of a ranked tensor; unknown rank is an undecided outcome.
pub(crate) fn ranked_dims<'a>(prim: &Primitive, spec: &'a TensorSpec) -> Result<&'a [Dim], InferError> {
    spec.shape
        .dims()
        .ok_or_else(|| InferError::undecided(&prim.name, "input rank is unknown"))
}

/// Integer list read from attribute `attr`, or from the literal at `index`.
pub(crate) fn int_list_arg(
    prim: &Primitive,
    inputs: &[InferInput],
    index: usize,
    attr: &str,
) -> Option<Vec<i64>> {
    if let Some(values) = prim.int_list_attr(attr) {
        return Some(values);
    }
    inputs
        .get(index)
        .and_then(|input| input.literal.as_ref())
        .and_then(Value::as_int_list)
}

pub(crate) fn normalize_axis(op: &str, axis: i64, rank: usize) -> Result<usize, InferError> {
    let rank_i = rank as i64;
    let normalized = if axis < 0 { axis + rank_i } else { axis };
    if normalized < 0 || normalized >= rank_i.max(1) {
        return Err(InferError::attr(
            op,
            "axis",
            format!("axis {axis} out of range for rank {rank}"),
        ));
    }
    Ok(normalized as usize)
}
