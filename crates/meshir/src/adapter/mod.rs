//! Per-node operator adaptation.
//!
//! An [`OpAdaptationInfo`] record says how a front-end operator maps onto a
//! backend: an optional rename, an optional pre-check, which data inputs
//! become static attributes of a target operator, and whether the backend
//! kernel table must confirm the target before it is committed.
//! [`OpAdapter`] applies those records one node at a time.

mod convert;
mod support;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ir::{prim, FuncGraph, NodeId, Value};

pub use convert::OpAdapter;
pub use support::{KernelQuery, KernelSpec, KernelSupport, KernelSupportTable, Unsupported};

/// When an adaptation record applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdaptPhase {
    /// Front-end normalisation shared by every backend.
    Unify,
    #[default]
    Backend,
}

/// Element type an input is converted to when it becomes an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrKind {
    Int,
    IntList,
    Float,
    Bool,
    Str,
    DType,
}

impl AttrKind {
    /// Converts a literal input into an attribute value, or `None` if the
    /// literal has no faithful representation of this kind.
    pub fn convert(self, value: &Value) -> Option<Value> {
        match self {
            AttrKind::Int => value.as_int().map(Value::Int),
            AttrKind::IntList => value.as_int_list().map(Value::IntList),
            AttrKind::Float => match value {
                Value::Float(f) => Some(Value::Float(*f)),
                Value::Int(i) => Some(Value::Float(*i as f64)),
                Value::Tensor(t) if t.dims.is_empty() => match &t.data {
                    Some(crate::ir::TensorData::Float(v)) => v.first().copied().map(Value::Float),
                    _ => None,
                },
                _ => None,
            },
            AttrKind::Bool => match value {
                Value::Bool(b) => Some(Value::Bool(*b)),
                Value::Tensor(t) if t.dims.is_empty() => match &t.data {
                    Some(crate::ir::TensorData::Bool(v)) => v.first().copied().map(Value::Bool),
                    _ => None,
                },
                _ => None,
            },
            AttrKind::Str => value.as_str().map(|s| Value::Str(s.to_string())),
            AttrKind::DType => match value {
                Value::Type(dtype) => Some(Value::Type(*dtype)),
                _ => None,
            },
        }
    }
}

/// Predicate run before any target is built; `false` aborts the adaptation.
pub type PreCheck = fn(&FuncGraph, NodeId) -> bool;

#[derive(Debug, Clone)]
pub struct OpAdaptationInfo {
    pub me_op_name: String,
    pub backend_op_name: String,
    pub target_op_name: String,
    pub phase: AdaptPhase,
    pub pre_check: Option<PreCheck>,
    pub need_support_check: bool,
    /// Data-input position to attribute kind.
    pub input_attr_map: BTreeMap<usize, AttrKind>,
    /// Primitive attributes set when the operator is renamed.
    pub rename_attrs: Vec<(String, Value)>,
}

impl OpAdaptationInfo {
    pub fn new(me_op_name: &str, phase: AdaptPhase) -> Self {
        Self {
            me_op_name: me_op_name.to_string(),
            backend_op_name: me_op_name.to_string(),
            target_op_name: me_op_name.to_string(),
            phase,
            pre_check: None,
            need_support_check: false,
            input_attr_map: BTreeMap::new(),
            rename_attrs: Vec::new(),
        }
    }

    pub fn backend_op(mut self, name: &str) -> Self {
        self.backend_op_name = name.to_string();
        self
    }

    pub fn target_op(mut self, name: &str) -> Self {
        self.target_op_name = name.to_string();
        self
    }

    pub fn pre_check(mut self, check: PreCheck) -> Self {
        self.pre_check = Some(check);
        self
    }

    pub fn support_check(mut self, needed: bool) -> Self {
        self.need_support_check = needed;
        self
    }

    pub fn input_attr(mut self, input: usize, kind: AttrKind) -> Self {
        self.input_attr_map.insert(input, kind);
        self
    }

    pub fn rename_attr(mut self, name: &str, value: Value) -> Self {
        self.rename_attrs.push((name.to_string(), value));
        self
    }

    pub fn renames(&self) -> bool {
        self.backend_op_name != self.me_op_name
    }
}

/// Adaptation records keyed by phase and front-end operator name.
#[derive(Debug, Clone, Default)]
pub struct OpAdaptationRegistry {
    infos: BTreeMap<(AdaptPhase, String), OpAdaptationInfo>,
}

impl OpAdaptationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, info: OpAdaptationInfo) -> &mut Self {
        self.infos
            .insert((info.phase, info.me_op_name.clone()), info);
        self
    }

    pub fn get(&self, phase: AdaptPhase, op: &str) -> Option<&OpAdaptationInfo> {
        self.infos.get(&(phase, op.to_string()))
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn names(&self, phase: AdaptPhase) -> impl Iterator<Item = &str> {
        self.infos
            .keys()
            .filter(move |(p, _)| *p == phase)
            .map(|(_, name)| name.as_str())
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            OpAdaptationInfo::new("SparseGatherV2", AdaptPhase::Unify)
                .backend_op(prim::GATHER)
                .rename_attr("is_sparse", Value::Bool(true)),
        );
        for op in [
            prim::REDUCE_SUM,
            prim::REDUCE_MEAN,
            prim::REDUCE_MAX,
            prim::REDUCE_MIN,
        ] {
            registry.register(
                OpAdaptationInfo::new(op, AdaptPhase::Backend)
                    .target_op(&format!("{op}D"))
                    .input_attr(1, AttrKind::IntList)
                    .support_check(true),
            );
        }
        registry
            .register(
                OpAdaptationInfo::new(prim::TRANSPOSE, AdaptPhase::Backend)
                    .target_op("TransposeD")
                    .input_attr(1, AttrKind::IntList)
                    .support_check(true),
            )
            .register(
                OpAdaptationInfo::new(prim::TILE, AdaptPhase::Backend)
                    .target_op("TileD")
                    .input_attr(1, AttrKind::IntList)
                    .pre_check(multiples_cover_rank)
                    .support_check(true),
            )
            .register(
                OpAdaptationInfo::new(prim::GATHER, AdaptPhase::Backend)
                    .target_op("GatherD")
                    .input_attr(2, AttrKind::Int)
                    .support_check(true),
            );
        registry
    }
}

/// `TileD` cannot add leading dimensions: its multiples must cover the input rank.
fn multiples_cover_rank(graph: &FuncGraph, node: NodeId) -> bool {
    let Some(node) = graph.node(node) else {
        return false;
    };
    let inputs: Vec<_> = node.data_inputs().map(|(_, e)| *e).collect();
    let (Some(x), Some(multiples)) = (inputs.first(), inputs.get(1)) else {
        return false;
    };
    let rank = graph.abstract_of(x).and_then(|v| v.rank());
    let count = graph
        .node(multiples.node)
        .and_then(|n| n.literal())
        .and_then(Value::as_int_list)
        .map(|m| m.len());
    matches!((rank, count), (Some(rank), Some(count)) if count >= rank)
}
