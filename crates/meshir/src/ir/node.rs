use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ir::types::{AbstractValue, GraphId};
use crate::ir::value::Value;
use crate::parallel::strategy::{ParallelRole, Strategies, StrategyCandidate};

/// Stable arena identifier of a node. Ids are assigned in creation order and
/// never reused within a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Value dependency.
    Data,
    /// Pure ordering dependency; carries no value.
    Order,
    /// Back edge of a loop; the only kind allowed to close a cycle.
    Recurrent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub node: NodeId,
    pub output: u32,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn data(node: NodeId) -> Self {
        Self {
            node,
            output: 0,
            kind: EdgeKind::Data,
        }
    }

    pub fn data_at(node: NodeId, output: u32) -> Self {
        Self {
            node,
            output,
            kind: EdgeKind::Data,
        }
    }

    pub fn order(node: NodeId) -> Self {
        Self {
            node,
            output: 0,
            kind: EdgeKind::Order,
        }
    }

    pub fn recurrent(node: NodeId) -> Self {
        Self {
            node,
            output: 0,
            kind: EdgeKind::Recurrent,
        }
    }

    pub fn is_data(&self) -> bool {
        self.kind == EdgeKind::Data
    }
}

/// Named primitive plus its attribute map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Primitive {
    pub name: String,
    pub attrs: BTreeMap<String, Value>,
}

impl Primitive {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }

    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }

    pub fn has_attr(&self, key: &str) -> bool {
        self.attrs.contains_key(key)
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: Value) {
        self.attrs.insert(key.into(), value);
    }

    pub fn bool_attr(&self, key: &str) -> Option<bool> {
        self.attr(key).and_then(Value::as_bool)
    }

    pub fn int_attr(&self, key: &str) -> Option<i64> {
        self.attr(key).and_then(Value::as_int)
    }

    pub fn int_list_attr(&self, key: &str) -> Option<Vec<i64>> {
        self.attr(key).and_then(Value::as_int_list)
    }

    pub fn str_attr(&self, key: &str) -> Option<&str> {
        self.attr(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Call {
        prim: Primitive,
        inputs: Vec<Edge>,
    },
    Literal(Value),
    Parameter {
        name: String,
        has_default: bool,
    },
    /// Reference to another function graph. Like a literal it has no inputs.
    Graph(GraphId),
}

/// Placement and layout hints attached to a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotations {
    pub format: Option<String>,
    pub device_id: Option<u32>,
    pub dynamic: bool,
    pub stage: Option<u32>,
    pub strategy: Option<Strategies>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<StrategyCandidate>,
    pub role: Option<ParallelRole>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub name: String,
    pub abstract_value: Option<AbstractValue>,
    pub attrs: BTreeMap<String, Value>,
    pub annotations: Annotations,
}

impl Node {
    pub fn primitive(&self) -> Option<&Primitive> {
        match &self.kind {
            NodeKind::Call { prim, .. } => Some(prim),
            _ => None,
        }
    }

    pub fn primitive_mut(&mut self) -> Option<&mut Primitive> {
        match &mut self.kind {
            NodeKind::Call { prim, .. } => Some(prim),
            _ => None,
        }
    }

    pub fn op_name(&self) -> Option<&str> {
        self.primitive().map(|p| p.name.as_str())
    }

    pub fn is_call_to(&self, name: &str) -> bool {
        self.op_name() == Some(name)
    }

    pub fn inputs(&self) -> &[Edge] {
        match &self.kind {
            NodeKind::Call { inputs, .. } => inputs,
            _ => &[],
        }
    }

    pub fn data_inputs(&self) -> impl Iterator<Item = (usize, &Edge)> {
        self.inputs()
            .iter()
            .enumerate()
            .filter(|(_, edge)| edge.is_data())
    }

    pub fn literal(&self) -> Option<&Value> {
        match &self.kind {
            NodeKind::Literal(value) => Some(value),
            _ => None,
        }
    }

    pub fn graph_ref(&self) -> Option<&GraphId> {
        match &self.kind {
            NodeKind::Graph(graph) => Some(graph),
            _ => None,
        }
    }

    /// Literal or graph reference: a node fixed at compile time.
    pub fn is_constant(&self) -> bool {
        matches!(self.kind, NodeKind::Literal(_) | NodeKind::Graph(_))
    }

    pub fn is_parameter(&self) -> bool {
        matches!(self.kind, NodeKind::Parameter { .. })
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.kind, NodeKind::Literal(_))
    }

    pub fn is_call(&self) -> bool {
        matches!(self.kind, NodeKind::Call { .. })
    }

    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }

    /// Dynamic if flagged so, or if the inferred output carries unknown dims.
    pub fn is_dynamic(&self) -> bool {
        self.annotations.dynamic
            || self
                .abstract_value
                .as_ref()
                .is_some_and(AbstractValue::is_dynamic)
    }
}
