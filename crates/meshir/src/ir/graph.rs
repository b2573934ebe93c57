use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use thiserror::Error;

use crate::ir::node::{Annotations, Edge, EdgeKind, Node, NodeId, NodeKind, Primitive};
use crate::ir::prim;
use crate::ir::types::{AbstractValue, GraphId};
use crate::ir::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("node {node} does not exist")]
    MissingNode { node: NodeId },
    #[error("{user} input {input} references missing node {producer}")]
    DanglingEdge {
        user: String,
        input: usize,
        producer: NodeId,
    },
    #[error("cycle through {node} is not closed by a recurrent edge")]
    Cycle { node: String },
    #[error("user index is stale (graph revision {graph}, index revision {index})")]
    StaleIndex { graph: u64, index: u64 },
    #[error("cannot replace {old} ({old_value}) with {new} ({new_value}): rank differs")]
    RankMismatch {
        old: String,
        new: String,
        old_value: String,
        new_value: String,
    },
    #[error("{node} is not a call")]
    NotACall { node: String },
    #[error("input {input} is out of range for {node}")]
    InputOutOfRange { node: String, input: usize },
}

/// Function graph stored as an arena of nodes addressed by [`NodeId`].
///
/// Removed nodes leave a hole so identifiers stay stable. Every mutation bumps
/// the revision counter, which [`GraphManager`](crate::ir::GraphManager) uses to
/// detect a stale user index.
#[derive(Debug, Clone)]
pub struct FuncGraph {
    pub name: String,
    nodes: Vec<Option<Node>>,
    parameters: Vec<NodeId>,
    outputs: Vec<Edge>,
    revision: u64,
}

impl FuncGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            parameters: Vec::new(),
            outputs: Vec::new(),
            revision: 0,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn bump(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    fn push(&mut self, kind: NodeKind, name: String, abstract_value: Option<AbstractValue>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(Node {
            id,
            kind,
            name,
            abstract_value,
            attrs: BTreeMap::new(),
            annotations: Annotations::default(),
        }));
        self.bump();
        id
    }

    pub fn add_parameter(&mut self, name: impl Into<String>, value: AbstractValue) -> NodeId {
        let name = name.into();
        let id = self.push(
            NodeKind::Parameter {
                name: name.clone(),
                has_default: false,
            },
            name,
            Some(value),
        );
        self.parameters.push(id);
        id
    }

    pub fn add_literal(&mut self, value: Value) -> NodeId {
        let abstract_value = value.abstract_value();
        let name = format!("const{}", self.nodes.len());
        self.push(NodeKind::Literal(value), name, Some(abstract_value))
    }

    pub fn add_graph_ref(&mut self, graph: GraphId) -> NodeId {
        let name = format!("{}{}", graph.0, self.nodes.len());
        let abstract_value = AbstractValue::Func(graph.clone());
        self.push(NodeKind::Graph(graph), name, Some(abstract_value))
    }

    /// Graphs referenced by live nodes, each once.
    pub fn referenced_graphs(&self) -> BTreeSet<&GraphId> {
        self.nodes().filter_map(Node::graph_ref).collect()
    }

    pub fn add_call(&mut self, prim: Primitive, inputs: Vec<Edge>) -> NodeId {
        let name = format!("{}-op{}", prim.name, self.nodes.len());
        self.push(NodeKind::Call { prim, inputs }, name, None)
    }

    /// Adds a call with plain data inputs taken from output 0 of each node.
    pub fn call(&mut self, prim: Primitive, inputs: &[NodeId]) -> NodeId {
        self.add_call(prim, inputs.iter().map(|id| Edge::data(*id)).collect())
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn get(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.node(id).ok_or(GraphError::MissingNode { node: id })
    }

    /// Mutable access. Always bumps the revision.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.bump();
        self.nodes.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.node_mut(id).ok_or(GraphError::MissingNode { node: id })
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter_map(Option::as_ref)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes().map(|n| n.id).collect()
    }

    pub fn parameters(&self) -> &[NodeId] {
        &self.parameters
    }

    pub fn outputs(&self) -> &[Edge] {
        &self.outputs
    }

    pub fn set_outputs(&mut self, outputs: Vec<Edge>) {
        self.outputs = outputs;
        self.bump();
    }

    pub fn set_abstract(&mut self, id: NodeId, value: AbstractValue) -> Result<(), GraphError> {
        self.get_mut(id)?.abstract_value = Some(value);
        Ok(())
    }

    pub fn set_stage(&mut self, id: NodeId, stage: u32) -> Result<(), GraphError> {
        self.get_mut(id)?.annotations.stage = Some(stage);
        Ok(())
    }

    /// Abstract value flowing along `edge`.
    pub fn abstract_of(&self, edge: &Edge) -> Option<&AbstractValue> {
        self.node(edge.node)?
            .abstract_value
            .as_ref()?
            .output(edge.output)
    }

    pub fn display_name(&self, id: NodeId) -> String {
        match self.node(id) {
            Some(node) => format!("{} ({})", node.name, id),
            None => format!("<removed {id}>"),
        }
    }

    /// Kahn topological order over live nodes, ties broken by creation id.
    /// Recurrent edges do not constrain the order.
    pub fn topo_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut indegree: BTreeMap<NodeId, usize> = BTreeMap::new();
        let mut consumers: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for node in self.nodes() {
            let entry = indegree.entry(node.id).or_insert(0);
            for edge in node.inputs() {
                if edge.kind == EdgeKind::Recurrent || !self.contains(edge.node) {
                    continue;
                }
                *entry += 1;
                consumers.entry(edge.node).or_default().push(node.id);
            }
        }

        let mut ready: BinaryHeap<Reverse<NodeId>> = indegree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| Reverse(*id))
            .collect();
        let mut order = Vec::with_capacity(indegree.len());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            for consumer in consumers.get(&id).into_iter().flatten() {
                if let Some(deg) = indegree.get_mut(consumer) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push(Reverse(*consumer));
                    }
                }
            }
        }

        if order.len() != indegree.len() {
            let stuck = indegree
                .iter()
                .find(|(_, deg)| **deg > 0)
                .map(|(id, _)| *id)
                .unwrap_or(NodeId(0));
            return Err(GraphError::Cycle {
                node: self.display_name(stuck),
            });
        }
        Ok(order)
    }

    /// Checks that every edge points at a live node and that the graph is
    /// acyclic outside recurrent edges.
    pub fn validate(&self) -> Result<(), GraphError> {
        for node in self.nodes() {
            for (input, edge) in node.inputs().iter().enumerate() {
                if !self.contains(edge.node) {
                    return Err(GraphError::DanglingEdge {
                        user: self.display_name(node.id),
                        input,
                        producer: edge.node,
                    });
                }
            }
        }
        for edge in &self.outputs {
            if !self.contains(edge.node) {
                return Err(GraphError::MissingNode { node: edge.node });
            }
        }
        self.topo_order().map(|_| ())
    }

    /// Nodes reachable backwards from `roots` through every edge kind.
    pub fn reachable_from(&self, roots: impl IntoIterator<Item = NodeId>) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<NodeId> = roots.into_iter().collect();
        while let Some(id) = stack.pop() {
            let Some(node) = self.node(id) else {
                continue;
            };
            if !seen.insert(id) {
                continue;
            }
            stack.extend(node.inputs().iter().map(|edge| edge.node));
        }
        seen
    }

    /// Removes every node not in `keep`, parameters included. Returns the
    /// number of removed nodes.
    pub fn retain_nodes(&mut self, keep: &BTreeSet<NodeId>) -> usize {
        let mut removed = 0;
        for slot in self.nodes.iter_mut() {
            if let Some(node) = slot {
                if !keep.contains(&node.id) {
                    *slot = None;
                    removed += 1;
                }
            }
        }
        self.parameters.retain(|id| keep.contains(id));
        if removed > 0 {
            self.bump();
        }
        removed
    }

    /// Garbage-collects nodes unreachable from the outputs, side-effecting
    /// calls, parameters and `extra_roots`.
    pub fn sweep(&mut self, extra_roots: &[NodeId]) -> usize {
        let mut roots: Vec<NodeId> = self.outputs.iter().map(|e| e.node).collect();
        roots.extend(self.parameters.iter().copied());
        roots.extend(extra_roots.iter().copied());
        roots.extend(
            self.nodes()
                .filter(|n| n.op_name().is_some_and(prim::is_side_effecting))
                .map(|n| n.id),
        );
        let keep = self.reachable_from(roots);
        self.retain_nodes(&keep)
    }

    /// Drops a parameter that has no remaining consumer.
    pub fn remove_parameter(&mut self, id: NodeId) -> bool {
        let used = self
            .nodes()
            .any(|n| n.inputs().iter().any(|e| e.node == id))
            || self.outputs.iter().any(|e| e.node == id);
        if used || !self.parameters.contains(&id) {
            return false;
        }
        self.parameters.retain(|p| *p != id);
        if let Some(slot) = self.nodes.get_mut(id.0 as usize) {
            *slot = None;
        }
        self.bump();
        true
    }
}
