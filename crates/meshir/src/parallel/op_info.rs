use std::collections::{BTreeMap, BTreeSet};

use log::warn;

use crate::infer::{InferInput, InferRegistry, OpCategory};
use crate::ir::{prim, AbstractValue, Edge, EdgeKind, FuncGraph, NodeId, NodeKind, Primitive, Shape};
use crate::parallel::rules::{layout_of, OpLayout};
use crate::parallel::StrategyError;

/// Where a tensor input of an operator comes from, after looking through
/// `Depend` and `Load`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    Op(usize),
    Parameter(NodeId),
    Literal(NodeId),
    External(NodeId),
}

#[derive(Debug, Clone)]
pub struct TensorInput {
    /// Position among the call's data inputs.
    pub slot: usize,
    /// `Shape::UnknownRank` for operands whose rank is not known; such a slot
    /// takes the empty strategy.
    pub shape: Shape,
    pub source: InputSource,
}

impl TensorInput {
    pub fn rank(&self) -> Option<usize> {
        self.shape.rank()
    }
}

/// Strategy-relevant view of one operator call.
#[derive(Debug, Clone)]
pub struct OpInfo {
    pub node: NodeId,
    pub name: String,
    pub prim: Primitive,
    pub category: OpCategory,
    pub inputs: Vec<TensorInput>,
    pub output: Shape,
    pub eliminated: bool,
    pub layout: OpLayout,
}

impl OpInfo {
    pub fn input_rank(&self, input: usize) -> usize {
        self.inputs
            .get(input)
            .and_then(|i| i.shape.rank())
            .unwrap_or(0)
    }

    pub fn output_rank(&self) -> usize {
        self.output.rank().unwrap_or(0)
    }
}

/// Operators in topological order plus their tensor adjacency.
#[derive(Debug, Clone, Default)]
pub struct OpGraph {
    pub ops: Vec<OpInfo>,
    by_node: BTreeMap<NodeId, usize>,
    consumers: Vec<Vec<(usize, usize)>>,
    shared: BTreeMap<NodeId, Vec<(usize, usize)>>,
}

fn tensor_arity(category: OpCategory) -> Option<usize> {
    match category {
        OpCategory::MatMul | OpCategory::BiasAdd | OpCategory::Gather | OpCategory::Conv => Some(2),
        OpCategory::Reduce
        | OpCategory::Reshape
        | OpCategory::Transpose
        | OpCategory::ExpandDims
        | OpCategory::Squeeze
        | OpCategory::Softmax
        | OpCategory::Tile => Some(1),
        _ => None,
    }
}

fn ranked_tensor(value: Option<&AbstractValue>) -> Option<Shape> {
    let shape = value?.as_tensor()?.shape.clone();
    (!shape.is_unknown_rank()).then_some(shape)
}

impl OpGraph {
    /// Collects every call that computes a ranked tensor, skipping structural
    /// and communication calls.
    pub fn collect(
        graph: &FuncGraph,
        registry: &InferRegistry,
        eliminated: &BTreeSet<NodeId>,
    ) -> Result<Self, StrategyError> {
        let mut out = OpGraph::default();
        for id in graph.topo_order()? {
            let node = graph.get(id)?;
            let NodeKind::Call { prim, .. } = &node.kind else {
                continue;
            };
            let category = registry.category(&prim.name);
            if matches!(category, OpCategory::Virtual | OpCategory::Communication) {
                continue;
            }
            let Some(output) = ranked_tensor(node.abstract_value.as_ref()) else {
                if node.abstract_value.as_ref().is_some_and(|v| v.as_tensor().is_some()) {
                    warn!("{}: unknown output rank, no strategy", graph.display_name(id));
                }
                continue;
            };

            let mut inputs = Vec::new();
            for (slot, (_, edge)) in node.data_inputs().enumerate() {
                let value = graph.abstract_of(edge);
                // Operands known not to be tensors carry no strategy. Tensors
                // keep their position even when unranked or not yet inferred.
                if value.is_some_and(|v| v.as_tensor().is_none()) {
                    continue;
                }
                inputs.push(TensorInput {
                    slot,
                    shape: value
                        .and_then(AbstractValue::shape)
                        .cloned()
                        .unwrap_or(Shape::UnknownRank),
                    source: out.resolve(graph, edge),
                });
            }
            if let Some(arity) = tensor_arity(category) {
                inputs.truncate(arity);
            }

            let args: Vec<InferInput> = node
                .inputs()
                .iter()
                .filter(|e| e.kind != EdgeKind::Order)
                .map(|e| InferInput {
                    value: graph.abstract_of(e).cloned().unwrap_or(AbstractValue::None),
                    literal: graph.node(e.node).and_then(|n| n.literal()).cloned(),
                })
                .collect();
            let layout = layout_of(prim, category, &args);

            let index = out.ops.len();
            out.by_node.insert(id, index);
            out.consumers.push(Vec::new());
            for (k, input) in inputs.iter().enumerate() {
                match input.source {
                    InputSource::Op(p) => out.consumers[p].push((index, k)),
                    InputSource::Parameter(param) => {
                        out.shared.entry(param).or_default().push((index, k))
                    }
                    _ => {}
                }
            }
            out.ops.push(OpInfo {
                node: id,
                name: graph.display_name(id),
                prim: prim.clone(),
                category,
                inputs,
                output,
                eliminated: eliminated.contains(&id) || registry.is_eliminable(&prim.name),
                layout,
            });
        }
        Ok(out)
    }

    fn resolve(&self, graph: &FuncGraph, edge: &Edge) -> InputSource {
        let mut current = edge.node;
        loop {
            if let Some(index) = self.by_node.get(&current) {
                return InputSource::Op(*index);
            }
            let Some(node) = graph.node(current) else {
                return InputSource::External(current);
            };
            match &node.kind {
                NodeKind::Parameter { .. } => return InputSource::Parameter(current),
                NodeKind::Literal(_) | NodeKind::Graph(_) => return InputSource::Literal(current),
                NodeKind::Call { prim: p, .. }
                    if p.name == prim::DEPEND || p.name == prim::LOAD =>
                {
                    match node.data_inputs().next() {
                        Some((_, first)) => current = first.node,
                        None => return InputSource::External(current),
                    }
                }
                NodeKind::Call { .. } => return InputSource::External(current),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn index_of(&self, node: NodeId) -> Option<usize> {
        self.by_node.get(&node).copied()
    }

    /// `(consumer, input)` pairs reading the output of `op`.
    pub fn consumers(&self, op: usize) -> &[(usize, usize)] {
        self.consumers.get(op).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Parameters read by more than one operator input, with their readers in
    /// graph order.
    pub fn shared_parameters(&self) -> impl Iterator<Item = (NodeId, &[(usize, usize)])> {
        self.shared
            .iter()
            .filter(|(_, users)| users.len() > 1)
            .map(|(param, users)| (*param, users.as_slice()))
    }

    pub fn parameter_users(&self, param: NodeId) -> &[(usize, usize)] {
        self.shared.get(&param).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Producer of input `k` of `op`, looking through eliminated operators.
    pub fn real_producer(&self, op: usize, k: usize) -> Option<usize> {
        let mut source = self.ops.get(op)?.inputs.get(k)?.source;
        while let InputSource::Op(p) = source {
            if !self.ops[p].eliminated {
                return Some(p);
            }
            source = self.ops[p].inputs.first()?.source;
        }
        None
    }

    /// Consumers of `op`, looking through eliminated operators.
    pub fn real_consumers(&self, op: usize) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        let mut stack: Vec<(usize, usize)> = self.consumers(op).iter().rev().copied().collect();
        while let Some((c, k)) = stack.pop() {
            if self.ops[c].eliminated {
                if k == 0 {
                    stack.extend(self.consumers(c).iter().rev().copied());
                }
            } else {
                out.push((c, k));
            }
        }
        out
    }

    /// Undirected neighbours used by the connectivity check: tensor producers,
    /// consumers and other readers of a shared parameter.
    pub fn neighbours(&self, op: usize) -> Vec<usize> {
        let mut out: Vec<usize> = self.consumers(op).iter().map(|(c, _)| *c).collect();
        for input in &self.ops[op].inputs {
            match input.source {
                InputSource::Op(p) => out.push(p),
                InputSource::Parameter(param) => {
                    if let Some(users) = self.shared.get(&param) {
                        out.extend(users.iter().map(|(u, _)| *u).filter(|u| *u != op));
                    }
                }
                _ => {}
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::DType;
    use crate::parallel::rules::from_input;

    #[test]
    fn unranked_operand_keeps_later_operands_in_place() {
        let mut g = FuncGraph::new("unranked");
        let x = g.add_parameter(
            "x",
            AbstractValue::tensor_with_shape(DType::F32, Shape::UnknownRank),
        );
        let w = g.add_parameter("w", AbstractValue::tensor(DType::F32, &[16, 32]));
        let mm = g.call(Primitive::new(prim::MATMUL), &[x, w]);
        g.get_mut(mm).unwrap().abstract_value = Some(AbstractValue::tensor(DType::F32, &[8, 32]));
        g.set_outputs(vec![Edge::data(mm)]);

        let ops = OpGraph::collect(&g, &InferRegistry::builtin(), &BTreeSet::new()).unwrap();
        let op = &ops.ops[0];
        assert_eq!(op.inputs.len(), 2);
        assert_eq!(op.inputs[0].rank(), None);
        assert_eq!(op.inputs[1].slot, 1);
        assert_eq!(op.inputs[1].shape, Shape::known(&[16, 32]));
        assert_eq!(op.inputs[1].source, InputSource::Parameter(w));
        assert_eq!(from_input(op, 1, &[2, 1]), vec![vec![], vec![2, 1]]);
    }
}
