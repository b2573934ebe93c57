use log::{debug, trace, warn};

use crate::infer::{InferError, InferInput, InferRegistry};
use crate::ir::{AbstractValue, EdgeKind, FuncGraph, NodeId, NodeKind};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InferStats {
    pub inferred: usize,
    pub undecided: usize,
}

/// Infers the abstract value of a single node from its producers' current
/// abstract values. Ordering edges do not contribute inputs.
pub fn infer_node(
    graph: &FuncGraph,
    registry: &InferRegistry,
    id: NodeId,
) -> Result<AbstractValue, InferError> {
    let node = graph.get(id).map_err(|_| InferError::UnknownOp {
        op: format!("<missing {id}>"),
    })?;
    match &node.kind {
        NodeKind::Literal(value) => Ok(value.abstract_value()),
        NodeKind::Graph(graph) => Ok(AbstractValue::Func(graph.clone())),
        NodeKind::Parameter { name, .. } => node
            .abstract_value
            .clone()
            .ok_or_else(|| InferError::undecided(name, "parameter has no declared type")),
        NodeKind::Call { prim, inputs } => {
            let mut args = Vec::with_capacity(inputs.len());
            for edge in inputs.iter().filter(|e| e.kind != EdgeKind::Order) {
                let value = graph.abstract_of(edge).cloned().ok_or_else(|| {
                    InferError::undecided(
                        &prim.name,
                        format!("input {} is not inferred yet", graph.display_name(edge.node)),
                    )
                })?;
                let literal = graph.node(edge.node).and_then(|p| p.literal()).cloned();
                args.push(InferInput { value, literal });
            }
            match registry.get(&prim.name) {
                Some(def) => (def.infer)(prim, &args),
                // Unregistered ops keep a declared abstract value if they have one.
                None => node.abstract_value.clone().ok_or_else(|| InferError::UnknownOp {
                    op: prim.name.clone(),
                }),
            }
        }
    }
}

/// Infers every node in topological order.
///
/// `Undecided` outcomes are not errors: the node keeps its previous abstract
/// value (possibly none) and its consumers become undecided in turn. Any other
/// failure aborts with the offending node named.
pub fn infer_graph(graph: &mut FuncGraph, registry: &InferRegistry) -> Result<InferStats, InferError> {
    let order = graph.topo_order().map_err(|e| InferError::Malformed {
        graph: graph.name.clone(),
        detail: e.to_string(),
    })?;
    let mut stats = InferStats::default();
    for id in order {
        match infer_node(graph, registry, id) {
            Ok(value) => {
                trace!("infer {} : {value}", graph.display_name(id));
                if let Some(node) = graph.node_mut(id) {
                    node.abstract_value = Some(value);
                }
                stats.inferred += 1;
            }
            Err(err) if err.is_undecided() => {
                warn!("{}: {err}; leaving output undecided", graph.display_name(id));
                stats.undecided += 1;
            }
            Err(err) => {
                return Err(InferError::Node {
                    node: graph.display_name(id),
                    source: Box::new(err),
                });
            }
        }
    }
    debug!(
        "inferred {} nodes of @{} ({} undecided)",
        stats.inferred, graph.name, stats.undecided
    );
    Ok(stats)
}
