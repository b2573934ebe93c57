use std::collections::BTreeSet;

use log::debug;

use crate::ir::{FuncGraph, NodeId};

/// Keeps the nodes of `stage` plus everything they still reach, ordering
/// anchors included. Graph outputs produced elsewhere are dropped.
pub(super) fn elim_graph_stage(graph: &mut FuncGraph, stage: u32) -> usize {
    let local: Vec<NodeId> = graph
        .nodes()
        .filter(|n| n.annotations.stage.map_or(true, |s| s == stage))
        .map(|n| n.id)
        .collect();
    let keep: BTreeSet<NodeId> = graph.reachable_from(local);
    let outputs = graph
        .outputs()
        .iter()
        .copied()
        .filter(|e| keep.contains(&e.node))
        .collect();
    graph.set_outputs(outputs);
    let removed = graph.retain_nodes(&keep);
    debug!("stage {stage}: removed {removed} node(s) of other stages");
    removed
}

/// Drops parameters nothing on the local stage reads.
pub(super) fn elim_parameter(graph: &mut FuncGraph) -> usize {
    let mut removed = 0;
    for param in graph.parameters().to_vec() {
        if graph.remove_parameter(param) {
            debug!("removed unused parameter {param}");
            removed += 1;
        }
    }
    removed
}
