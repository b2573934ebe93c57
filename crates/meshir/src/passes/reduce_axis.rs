use log::debug;

use crate::ir::{Edge, EdgeKind, GraphManager, Node, NodeId, TensorLiteral, Value};
use crate::pattern::{
    filters, DstInput, DstPattern, PatternMap, PatternToPattern, RewriteError, SrcPattern,
};

/// Position of the axis among the non-order operands bound to `Xs`.
const AXIS_INPUT: usize = 1;

/// Raw input slot holding the axis; order edges may precede it.
fn axis_slot(node: &Node) -> Option<usize> {
    node.inputs()
        .iter()
        .enumerate()
        .filter(|(_, edge)| edge.kind != EdgeKind::Order)
        .nth(AXIS_INPUT)
        .map(|(slot, _)| slot)
}

/// Replaces an empty reduce axis with the explicit `[0, rank)` int64 tensor,
/// so backends never see "empty means all".
#[derive(Debug, Default, Clone, Copy)]
pub struct ReduceAxisUpdate;

impl ReduceAxisUpdate {
    pub const NAME: &'static str = "reduce-axis-update";
}

fn first_input(map: &PatternMap) -> Option<Edge> {
    map.seq("Xs").and_then(|xs| xs.first().copied())
}

fn build_axis(map: &PatternMap, mgr: &GraphManager) -> Result<Value, RewriteError> {
    let rank = first_input(map)
        .and_then(|x| mgr.graph.abstract_of(&x))
        .and_then(|v| v.rank())
        .ok_or_else(|| RewriteError::Invalid {
            pattern: ReduceAxisUpdate::NAME,
            node: "<reduce input>".to_string(),
            detail: "input rank is unknown".to_string(),
        })?;
    Ok(Value::Tensor(TensorLiteral::i64_vector((0..rank as i64).collect())))
}

/// Rewires the axis slot of the matched reduce in place.
fn build_reduce(map: &PatternMap, mgr: &mut GraphManager, inputs: Vec<Edge>) -> Result<NodeId, RewriteError> {
    let reduce = map.node("m_reduce").ok_or_else(|| RewriteError::Invalid {
        pattern: ReduceAxisUpdate::NAME,
        node: "<root>".to_string(),
        detail: "root is unbound".to_string(),
    })?;
    let missing = || RewriteError::Invalid {
        pattern: ReduceAxisUpdate::NAME,
        node: mgr.graph.display_name(reduce),
        detail: format!("expected an axis operand at {AXIS_INPUT}"),
    };
    let axis = inputs.get(AXIS_INPUT).copied().ok_or_else(missing)?;
    let slot = axis_slot(mgr.node(reduce)?).ok_or_else(missing)?;
    mgr.set_input(reduce, slot, axis)?;
    Ok(reduce)
}

impl PatternToPattern for ReduceAxisUpdate {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn define_src(&self, src: &mut SrcPattern) {
        src.add_prim_var("V", filters::reduce)
            .add_seq_var("Xs")
            .add_call("m_reduce", "V", &["Xs"]);
    }

    fn define_dst(&self, dst: &mut DstPattern) {
        dst.add_value_node("axis", build_axis).add_call(
            "r_reduce",
            "V",
            vec![DstInput::SeqReplace {
                seq: "Xs".to_string(),
                index: AXIS_INPUT,
                var: "axis".to_string(),
            }],
            Some(build_reduce),
        );
    }

    fn check_matched(
        &self,
        map: &PatternMap,
        mgr: &GraphManager,
        root: NodeId,
    ) -> Result<bool, RewriteError> {
        let node = mgr.node(root)?;
        if node.is_dynamic() {
            debug!("{}: dynamic output shape, skipped", mgr.graph.display_name(root));
            return Ok(false);
        }
        let Some(inputs) = map.seq("Xs") else {
            return Ok(false);
        };
        // Axis given as an attribute rather than an input.
        if inputs.len() <= AXIS_INPUT {
            return Ok(false);
        }
        let Some(axis) = mgr.graph.node(inputs[AXIS_INPUT].node).and_then(|n| n.literal()) else {
            return Ok(false);
        };
        let Some(rank) = mgr.graph.abstract_of(&inputs[0]).and_then(|v| v.rank()) else {
            return Ok(false);
        };
        let input_is_scalar = rank == 0;
        if !axis.is_empty_sequence() && !input_is_scalar {
            return Ok(false);
        }
        // A scalar whose axis is already the materialized empty tensor is done.
        if input_is_scalar && matches!(axis, Value::Tensor(t) if t.element_count() == 0) {
            return Ok(false);
        }
        Ok(true)
    }
}
