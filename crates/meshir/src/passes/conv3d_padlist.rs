use log::warn;

use crate::infer::ops::conv::size_operand_shape;
use crate::infer::{Conv3dWindow, InferInput};
use crate::ir::prim::{self, ATTR_PAD_LIST};
use crate::ir::{Dim, Edge, FuncGraph, GraphManager, NodeId, Shape, Value};
use crate::pattern::{
    filters, NodePattern, RewriteContext, RewriteError, RewriteOutcome, SkipReason,
};

fn invalid(pattern: &'static str, graph: &FuncGraph, node: NodeId, detail: impl Into<String>) -> RewriteError {
    RewriteError::Invalid {
        pattern,
        node: graph.display_name(node),
        detail: detail.into(),
    }
}

/// Shape of the forward input described by a size operand: a literal list or
/// tensor, a tuple built from literals, or only the operand's own abstract.
pub fn forward_input_shape(graph: &FuncGraph, edge: &Edge) -> Result<Shape, RewriteError> {
    let producer = graph.get(edge.node)?;
    if producer.is_call_to(prim::MAKE_TUPLE) {
        let dims = producer
            .data_inputs()
            .map(|(_, e)| {
                match graph.node(e.node).and_then(|n| n.literal()).and_then(Value::as_int) {
                    Some(v) => Dim::from_i64(v).map_err(|err| {
                        invalid("conv3d-padlist", graph, edge.node, err.to_string())
                    }),
                    None => Ok(Dim::Unknown),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Shape::Ranked(dims));
    }
    let input = InferInput {
        value: graph
            .abstract_of(edge)
            .cloned()
            .ok_or_else(|| invalid("conv3d-padlist", graph, edge.node, "size operand is not inferred"))?,
        literal: producer.literal().cloned(),
    };
    let op = crate::ir::Primitive::new(prim::CONV3D_BACKPROP_INPUT);
    Ok(size_operand_shape(&op, &input)?)
}

fn input_shape(graph: &FuncGraph, edge: &Edge) -> Option<Shape> {
    graph.abstract_of(edge).and_then(|v| v.shape()).cloned()
}

/// Computes and stores `pad_list` given the forward output (`dout`) and the
/// forward input shape. Returns `Unchanged` when the attribute already holds
/// the same value.
fn set_pad_list(
    pattern: &'static str,
    mgr: &mut GraphManager,
    node: NodeId,
    dout: &Shape,
    x: &Shape,
) -> Result<RewriteOutcome, RewriteError> {
    let prim = mgr
        .node(node)?
        .primitive()
        .cloned()
        .ok_or_else(|| invalid(pattern, mgr.graph, node, "not a call"))?;
    let window = Conv3dWindow::from_primitive(&prim)?;
    let (Some(dout_dims), Some(x_dims)) = (dout.dims(), x.dims()) else {
        return Ok(RewriteOutcome::Skipped(SkipReason::DynamicRank {
            node: mgr.graph.display_name(node),
        }));
    };
    if dout_dims.len() != 5 || x_dims.len() != 5 {
        return Err(invalid(
            pattern,
            mgr.graph,
            node,
            format!("expected 5-D shapes, got dout {dout} and input {x}"),
        ));
    }
    let pads: Vec<i64> = window
        .pad_list(dout_dims, x_dims)
        .into_iter()
        .map(Dim::to_i64)
        .collect();
    let value = Value::IntList(pads);
    if prim.attr(ATTR_PAD_LIST) == Some(&value) {
        return Ok(RewriteOutcome::Unchanged);
    }
    mgr.set_prim_attr(node, ATTR_PAD_LIST, value)?;
    Ok(RewriteOutcome::Updated)
}

fn dynamic_rank_notice(mgr: &GraphManager, node: NodeId) -> RewriteOutcome {
    let name = mgr.graph.display_name(node);
    warn!("{name}: cannot add pad_list while an input has dynamic rank");
    RewriteOutcome::Skipped(SkipReason::DynamicRank { node: name })
}

/// `Conv3DBackpropInput(filter, dout, input_size)`: derives `pad_list`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Conv3DBackpropInputPadList;

impl Conv3DBackpropInputPadList {
    pub const NAME: &'static str = "conv3d-backprop-input-padlist";
}

impl NodePattern for Conv3DBackpropInputPadList {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn matches(&self, prim: &crate::ir::Primitive) -> bool {
        filters::conv3d_backprop_input(prim)
    }

    fn process(
        &self,
        node: NodeId,
        mgr: &mut GraphManager,
        _cx: &RewriteContext,
    ) -> Result<RewriteOutcome, RewriteError> {
        let inputs: Vec<Edge> = mgr.node(node)?.data_inputs().map(|(_, e)| *e).collect();
        if inputs.len() < 3 {
            return Err(invalid(Self::NAME, mgr.graph, node, "expected filter, dout and input_size"));
        }
        // A MakeTuple size is read from its elements, not its abstract.
        let size_known = mgr.graph.abstract_of(&inputs[2]).is_some()
            || mgr.node(inputs[2].node)?.is_call_to(prim::MAKE_TUPLE);
        let (Some(filter), Some(dout), true) = (
            input_shape(mgr.graph, &inputs[0]),
            input_shape(mgr.graph, &inputs[1]),
            size_known,
        ) else {
            return Ok(RewriteOutcome::Skipped(SkipReason::Undecided(
                mgr.graph.display_name(node),
            )));
        };
        let forward = forward_input_shape(mgr.graph, &inputs[2])?;
        if forward.is_unknown_rank() || dout.is_unknown_rank() || filter.is_unknown_rank() {
            return Ok(dynamic_rank_notice(mgr, node));
        }
        set_pad_list(Self::NAME, mgr, node, &dout, &forward)
    }
}

/// `Conv3DBackpropFilter(x, dout, filter_size)`: derives `pad_list`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Conv3DBackpropFilterPadList;

impl Conv3DBackpropFilterPadList {
    pub const NAME: &'static str = "conv3d-backprop-filter-padlist";
}

impl NodePattern for Conv3DBackpropFilterPadList {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn matches(&self, prim: &crate::ir::Primitive) -> bool {
        filters::conv3d_backprop_filter(prim)
    }

    fn process(
        &self,
        node: NodeId,
        mgr: &mut GraphManager,
        _cx: &RewriteContext,
    ) -> Result<RewriteOutcome, RewriteError> {
        let inputs: Vec<Edge> = mgr.node(node)?.data_inputs().map(|(_, e)| *e).collect();
        if inputs.len() < 2 {
            return Err(invalid(Self::NAME, mgr.graph, node, "expected x and dout"));
        }
        let (Some(x), Some(dout)) = (
            input_shape(mgr.graph, &inputs[0]),
            input_shape(mgr.graph, &inputs[1]),
        ) else {
            return Ok(RewriteOutcome::Skipped(SkipReason::Undecided(
                mgr.graph.display_name(node),
            )));
        };
        if x.is_unknown_rank() || dout.is_unknown_rank() {
            return Ok(dynamic_rank_notice(mgr, node));
        }
        set_pad_list(Self::NAME, mgr, node, &dout, &x)
    }
}
