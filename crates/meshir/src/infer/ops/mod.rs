//! Inference rules for the builtin primitives.

pub mod conv;
pub mod elementwise;
pub mod linalg;
pub mod reduce;
pub mod shape;
pub mod structural;

use crate::infer::{OpCategory, OpDef};
use crate::ir::prim;

use self::conv::*;
use self::elementwise::*;
use self::linalg::*;
use self::reduce::*;
use self::shape::*;
use self::structural::*;

const UNARY: &[&str] = &["x"];
const BINARY: &[&str] = &["x", "y"];
const REDUCE: &[&str] = &["x", "axis"];

pub fn builtin_defs() -> Vec<OpDef> {
    use OpCategory::*;
    let mut defs = vec![
        OpDef::new("Identity", UNARY, Elementwise, infer_identity).eliminable(),
        OpDef::new("StopGradient", UNARY, Elementwise, infer_identity).eliminable(),
        OpDef::new(prim::CAST, &["x", "dst_type"], Elementwise, infer_cast).eliminable(),
        OpDef::new("Neg", UNARY, Elementwise, infer_numeric_unary),
        OpDef::new("Abs", UNARY, Elementwise, infer_numeric_unary),
        OpDef::new("ReLU", UNARY, Elementwise, infer_numeric_unary),
        OpDef::new("Square", UNARY, Elementwise, infer_numeric_unary),
        OpDef::new("Exp", UNARY, Elementwise, infer_float_unary),
        OpDef::new("Log", UNARY, Elementwise, infer_float_unary),
        OpDef::new("Sqrt", UNARY, Elementwise, infer_float_unary),
        OpDef::new("Sigmoid", UNARY, Elementwise, infer_float_unary),
        OpDef::new("Tanh", UNARY, Elementwise, infer_float_unary),
        OpDef::new("GeLU", UNARY, Elementwise, infer_float_unary),
        OpDef::new("Add", BINARY, Elementwise, infer_binary),
        OpDef::new("Sub", BINARY, Elementwise, infer_binary),
        OpDef::new("Mul", BINARY, Elementwise, infer_binary),
        OpDef::new("RealDiv", BINARY, Elementwise, infer_binary),
        OpDef::new("Maximum", BINARY, Elementwise, infer_binary),
        OpDef::new("Minimum", BINARY, Elementwise, infer_binary),
        OpDef::new("Pow", BINARY, Elementwise, infer_binary),
        OpDef::new("Equal", BINARY, Elementwise, infer_compare),
        OpDef::new("Less", BINARY, Elementwise, infer_compare),
        OpDef::new("Greater", BINARY, Elementwise, infer_compare),
        OpDef::new("LogicalAnd", BINARY, Elementwise, infer_logical),
        OpDef::new("LogicalOr", BINARY, Elementwise, infer_logical),
        OpDef::new(prim::MATMUL, &["x1", "x2"], MatMul, infer_matmul),
        OpDef::new(prim::BATCH_MATMUL, &["x1", "x2"], MatMul, infer_matmul),
        OpDef::new(prim::BIAS_ADD, &["x", "bias"], BiasAdd, infer_bias_add),
        OpDef::new(prim::SOFTMAX, UNARY, Softmax, infer_softmax),
        OpDef::new(prim::RESHAPE, &["x", "shape"], Reshape, infer_reshape),
        OpDef::new(prim::TRANSPOSE, &["x", "perm"], Transpose, infer_transpose),
        OpDef::new("TransposeD", UNARY, Transpose, infer_transpose),
        OpDef::new(prim::EXPAND_DIMS, &["x", "axis"], ExpandDims, infer_expand_dims),
        OpDef::new(prim::SQUEEZE, UNARY, Squeeze, infer_squeeze),
        OpDef::new(prim::TILE, &["x", "multiples"], Tile, infer_tile),
        OpDef::new("TileD", UNARY, Tile, infer_tile),
        OpDef::new(prim::GATHER, &["params", "indices", "axis"], Gather, infer_gather),
        OpDef::new("GatherD", &["params", "indices"], Gather, infer_gather),
        OpDef::new(prim::CONV3D, &["x", "filter"], Conv, infer_conv3d),
        OpDef::new(
            prim::CONV3D_BACKPROP_INPUT,
            &["filter", "out_backprop", "input_size"],
            Conv,
            infer_conv3d_backprop_input,
        ),
        OpDef::new(
            prim::CONV3D_BACKPROP_FILTER,
            &["x", "out_backprop", "filter_size"],
            Conv,
            infer_conv3d_backprop_filter,
        ),
        OpDef::new(prim::DEPEND, &["value", "expr"], Virtual, infer_forward_first),
        OpDef::new(prim::LOAD, &["param", "u"], Virtual, infer_forward_first),
        OpDef::new(prim::UPDATE_STATE, &["u", "expr"], Virtual, infer_update_state),
        OpDef::new(prim::MAKE_TUPLE, &[], Virtual, infer_make_tuple),
        OpDef::new(prim::TUPLE_GET_ITEM, &["tuple", "index"], Virtual, infer_tuple_get_item),
        OpDef::new(prim::SEND, UNARY, Communication, infer_send),
        OpDef::new(prim::RECEIVE, &[], Communication, infer_receive),
        OpDef::new(prim::BROADCAST, UNARY, Communication, infer_forward_first),
    ];
    for name in [
        prim::REDUCE_SUM,
        prim::REDUCE_MEAN,
        prim::REDUCE_MAX,
        prim::REDUCE_MIN,
        prim::REDUCE_PROD,
        prim::REDUCE_ALL,
        prim::REDUCE_ANY,
    ] {
        defs.push(OpDef::new(name, REDUCE, Reduce, infer_reduce));
    }
    for name in ["ReduceSumD", "ReduceMeanD", "ReduceMaxD", "ReduceMinD"] {
        defs.push(OpDef::new(name, UNARY, Reduce, infer_reduce));
    }
    defs
}
