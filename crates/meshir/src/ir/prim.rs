//! Primitive and attribute names shared across passes.

pub const DEPEND: &str = "Depend";
pub const LOAD: &str = "Load";
pub const UPDATE_STATE: &str = "UpdateState";
pub const MAKE_TUPLE: &str = "MakeTuple";
pub const TUPLE_GET_ITEM: &str = "TupleGetItem";
pub const SEND: &str = "Send";
pub const RECEIVE: &str = "Receive";
pub const BROADCAST: &str = "Broadcast";
pub const ASSIGN: &str = "Assign";
pub const PRINT: &str = "Print";

pub const MATMUL: &str = "MatMul";
pub const BATCH_MATMUL: &str = "BatchMatMul";
pub const BIAS_ADD: &str = "BiasAdd";
pub const RESHAPE: &str = "Reshape";
pub const TRANSPOSE: &str = "Transpose";
pub const EXPAND_DIMS: &str = "ExpandDims";
pub const SQUEEZE: &str = "Squeeze";
pub const SOFTMAX: &str = "Softmax";
pub const GATHER: &str = "Gather";
pub const CAST: &str = "Cast";
pub const TILE: &str = "Tile";

pub const REDUCE_SUM: &str = "ReduceSum";
pub const REDUCE_MEAN: &str = "ReduceMean";
pub const REDUCE_MAX: &str = "ReduceMax";
pub const REDUCE_MIN: &str = "ReduceMin";
pub const REDUCE_PROD: &str = "ReduceProd";
pub const REDUCE_ALL: &str = "ReduceAll";
pub const REDUCE_ANY: &str = "ReduceAny";

pub const CONV3D: &str = "Conv3D";
pub const CONV3D_BACKPROP_INPUT: &str = "Conv3DBackpropInput";
pub const CONV3D_BACKPROP_FILTER: &str = "Conv3DBackpropFilter";

pub const ATTR_INPUT_NAMES: &str = "input_names";
pub const ATTR_PAD_LIST: &str = "pad_list";
pub const ATTR_PAD_MODE: &str = "pad_mode";
pub const ATTR_PAD: &str = "pad";
pub const ATTR_KERNEL_SIZE: &str = "kernel_size";
pub const ATTR_STRIDE: &str = "stride";
pub const ATTR_DILATION: &str = "dilation";
pub const ATTR_AXIS: &str = "axis";
pub const ATTR_KEEP_DIMS: &str = "keep_dims";
pub const ATTR_TRANSPOSE_A: &str = "transpose_a";
pub const ATTR_TRANSPOSE_B: &str = "transpose_b";
pub const ATTR_PERM: &str = "perm";
pub const ATTR_SHAPE: &str = "shape";
pub const ATTR_MULTIPLES: &str = "multiples";
pub const ATTR_DST_TYPE: &str = "dst_type";

pub const ATTR_OP_ADAPTATION_PROCESSED: &str = "op_adaptation_processed";
pub const ATTR_ME_OP_NAME: &str = "me_op_name";
pub const ATTR_IR_CHANGE: &str = "ir_change";

pub const ATTR_SR_TAG: &str = "sr_tag";
pub const ATTR_SRC_RANK: &str = "src_rank";
pub const ATTR_DEST_RANK: &str = "dest_rank";
pub const ATTR_DEST_RANKS: &str = "dest_ranks";
pub const ATTR_SRC_STAGE: &str = "src_stage";
pub const ATTR_DEST_STAGE: &str = "dest_stage";
pub const ATTR_DTYPE: &str = "dtype";

/// Calls that must survive dead-code sweeps even without consumers.
pub fn is_side_effecting(name: &str) -> bool {
    matches!(
        name,
        SEND | RECEIVE | BROADCAST | UPDATE_STATE | ASSIGN | PRINT
    )
}

/// Structural calls that carry no computation of their own.
pub fn is_virtual(name: &str) -> bool {
    matches!(
        name,
        DEPEND | LOAD | UPDATE_STATE | MAKE_TUPLE | TUPLE_GET_ITEM
    )
}

pub fn is_communication(name: &str) -> bool {
    matches!(name, SEND | RECEIVE | BROADCAST)
}

pub fn is_reduce(name: &str) -> bool {
    matches!(
        name,
        REDUCE_SUM | REDUCE_MEAN | REDUCE_MAX | REDUCE_MIN | REDUCE_PROD | REDUCE_ALL | REDUCE_ANY
    )
}
