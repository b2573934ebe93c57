use std::sync::Arc;

use meshir::adapter::{AdaptPhase, KernelSupport, KernelSupportTable, OpAdapter, OpAdaptationRegistry};
use meshir::infer::{infer_graph, InferRegistry};
use meshir::ir::prim::{self, ATTR_AXIS, ATTR_IR_CHANGE, ATTR_ME_OP_NAME, ATTR_OP_ADAPTATION_PROCESSED};
use meshir::ir::{
    AbstractValue, DType, Dim, Edge, FuncGraph, GraphManager, NodeId, Primitive, Shape, Value,
};
use meshir::pattern::{apply_patterns_greedily, GreedyConfig, GreedyRewriteStats, PatternSet, RewriteContext};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn adapt_with(graph: &mut FuncGraph, phase: AdaptPhase, support: Arc<dyn KernelSupport>) -> GreedyRewriteStats {
    let registry = InferRegistry::builtin();
    infer_graph(graph, &registry).unwrap();
    let mut patterns = PatternSet::new();
    patterns.add_node(OpAdapter::new(
        Arc::new(OpAdaptationRegistry::builtin()),
        support,
        phase,
    ));
    let cx = RewriteContext::new(&registry);
    apply_patterns_greedily(graph, &patterns.freeze(), &cx, &GreedyConfig::default()).unwrap()
}

fn adapt(graph: &mut FuncGraph) -> GreedyRewriteStats {
    adapt_with(graph, AdaptPhase::Backend, Arc::new(KernelSupportTable::builtin()))
}

fn reduce_sum(dtype: DType, dims: Vec<Dim>) -> (FuncGraph, NodeId) {
    let mut g = FuncGraph::new("reduce");
    let x = g.add_parameter("x", AbstractValue::tensor_with_shape(dtype, Shape::from_dims(dims)));
    let axis = g.add_literal(Value::IntList(vec![1]));
    let sum = g.call(Primitive::new(prim::REDUCE_SUM), &[x, axis]);
    g.set_outputs(vec![Edge::data(sum)]);
    (g, sum)
}

fn known(dims: &[i64]) -> Vec<Dim> {
    dims.iter().map(|d| Dim::Known(*d)).collect()
}

fn op_names(graph: &FuncGraph) -> Vec<String> {
    graph
        .nodes()
        .filter_map(|n| n.op_name().map(str::to_string))
        .collect()
}

#[test]
fn constant_axis_becomes_an_attribute() {
    init_logger();
    let (mut g, origin) = reduce_sum(DType::F32, known(&[2, 3]));
    let stats = adapt(&mut g);
    assert_eq!(stats.applied, 1);

    let target = g.outputs()[0].node;
    assert_ne!(target, origin);
    assert!(!g.contains(origin), "origin should be swept");
    let node = g.get(target).unwrap();
    let prim = node.primitive().unwrap();
    assert_eq!(prim.name, "ReduceSumD");
    assert_eq!(prim.attr(ATTR_AXIS), Some(&Value::IntList(vec![1])));
    assert_eq!(node.data_inputs().count(), 1);
    assert_eq!(node.attr(ATTR_IR_CHANGE), Some(&Value::Bool(true)));
    assert_eq!(node.attr(ATTR_OP_ADAPTATION_PROCESSED), Some(&Value::Bool(true)));
    assert_eq!(node.attr(ATTR_ME_OP_NAME), Some(&Value::Str("ReduceSum".to_string())));
    assert_eq!(
        node.abstract_value,
        Some(AbstractValue::tensor(DType::F32, &[2]))
    );
}

#[test]
fn adaptation_is_idempotent() {
    init_logger();
    let (mut g, _) = reduce_sum(DType::F32, known(&[2, 3]));
    adapt(&mut g);
    let before = g.to_string();
    let again = adapt(&mut g);
    assert_eq!(again.applied, 0);
    assert_eq!(g.to_string(), before);
}

#[test]
fn processed_nodes_are_skipped() {
    init_logger();
    let (mut g, sum) = reduce_sum(DType::F32, known(&[2, 3]));
    {
        let mut mgr = GraphManager::new(&mut g).unwrap();
        mgr.set_node_attr(sum, ATTR_OP_ADAPTATION_PROCESSED, Value::Bool(true))
            .unwrap();
    }
    let stats = adapt(&mut g);
    assert_eq!(stats.applied, 0);
    assert_eq!(stats.skipped, 1);
    assert_eq!(g.get(sum).unwrap().op_name(), Some(prim::REDUCE_SUM));
}

#[test]
fn unsupported_target_rolls_back_without_residue() {
    init_logger();
    // ReduceSumD only has float kernels.
    let (mut g, sum) = reduce_sum(DType::I32, known(&[2, 3]));
    let stats = adapt(&mut g);
    assert_eq!(stats.applied, 0);
    assert_eq!(stats.skipped, 1);
    assert_eq!(g.outputs()[0].node, sum);
    assert!(!op_names(&g).iter().any(|name| name == "ReduceSumD"));
}

#[test]
fn dynamic_node_with_a_dynamic_kernel_is_kept() {
    init_logger();
    let (mut g, sum) = reduce_sum(DType::F32, vec![Dim::Unknown, Dim::Known(3)]);
    let stats = adapt(&mut g);
    assert_eq!(stats.applied, 0);
    assert_eq!(g.outputs()[0].node, sum);
    assert_eq!(g.get(sum).unwrap().op_name(), Some(prim::REDUCE_SUM));
}

#[test]
fn non_constant_input_is_not_converted() {
    init_logger();
    let mut g = FuncGraph::new("param-axis");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[2, 3]));
    let axis = g.add_parameter("axis", AbstractValue::tensor(DType::I64, &[1]));
    let sum = g.call(Primitive::new(prim::REDUCE_SUM), &[x, axis]);
    g.set_outputs(vec![Edge::data(sum)]);

    let stats = adapt(&mut g);
    assert_eq!(stats.applied, 0);
    assert_eq!(stats.skipped, 1);
    assert_eq!(g.get(sum).unwrap().inputs().len(), 2);
}

#[test]
fn depend_wrapped_constant_is_not_converted() {
    init_logger();
    let mut g = FuncGraph::new("depend-axis");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[2, 3]));
    let lit = g.add_literal(Value::IntList(vec![0]));
    let depend = g.call(Primitive::new(prim::DEPEND), &[lit, x]);
    let sum = g.call(Primitive::new(prim::REDUCE_SUM), &[x, depend]);
    g.set_outputs(vec![Edge::data(sum)]);

    let stats = adapt(&mut g);
    assert_eq!(stats.applied, 0);
    assert_eq!(g.outputs()[0].node, sum);
    assert!(!op_names(&g).iter().any(|name| name == "ReduceSumD"));
}

#[test]
fn pre_check_rejection_keeps_the_node() {
    init_logger();
    let mut g = FuncGraph::new("tile");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[2, 3]));
    let multiples = g.add_literal(Value::IntList(vec![2, 2]));
    let tile = g.call(Primitive::new(prim::TILE), &[x, multiples]);
    g.set_outputs(vec![Edge::data(tile)]);
    {
        // One multiple for a rank-2 input after the fact.
        let mut mgr = GraphManager::new(&mut g).unwrap();
        let short = mgr.add_literal(Value::IntList(vec![2]));
        mgr.set_input(tile, 1, Edge::data(short)).unwrap();
    }
    let registry = InferRegistry::builtin();
    let mut patterns = PatternSet::new();
    patterns.add_node(OpAdapter::new(
        Arc::new(OpAdaptationRegistry::builtin()),
        Arc::new(KernelSupportTable::builtin()),
        AdaptPhase::Backend,
    ));
    let stats = apply_patterns_greedily(
        &mut g,
        &patterns.freeze(),
        &RewriteContext::new(&registry),
        &GreedyConfig::default(),
    )
    .unwrap();
    assert_eq!(stats.applied, 0);
    assert_eq!(stats.skipped, 1);
    assert_eq!(g.get(tile).unwrap().op_name(), Some(prim::TILE));
}

#[test]
fn unify_phase_renames_sparse_gather() {
    init_logger();
    let mut g = FuncGraph::new("gather");
    let params = g.add_parameter("params", AbstractValue::tensor(DType::F32, &[8, 4]));
    let indices = g.add_parameter("indices", AbstractValue::tensor(DType::I32, &[3]));
    let axis = g.add_literal(Value::Int(0));
    let gather = g.call(Primitive::new("SparseGatherV2"), &[params, indices, axis]);
    g.set_outputs(vec![Edge::data(gather)]);

    let registry = InferRegistry::builtin();
    let mut patterns = PatternSet::new();
    patterns.add_node(OpAdapter::new(
        Arc::new(OpAdaptationRegistry::builtin()),
        Arc::new(KernelSupportTable::builtin()),
        AdaptPhase::Unify,
    ));
    let stats = apply_patterns_greedily(
        &mut g,
        &patterns.freeze(),
        &RewriteContext::new(&registry),
        &GreedyConfig::default(),
    )
    .unwrap();
    assert_eq!(stats.applied, 1);

    let node = g.get(gather).unwrap();
    let prim = node.primitive().unwrap();
    assert_eq!(prim.name, prim::GATHER);
    assert_eq!(prim.attr("is_sparse"), Some(&Value::Bool(true)));
    assert_eq!(node.attr(ATTR_ME_OP_NAME), Some(&Value::Str("SparseGatherV2".to_string())));
    assert_eq!(node.attr(ATTR_OP_ADAPTATION_PROCESSED), Some(&Value::Bool(true)));
}

#[test]
fn strict_table_rejects_unlisted_targets() {
    init_logger();
    let (mut g, sum) = reduce_sum(DType::F32, known(&[2, 3]));
    let stats = adapt_with(&mut g, AdaptPhase::Backend, Arc::new(KernelSupportTable::new()));
    assert_eq!(stats.applied, 0);
    assert_eq!(g.outputs()[0].node, sum);
}
