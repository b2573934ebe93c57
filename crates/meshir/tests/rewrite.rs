use meshir::infer::{infer_graph, InferRegistry};
use meshir::ir::prim::{self, ATTR_KERNEL_SIZE, ATTR_PAD_LIST, ATTR_PAD_MODE, ATTR_STRIDE};
use meshir::ir::{AbstractValue, DType, Edge, FuncGraph, NodeId, Primitive, Shape, Value};
use meshir::passes::RewritePass;
use meshir::pattern::{apply_patterns_greedily, GreedyConfig, GreedyRewriteStats, RewriteContext};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn run_canonical(graph: &mut FuncGraph, cfg: GreedyConfig) -> GreedyRewriteStats {
    let registry = InferRegistry::builtin();
    infer_graph(graph, &registry).unwrap();
    let pass = RewritePass::canonical();
    let cx = RewriteContext::new(&registry);
    apply_patterns_greedily(graph, pass.patterns(), &cx, &cfg).unwrap()
}

fn literal_input(graph: &FuncGraph, node: NodeId, input: usize) -> Value {
    let edge = graph.get(node).unwrap().inputs()[input];
    graph.get(edge.node).unwrap().literal().cloned().unwrap()
}

#[test]
fn empty_reduce_axis_becomes_every_axis() {
    init_logger();
    let mut g = FuncGraph::new("reduce");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[2, 3, 4]));
    let axis = g.add_literal(Value::IntList(vec![]));
    let sum = g.call(Primitive::new(prim::REDUCE_SUM), &[x, axis]);
    g.set_outputs(vec![Edge::data(sum)]);

    let stats = run_canonical(&mut g, GreedyConfig::default());
    assert_eq!(stats.applied, 1);
    let root = g.outputs()[0].node;
    let axis = literal_input(&g, root, 1);
    assert_eq!(axis.as_int_list(), Some(vec![0, 1, 2]));
}

#[test]
fn scalar_reduce_gets_an_empty_axis_tensor_once() {
    init_logger();
    let mut g = FuncGraph::new("scalar");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[]));
    let axis = g.add_literal(Value::IntList(vec![]));
    let sum = g.call(Primitive::new(prim::REDUCE_MEAN), &[x, axis]);
    g.set_outputs(vec![Edge::data(sum)]);

    let first = run_canonical(&mut g, GreedyConfig::default());
    assert_eq!(first.applied, 1);
    let root = g.outputs()[0].node;
    assert!(matches!(literal_input(&g, root, 1), Value::Tensor(t) if t.element_count() == 0));

    let second = run_canonical(&mut g, GreedyConfig::default());
    assert_eq!(second.applied, 0);
}

#[test]
fn order_edge_before_the_axis_is_kept() {
    init_logger();
    let mut g = FuncGraph::new("ordered");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[2, 3]));
    let y = g.add_parameter("y", AbstractValue::tensor(DType::F32, &[4]));
    let axis = g.add_literal(Value::IntList(vec![]));
    let sum = g.add_call(
        Primitive::new(prim::REDUCE_SUM),
        vec![Edge::data(x), Edge::order(y), Edge::data(axis)],
    );
    g.set_outputs(vec![Edge::data(sum)]);

    let stats = run_canonical(&mut g, GreedyConfig::default());
    assert_eq!(stats.applied, 1);
    let root = g.outputs()[0].node;
    let inputs = g.get(root).unwrap().inputs().to_vec();
    assert_eq!(inputs.len(), 3);
    assert_eq!(inputs[0], Edge::data(x));
    assert_eq!(inputs[1], Edge::order(y));
    assert_eq!(literal_input(&g, root, 2).as_int_list(), Some(vec![0, 1]));
}

#[test]
fn explicit_reduce_axis_is_left_alone() {
    init_logger();
    let mut g = FuncGraph::new("explicit");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[2, 3]));
    let axis = g.add_literal(Value::IntList(vec![1]));
    let sum = g.call(Primitive::new(prim::REDUCE_SUM), &[x, axis]);
    g.set_outputs(vec![Edge::data(sum)]);

    let stats = run_canonical(&mut g, GreedyConfig::default());
    assert_eq!(stats.applied, 0);
    assert_eq!(literal_input(&g, sum, 1), Value::IntList(vec![1]));
}

#[test]
fn iteration_cap_stops_the_driver() {
    init_logger();
    let mut g = FuncGraph::new("cap");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[2, 3]));
    let a = g.add_literal(Value::IntList(vec![]));
    let b = g.add_literal(Value::IntList(vec![]));
    let r1 = g.call(Primitive::new(prim::REDUCE_SUM), &[x, a]);
    let r2 = g.call(Primitive::new(prim::REDUCE_MAX), &[x, b]);
    g.set_outputs(vec![Edge::data(r1), Edge::data(r2)]);

    let stats = run_canonical(
        &mut g,
        GreedyConfig {
            max_iterations: 1,
            enable_gc: true,
        },
    );
    assert_eq!(stats.applied, 1);
}

fn conv_prim(name: &str, mode: &str) -> Primitive {
    Primitive::new(name)
        .with_attr(ATTR_KERNEL_SIZE, Value::IntList(vec![3]))
        .with_attr(ATTR_STRIDE, Value::IntList(vec![1, 1, 2, 2, 2]))
        .with_attr(ATTR_PAD_MODE, Value::Str(mode.to_string()))
}

#[test]
fn backprop_input_gets_same_pad_list() {
    init_logger();
    let mut g = FuncGraph::new("dx");
    let w = g.add_parameter("w", AbstractValue::tensor(DType::F32, &[4, 2, 3, 3, 3]));
    let dout = g.add_parameter("dout", AbstractValue::tensor(DType::F32, &[1, 4, 8, 8, 8]));
    let size = g.add_literal(Value::IntList(vec![1, 2, 16, 16, 16]));
    let dx = g.call(conv_prim(prim::CONV3D_BACKPROP_INPUT, "same"), &[w, dout, size]);
    g.set_outputs(vec![Edge::data(dx)]);

    run_canonical(&mut g, GreedyConfig::default());
    let pads = g.get(dx).unwrap().primitive().unwrap().attr(ATTR_PAD_LIST).cloned();
    assert_eq!(pads, Some(Value::IntList(vec![0, 1, 0, 1, 0, 1])));
}

#[test]
fn backprop_filter_valid_mode_pads_nothing() {
    init_logger();
    let mut g = FuncGraph::new("dw");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[1, 2, 17, 17, 17]));
    let dout = g.add_parameter("dout", AbstractValue::tensor(DType::F32, &[1, 4, 8, 8, 8]));
    let size = g.add_literal(Value::IntList(vec![4, 2, 3, 3, 3]));
    let dw = g.call(conv_prim(prim::CONV3D_BACKPROP_FILTER, "valid"), &[x, dout, size]);
    g.set_outputs(vec![Edge::data(dw)]);

    run_canonical(&mut g, GreedyConfig::default());
    let pads = g.get(dw).unwrap().primitive().unwrap().attr(ATTR_PAD_LIST).cloned();
    assert_eq!(pads, Some(Value::IntList(vec![0; 6])));
}

#[test]
fn dynamic_rank_input_is_skipped_not_fatal() {
    init_logger();
    let mut g = FuncGraph::new("dyn");
    let x = g.add_parameter(
        "x",
        AbstractValue::tensor_with_shape(DType::F32, Shape::UnknownRank),
    );
    let dout = g.add_parameter("dout", AbstractValue::tensor(DType::F32, &[1, 4, 8, 8, 8]));
    let size = g.add_literal(Value::IntList(vec![4, 2, 3, 3, 3]));
    let dw = g.call(conv_prim(prim::CONV3D_BACKPROP_FILTER, "same"), &[x, dout, size]);
    g.set_outputs(vec![Edge::data(dw)]);

    let stats = run_canonical(&mut g, GreedyConfig::default());
    assert_eq!(stats.applied, 0);
    assert_eq!(stats.skipped, 1);
    assert!(!g.get(dw).unwrap().primitive().unwrap().has_attr(ATTR_PAD_LIST));
}

#[test]
fn uninferred_size_operand_is_skipped_not_fatal() {
    init_logger();
    let mut g = FuncGraph::new("dx");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[1, 2, 16, 16, 16]));
    let w = g.add_parameter("w", AbstractValue::tensor(DType::F32, &[4, 2, 3, 3, 3]));
    let dout = g.add_parameter("dout", AbstractValue::tensor(DType::F32, &[1, 4, 8, 8, 8]));
    // Never inferred: the size comes from a call with no abstract value.
    let size = g.call(Primitive::new("DynamicShape"), &[x]);
    let dx = g.call(conv_prim(prim::CONV3D_BACKPROP_INPUT, "same"), &[w, dout, size]);
    g.set_outputs(vec![Edge::data(dx)]);
    assert!(g.get(size).unwrap().abstract_value.is_none());

    let registry = InferRegistry::builtin();
    let pass = RewritePass::canonical();
    let cx = RewriteContext::new(&registry);
    let stats = apply_patterns_greedily(&mut g, pass.patterns(), &cx, &GreedyConfig::default())
        .unwrap();
    assert_eq!(stats.applied, 0);
    assert_eq!(stats.skipped, 1);
    assert!(!g.get(dx).unwrap().primitive().unwrap().has_attr(ATTR_PAD_LIST));
}
