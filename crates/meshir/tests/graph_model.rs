use meshir::infer::{infer_graph, InferRegistry};
use meshir::ir::{
    prim, AbstractValue, DType, Edge, FuncGraph, GraphError, GraphId, GraphManager, NodeId,
    NodeKind, Primitive, Value,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn f32_param(graph: &mut FuncGraph, name: &str, dims: &[i64]) -> NodeId {
    graph.add_parameter(name, AbstractValue::tensor(DType::F32, dims))
}

fn chain() -> (FuncGraph, NodeId, NodeId, NodeId) {
    let mut g = FuncGraph::new("chain");
    let x = f32_param(&mut g, "x", &[2, 3]);
    let a = g.call(Primitive::new("ReLU"), &[x]);
    let b = g.call(Primitive::new("Neg"), &[a]);
    g.set_outputs(vec![Edge::data(b)]);
    (g, x, a, b)
}

#[test]
fn topo_order_breaks_ties_by_creation_id() {
    init_logger();
    let mut g = FuncGraph::new("ties");
    let x = f32_param(&mut g, "x", &[4]);
    let y = f32_param(&mut g, "y", &[4]);
    let b = g.call(Primitive::new("Neg"), &[y]);
    let a = g.call(Primitive::new("Neg"), &[x]);
    let sum = g.call(Primitive::new("Add"), &[a, b]);
    assert_eq!(g.topo_order().unwrap(), vec![x, y, b, a, sum]);
}

#[test]
fn replace_moves_every_use_and_the_output() {
    init_logger();
    let (mut g, x, a, b) = chain();
    let mut mgr = GraphManager::new(&mut g).unwrap();
    let c = mgr.add_call(Primitive::new("Abs"), vec![Edge::data(x)]);
    mgr.replace(a, c).unwrap();
    assert!(mgr.users(a).is_empty());
    assert_eq!(mgr.users(c).len(), 1);
    assert_eq!(mgr.graph.get(b).unwrap().inputs()[0].node, c);

    mgr.replace(b, c).unwrap();
    assert_eq!(mgr.graph.outputs()[0].node, c);
}

#[test]
fn replace_refuses_a_stale_index() {
    init_logger();
    let (mut g, x, a, _) = chain();
    let mut mgr = GraphManager::new(&mut g).unwrap();
    let c = mgr.add_call(Primitive::new("Abs"), vec![Edge::data(x)]);
    // Edits through the graph bypass the manager.
    mgr.graph.set_stage(x, 0).unwrap();
    assert!(mgr.is_stale());
    assert!(matches!(mgr.replace(a, c), Err(GraphError::StaleIndex { .. })));
    mgr.refresh().unwrap();
    mgr.replace(a, c).unwrap();
}

#[test]
fn replace_refuses_rank_mismatch_and_leaves_graph_intact() {
    init_logger();
    let (mut g, _, a, b) = chain();
    let mut mgr = GraphManager::new(&mut g).unwrap();
    mgr.set_abstract(a, AbstractValue::tensor(DType::F32, &[2, 3])).unwrap();
    let lit = mgr.add_literal(Value::Int(1));
    let c = mgr.add_call(Primitive::new("Abs"), vec![Edge::data(lit)]);
    mgr.set_abstract(c, AbstractValue::tensor(DType::F32, &[6])).unwrap();
    assert!(matches!(mgr.replace(a, c), Err(GraphError::RankMismatch { .. })));
    assert_eq!(mgr.graph.get(b).unwrap().inputs()[0].node, a);
    assert_eq!(mgr.users(a).len(), 1);
}

#[test]
fn cycles_need_a_recurrent_edge() {
    init_logger();
    let mut g = FuncGraph::new("loop");
    let x = f32_param(&mut g, "x", &[4]);
    let add = g.call(Primitive::new("Add"), &[x, x]);
    {
        let mut mgr = GraphManager::new(&mut g).unwrap();
        mgr.set_input(add, 1, Edge::data(add)).unwrap();
    }
    assert!(matches!(g.validate(), Err(GraphError::Cycle { .. })));

    if let Some(NodeKind::Call { inputs, .. }) = g.node_mut(add).map(|n| &mut n.kind) {
        inputs[1] = Edge::recurrent(add);
    }
    g.validate().unwrap();
}

#[test]
fn sweep_keeps_side_effects_and_parameters() {
    init_logger();
    let (mut g, x, a, b) = chain();
    let dead = g.call(Primitive::new("Exp"), &[a]);
    let print = g.call(Primitive::new(prim::PRINT), &[x]);
    let removed = g.sweep(&[]);
    assert_eq!(removed, 1);
    assert!(!g.contains(dead));
    assert!(g.contains(print) && g.contains(b) && g.contains(x));
}

#[test]
fn display_lists_every_live_node() {
    let (g, _, _, _) = chain();
    let text = g.to_string();
    assert!(text.contains("ReLU"));
    assert!(text.contains("Neg"));
}

#[test]
fn graph_reference_is_a_first_class_value() {
    init_logger();
    let mut g = FuncGraph::new("outer");
    let x = f32_param(&mut g, "x", &[2, 3]);
    let body = g.add_graph_ref(GraphId::new("body"));
    let unused = g.add_graph_ref(GraphId::new("cond"));
    let pair = g.call(Primitive::new(prim::MAKE_TUPLE), &[body, x]);
    g.set_outputs(vec![Edge::data(pair)]);

    let node = g.get(body).unwrap();
    assert!(node.inputs().is_empty());
    assert!(matches!(&node.kind, NodeKind::Graph(id) if id.0 == "body"));

    infer_graph(&mut g, &InferRegistry::builtin()).unwrap();
    let func = AbstractValue::Func(GraphId::new("body"));
    assert_eq!(g.get(body).unwrap().abstract_value.as_ref(), Some(&func));
    match g.get(pair).unwrap().abstract_value.as_ref() {
        Some(AbstractValue::Tuple(items)) => assert_eq!(items[0], func),
        other => panic!("expected a tuple, got {other:?}"),
    }

    assert!(g.to_string().contains("graph @body"));
    assert_eq!(g.sweep(&[]), 1);
    assert!(!g.contains(unused));
    let referenced: Vec<_> = g.referenced_graphs().into_iter().map(|id| id.0.clone()).collect();
    assert_eq!(referenced, vec!["body".to_string()]);
}
