use meshir::infer::{infer_graph, InferRegistry};
use meshir::ir::prim::{self, ATTR_DEST_RANKS, ATTR_DTYPE, ATTR_SHAPE, ATTR_SR_TAG};
use meshir::ir::{EdgeKind, MonadKind, Node, TensorLiteral};
use meshir::parallel::{PipelineError, PipelineTransformer};
use meshir::{AbstractValue, DType, Edge, FuncGraph, NodeId, Primitive, Value};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn staged(graph: &mut FuncGraph, op: &str, inputs: &[NodeId], stage: u32) -> NodeId {
    let id = graph.call(Primitive::new(op), inputs);
    graph.set_stage(id, stage).unwrap();
    id
}

fn infer(graph: &mut FuncGraph) {
    infer_graph(graph, &InferRegistry::builtin()).unwrap();
}

fn calls_to<'g>(graph: &'g FuncGraph, op: &str) -> Vec<&'g Node> {
    graph.nodes().filter(|n| n.is_call_to(op)).collect()
}

fn assert_no_crossing_values(graph: &FuncGraph) {
    for node in graph.nodes() {
        for edge in node.inputs().iter().filter(|e| e.kind != EdgeKind::Order) {
            assert_eq!(
                graph.get(edge.node).unwrap().annotations.stage,
                node.annotations.stage,
                "{} reads {} across stages",
                node.id,
                edge.node
            );
        }
    }
}

struct TwoStage {
    graph: FuncGraph,
    x: NodeId,
    a: NodeId,
    b: NodeId,
    c: NodeId,
}

/// `x -> ReLU (stage 0) -> Neg (stage 1) -> Exp`.
fn two_stage() -> TwoStage {
    let mut g = FuncGraph::new("two-stage");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[4, 8]));
    let a = staged(&mut g, "ReLU", &[x], 0);
    let b = staged(&mut g, "Neg", &[a], 1);
    let c = g.call(Primitive::new("Exp"), &[b]);
    g.set_outputs(vec![Edge::data(c)]);
    infer(&mut g);
    TwoStage { graph: g, x, a, b, c }
}

#[test]
fn crossing_edge_becomes_a_matched_pair() {
    init_logger();
    let mut t = two_stage();
    let report = PipelineTransformer::new(2, 0, 1)
        .unwrap()
        .transform(&mut t.graph)
        .unwrap();
    assert_eq!((report.sends, report.receives), (1, 1));
    assert_no_crossing_values(&t.graph);

    let sends = calls_to(&t.graph, prim::SEND);
    let recvs = calls_to(&t.graph, prim::RECEIVE);
    let (send, recv) = (sends[0], recvs[0]);
    let sp = send.primitive().unwrap();
    let rp = recv.primitive().unwrap();
    assert_eq!(sp.int_attr(ATTR_SR_TAG), rp.int_attr(ATTR_SR_TAG));
    assert_eq!(sp.attr(ATTR_SHAPE), Some(&Value::IntList(vec![4, 8])));
    assert_eq!(rp.attr(ATTR_SHAPE), sp.attr(ATTR_SHAPE));
    assert_eq!(sp.attr(ATTR_DTYPE), Some(&Value::Type(DType::F32)));
    assert_eq!(send.annotations.stage, Some(0));
    assert_eq!(recv.annotations.stage, Some(1));
    assert_eq!(send.inputs()[0].node, t.a);
    assert_eq!(
        recv.abstract_value,
        Some(AbstractValue::tensor(DType::F32, &[4, 8]))
    );
    assert_eq!(t.graph.get(t.b).unwrap().inputs()[0].node, recv.id);
    assert_eq!(t.graph.get(t.c).unwrap().annotations.stage, Some(1));
}

#[test]
fn consumer_stage_keeps_only_its_half() {
    init_logger();
    let mut t = two_stage();
    let unused = t
        .graph
        .add_parameter("unused", AbstractValue::tensor(DType::F32, &[2]));
    t.graph.set_stage(unused, 1).unwrap();
    let report = PipelineTransformer::new(2, 1, 1)
        .unwrap()
        .run(&mut t.graph)
        .unwrap();
    assert_eq!(report.local_stage, 1);
    assert_eq!(report.eliminated_parameters, 1);
    assert!(!t.graph.contains(t.a) && !t.graph.contains(t.x));
    assert!(!t.graph.contains(unused));
    assert!(calls_to(&t.graph, prim::SEND).is_empty());
    assert_eq!(calls_to(&t.graph, prim::RECEIVE).len(), 1);
    assert_eq!(t.graph.outputs()[0].node, t.c);
    assert!(t.graph.parameters().is_empty());
    t.graph.validate().unwrap();
}

#[test]
fn producer_stage_drops_foreign_outputs() {
    init_logger();
    let mut t = two_stage();
    PipelineTransformer::new(2, 0, 1)
        .unwrap()
        .run(&mut t.graph)
        .unwrap();
    assert!(t.graph.contains(t.a) && t.graph.contains(t.x));
    assert!(!t.graph.contains(t.b) && !t.graph.contains(t.c));
    assert_eq!(calls_to(&t.graph, prim::SEND).len(), 1);
    assert!(t.graph.outputs().is_empty());
}

#[test]
fn one_value_read_twice_downstream_is_sent_once() {
    init_logger();
    let mut g = FuncGraph::new("fanout");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[4]));
    let a = staged(&mut g, "ReLU", &[x], 0);
    let b = staged(&mut g, "Neg", &[a], 1);
    let c = staged(&mut g, "Abs", &[a], 1);
    let d = g.call(Primitive::new("Add"), &[b, c]);
    g.set_outputs(vec![Edge::data(d)]);
    infer(&mut g);

    let report = PipelineTransformer::new(2, 0, 1)
        .unwrap()
        .transform(&mut g)
        .unwrap();
    assert_eq!((report.sends, report.receives), (1, 1));
    let recv = g.get(b).unwrap().inputs()[0].node;
    assert_eq!(g.get(c).unwrap().inputs()[0].node, recv);
}

#[test]
fn communication_on_a_stage_is_chained() {
    init_logger();
    let mut g = FuncGraph::new("chain");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[4]));
    let a1 = staged(&mut g, "ReLU", &[x], 0);
    let a2 = staged(&mut g, "Neg", &[x], 0);
    let d = staged(&mut g, "Add", &[a1, a2], 1);
    g.set_outputs(vec![Edge::data(d)]);
    infer(&mut g);

    let report = PipelineTransformer::new(2, 0, 1)
        .unwrap()
        .transform(&mut g)
        .unwrap();
    assert_eq!(report.sends, 2);
    let recvs: Vec<NodeId> = calls_to(&g, prim::RECEIVE).iter().map(|n| n.id).collect();
    assert_eq!(recvs.len(), 2);
    assert!(recvs.iter().any(|r| {
        let others: Vec<Edge> = recvs.iter().filter(|o| *o != r).map(|o| Edge::order(*o)).collect();
        g.get(*r).unwrap().inputs().iter().any(|e| others.contains(e))
    }));
    let sends = calls_to(&g, prim::SEND);
    assert!(sends
        .iter()
        .any(|s| s.inputs().iter().any(|e| e.kind == EdgeKind::Order)));
}

#[test]
fn parameter_read_on_two_stages_is_broadcast() {
    init_logger();
    let mut g = FuncGraph::new("shared");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[8]));
    let w = g.add_parameter("w", AbstractValue::tensor(DType::F32, &[8]));
    let a = staged(&mut g, "Add", &[x, w], 0);
    let b = staged(&mut g, "Mul", &[a, w], 1);
    g.set_outputs(vec![Edge::data(b)]);
    infer(&mut g);

    let report = PipelineTransformer::new(2, 0, 1)
        .unwrap()
        .transform(&mut g)
        .unwrap();
    assert_eq!(report.broadcasts, 1);
    assert_eq!(report.sends, 1);
    assert_eq!(report.receives, 2);
    assert_no_crossing_values(&g);

    let bcast = calls_to(&g, prim::BROADCAST)[0];
    let bp = bcast.primitive().unwrap();
    assert_eq!(bcast.annotations.stage, Some(0));
    assert_eq!(bp.attr(ATTR_DEST_RANKS), Some(&Value::IntList(vec![1])));
    let tag = bp.int_attr(ATTR_SR_TAG);
    let w_recv = g.get(b).unwrap().inputs()[1].node;
    let w_recv = g.get(w_recv).unwrap();
    assert!(w_recv.is_call_to(prim::RECEIVE));
    assert_eq!(w_recv.primitive().unwrap().int_attr(ATTR_SR_TAG), tag);
    assert_eq!(g.get(a).unwrap().inputs()[1].node, w);
}

#[test]
fn literals_are_copied_instead_of_sent() {
    init_logger();
    let mut g = FuncGraph::new("literal");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::I64, &[4]));
    let lit = g.add_literal(Value::Tensor(TensorLiteral::i64_vector(vec![1, 2, 3, 4])));
    let a = staged(&mut g, "Add", &[x, lit], 0);
    let b = staged(&mut g, "Add", &[a, lit], 1);
    g.set_outputs(vec![Edge::data(b)]);
    infer(&mut g);

    let report = PipelineTransformer::new(2, 1, 1)
        .unwrap()
        .run(&mut g)
        .unwrap();
    assert_eq!(report.duplicated_literals, 1);
    assert_eq!(report.sends, 1);
    let copy = g.get(b).unwrap().inputs()[1].node;
    assert_ne!(copy, lit);
    assert!(g.get(copy).unwrap().is_literal());
    assert!(!g.contains(lit));
}

#[test]
fn monad_read_on_a_later_stage_gets_a_local_monad() {
    init_logger();
    let mut g = FuncGraph::new("state");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[4]));
    let p = g.add_parameter("p", AbstractValue::tensor(DType::F32, &[4]));
    let u = g.add_literal(Value::Monad(MonadKind::Universal));
    let a = staged(&mut g, "ReLU", &[x], 0);
    let us = staged(&mut g, prim::UPDATE_STATE, &[u, a], 0);
    let load = staged(&mut g, prim::LOAD, &[p, us], 1);
    let b = staged(&mut g, "Neg", &[load], 1);
    g.set_outputs(vec![Edge::data(b)]);
    infer(&mut g);

    let pipeline = PipelineTransformer::new(2, 1, 1).unwrap();
    let mut report = pipeline.transform(&mut g).unwrap();
    assert_eq!(report.local_monads, 1);
    assert_eq!((report.sends, report.receives), (0, 0));
    assert_no_crossing_values(&g);

    let state = g.get(load).unwrap().inputs()[1].node;
    assert_ne!(state, u);
    let state = g.get(state).unwrap();
    assert_eq!(state.literal(), Some(&Value::Monad(MonadKind::Universal)));
    assert_eq!(state.annotations.stage, Some(1));
    assert_eq!(g.get(load).unwrap().inputs()[0].node, p);

    pipeline.eliminate(&mut g, &mut report).unwrap();
    assert!(!g.contains(us) && !g.contains(a));
    assert!(g.contains(load));
    g.validate().unwrap();
}

#[test]
fn order_edges_across_stages_are_dropped() {
    init_logger();
    let mut g = FuncGraph::new("order");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[4]));
    let a = staged(&mut g, "ReLU", &[x], 0);
    let y = g.add_parameter("y", AbstractValue::tensor(DType::F32, &[4]));
    let b = g.add_call(Primitive::new("Neg"), vec![Edge::data(y), Edge::order(a)]);
    g.set_stage(b, 1).unwrap();
    g.set_outputs(vec![Edge::data(a), Edge::data(b)]);
    infer(&mut g);

    let report = PipelineTransformer::new(2, 1, 1)
        .unwrap()
        .run(&mut g)
        .unwrap();
    assert_eq!(report.dropped_order_edges, 1);
    assert_eq!(report.sends, 0);
    assert!(!g.contains(a));
    assert_eq!(g.get(b).unwrap().inputs(), &[Edge::data(y)]);
}

#[test]
fn backward_data_edge_is_fatal() {
    init_logger();
    let mut g = FuncGraph::new("backward");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[4]));
    let a = staged(&mut g, "ReLU", &[x], 1);
    let b = staged(&mut g, "Neg", &[a], 0);
    g.set_outputs(vec![Edge::data(b)]);
    infer(&mut g);

    let err = PipelineTransformer::new(2, 0, 1)
        .unwrap()
        .transform(&mut g)
        .unwrap_err();
    assert!(matches!(err, PipelineError::BackwardEdge { .. }), "{err}");
}

#[test]
fn single_stage_cuts_nothing() {
    init_logger();
    let mut t = two_stage();
    // Hints are irrelevant with one stage.
    let before = t.graph.len();
    let report = PipelineTransformer::new(1, 0, 4)
        .unwrap()
        .run(&mut t.graph)
        .unwrap();
    assert_eq!(report.sends + report.receives + report.broadcasts, 0);
    assert_eq!(t.graph.len(), before);
    assert!(t.graph.nodes().all(|n| n.annotations.stage == Some(0)));
}
