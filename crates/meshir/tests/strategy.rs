use meshir::infer::{infer_graph, InferRegistry};
use meshir::ir::prim;
use meshir::parallel::{
    propagate_strategies, PropagationState, StrategyAssignment, StrategyCandidate, StrategyError,
};
use meshir::{AbstractValue, DType, DeviceMesh, Edge, FuncGraph, NodeId, ParallelInputs, Primitive};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Mlp {
    graph: FuncGraph,
    x: NodeId,
    w: NodeId,
    pre: NodeId,
    mm: NodeId,
    act: NodeId,
}

/// `act = ReLU(MatMul(Neg(x), w))` with x `[8, 16]` and w `[16, 32]`.
fn mlp() -> Mlp {
    let mut g = FuncGraph::new("mlp");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[8, 16]));
    let w = g.add_parameter("w", AbstractValue::tensor(DType::F32, &[16, 32]));
    let pre = g.call(Primitive::new("Neg"), &[x]);
    let mm = g.call(Primitive::new(prim::MATMUL), &[pre, w]);
    let act = g.call(Primitive::new("ReLU"), &[mm]);
    g.set_outputs(vec![Edge::data(act)]);
    Mlp {
        graph: g,
        x,
        w,
        pre,
        mm,
        act,
    }
}

fn propagate(graph: &mut FuncGraph, inputs: &ParallelInputs, mesh: DeviceMesh) -> Result<StrategyAssignment, StrategyError> {
    let registry = InferRegistry::builtin();
    infer_graph(graph, &registry).unwrap();
    inputs.apply(graph).unwrap();
    propagate_strategies(graph, &registry, &mesh)
}

fn anchored(node: NodeId, strategies: Vec<Vec<i64>>) -> ParallelInputs {
    let mut inputs = ParallelInputs::default();
    inputs.anchors.insert(node, strategies);
    inputs
}

#[test]
fn anchor_flows_forward_and_backward() {
    init_logger();
    let mut m = mlp();
    let inputs = anchored(m.mm, vec![vec![4, 1], vec![1, 1]]);
    let out = propagate(&mut m.graph, &inputs, DeviceMesh::single_stage(4).unwrap()).unwrap();

    let mm = out.get(m.mm).unwrap();
    assert_eq!(mm.state, PropagationState::Copied);
    assert_eq!(mm.output, vec![4, 1]);

    let act = out.get(m.act).unwrap();
    assert_eq!(act.state, PropagationState::Forward);
    assert_eq!(act.strategies, vec![vec![4, 1]]);

    let pre = out.get(m.pre).unwrap();
    assert_eq!(pre.state, PropagationState::Backward);
    assert_eq!(pre.strategies, vec![vec![4, 1]]);
    assert!(out.get(m.x).is_none() && out.get(m.w).is_none());
}

#[test]
fn propagation_is_deterministic() {
    init_logger();
    let run = || {
        let mut m = mlp();
        let inputs = anchored(m.mm, vec![vec![2, 2], vec![2, 1]]);
        let out = propagate(&mut m.graph, &inputs, DeviceMesh::single_stage(4).unwrap()).unwrap();
        out.to_json().unwrap()
    };
    let first = run();
    for _ in 0..3 {
        assert_eq!(run(), first);
    }
}

#[test]
fn component_without_anchor_is_rejected() {
    init_logger();
    let mut m = mlp();
    let y = m
        .graph
        .add_parameter("y", AbstractValue::tensor(DType::F32, &[4, 4]));
    let island = m.graph.call(Primitive::new("Exp"), &[y]);
    m.graph
        .set_outputs(vec![Edge::data(m.act), Edge::data(island)]);

    let inputs = anchored(m.mm, vec![vec![4, 1], vec![1, 1]]);
    let err = propagate(&mut m.graph, &inputs, DeviceMesh::single_stage(4).unwrap()).unwrap_err();
    match err {
        StrategyError::Disconnected { ops } => assert_eq!(ops.len(), 1),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn no_anchor_at_all_falls_back_to_batch_split() {
    init_logger();
    let mut m = mlp();
    let out = propagate(
        &mut m.graph,
        &ParallelInputs::default(),
        DeviceMesh::single_stage(4).unwrap(),
    )
    .unwrap();
    assert_eq!(out.len(), 3);
    assert_eq!(out.count(PropagationState::DefaultFilled), 3);
    assert_eq!(out.get(m.act).unwrap().strategies, vec![vec![4, 1]]);
}

#[test]
fn shared_parameter_divergence_is_fatal() {
    init_logger();
    let mut g = FuncGraph::new("shared");
    let x1 = g.add_parameter("x1", AbstractValue::tensor(DType::F32, &[8, 16]));
    let x2 = g.add_parameter("x2", AbstractValue::tensor(DType::F32, &[8, 16]));
    let w = g.add_parameter("w", AbstractValue::tensor(DType::F32, &[16, 32]));
    let mm1 = g.call(Primitive::new(prim::MATMUL), &[x1, w]);
    let mm2 = g.call(Primitive::new(prim::MATMUL), &[x2, w]);
    g.set_outputs(vec![Edge::data(mm1), Edge::data(mm2)]);

    let mut inputs = ParallelInputs::default();
    inputs.anchors.insert(mm1, vec![vec![2, 1], vec![1, 2]]);
    inputs.anchors.insert(mm2, vec![vec![1, 2], vec![2, 1]]);
    let err = propagate(&mut g, &inputs, DeviceMesh::single_stage(4).unwrap()).unwrap_err();
    assert!(matches!(err, StrategyError::SharedDivergence { .. }), "{err}");
}

#[test]
fn cheapest_valid_candidate_becomes_the_anchor() {
    init_logger();
    let mut m = mlp();
    let mut inputs = ParallelInputs::default();
    inputs.candidates.insert(
        m.mm,
        vec![
            StrategyCandidate {
                strategies: vec![vec![4, 1], vec![1, 1]],
                cost: 2.0,
            },
            StrategyCandidate {
                strategies: vec![vec![2, 1], vec![1, 2]],
                cost: 1.0,
            },
            // Three-way split on four devices.
            StrategyCandidate {
                strategies: vec![vec![3, 1], vec![1, 1]],
                cost: 0.5,
            },
        ],
    );
    let out = propagate(&mut m.graph, &inputs, DeviceMesh::single_stage(4).unwrap()).unwrap();
    let mm = out.get(m.mm).unwrap();
    assert_eq!(mm.state, PropagationState::Copied);
    assert_eq!(mm.strategies, vec![vec![2, 1], vec![1, 2]]);
    assert_eq!(out.get(m.act).unwrap().strategies, vec![vec![2, 2]]);
}

#[test]
fn invalid_explicit_anchor_is_rejected() {
    init_logger();
    let mut m = mlp();
    let inputs = anchored(m.mm, vec![vec![3, 1], vec![1, 1]]);
    let err = propagate(&mut m.graph, &inputs, DeviceMesh::single_stage(4).unwrap()).unwrap_err();
    assert!(matches!(err, StrategyError::InvalidStrategy { .. }), "{err}");
}

#[test]
fn anchor_with_mismatched_contraction_is_rejected() {
    init_logger();
    let mut m = mlp();
    // x is split 4 ways along k, w is not.
    let inputs = anchored(m.mm, vec![vec![1, 4], vec![1, 1]]);
    let err = propagate(&mut m.graph, &inputs, DeviceMesh::single_stage(4).unwrap()).unwrap_err();
    match err {
        StrategyError::InvalidStrategy { op, detail } => {
            assert!(op.contains("MatMul"), "{op}");
            assert!(detail.contains("split 4 ways"), "{detail}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn forward_matmul_keeps_contraction_splits_equal() {
    init_logger();
    let mut g = FuncGraph::new("chain");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[8, 16]));
    let w1 = g.add_parameter("w1", AbstractValue::tensor(DType::F32, &[16, 16]));
    let w2 = g.add_parameter("w2", AbstractValue::tensor(DType::F32, &[16, 4]));
    let mm1 = g.call(Primitive::new(prim::MATMUL), &[x, w1]);
    let mm2 = g.call(Primitive::new(prim::MATMUL), &[mm1, w2]);
    g.set_outputs(vec![Edge::data(mm2)]);

    let inputs = anchored(mm1, vec![vec![8, 1], vec![1, 8]]);
    let out = propagate(&mut g, &inputs, DeviceMesh::single_stage(8).unwrap()).unwrap();
    let mm2 = out.get(mm2).unwrap();
    assert_eq!(mm2.state, PropagationState::Forward);
    // The rows of mm1's output use the whole budget, so k cannot stay split.
    assert_eq!(mm2.strategies, vec![vec![8, 1], vec![1, 1]]);
    assert_eq!(mm2.strategies[0][1], mm2.strategies[1][0]);
}

#[test]
fn standalone_role_stays_unsplit() {
    init_logger();
    let mut m = mlp();
    let mut inputs = anchored(m.mm, vec![vec![4, 1], vec![1, 1]]);
    inputs.standalone.insert(m.act);
    let out = propagate(&mut m.graph, &inputs, DeviceMesh::single_stage(4).unwrap()).unwrap();
    let act = out.get(m.act).unwrap();
    assert_eq!(act.state, PropagationState::DefaultFilled);
    assert_eq!(act.strategies, vec![vec![1, 1]]);
}

#[test]
fn eliminated_ops_are_filled_from_neighbours() {
    init_logger();
    let mut g = FuncGraph::new("identity");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[8, 16]));
    let w = g.add_parameter("w", AbstractValue::tensor(DType::F32, &[16, 32]));
    let mm = g.call(Primitive::new(prim::MATMUL), &[x, w]);
    let id = g.call(Primitive::new("Identity"), &[mm]);
    let act = g.call(Primitive::new("ReLU"), &[id]);
    g.set_outputs(vec![Edge::data(act)]);

    let inputs = anchored(mm, vec![vec![2, 1], vec![1, 2]]);
    let out = propagate(&mut g, &inputs, DeviceMesh::single_stage(4).unwrap()).unwrap();
    assert_eq!(out.get(act).unwrap().state, PropagationState::Forward);
    assert_eq!(out.get(act).unwrap().strategies, vec![vec![2, 2]]);
    assert_eq!(out.get(id).unwrap().state, PropagationState::EliminatedFilled);
}

#[test]
fn each_stage_only_sees_its_own_devices() {
    init_logger();
    let mut m = mlp();
    let out = propagate(
        &mut m.graph,
        &ParallelInputs::default(),
        DeviceMesh::new(8, 2).unwrap(),
    )
    .unwrap();
    assert_eq!(out.get(m.act).unwrap().strategies, vec![vec![4, 1]]);
}

#[test]
fn assignment_lands_on_annotations() {
    init_logger();
    let mut m = mlp();
    let inputs = anchored(m.mm, vec![vec![4, 1], vec![1, 1]]);
    let out = propagate(&mut m.graph, &inputs, DeviceMesh::single_stage(4).unwrap()).unwrap();
    out.apply(&mut m.graph).unwrap();
    assert_eq!(
        m.graph.get(m.act).unwrap().annotations.strategy,
        Some(vec![vec![4, 1]])
    );
    let json = out.to_json().unwrap();
    assert!(json.contains("\"forward\""), "{json}");
}
