use std::sync::Arc;

use meshir::ir::prim::{self, ATTR_AXIS, ATTR_SRC_RANK};
use meshir::parallel::{PropagationState, StrategyError};
use meshir::passes::{GcPass, InferShapePass};
use meshir::{
    AbstractValue, CompileError, CompileOptions, Compiler, DType, Edge, FuncGraph, NodeId,
    ParallelInputs, ParallelOptions, PipelineBuilder, Primitive, Registries, Value,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn reduce_all() -> FuncGraph {
    let mut g = FuncGraph::new("reduce-all");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[2, 3]));
    let axis = g.add_literal(Value::IntList(vec![]));
    let sum = g.call(Primitive::new(prim::REDUCE_SUM), &[x, axis]);
    g.set_outputs(vec![Edge::data(sum)]);
    g
}

struct Model {
    graph: FuncGraph,
    mm: NodeId,
    act: NodeId,
}

fn two_stage_model() -> Model {
    let mut g = FuncGraph::new("model");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[8, 16]));
    let w = g.add_parameter("w", AbstractValue::tensor(DType::F32, &[16, 32]));
    let mm = g.call(Primitive::new(prim::MATMUL), &[x, w]);
    let act = g.call(Primitive::new("ReLU"), &[mm]);
    g.set_outputs(vec![Edge::data(act)]);
    Model { graph: g, mm, act }
}

#[test]
fn single_process_compile_canonicalizes_and_adapts() {
    init_logger();
    let out = Compiler::new(Registries::global(), CompileOptions::default())
        .compile(reduce_all(), &ParallelInputs::default())
        .unwrap();

    let root = out.graph.get(out.graph.outputs()[0].node).unwrap();
    let prim = root.primitive().unwrap();
    assert_eq!(prim.name, "ReduceSumD");
    assert_eq!(prim.attr(ATTR_AXIS), Some(&Value::IntList(vec![0, 1])));
    assert_eq!(root.abstract_value, Some(AbstractValue::tensor(DType::F32, &[])));
    assert!(out.strategies.is_none() && out.pipeline.is_none());
    assert!(out.stats.total.rewrites_applied >= 2);
    // Only the parameter and the adapted reduce survive.
    assert_eq!(out.graph.len(), 2);

    let names: Vec<&str> = out.stats.passes.iter().map(|p| p.pass).collect();
    assert_eq!(names.first(), Some(&"infer-shape"));
    assert!(names.contains(&"canonicalize"));
    assert!(names.contains(&"op-adaptation-backend"));
    assert!(!names.contains(&"pipeline-cut"));
}

#[test]
fn two_stage_compile_keeps_the_local_stage() {
    init_logger();
    let m = two_stage_model();
    let mut inputs = ParallelInputs::default();
    inputs.stage_hints.insert(m.mm, 0);
    inputs.stage_hints.insert(m.act, 1);
    inputs.anchors.insert(m.mm, vec![vec![2, 1], vec![1, 1]]);
    let options = CompileOptions::default().with_parallel(ParallelOptions {
        device_num: 4,
        stage_num: 2,
        global_rank: 2,
    });

    let out = Compiler::new(Registries::global(), options)
        .compile(m.graph, &inputs)
        .unwrap();

    let strategies = out.strategies.unwrap();
    assert_eq!(strategies.get(m.mm).unwrap().state, PropagationState::Copied);
    assert_eq!(strategies.get(m.act).unwrap().strategies, vec![vec![2, 1]]);

    let report = out.pipeline.unwrap();
    assert_eq!(report.local_stage, 1);
    assert_eq!((report.sends, report.receives), (1, 1));

    assert!(!out.graph.contains(m.mm));
    let act = out.graph.get(m.act).unwrap();
    assert_eq!(act.annotations.strategy, Some(vec![vec![2, 1]]));
    let recv = out.graph.get(act.inputs()[0].node).unwrap();
    assert!(recv.is_call_to(prim::RECEIVE));
    assert_eq!(recv.primitive().unwrap().int_attr(ATTR_SRC_RANK), Some(0));
    assert!(out.graph.parameters().is_empty());
}

#[test]
fn inference_failure_names_the_pass() {
    init_logger();
    let mut g = FuncGraph::new("bad");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[2, 3]));
    let y = g.add_parameter("y", AbstractValue::tensor(DType::F32, &[4]));
    let add = g.call(Primitive::new("Add"), &[x, y]);
    g.set_outputs(vec![Edge::data(add)]);

    let err = Compiler::new(Registries::global(), CompileOptions::default())
        .compile(g, &ParallelInputs::default())
        .unwrap_err();
    assert!(matches!(err, CompileError::Pass { pass: "infer-shape", .. }), "{err}");
    assert!(matches!(err.root(), CompileError::Infer(_)));
}

#[test]
fn rank_outside_the_world_is_a_config_error() {
    init_logger();
    let options = CompileOptions::default().with_parallel(ParallelOptions {
        device_num: 4,
        stage_num: 2,
        global_rank: 4,
    });
    let err = Compiler::new(Registries::global(), options)
        .compile(reduce_all(), &ParallelInputs::default())
        .unwrap_err();
    assert!(matches!(err, CompileError::Config { .. }), "{err}");
}

#[test]
fn uneven_mesh_is_rejected() {
    init_logger();
    let options = CompileOptions::default().with_parallel(ParallelOptions {
        device_num: 3,
        stage_num: 2,
        global_rank: 0,
    });
    let err = Compiler::new(Registries::global(), options)
        .compile(reduce_all(), &ParallelInputs::default())
        .unwrap_err();
    assert!(
        matches!(err, CompileError::Strategy(StrategyError::InvalidMesh { .. })),
        "{err}"
    );
}

#[test]
fn zero_rewrite_cap_is_rejected() {
    let options = CompileOptions::from_json_str(r#"{"max_rewrite_iterations": 0}"#).unwrap();
    let err = Compiler::new(Registries::global(), options)
        .compile(reduce_all(), &ParallelInputs::default())
        .unwrap_err();
    assert!(matches!(err, CompileError::Config { .. }));
}

#[test]
fn custom_step_list_runs_in_order() {
    init_logger();
    let mut builder = PipelineBuilder::new();
    builder.pass(Arc::new(InferShapePass));
    builder.fixed_point(3, |p| p.pass(Arc::new(GcPass)));
    let compiler = Compiler::with_steps(Registries::global(), CompileOptions::default(), builder.finish());

    let mut g = reduce_all();
    let x = g.parameters()[0];
    g.call(Primitive::new("Exp"), &[x]);
    let out = compiler.compile(g, &ParallelInputs::default()).unwrap();

    let names: Vec<&str> = out.stats.passes.iter().map(|p| p.pass).collect();
    // The sweep changes the graph once, then the loop settles.
    assert_eq!(names, vec!["infer-shape", "gc", "gc"]);
    assert_eq!(out.stats.total.erased_nodes, 1);
    assert_eq!(out.graph.outputs()[0].node, NodeId(2));
}

#[test]
fn options_load_from_a_file() {
    let dir = std::env::temp_dir().join(format!("meshir-options-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("options.json");
    std::fs::write(
        &path,
        r#"{"pass_stats": true, "parallel": {"device_num": 8, "stage_num": 2}}"#,
    )
    .unwrap();

    let options = CompileOptions::load(&path).unwrap();
    assert!(options.pass_stats);
    let parallel = options.parallel.unwrap();
    assert_eq!(parallel.global_rank, 0);
    assert_eq!(parallel.mesh().unwrap().stage_devices(), 4);

    let missing = CompileOptions::load(dir.join("missing.json")).unwrap_err();
    assert!(missing.to_string().contains("missing.json"));
    std::fs::remove_dir_all(&dir).unwrap();
}
