//! Runs in its own process: the environment is read once per process.

use meshir::ir::prim;
use meshir::{
    AbstractValue, CompileOptions, Compiler, DType, Edge, FuncGraph, ParallelInputs, Primitive,
    Registries, Value,
};

#[test]
fn environment_overrides_reach_the_compiler() {
    let _ = env_logger::builder().is_test(true).try_init();
    std::env::set_var("MESHIR_MAX_REWRITE_ITERS", "3");
    std::env::set_var("MESHIR_PASS_STATS", "1");

    let options = CompileOptions {
        max_rewrite_iterations: 500,
        ..CompileOptions::default()
    };
    let compiler = Compiler::new(Registries::global(), options);
    assert_eq!(compiler.options().max_rewrite_iterations, 3);
    assert!(compiler.options().pass_stats);
    assert!(!compiler.options().dump_ir);

    let mut g = FuncGraph::new("reduce-all");
    let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[2, 3]));
    let axis = g.add_literal(Value::IntList(vec![]));
    let sum = g.call(Primitive::new(prim::REDUCE_SUM), &[x, axis]);
    g.set_outputs(vec![Edge::data(sum)]);
    let out = compiler.compile(g, &ParallelInputs::default()).unwrap();
    assert!(!out.stats.passes.is_empty());
}
