use std::sync::Arc;

use log::{debug, info, log_enabled, trace, Level};
use serde::Serialize;

use crate::config::CompileOptions;
use crate::error::CompileError;
use crate::ir::FuncGraph;
use crate::parallel::{ParallelInputs, PipelineReport, PipelineTransformer, StrategyAssignment};
use crate::passes::{
    GcPass, GraphPass, InferShapePass, OpAdaptationPass, PassContext, PassResult, PipelineCutPass,
    RewritePass, StageEliminationPass, StrategyPass,
};
use crate::registry::Registries;

pub enum Step {
    Pass(Arc<dyn GraphPass>),
    FixedPoint { max_iters: usize, steps: Vec<Step> },
}

pub struct PipelineBuilder {
    steps: Vec<Step>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn pass(&mut self, pass: Arc<dyn GraphPass>) {
        self.steps.push(Step::Pass(pass));
    }

    pub fn fixed_point<F>(&mut self, max_iters: usize, build: F)
    where
        F: FnOnce(&mut PipelineBuilder),
    {
        let mut inner = PipelineBuilder::new();
        build(&mut inner);
        self.steps.push(Step::FixedPoint {
            max_iters: max_iters.max(1),
            steps: inner.steps,
        });
    }

    pub fn finish(self) -> Vec<Step> {
        self.steps
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassStat {
    pub pass: &'static str,
    pub result: PassResult,
    pub nodes_after: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompileStats {
    pub total: PassResult,
    pub passes: Vec<PassStat>,
}

/// Everything a successful compile produces.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub graph: FuncGraph,
    pub strategies: Option<StrategyAssignment>,
    pub pipeline: Option<PipelineReport>,
    pub stats: CompileStats,
}

/// Runs the pass pipeline over one graph.
pub struct Compiler<'r> {
    registries: &'r Registries,
    options: CompileOptions,
    steps: Vec<Step>,
}

impl<'r> Compiler<'r> {
    pub fn new(registries: &'r Registries, options: CompileOptions) -> Self {
        let mut builder = PipelineBuilder::new();
        builder.pass(Arc::new(InferShapePass));
        builder.fixed_point(options.fixed_point_iterations, |p| {
            p.pass(Arc::new(RewritePass::canonical()));
            p.pass(Arc::new(InferShapePass));
        });
        for phase in &options.adaptation_phases {
            builder.pass(Arc::new(OpAdaptationPass::new(registries, *phase)));
        }
        builder.pass(Arc::new(GcPass));
        builder.pass(Arc::new(InferShapePass));
        if options.parallel.is_some() {
            builder.pass(Arc::new(StrategyPass));
            builder.pass(Arc::new(PipelineCutPass));
            builder.pass(Arc::new(StageEliminationPass));
        }
        Self::with_steps(registries, options, builder.finish())
    }

    /// A compiler running a custom step list. `MESHIR_*` environment
    /// overrides are applied to `options`.
    pub fn with_steps(registries: &'r Registries, options: CompileOptions, steps: Vec<Step>) -> Self {
        Self {
            registries,
            options: options.with_env_overrides(),
            steps,
        }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn compile(
        &self,
        mut graph: FuncGraph,
        inputs: &ParallelInputs,
    ) -> Result<CompileOutput, CompileError> {
        self.options.validate()?;
        graph.validate()?;
        inputs.apply(&mut graph)?;

        let mut cx = PassContext::new(self.registries, &self.options);
        if let Some(parallel) = &self.options.parallel {
            let mesh = parallel.mesh()?;
            cx.transformer = Some(PipelineTransformer::from_mesh(&mesh, parallel.global_rank)?);
            cx.mesh = Some(mesh);
        }

        let mut stats = CompileStats::default();
        run_steps(&self.steps, &mut graph, &mut cx, &mut stats, &self.options)?;
        graph.validate()?;
        info!(
            "compiled {}: {} node(s), {} rewrite(s), {} erased",
            graph.name,
            graph.len(),
            stats.total.rewrites_applied,
            stats.total.erased_nodes
        );

        Ok(CompileOutput {
            graph,
            strategies: cx.strategies,
            pipeline: cx.pipeline,
            stats,
        })
    }
}

fn run_steps(
    steps: &[Step],
    graph: &mut FuncGraph,
    cx: &mut PassContext,
    stats: &mut CompileStats,
    options: &CompileOptions,
) -> Result<bool, CompileError> {
    let mut changed_any = false;
    for step in steps {
        match step {
            Step::Pass(pass) => {
                let result = pass.run(graph, cx).map_err(|e| e.in_pass(pass.name()))?;
                changed_any |= result.changed;
                stats.total = stats.total.merge(result);
                stats.passes.push(PassStat {
                    pass: pass.name(),
                    result,
                    nodes_after: graph.len(),
                });
                if options.pass_stats {
                    info!(
                        "{}: changed={} iterations={} rewrites={} erased={} nodes={}",
                        pass.name(),
                        result.changed,
                        result.iterations,
                        result.rewrites_applied,
                        result.erased_nodes,
                        graph.len()
                    );
                }
                if options.dump_ir && log_enabled!(Level::Trace) {
                    trace!("after {}:\n{graph}", pass.name());
                }
            }
            Step::FixedPoint { max_iters, steps } => {
                let mut iter = 0usize;
                loop {
                    if iter >= *max_iters {
                        debug!("fixed point not reached after {max_iters} round(s)");
                        break;
                    }
                    iter += 1;
                    let changed = run_steps(steps, graph, cx, stats, options)?;
                    changed_any |= changed;
                    if !changed {
                        break;
                    }
                }
            }
        }
    }
    Ok(changed_any)
}
