//! Graph passes run by the [`Compiler`](crate::Compiler).

mod conv3d_padlist;
mod reduce_axis;

use log::{debug, warn};
use serde::Serialize;

use crate::adapter::{AdaptPhase, OpAdapter};
use crate::config::CompileOptions;
use crate::error::CompileError;
use crate::infer::infer_graph;
use crate::ir::FuncGraph;
use crate::parallel::{
    propagate_strategies, DeviceMesh, PipelineReport, PipelineTransformer, StrategyAssignment,
};
use crate::pattern::{apply_patterns_greedily, FrozenPatternSet, GreedyConfig, PatternSet, RewriteContext};
use crate::registry::Registries;

pub use conv3d_padlist::{
    forward_input_shape, Conv3DBackpropFilterPadList, Conv3DBackpropInputPadList,
};
pub use reduce_axis::ReduceAxisUpdate;

/// Result returned by a [`GraphPass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PassResult {
    /// Whether the pass changed the graph.
    pub changed: bool,
    /// Rewrite iterations executed while applying the pass.
    pub iterations: usize,
    pub rewrites_applied: usize,
    /// Nodes removed by the pass.
    pub erased_nodes: usize,
}

impl PassResult {
    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            iterations: self.iterations + other.iterations,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
            erased_nodes: self.erased_nodes + other.erased_nodes,
        }
    }
}

/// State shared by the passes of one compile.
pub struct PassContext<'a> {
    pub registries: &'a Registries,
    pub options: &'a CompileOptions,
    pub mesh: Option<DeviceMesh>,
    pub transformer: Option<PipelineTransformer>,
    pub strategies: Option<StrategyAssignment>,
    pub pipeline: Option<PipelineReport>,
}

impl<'a> PassContext<'a> {
    pub fn new(registries: &'a Registries, options: &'a CompileOptions) -> Self {
        Self {
            registries,
            options,
            mesh: None,
            transformer: None,
            strategies: None,
            pipeline: None,
        }
    }
}

pub trait GraphPass: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, graph: &mut FuncGraph, cx: &mut PassContext) -> Result<PassResult, CompileError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct InferShapePass;

impl InferShapePass {
    const NAME: &'static str = "infer-shape";
}

impl GraphPass for InferShapePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut FuncGraph, cx: &mut PassContext) -> Result<PassResult, CompileError> {
        let stats = infer_graph(graph, &cx.registries.ops)?;
        if stats.undecided > 0 {
            warn!("{}: {} node(s) left undecided", graph.name, stats.undecided);
        }
        Ok(PassResult::default())
    }
}

/// Greedy pattern rewriting with a fixed pattern set.
pub struct RewritePass {
    name: &'static str,
    patterns: FrozenPatternSet,
}

impl RewritePass {
    pub fn new(name: &'static str, patterns: PatternSet) -> Self {
        Self {
            name,
            patterns: patterns.freeze(),
        }
    }

    /// Reduce-axis materialisation and Conv3D backprop pad-list fusion.
    pub fn canonical() -> Self {
        let mut patterns = PatternSet::new();
        patterns
            .add_pattern_to_pattern(ReduceAxisUpdate)
            .add_node(Conv3DBackpropInputPadList)
            .add_node(Conv3DBackpropFilterPadList);
        Self::new("canonicalize", patterns)
    }

    pub fn patterns(&self) -> &FrozenPatternSet {
        &self.patterns
    }
}

impl GraphPass for RewritePass {
    fn name(&self) -> &'static str {
        self.name
    }

    fn run(&self, graph: &mut FuncGraph, cx: &mut PassContext) -> Result<PassResult, CompileError> {
        let rcx = RewriteContext::new(&cx.registries.ops);
        let cfg = GreedyConfig {
            max_iterations: cx.options.max_rewrite_iterations,
            enable_gc: false,
        };
        let stats = apply_patterns_greedily(graph, &self.patterns, &rcx, &cfg)?;
        if stats.skipped > 0 {
            debug!("{}: {} skipped rewrite(s)", self.name, stats.skipped);
        }
        Ok(PassResult {
            changed: stats.applied > 0,
            iterations: stats.iterations,
            rewrites_applied: stats.applied,
            erased_nodes: stats.gc_removed,
        })
    }
}

/// Renames operators and folds constant inputs into attributes for one
/// adaptation phase.
pub struct OpAdaptationPass {
    phase: AdaptPhase,
    pass: RewritePass,
}

impl OpAdaptationPass {
    pub fn new(registries: &Registries, phase: AdaptPhase) -> Self {
        let mut patterns = PatternSet::new();
        patterns.add_node(OpAdapter::new(
            registries.adaptations.clone(),
            registries.support.clone(),
            phase,
        ));
        let name = match phase {
            AdaptPhase::Unify => "op-adaptation-unify",
            AdaptPhase::Backend => "op-adaptation-backend",
        };
        Self {
            phase,
            pass: RewritePass::new(name, patterns),
        }
    }

    pub fn phase(&self) -> AdaptPhase {
        self.phase
    }
}

impl GraphPass for OpAdaptationPass {
    fn name(&self) -> &'static str {
        self.pass.name()
    }

    fn run(&self, graph: &mut FuncGraph, cx: &mut PassContext) -> Result<PassResult, CompileError> {
        self.pass.run(graph, cx)
    }
}

/// Removes nodes unreachable from outputs, parameters and side effects.
#[derive(Debug, Default, Clone, Copy)]
pub struct GcPass;

impl GcPass {
    const NAME: &'static str = "gc";
}

impl GraphPass for GcPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut FuncGraph, _cx: &mut PassContext) -> Result<PassResult, CompileError> {
        let removed = graph.sweep(&[]);
        Ok(PassResult {
            changed: removed > 0,
            erased_nodes: removed,
            ..PassResult::default()
        })
    }
}

/// Assigns a sharding strategy to every operator and records it on the
/// node annotations.
#[derive(Debug, Default, Clone, Copy)]
pub struct StrategyPass;

impl StrategyPass {
    const NAME: &'static str = "strategy-propagation";
}

impl GraphPass for StrategyPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut FuncGraph, cx: &mut PassContext) -> Result<PassResult, CompileError> {
        let Some(mesh) = cx.mesh else {
            return Ok(PassResult::default());
        };
        let assignment = propagate_strategies(graph, &cx.registries.ops, &mesh)?;
        assignment.apply(graph)?;
        let changed = !assignment.is_empty();
        cx.strategies = Some(assignment);
        Ok(PassResult {
            changed,
            ..PassResult::default()
        })
    }
}

/// Colors stages and inserts send/receive pairs on the full graph.
#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineCutPass;

impl PipelineCutPass {
    const NAME: &'static str = "pipeline-cut";
}

impl GraphPass for PipelineCutPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut FuncGraph, cx: &mut PassContext) -> Result<PassResult, CompileError> {
        let Some(transformer) = cx.transformer else {
            return Ok(PassResult::default());
        };
        let report = transformer.transform(graph)?;
        let changed = report.sends + report.broadcasts + report.duplicated_literals > 0;
        cx.pipeline = Some(report);
        Ok(PassResult {
            changed,
            ..PassResult::default()
        })
    }
}

/// Prunes the cut graph down to the local stage.
#[derive(Debug, Default, Clone, Copy)]
pub struct StageEliminationPass;

impl StageEliminationPass {
    const NAME: &'static str = "stage-elimination";
}

impl GraphPass for StageEliminationPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut FuncGraph, cx: &mut PassContext) -> Result<PassResult, CompileError> {
        let (Some(transformer), Some(report)) = (cx.transformer, cx.pipeline.as_mut()) else {
            return Ok(PassResult::default());
        };
        transformer.eliminate(graph, report)?;
        let erased = report.eliminated_nodes + report.eliminated_parameters;
        Ok(PassResult {
            changed: erased > 0,
            erased_nodes: erased,
            ..PassResult::default()
        })
    }
}
