//! Pattern-match rewriting over [`FuncGraph`](crate::ir::FuncGraph).
//!
//! Patterns come in two flavours: [`NodePattern`] processes a single matched
//! call, [`PatternToPattern`] declares a source template and a destination
//! template. Both are wrapped into [`Pattern`] objects, collected in a
//! [`PatternSet`] and frozen once before being driven by
//! [`apply_patterns_greedily`].

mod driver;
mod matcher;

use thiserror::Error;

use crate::infer::{InferError, InferRegistry};
use crate::ir::{GraphError, GraphManager, NodeId, Primitive};

pub use driver::{apply_patterns_greedily, GreedyConfig, GreedyRewriteStats};
pub use matcher::{
    Binding, CallBuilder, CompiledPattern, DstInput, DstPattern, NodePredicate, PatternMap,
    PatternToPattern, PrimPredicate, SrcPattern, ValueBuilder,
};

/// Fatal rewrite failure; aborts the compile.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Infer(#[from] InferError),
    #[error("{pattern} on {node}: {detail}")]
    Invalid {
        pattern: &'static str,
        node: String,
        detail: String,
    },
}

/// Why a rewrite step left a node alone. Skips are local and never abort.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("{node} has dynamic rank inputs")]
    DynamicRank { node: String },
    #[error("{node} has a dynamic output shape")]
    DynamicShape { node: String },
    #[error("already processed")]
    AlreadyProcessed,
    #[error("pre-check rejected {op}")]
    PreCheckRejected { op: String },
    #[error("{op} is dynamic and already supported as-is")]
    DynamicOriginSupported { op: String },
    #[error("input {input} of {node} is not a constant")]
    NonConstantInput { node: String, input: usize },
    #[error("input {input} of {node} goes through a Depend")]
    DependInput { node: String, input: usize },
    #[error("input {input} of {node} is a monad")]
    MonadInput { node: String, input: usize },
    #[error("input {input} of {node} is a tensor without data")]
    EmptyTensorData { node: String, input: usize },
    #[error("{op} has no name for input {input}")]
    MissingInputName { op: String, input: usize },
    #[error("{op} already has attribute '{attr}'")]
    AttrAlreadyPresent { op: String, attr: String },
    #[error("{op}: cannot convert {value} for attribute '{attr}'")]
    UnconvertibleValue {
        op: String,
        attr: String,
        value: String,
    },
    #[error("{op} is not supported by the kernel table")]
    Unsupported { op: String },
    #[error("inference undecided: {0}")]
    Undecided(String),
    #[error("replacement refused: {0}")]
    ReplaceRefused(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    Unchanged,
    Skipped(SkipReason),
    /// The root was modified in place.
    Updated,
    /// The root's uses now point at the given node.
    Replaced(NodeId),
}

impl RewriteOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, RewriteOutcome::Updated | RewriteOutcome::Replaced(_))
    }
}

/// Read-only services available to patterns.
#[derive(Clone, Copy)]
pub struct RewriteContext<'a> {
    pub registry: &'a InferRegistry,
}

impl<'a> RewriteContext<'a> {
    pub fn new(registry: &'a InferRegistry) -> Self {
        Self { registry }
    }
}

/// Base trait for rewrite patterns.
pub trait Pattern: Send + Sync {
    fn name(&self) -> &'static str;
    fn matches_primitive(&self, prim: &Primitive) -> bool {
        let _ = prim;
        true
    }
    fn benefit(&self) -> u16 {
        1
    }
    fn match_and_rewrite(
        &self,
        root: NodeId,
        mgr: &mut GraphManager,
        cx: &RewriteContext,
    ) -> Result<RewriteOutcome, RewriteError>;
}

/// Single-node processor: selected by primitive, then free to inspect and edit.
pub trait NodePattern: Send + Sync {
    fn name(&self) -> &'static str;
    fn matches(&self, prim: &Primitive) -> bool;
    fn benefit(&self) -> u16 {
        1
    }
    fn process(
        &self,
        node: NodeId,
        mgr: &mut GraphManager,
        cx: &RewriteContext,
    ) -> Result<RewriteOutcome, RewriteError>;
}

/// Adapter turning a [`NodePattern`] into a [`Pattern`].
pub struct NodeRewrite<P>(pub P);

impl<P: NodePattern> Pattern for NodeRewrite<P> {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn matches_primitive(&self, prim: &Primitive) -> bool {
        self.0.matches(prim)
    }

    fn benefit(&self) -> u16 {
        self.0.benefit()
    }

    fn match_and_rewrite(
        &self,
        root: NodeId,
        mgr: &mut GraphManager,
        cx: &RewriteContext,
    ) -> Result<RewriteOutcome, RewriteError> {
        self.0.process(root, mgr, cx)
    }
}

/// Mutable set that collects rewrite patterns prior to freezing.
pub struct PatternSet {
    patterns: Vec<Box<dyn Pattern>>,
}

impl PatternSet {
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    pub fn add<P>(&mut self, pattern: P) -> &mut Self
    where
        P: Pattern + 'static,
    {
        self.patterns.push(Box::new(pattern));
        self
    }

    pub fn add_node<P>(&mut self, pattern: P) -> &mut Self
    where
        P: NodePattern + 'static,
    {
        self.add(NodeRewrite(pattern))
    }

    /// Builds the source and destination templates once and registers them.
    pub fn add_pattern_to_pattern<P>(&mut self, pattern: P) -> &mut Self
    where
        P: PatternToPattern + 'static,
    {
        self.add(CompiledPattern::new(pattern))
    }

    pub fn freeze(mut self) -> FrozenPatternSet {
        self.patterns
            .sort_by_key(|pattern| std::cmp::Reverse(pattern.benefit()));
        FrozenPatternSet {
            patterns: self.patterns,
        }
    }
}

impl Default for PatternSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable collection of rewrite patterns ready for use by the driver.
pub struct FrozenPatternSet {
    patterns: Vec<Box<dyn Pattern>>,
}

impl FrozenPatternSet {
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.patterns.iter().map(|p| p.name()).collect()
    }

    pub fn matching<'a>(
        &'a self,
        prim: &'a Primitive,
    ) -> impl Iterator<Item = (usize, &'a dyn Pattern)> + 'a {
        self.patterns
            .iter()
            .enumerate()
            .filter(move |(_, pattern)| pattern.matches_primitive(prim))
            .map(|(idx, pattern)| (idx, &**pattern))
    }
}

/// Common primitive matchers.
pub mod filters {
    use crate::ir::{prim, Primitive};

    pub const fn any(prim: &Primitive) -> bool {
        let _ = prim;
        true
    }

    pub fn reduce(p: &Primitive) -> bool {
        prim::is_reduce(&p.name)
    }

    pub fn conv3d_backprop_input(p: &Primitive) -> bool {
        p.name == prim::CONV3D_BACKPROP_INPUT
    }

    pub fn conv3d_backprop_filter(p: &Primitive) -> bool {
        p.name == prim::CONV3D_BACKPROP_FILTER
    }

    pub fn depend(p: &Primitive) -> bool {
        p.name == prim::DEPEND
    }

    pub fn real_kernel(p: &Primitive) -> bool {
        !prim::is_virtual(&p.name) && !prim::is_communication(&p.name)
    }
}
