use std::collections::BTreeMap;

use log::debug;

use crate::infer::infer_node;
use crate::ir::{Edge, EdgeKind, FuncGraph, GraphManager, Node, NodeId, Primitive, Value};
use crate::pattern::{Pattern, RewriteContext, RewriteError, RewriteOutcome, SkipReason};

pub type PrimPredicate = fn(&Primitive) -> bool;
pub type NodePredicate = fn(&Node) -> bool;
/// Produces the constant for a destination value node.
pub type ValueBuilder = fn(&PatternMap, &GraphManager) -> Result<Value, RewriteError>;
/// Custom construction of a destination call from its assembled inputs.
pub type CallBuilder = fn(&PatternMap, &mut GraphManager, Vec<Edge>) -> Result<NodeId, RewriteError>;

/// Value bound to a pattern variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Node(Edge),
    Seq(Vec<Edge>),
    /// The call whose primitive satisfied a primitive variable.
    Prim(NodeId),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternMap {
    bindings: BTreeMap<String, Binding>,
}

impl PatternMap {
    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    pub fn node(&self, name: &str) -> Option<NodeId> {
        match self.bindings.get(name)? {
            Binding::Node(edge) => Some(edge.node),
            Binding::Prim(id) => Some(*id),
            Binding::Seq(_) => None,
        }
    }

    pub fn edge(&self, name: &str) -> Option<Edge> {
        match self.bindings.get(name)? {
            Binding::Node(edge) => Some(*edge),
            _ => None,
        }
    }

    pub fn seq(&self, name: &str) -> Option<&[Edge]> {
        match self.bindings.get(name)? {
            Binding::Seq(edges) => Some(edges),
            _ => None,
        }
    }

    fn bind(&mut self, name: &str, binding: Binding) -> bool {
        match self.bindings.get(name) {
            Some(existing) => *existing == binding,
            None => {
                self.bindings.insert(name.to_string(), binding);
                true
            }
        }
    }
}

#[derive(Debug, Clone)]
enum SrcEntry {
    Var(Option<NodePredicate>),
    PrimVar(PrimPredicate),
    SeqVar,
    Call { prim_var: String, inputs: Vec<String> },
}

/// Source template. The last call added is the root.
#[derive(Debug, Clone, Default)]
pub struct SrcPattern {
    entries: BTreeMap<String, SrcEntry>,
    root: Option<String>,
}

impl SrcPattern {
    pub fn add_var(&mut self, name: &str, pred: Option<NodePredicate>) -> &mut Self {
        self.entries.insert(name.to_string(), SrcEntry::Var(pred));
        self
    }

    pub fn add_prim_var(&mut self, name: &str, pred: PrimPredicate) -> &mut Self {
        self.entries.insert(name.to_string(), SrcEntry::PrimVar(pred));
        self
    }

    pub fn add_seq_var(&mut self, name: &str) -> &mut Self {
        self.entries.insert(name.to_string(), SrcEntry::SeqVar);
        self
    }

    pub fn add_call(&mut self, name: &str, prim_var: &str, inputs: &[&str]) -> &mut Self {
        self.entries.insert(
            name.to_string(),
            SrcEntry::Call {
                prim_var: prim_var.to_string(),
                inputs: inputs.iter().map(|s| s.to_string()).collect(),
            },
        );
        self.root = Some(name.to_string());
        self
    }

    pub fn root_name(&self) -> Option<&str> {
        self.root.as_deref()
    }

    fn root_predicate(&self) -> Option<PrimPredicate> {
        let SrcEntry::Call { prim_var, .. } = self.entries.get(self.root.as_ref()?)? else {
            return None;
        };
        match self.entries.get(prim_var)? {
            SrcEntry::PrimVar(pred) => Some(*pred),
            _ => None,
        }
    }

    /// Matches the root template against `root`.
    pub fn match_root(&self, graph: &FuncGraph, root: NodeId) -> Option<PatternMap> {
        let name = self.root.as_ref()?;
        let mut map = PatternMap::default();
        self.match_call(graph, name, Edge::data(root), &mut map)
            .then_some(map)
    }

    fn match_call(&self, graph: &FuncGraph, name: &str, at: Edge, map: &mut PatternMap) -> bool {
        let Some(SrcEntry::Call { prim_var, inputs }) = self.entries.get(name) else {
            return false;
        };
        let Some(node) = graph.node(at.node) else {
            return false;
        };
        let Some(prim) = node.primitive() else {
            return false;
        };
        match self.entries.get(prim_var) {
            Some(SrcEntry::PrimVar(pred)) if pred(prim) => {}
            _ => return false,
        }
        if !map.bind(prim_var, Binding::Prim(node.id)) || !map.bind(name, Binding::Node(at)) {
            return false;
        }

        let actual: Vec<Edge> = node
            .inputs()
            .iter()
            .copied()
            .filter(|e| e.kind != EdgeKind::Order)
            .collect();
        let seq_count = inputs
            .iter()
            .filter(|n| matches!(self.entries.get(n.as_str()), Some(SrcEntry::SeqVar)))
            .count();
        let fixed = inputs.len() - seq_count;
        if seq_count > 1 || (seq_count == 0 && actual.len() != fixed) || actual.len() < fixed {
            return false;
        }
        let seq_len = actual.len() - fixed;

        let mut cursor = 0;
        for input in inputs {
            match self.entries.get(input.as_str()) {
                Some(SrcEntry::SeqVar) => {
                    let edges = actual[cursor..cursor + seq_len].to_vec();
                    cursor += seq_len;
                    if !map.bind(input, Binding::Seq(edges)) {
                        return false;
                    }
                }
                Some(SrcEntry::Var(pred)) => {
                    let edge = actual[cursor];
                    cursor += 1;
                    let ok = graph
                        .node(edge.node)
                        .is_some_and(|n| pred.map_or(true, |p| p(n)));
                    if !ok || !map.bind(input, Binding::Node(edge)) {
                        return false;
                    }
                }
                Some(SrcEntry::Call { .. }) => {
                    let edge = actual[cursor];
                    cursor += 1;
                    if !self.match_call(graph, input, edge, map) {
                        return false;
                    }
                }
                Some(SrcEntry::PrimVar(_)) | None => return false,
            }
        }
        true
    }
}

/// One input of a destination call.
#[derive(Debug, Clone)]
pub enum DstInput {
    Var(String),
    /// Splices a bound sequence.
    Seq(String),
    /// Splices a bound sequence with element `index` replaced by `var`.
    SeqReplace {
        seq: String,
        index: usize,
        var: String,
    },
}

#[derive(Clone)]
enum DstEntry {
    Value(ValueBuilder),
    Call {
        prim_var: String,
        inputs: Vec<DstInput>,
        build: Option<CallBuilder>,
    },
}

/// Destination template, instantiated in declaration order. The last entry is
/// the replacement root.
#[derive(Clone, Default)]
pub struct DstPattern {
    entries: Vec<(String, DstEntry)>,
}

impl DstPattern {
    pub fn add_value_node(&mut self, name: &str, build: ValueBuilder) -> &mut Self {
        self.entries.push((name.to_string(), DstEntry::Value(build)));
        self
    }

    pub fn add_call(
        &mut self,
        name: &str,
        prim_var: &str,
        inputs: Vec<DstInput>,
        build: Option<CallBuilder>,
    ) -> &mut Self {
        self.entries.push((
            name.to_string(),
            DstEntry::Call {
                prim_var: prim_var.to_string(),
                inputs,
                build,
            },
        ));
        self
    }

    fn instantiate(
        &self,
        map: &mut PatternMap,
        mgr: &mut GraphManager,
        pattern: &'static str,
        root: NodeId,
    ) -> Result<Option<NodeId>, RewriteError> {
        let mut last = None;
        for (name, entry) in &self.entries {
            let id = match entry {
                DstEntry::Value(build) => {
                    let value = build(map, mgr)?;
                    mgr.add_literal(value)
                }
                DstEntry::Call {
                    prim_var,
                    inputs,
                    build,
                } => {
                    let edges = assemble(map, inputs, pattern, mgr.graph, root)?;
                    match build {
                        Some(build) => build(map, mgr, edges)?,
                        None => {
                            let source = map
                                .node(prim_var)
                                .ok_or_else(|| unbound(pattern, prim_var, mgr.graph, root))?;
                            let prim = mgr
                                .node(source)?
                                .primitive()
                                .cloned()
                                .ok_or_else(|| unbound(pattern, prim_var, mgr.graph, root))?;
                            let id = mgr.add_call(prim, edges);
                            mgr.copy_metadata(source, id)?;
                            id
                        }
                    }
                }
            };
            map.bindings.insert(name.clone(), Binding::Node(Edge::data(id)));
            last = Some(id);
        }
        Ok(last)
    }
}

fn unbound(pattern: &'static str, var: &str, graph: &FuncGraph, root: NodeId) -> RewriteError {
    RewriteError::Invalid {
        pattern,
        node: graph.display_name(root),
        detail: format!("destination refers to unbound variable '{var}'"),
    }
}

fn assemble(
    map: &PatternMap,
    inputs: &[DstInput],
    pattern: &'static str,
    graph: &FuncGraph,
    root: NodeId,
) -> Result<Vec<Edge>, RewriteError> {
    let mut edges = Vec::new();
    for input in inputs {
        match input {
            DstInput::Var(var) => {
                edges.push(map.edge(var).ok_or_else(|| unbound(pattern, var, graph, root))?)
            }
            DstInput::Seq(seq) => {
                edges.extend_from_slice(map.seq(seq).ok_or_else(|| unbound(pattern, seq, graph, root))?)
            }
            DstInput::SeqReplace { seq, index, var } => {
                let mut items = map
                    .seq(seq)
                    .ok_or_else(|| unbound(pattern, seq, graph, root))?
                    .to_vec();
                let edge = map.edge(var).ok_or_else(|| unbound(pattern, var, graph, root))?;
                let slot = items.get_mut(*index).ok_or_else(|| RewriteError::Invalid {
                    pattern,
                    node: graph.display_name(root),
                    detail: format!("sequence '{seq}' has no element {index}"),
                })?;
                *slot = edge;
                edges.extend(items);
            }
        }
    }
    Ok(edges)
}

/// Declarative rewrite from a source template to a destination template.
pub trait PatternToPattern: Send + Sync {
    fn name(&self) -> &'static str;
    fn define_src(&self, src: &mut SrcPattern);
    fn define_dst(&self, dst: &mut DstPattern);
    /// Extra semantic check on a structural match. `Ok(false)` skips the node.
    fn check_matched(
        &self,
        map: &PatternMap,
        mgr: &GraphManager,
        root: NodeId,
    ) -> Result<bool, RewriteError> {
        let _ = (map, mgr, root);
        Ok(true)
    }
    fn benefit(&self) -> u16 {
        1
    }
}

/// A [`PatternToPattern`] with its templates built once.
pub struct CompiledPattern<P> {
    inner: P,
    src: SrcPattern,
    dst: DstPattern,
    root_pred: Option<PrimPredicate>,
}

impl<P: PatternToPattern> CompiledPattern<P> {
    pub fn new(inner: P) -> Self {
        let mut src = SrcPattern::default();
        let mut dst = DstPattern::default();
        inner.define_src(&mut src);
        inner.define_dst(&mut dst);
        let root_pred = src.root_predicate();
        Self {
            inner,
            src,
            dst,
            root_pred,
        }
    }
}

impl<P: PatternToPattern> Pattern for CompiledPattern<P> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn matches_primitive(&self, prim: &Primitive) -> bool {
        self.root_pred.map_or(true, |pred| pred(prim))
    }

    fn benefit(&self) -> u16 {
        self.inner.benefit()
    }

    fn match_and_rewrite(
        &self,
        root: NodeId,
        mgr: &mut GraphManager,
        cx: &RewriteContext,
    ) -> Result<RewriteOutcome, RewriteError> {
        let Some(mut map) = self.src.match_root(mgr.graph, root) else {
            return Ok(RewriteOutcome::Unchanged);
        };
        if !self.inner.check_matched(&map, mgr, root)? {
            return Ok(RewriteOutcome::Unchanged);
        }
        let Some(new) = self.dst.instantiate(&mut map, mgr, self.name(), root)? else {
            return Ok(RewriteOutcome::Unchanged);
        };
        if new == root {
            return Ok(RewriteOutcome::Updated);
        }

        match infer_node(mgr.graph, cx.registry, new) {
            Ok(value) => mgr.set_abstract(new, value)?,
            Err(err) if err.is_undecided() => {
                if let Some(value) = mgr.node(root)?.abstract_value.clone() {
                    mgr.set_abstract(new, value)?;
                }
            }
            Err(err) => return Err(err.into()),
        }
        match mgr.replace(root, new) {
            Ok(()) => Ok(RewriteOutcome::Replaced(new)),
            Err(err) => {
                debug!("{}: {err}", self.name());
                Ok(RewriteOutcome::Skipped(SkipReason::ReplaceRefused(err.to_string())))
            }
        }
    }
}
