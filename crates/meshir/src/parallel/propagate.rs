use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::infer::InferRegistry;
use crate::ir::{Dim, FuncGraph, GraphError, NodeId};
use crate::parallel::op_info::{InputSource, OpGraph, OpInfo};
use crate::parallel::rules::{check_consistent, from_input, from_output, output_strategy, reconcile};
use crate::parallel::strategy::{
    batch_split, device_product, fit_to, unsplit, Dimensions, DisplayStrategies, ParallelRole,
    Strategies,
};
use crate::parallel::{DeviceMesh, StrategyError};

/// How an operator obtained its strategy. States only move forward: once an
/// operator leaves `Unvisited` it is never reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationState {
    Unvisited,
    Copied,
    Forward,
    Backward,
    EliminatedFilled,
    DefaultFilled,
}

impl PropagationState {
    pub fn as_str(self) -> &'static str {
        match self {
            PropagationState::Unvisited => "unvisited",
            PropagationState::Copied => "copied",
            PropagationState::Forward => "forward",
            PropagationState::Backward => "backward",
            PropagationState::EliminatedFilled => "eliminated-filled",
            PropagationState::DefaultFilled => "default-filled",
        }
    }
}

impl fmt::Display for PropagationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedStrategy {
    pub op: String,
    pub strategies: Strategies,
    pub output: Dimensions,
    pub state: PropagationState,
}

/// Final strategy of every strategy-relevant operator, keyed by node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyAssignment {
    pub entries: BTreeMap<NodeId, AssignedStrategy>,
}

impl StrategyAssignment {
    pub fn get(&self, node: NodeId) -> Option<&AssignedStrategy> {
        self.entries.get(&node)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, state: PropagationState) -> usize {
        self.entries.values().filter(|e| e.state == state).count()
    }

    /// Writes every strategy onto its node's annotations.
    pub fn apply(&self, graph: &mut FuncGraph) -> Result<(), GraphError> {
        for (id, entry) in &self.entries {
            graph.get_mut(*id)?.annotations.strategy = Some(entry.strategies.clone());
        }
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

struct Propagator<'a> {
    ops: &'a OpGraph,
    devices: i64,
    strategies: Vec<Option<Strategies>>,
    states: Vec<PropagationState>,
    roles: Vec<Option<ParallelRole>>,
}

/// Assigns a sharding strategy to every strategy-relevant operator of `graph`.
///
/// Anchors come from node annotations: an explicit `strategy`, or else the
/// cheapest valid entry of `candidates`. Operators are visited in topological
/// order with ties broken by node id, so the result depends only on the graph,
/// its anchors and the mesh.
pub fn propagate_strategies(
    graph: &FuncGraph,
    registry: &InferRegistry,
    mesh: &DeviceMesh,
) -> Result<StrategyAssignment, StrategyError> {
    let eliminated: BTreeSet<NodeId> = graph
        .nodes()
        .filter(|n| n.annotations.role == Some(ParallelRole::Eliminated))
        .map(|n| n.id)
        .collect();
    let ops = OpGraph::collect(graph, registry, &eliminated)?;
    let roles = ops
        .ops
        .iter()
        .map(|op| graph.node(op.node).and_then(|n| n.annotations.role))
        .collect();
    let mut p = Propagator {
        ops: &ops,
        devices: mesh.stage_devices(),
        strategies: vec![None; ops.len()],
        states: vec![PropagationState::Unvisited; ops.len()],
        roles,
    };

    let copied = p.copy_main_operators(graph)?;
    if copied > 0 {
        p.check_connected()?;
    }
    loop {
        let forward = p.propagate_from_inputs()?;
        let backward = p.propagate_from_outputs()?;
        if forward + backward == 0 {
            break;
        }
    }
    p.fill_eliminated()?;
    p.fill_remaining()?;
    p.check_shared(graph)?;

    let assignment = p.finish();
    info!(
        "strategies for {} ops on {} devices: {} copied, {} forward, {} backward, {} eliminated, {} default",
        assignment.len(),
        mesh.stage_devices(),
        assignment.count(PropagationState::Copied),
        assignment.count(PropagationState::Forward),
        assignment.count(PropagationState::Backward),
        assignment.count(PropagationState::EliminatedFilled),
        assignment.count(PropagationState::DefaultFilled),
    );
    Ok(assignment)
}

/// Checks that `s` has one entry per tensor input, matching ranks, that
/// every split divides its dimension and the device count, and that axes
/// shared between inputs are split alike.
pub(crate) fn validate(op: &OpInfo, s: &Strategies, devices: i64) -> Result<(), String> {
    if s.len() != op.inputs.len() {
        return Err(format!(
            "{} entries for {} tensor inputs",
            s.len(),
            op.inputs.len()
        ));
    }
    for (k, (dims, input)) in s.iter().zip(&op.inputs).enumerate() {
        let rank = input.shape.rank().unwrap_or(0);
        if dims.len() != rank {
            return Err(format!("input {k}: {dims:?} does not match rank {rank}"));
        }
        if dims.iter().any(|d| *d < 1) {
            return Err(format!("input {k}: {dims:?} has a split below 1"));
        }
        let product = device_product(dims);
        if devices % product != 0 {
            return Err(format!(
                "input {k}: {dims:?} uses {product} devices, not a divisor of {devices}"
            ));
        }
        if let Some(sizes) = input.shape.dims() {
            for (axis, (split, size)) in dims.iter().zip(sizes).enumerate() {
                if let Dim::Known(size) = size {
                    if size % split != 0 {
                        return Err(format!(
                            "input {k}: axis {axis} of size {size} cannot be split {split} ways"
                        ));
                    }
                }
            }
        }
    }
    check_consistent(op, s)
}

impl Propagator<'_> {
    fn op(&self, i: usize) -> &OpInfo {
        &self.ops.ops[i]
    }

    fn assign(&mut self, i: usize, s: Strategies, state: PropagationState) -> Result<(), StrategyError> {
        if self.states[i] != PropagationState::Unvisited {
            return Err(StrategyError::Regression {
                op: self.op(i).name.clone(),
                state: self.states[i].to_string(),
            });
        }
        debug!("{} <- {} ({state})", self.op(i).name, DisplayStrategies(&s));
        self.strategies[i] = Some(s);
        self.states[i] = state;
        Ok(())
    }

    fn fit(&self, i: usize, mut s: Strategies) -> Strategies {
        for (dims, input) in s.iter_mut().zip(&self.op(i).inputs) {
            fit_to(dims, &input.shape, self.devices);
        }
        reconcile(self.op(i), &mut s);
        s
    }

    fn pinned(&self, i: usize) -> bool {
        matches!(
            self.roles[i],
            Some(ParallelRole::Standalone | ParallelRole::BatchParallel)
        )
    }

    /// Unassigned, neither eliminated nor pinned to a fixed role.
    fn open(&self, i: usize) -> bool {
        self.strategies[i].is_none() && !self.op(i).eliminated && !self.pinned(i)
    }

    fn copy_main_operators(&mut self, graph: &FuncGraph) -> Result<usize, StrategyError> {
        let mut copied = 0;
        for i in 0..self.ops.len() {
            if self.pinned(i) {
                continue;
            }
            let Some(node) = graph.node(self.op(i).node) else {
                continue;
            };
            if let Some(explicit) = &node.annotations.strategy {
                validate(self.op(i), explicit, self.devices).map_err(|detail| {
                    StrategyError::InvalidStrategy {
                        op: self.op(i).name.clone(),
                        detail,
                    }
                })?;
                self.assign(i, explicit.clone(), PropagationState::Copied)?;
                copied += 1;
                continue;
            }
            let mut best: Option<(f64, &Strategies)> = None;
            for candidate in &node.annotations.candidates {
                if let Err(detail) = validate(self.op(i), &candidate.strategies, self.devices) {
                    debug!("{}: candidate rejected: {detail}", self.op(i).name);
                    continue;
                }
                if best.map_or(true, |(cost, _)| candidate.cost < cost) {
                    best = Some((candidate.cost, &candidate.strategies));
                }
            }
            match best {
                Some((_, s)) => {
                    self.assign(i, s.clone(), PropagationState::Copied)?;
                    copied += 1;
                }
                None if !node.annotations.candidates.is_empty() => {
                    warn!("{}: no valid candidate strategy", self.op(i).name);
                }
                None => {}
            }
        }
        Ok(copied)
    }

    /// Every weakly connected component must hold at least one anchor.
    fn check_connected(&self) -> Result<(), StrategyError> {
        let mut seen = vec![false; self.ops.len()];
        for start in 0..self.ops.len() {
            if seen[start] || self.pinned(start) {
                continue;
            }
            let mut component = Vec::new();
            let mut queue = VecDeque::from([start]);
            seen[start] = true;
            while let Some(i) = queue.pop_front() {
                component.push(i);
                for j in self.ops.neighbours(i) {
                    if !seen[j] && !self.pinned(j) {
                        seen[j] = true;
                        queue.push_back(j);
                    }
                }
            }
            if !component.iter().any(|i| self.states[*i] == PropagationState::Copied) {
                component.sort_unstable();
                return Err(StrategyError::Disconnected {
                    ops: component.iter().map(|i| self.op(*i).name.clone()).collect(),
                });
            }
        }
        Ok(())
    }

    fn derive_from_inputs(&self, i: usize) -> Option<Strategies> {
        let op = self.op(i);
        for (k, input) in op.inputs.iter().enumerate() {
            if let Some(p) = self.ops.real_producer(i, k) {
                if let Some(s) = &self.strategies[p] {
                    let dims = output_strategy(self.op(p), s);
                    return Some(self.fit(i, from_input(op, k, &dims)));
                }
            }
            if let InputSource::Parameter(param) = input.source {
                for (u, ku) in self.ops.parameter_users(param) {
                    if *u == i {
                        continue;
                    }
                    if let Some(dims) = self.strategies[*u].as_ref().and_then(|s| s.get(*ku)) {
                        return Some(self.fit(i, from_input(op, k, dims)));
                    }
                }
            }
        }
        None
    }

    fn propagate_from_inputs(&mut self) -> Result<usize, StrategyError> {
        let mut changed = 0;
        for i in 0..self.ops.len() {
            if !self.open(i) {
                continue;
            }
            if let Some(s) = self.derive_from_inputs(i) {
                self.assign(i, s, PropagationState::Forward)?;
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn propagate_from_outputs(&mut self) -> Result<usize, StrategyError> {
        let mut changed = 0;
        for i in (0..self.ops.len()).rev() {
            if !self.open(i) {
                continue;
            }
            let derived = self.ops.real_consumers(i).into_iter().find_map(|(c, k)| {
                self.strategies[c]
                    .as_ref()
                    .and_then(|s| s.get(k))
                    .map(|dims| self.fit(i, from_output(self.op(i), dims)))
            });
            if let Some(s) = derived {
                self.assign(i, s, PropagationState::Backward)?;
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn fill_eliminated(&mut self) -> Result<(), StrategyError> {
        loop {
            let mut changed = 0;
            for i in 0..self.ops.len() {
                if self.strategies[i].is_some() || !self.op(i).eliminated {
                    continue;
                }
                let producer = match self.op(i).inputs.first().map(|input| input.source) {
                    Some(InputSource::Op(p)) => self.strategies[p].as_ref().map(|s| (p, s)),
                    _ => None,
                };
                if let Some((p, s)) = producer {
                    let dims = output_strategy(self.op(p), s);
                    let s = self.fit(i, from_input(self.op(i), 0, &dims));
                    self.assign(i, s, PropagationState::EliminatedFilled)?;
                    changed += 1;
                }
            }
            for i in (0..self.ops.len()).rev() {
                if self.strategies[i].is_some() || !self.op(i).eliminated {
                    continue;
                }
                let derived = self.ops.consumers(i).iter().find_map(|(c, k)| {
                    self.strategies[*c]
                        .as_ref()
                        .and_then(|s| s.get(*k))
                        .map(|dims| self.fit(i, from_output(self.op(i), dims)))
                });
                if let Some(s) = derived {
                    self.assign(i, s, PropagationState::EliminatedFilled)?;
                    changed += 1;
                }
            }
            if changed == 0 {
                return Ok(());
            }
        }
    }

    fn fill_remaining(&mut self) -> Result<(), StrategyError> {
        for i in 0..self.ops.len() {
            if self.strategies[i].is_some() {
                continue;
            }
            let op = self.op(i);
            let s = match self.roles[i] {
                Some(ParallelRole::Standalone) => op
                    .inputs
                    .iter()
                    .map(|input| unsplit(input.shape.rank().unwrap_or(0)))
                    .collect(),
                Some(ParallelRole::BatchParallel) => self.fit(
                    i,
                    op.inputs
                        .iter()
                        .map(|input| batch_split(input.shape.rank().unwrap_or(0), self.devices))
                        .collect(),
                ),
                _ => self.fit(
                    i,
                    from_output(op, &batch_split(op.output_rank(), self.devices)),
                ),
            };
            self.assign(i, s, PropagationState::DefaultFilled)?;
        }
        Ok(())
    }

    /// Readers of a shared parameter must agree on its split; the first reader
    /// in graph order is the reference.
    fn check_shared(&self, graph: &FuncGraph) -> Result<(), StrategyError> {
        for (param, users) in self.ops.shared_parameters() {
            let mut reference: Option<(usize, &Dimensions)> = None;
            for (u, k) in users {
                let Some(dims) = self.strategies[*u].as_ref().and_then(|s| s.get(*k)) else {
                    continue;
                };
                match reference {
                    None => reference = Some((*u, dims)),
                    Some((first, expected)) if expected != dims => {
                        return Err(StrategyError::SharedDivergence {
                            param: graph.display_name(param),
                            first: self.op(first).name.clone(),
                            first_strategy: format!("{expected:?}"),
                            second: self.op(*u).name.clone(),
                            second_strategy: format!("{dims:?}"),
                        });
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> StrategyAssignment {
        let mut entries = BTreeMap::new();
        for (i, s) in self.strategies.iter().enumerate() {
            let Some(s) = s else {
                continue;
            };
            let op = self.op(i);
            entries.insert(
                op.node,
                AssignedStrategy {
                    op: op.name.clone(),
                    strategies: s.clone(),
                    output: output_strategy(op, s),
                    state: self.states[i],
                },
            );
        }
        StrategyAssignment { entries }
    }
}
