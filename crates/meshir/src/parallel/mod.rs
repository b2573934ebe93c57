//! Auto-parallel partitioning: sharding strategy propagation and pipeline
//! stage cutting.

mod mesh;
pub mod op_info;
pub mod pipeline;
mod propagate;
pub mod rules;
pub mod strategy;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ir::{FuncGraph, GraphError, NodeId};

pub use mesh::DeviceMesh;
pub use pipeline::{PipelineError, PipelineReport, PipelineTransformer, SendAttr};
pub use propagate::{
    propagate_strategies, AssignedStrategy, PropagationState, StrategyAssignment,
};
pub use strategy::{Dimensions, ParallelRole, Strategies, StrategyCandidate};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyError {
    #[error("invalid device mesh: {detail}")]
    InvalidMesh { detail: String },
    #[error("invalid strategy for {op}: {detail}")]
    InvalidStrategy { op: String, detail: String },
    #[error(
        "shared parameter {param}: {first} uses {first_strategy} but {second} uses {second_strategy}"
    )]
    SharedDivergence {
        param: String,
        first: String,
        first_strategy: String,
        second: String,
        second_strategy: String,
    },
    #[error("no viable propagation path reaches {} operator(s) starting at {}", ops.len(), ops.first().map(String::as_str).unwrap_or("?"))]
    Disconnected { ops: Vec<String> },
    #[error("{op}: strategy already assigned in state {state}")]
    Regression { op: String, state: String },
    #[error("{node} is not a strategy-relevant operator")]
    UnknownOperator { node: String },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Partitioning inputs supplied next to the graph.
///
/// Everything here is keyed by the node ids of the graph handed to the
/// compiler; [`ParallelInputs::apply`] moves it onto node annotations so it
/// survives rewrites that replace nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelInputs {
    pub anchors: BTreeMap<NodeId, Strategies>,
    pub candidates: BTreeMap<NodeId, Vec<StrategyCandidate>>,
    pub stage_hints: BTreeMap<NodeId, u32>,
    pub eliminated: BTreeSet<NodeId>,
    pub standalone: BTreeSet<NodeId>,
    pub batch_parallel: BTreeSet<NodeId>,
}

impl ParallelInputs {
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
            && self.candidates.is_empty()
            && self.stage_hints.is_empty()
            && self.eliminated.is_empty()
            && self.standalone.is_empty()
            && self.batch_parallel.is_empty()
    }

    pub fn apply(&self, graph: &mut FuncGraph) -> Result<(), GraphError> {
        for (id, strategies) in &self.anchors {
            graph.get_mut(*id)?.annotations.strategy = Some(strategies.clone());
        }
        for (id, candidates) in &self.candidates {
            graph.get_mut(*id)?.annotations.candidates = candidates.clone();
        }
        for (id, stage) in &self.stage_hints {
            graph.set_stage(*id, *stage)?;
        }
        let roles = [
            (&self.eliminated, ParallelRole::Eliminated),
            (&self.standalone, ParallelRole::Standalone),
            (&self.batch_parallel, ParallelRole::BatchParallel),
        ];
        for (ids, role) in roles {
            for id in ids {
                graph.get_mut(*id)?.annotations.role = Some(role);
            }
        }
        Ok(())
    }
}
