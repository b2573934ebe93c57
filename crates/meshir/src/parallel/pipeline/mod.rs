//! Pipeline stage cutting.
//!
//! Stages are colored from user hints, every cross-stage data edge is split
//! into a `Send` on the producer stage and a `Receive` on the consumer stage,
//! and the local process then drops everything that belongs to other stages.

mod coloring;
mod cut;
mod elim;

use std::collections::BTreeMap;

use log::info;
use serde::Serialize;
use thiserror::Error;

use crate::ir::{DType, FuncGraph, GraphError, NodeId, Shape};
use crate::parallel::DeviceMesh;

pub use coloring::StageMap;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("invalid pipeline ranks: {detail}")]
    InvalidRanks { detail: String },
    #[error("{node} is hinted to stage {stage} but only {stage_num} stage(s) exist")]
    StageOutOfRange { node: String, stage: u32, stage_num: u32 },
    #[error("{consumer} (stage {consumer_stage}) reads {producer} from later stage {producer_stage}")]
    BackwardEdge {
        producer: String,
        producer_stage: u32,
        consumer: String,
        consumer_stage: u32,
    },
    #[error("recurrent edge from {producer} to {consumer} crosses stages")]
    RecurrentAcrossStages { producer: String, consumer: String },
    #[error("{node} has no inferred tensor value to send")]
    MissingValue { node: String },
    #[error("data edge from {producer} to {consumer} still crosses stages after the cut")]
    UncutEdge { producer: String, consumer: String },
    #[error("sr_tag {tag} has {sends} sender(s) and {receives} receiver(s)")]
    UnpairedTag { tag: i64, sends: usize, receives: usize },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// What crosses the wire for one cut edge, as returned by `insert_send`.
#[derive(Debug, Clone, PartialEq)]
pub struct SendAttr {
    pub shape: Shape,
    pub dtype: DType,
    /// Ordering anchor on the producer stage: the `Send` itself, which later
    /// communication on that stage is chained after.
    pub depend: NodeId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineReport {
    pub stage_num: u32,
    pub local_stage: u32,
    pub sends: usize,
    pub receives: usize,
    pub broadcasts: usize,
    pub duplicated_literals: usize,
    /// Monad edges between stages replaced by a monad local to the reader.
    pub local_monads: usize,
    pub dropped_order_edges: usize,
    pub eliminated_nodes: usize,
    pub eliminated_parameters: usize,
    /// Node count per stage after coloring and cutting.
    pub stage_sizes: BTreeMap<u32, usize>,
}

/// Cuts a graph into pipeline stages for one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineTransformer {
    stage: u32,
    stage_num: u32,
    global_rank: i64,
    per_stage_rank_num: i64,
}

impl PipelineTransformer {
    pub fn new(
        stage_num: u32,
        global_rank: i64,
        per_stage_rank_num: i64,
    ) -> Result<Self, PipelineError> {
        if stage_num == 0 || per_stage_rank_num < 1 {
            return Err(PipelineError::InvalidRanks {
                detail: format!(
                    "stage_num {stage_num} and per_stage_rank_num {per_stage_rank_num} must be positive"
                ),
            });
        }
        let world = i64::from(stage_num) * per_stage_rank_num;
        if !(0..world).contains(&global_rank) {
            return Err(PipelineError::InvalidRanks {
                detail: format!("global rank {global_rank} outside 0..{world}"),
            });
        }
        Ok(Self {
            stage: (global_rank / per_stage_rank_num) as u32,
            stage_num,
            global_rank,
            per_stage_rank_num,
        })
    }

    pub fn from_mesh(mesh: &DeviceMesh, global_rank: i64) -> Result<Self, PipelineError> {
        let stage_num = u32::try_from(mesh.stage_num).map_err(|_| PipelineError::InvalidRanks {
            detail: format!("stage_num {} does not fit a stage id", mesh.stage_num),
        })?;
        Self::new(stage_num, global_rank, mesh.stage_devices())
    }

    /// Stage owned by this process.
    pub fn stage(&self) -> u32 {
        self.stage
    }

    pub fn stage_num(&self) -> u32 {
        self.stage_num
    }

    pub fn global_rank(&self) -> i64 {
        self.global_rank
    }

    /// Rank this process talks to on `stage`: same position inside the stage
    /// group.
    pub fn peer_rank(&self, stage: u32) -> i64 {
        i64::from(stage) * self.per_stage_rank_num + self.global_rank % self.per_stage_rank_num
    }

    /// Colors stages and splices communication into the full graph. The graph
    /// still holds every stage afterwards.
    pub fn transform(&self, graph: &mut FuncGraph) -> Result<PipelineReport, PipelineError> {
        let mut report = PipelineReport {
            stage_num: self.stage_num,
            local_stage: self.stage,
            ..PipelineReport::default()
        };
        if self.stage_num == 1 {
            for id in graph.node_ids() {
                graph.set_stage(id, 0)?;
            }
            report.stage_sizes.insert(0, graph.len());
            return Ok(report);
        }

        let stages = coloring::color(graph, self.stage_num)?;
        stages.write_back(graph)?;
        let mut cutter = cut::Cutter::new(self, stages);
        cutter.handle_shared_parameters(graph, &mut report)?;
        cutter.cut_graph(graph, &mut report)?;
        cut::verify(graph)?;

        for node in graph.nodes() {
            if let Some(stage) = node.annotations.stage {
                *report.stage_sizes.entry(stage).or_default() += 1;
            }
        }
        info!(
            "pipeline cut: {} stage(s), {} send(s), {} receive(s), {} broadcast(s)",
            self.stage_num, report.sends, report.receives, report.broadcasts
        );
        Ok(report)
    }

    /// Prunes the graph to the local stage.
    pub fn eliminate(
        &self,
        graph: &mut FuncGraph,
        report: &mut PipelineReport,
    ) -> Result<(), PipelineError> {
        if self.stage_num == 1 {
            return Ok(());
        }
        report.eliminated_nodes = elim::elim_graph_stage(graph, self.stage);
        report.eliminated_parameters = elim::elim_parameter(graph);
        graph.validate()?;
        Ok(())
    }

    /// [`transform`](Self::transform) followed by [`eliminate`](Self::eliminate).
    pub fn run(&self, graph: &mut FuncGraph) -> Result<PipelineReport, PipelineError> {
        let mut report = self.transform(graph)?;
        self.eliminate(graph, &mut report)?;
        Ok(report)
    }
}
