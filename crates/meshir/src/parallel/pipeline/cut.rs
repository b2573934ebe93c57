use std::collections::{BTreeMap, BTreeSet};

use log::{debug, trace};

use crate::ir::prim::{
    self, ATTR_DEST_RANK, ATTR_DEST_RANKS, ATTR_DEST_STAGE, ATTR_DTYPE, ATTR_SHAPE, ATTR_SRC_RANK,
    ATTR_SRC_STAGE, ATTR_SR_TAG,
};
use crate::ir::{
    AbstractValue, DType, Edge, EdgeKind, FuncGraph, GraphError, GraphId, GraphManager, MonadKind,
    NodeId, NodeKind, Primitive, Shape, Use, Value,
};
use crate::parallel::pipeline::{
    PipelineError, PipelineReport, PipelineTransformer, SendAttr, StageMap,
};

/// Splices communication nodes into a colored graph.
pub(super) struct Cutter<'t> {
    transformer: &'t PipelineTransformer,
    stages: StageMap,
    next_tag: i64,
    /// Last communication node placed on each stage; the next one is ordered
    /// after it.
    last_comm: BTreeMap<u32, NodeId>,
    received: BTreeMap<(NodeId, u32, u32), NodeId>,
    duplicated: BTreeMap<(NodeId, u32), NodeId>,
    monads: BTreeMap<(u32, MonadKind), NodeId>,
}

fn wire_value(graph: &FuncGraph, edge: &Edge) -> Result<(Shape, DType), PipelineError> {
    match graph.abstract_of(edge) {
        Some(AbstractValue::Tensor(spec)) => Ok((spec.shape.clone(), spec.dtype)),
        Some(AbstractValue::Scalar(dtype)) => Ok((Shape::scalar(), *dtype)),
        _ => Err(PipelineError::MissingValue {
            node: graph.display_name(edge.node),
        }),
    }
}

fn place(mgr: &mut GraphManager<'_>, id: NodeId, stage: u32) -> Result<(), GraphError> {
    let mut annotations = mgr.node(id)?.annotations.clone();
    annotations.stage = Some(stage);
    mgr.set_annotations(id, annotations)
}

impl<'t> Cutter<'t> {
    pub(super) fn new(transformer: &'t PipelineTransformer, stages: StageMap) -> Self {
        Self {
            transformer,
            stages,
            next_tag: 0,
            last_comm: BTreeMap::new(),
            received: BTreeMap::new(),
            duplicated: BTreeMap::new(),
            monads: BTreeMap::new(),
        }
    }

    fn tag(&mut self) -> i64 {
        let tag = self.next_tag;
        self.next_tag += 1;
        tag
    }

    fn chain(&self, stage: u32) -> Vec<Edge> {
        self.last_comm
            .get(&stage)
            .map(|id| vec![Edge::order(*id)])
            .unwrap_or_default()
    }

    fn placed(&mut self, mgr: &mut GraphManager<'_>, id: NodeId, stage: u32) -> Result<(), GraphError> {
        place(mgr, id, stage)?;
        self.stages.set(id, stage);
        Ok(())
    }

    /// Adds the `Send` half of a cut edge on `src_stage`.
    pub(super) fn insert_send(
        &mut self,
        mgr: &mut GraphManager<'_>,
        edge: Edge,
        src_stage: u32,
        dest_stage: u32,
        tag: i64,
    ) -> Result<SendAttr, PipelineError> {
        let (shape, dtype) = wire_value(mgr.graph, &edge)?;
        let send = Primitive::new(prim::SEND)
            .with_attr(ATTR_SR_TAG, Value::Int(tag))
            .with_attr(ATTR_DEST_RANK, Value::Int(self.transformer.peer_rank(dest_stage)))
            .with_attr(ATTR_SRC_STAGE, Value::Int(i64::from(src_stage)))
            .with_attr(ATTR_DEST_STAGE, Value::Int(i64::from(dest_stage)))
            .with_attr(ATTR_SHAPE, Value::IntList(shape.to_i64()))
            .with_attr(ATTR_DTYPE, Value::Type(dtype));
        let mut inputs = vec![Edge {
            kind: EdgeKind::Data,
            ..edge
        }];
        inputs.extend(self.chain(src_stage));
        let id = mgr.add_call(send, inputs);
        mgr.set_abstract(id, AbstractValue::None)?;
        self.placed(mgr, id, src_stage)?;
        self.last_comm.insert(src_stage, id);
        trace!("send tag {tag}: {} -> stage {dest_stage}", mgr.graph.display_name(edge.node));
        Ok(SendAttr {
            shape,
            dtype,
            depend: id,
        })
    }

    /// Adds the `Receive` half on `dest_stage`, ordered after the previous
    /// communication on that stage and after every `anchor`.
    pub(super) fn insert_receive(
        &mut self,
        mgr: &mut GraphManager<'_>,
        attr: &SendAttr,
        src_stage: u32,
        dest_stage: u32,
        tag: i64,
        anchors: &[NodeId],
    ) -> Result<NodeId, PipelineError> {
        let recv = Primitive::new(prim::RECEIVE)
            .with_attr(ATTR_SR_TAG, Value::Int(tag))
            .with_attr(ATTR_SRC_RANK, Value::Int(self.transformer.peer_rank(src_stage)))
            .with_attr(ATTR_SRC_STAGE, Value::Int(i64::from(src_stage)))
            .with_attr(ATTR_DEST_STAGE, Value::Int(i64::from(dest_stage)))
            .with_attr(ATTR_SHAPE, Value::IntList(attr.shape.to_i64()))
            .with_attr(ATTR_DTYPE, Value::Type(attr.dtype));
        let mut inputs = self.chain(dest_stage);
        for anchor in anchors {
            if !inputs.iter().any(|e| e.node == *anchor) {
                inputs.push(Edge::order(*anchor));
            }
        }
        let id = mgr.add_call(recv, inputs);
        mgr.set_abstract(
            id,
            AbstractValue::tensor_with_shape(attr.dtype, attr.shape.clone()),
        )?;
        self.placed(mgr, id, dest_stage)?;
        self.last_comm.insert(dest_stage, id);
        Ok(id)
    }

    /// Parameters read on more than one stage are sent once with a
    /// `Broadcast` on their own stage and picked up by one `Receive` per
    /// other reading stage.
    pub(super) fn handle_shared_parameters(
        &mut self,
        graph: &mut FuncGraph,
        report: &mut PipelineReport,
    ) -> Result<(), PipelineError> {
        let mut mgr = GraphManager::new(graph)?;
        for param in mgr.graph.parameters().to_vec() {
            let owner = self.stages.get(param).unwrap_or(0);
            let users: Vec<Use> = mgr.data_users(param);
            let reading: BTreeSet<u32> = users.iter().filter_map(|u| self.stages.get(u.user)).collect();
            if reading.len() < 2 {
                continue;
            }
            let others: Vec<u32> = reading.iter().copied().filter(|s| *s != owner).collect();
            let (shape, dtype) = wire_value(mgr.graph, &Edge::data(param))?;
            let tag = self.tag();

            let bcast = Primitive::new(prim::BROADCAST)
                .with_attr(ATTR_SR_TAG, Value::Int(tag))
                .with_attr(ATTR_SRC_RANK, Value::Int(self.transformer.peer_rank(owner)))
                .with_attr(
                    ATTR_DEST_RANKS,
                    Value::IntList(others.iter().map(|s| self.transformer.peer_rank(*s)).collect()),
                )
                .with_attr(ATTR_SRC_STAGE, Value::Int(i64::from(owner)))
                .with_attr(ATTR_SHAPE, Value::IntList(shape.to_i64()))
                .with_attr(ATTR_DTYPE, Value::Type(dtype));
            let mut inputs = vec![Edge::data(param)];
            inputs.extend(self.chain(owner));
            let bcast = mgr.add_call(bcast, inputs);
            if let Some(value) = mgr.graph.get(param)?.abstract_value.clone() {
                mgr.set_abstract(bcast, value)?;
            }
            self.placed(&mut mgr, bcast, owner)?;
            self.last_comm.insert(owner, bcast);
            report.broadcasts += 1;

            let attr = SendAttr {
                shape,
                dtype,
                depend: bcast,
            };
            for stage in others {
                let recv = self.insert_receive(&mut mgr, &attr, owner, stage, tag, &[])?;
                report.receives += 1;
                for u in users.iter().filter(|u| self.stages.get(u.user) == Some(stage)) {
                    mgr.set_input(u.user, u.input, Edge::data(recv))?;
                }
                self.received.insert((param, 0, stage), recv);
            }
            debug!(
                "broadcast {} from stage {owner} (tag {tag})",
                mgr.graph.display_name(param)
            );
        }
        Ok(())
    }

    /// Monad literal of `kind` owned by `stage`, created on first use.
    fn local_monad(
        &mut self,
        mgr: &mut GraphManager<'_>,
        kind: MonadKind,
        stage: u32,
        report: &mut PipelineReport,
    ) -> Result<NodeId, GraphError> {
        if let Some(id) = self.monads.get(&(stage, kind)) {
            return Ok(*id);
        }
        let id = mgr.add_literal(Value::Monad(kind));
        self.placed(mgr, id, stage)?;
        self.monads.insert((stage, kind), id);
        report.local_monads += 1;
        Ok(id)
    }

    /// Ordering anchors of `node` on its own stage: order inputs and monad
    /// carrying data inputs.
    fn anchors_of(&self, graph: &FuncGraph, node: NodeId, stage: u32) -> Vec<NodeId> {
        let Some(n) = graph.node(node) else {
            return Vec::new();
        };
        n.inputs()
            .iter()
            .filter(|e| {
                e.kind == EdgeKind::Order
                    || graph.abstract_of(e).is_some_and(AbstractValue::is_monad)
            })
            .map(|e| e.node)
            .filter(|p| self.stages.get(*p) == Some(stage))
            .collect()
    }

    /// Replaces every data edge that crosses stages with a send/receive pair,
    /// one pair per produced value and consuming stage. Literals are copied
    /// into the consuming stage instead, and monads are replaced by a monad
    /// of the consuming stage.
    pub(super) fn cut_graph(
        &mut self,
        graph: &mut FuncGraph,
        report: &mut PipelineReport,
    ) -> Result<(), PipelineError> {
        {
            let mut mgr = GraphManager::new(graph)?;
            for id in mgr.graph.topo_order()? {
                let node = mgr.node(id)?;
                if !node.is_call() {
                    continue;
                }
                let Some(stage) = self.stages.get(id) else {
                    continue;
                };
                let inputs = node.inputs().to_vec();
                let anchors = self.anchors_of(mgr.graph, id, stage);

                for (i, edge) in inputs.into_iter().enumerate() {
                    if edge.kind != EdgeKind::Data {
                        continue;
                    }
                    let Some(src) = self.stages.get(edge.node) else {
                        continue;
                    };
                    if src == stage {
                        continue;
                    }

                    // State carries no tensor; the reader's stage orders its own
                    // side effects through its communication chain.
                    let monad = match mgr.graph.abstract_of(&edge) {
                        Some(AbstractValue::Monad(kind)) => Some(*kind),
                        _ => None,
                    };
                    if let Some(kind) = monad {
                        let local = self.local_monad(&mut mgr, kind, stage, report)?;
                        mgr.set_input(id, i, Edge::data(local))?;
                        debug!(
                            "{}: monad from stage {src} replaced by a stage {stage} monad",
                            mgr.graph.display_name(id)
                        );
                        continue;
                    }

                    let producer = mgr.node(edge.node)?;
                    let constant = match (producer.literal(), producer.graph_ref()) {
                        (Some(value), _) => Some(Constant::Value(value.clone())),
                        (None, Some(graph)) => Some(Constant::Graph(graph.clone())),
                        (None, None) => None,
                    };
                    if let Some(constant) = constant {
                        let copy = match self.duplicated.get(&(edge.node, stage)) {
                            Some(copy) => *copy,
                            None => {
                                let copy = match constant {
                                    Constant::Value(value) => mgr.add_literal(value),
                                    Constant::Graph(graph) => mgr.add_graph_ref(graph),
                                };
                                self.placed(&mut mgr, copy, stage)?;
                                self.duplicated.insert((edge.node, stage), copy);
                                report.duplicated_literals += 1;
                                copy
                            }
                        };
                        mgr.set_input(id, i, Edge { node: copy, ..edge })?;
                        continue;
                    }

                    let key = (edge.node, edge.output, stage);
                    let recv = match self.received.get(&key) {
                        Some(recv) => *recv,
                        None => {
                            let tag = self.tag();
                            let attr = self.insert_send(&mut mgr, edge, src, stage, tag)?;
                            let recv =
                                self.insert_receive(&mut mgr, &attr, src, stage, tag, &anchors)?;
                            report.sends += 1;
                            report.receives += 1;
                            self.received.insert(key, recv);
                            recv
                        }
                    };
                    mgr.set_input(id, i, Edge::data(recv))?;
                }
            }
        }
        report.dropped_order_edges = drop_cross_stage_order(graph)?;
        Ok(())
    }
}

enum Constant {
    Value(Value),
    Graph(GraphId),
}

/// Order edges between stages cannot survive elimination; the receive chain
/// takes over their role.
fn drop_cross_stage_order(graph: &mut FuncGraph) -> Result<usize, GraphError> {
    let stage_of: BTreeMap<NodeId, Option<u32>> = graph
        .nodes()
        .map(|n| (n.id, n.annotations.stage))
        .collect();
    let mut dropped = 0;
    for id in graph.node_ids() {
        let stage = stage_of.get(&id).copied().flatten();
        let crosses = |e: &Edge| {
            e.kind == EdgeKind::Order && stage_of.get(&e.node).copied().flatten() != stage
        };
        if !graph.get(id)?.inputs().iter().any(crosses) {
            continue;
        }
        if let NodeKind::Call { inputs, .. } = &mut graph.get_mut(id)?.kind {
            let before = inputs.len();
            inputs.retain(|e| !crosses(e));
            dropped += before - inputs.len();
        }
    }
    Ok(dropped)
}

/// Checks that no value edge crosses stages and that every tag has one
/// sender and the expected number of receivers.
pub(super) fn verify(graph: &FuncGraph) -> Result<(), PipelineError> {
    let mut tags: BTreeMap<i64, (usize, usize, usize)> = BTreeMap::new();
    for node in graph.nodes() {
        for edge in node.inputs().iter().filter(|e| e.kind != EdgeKind::Order) {
            let producer = graph.get(edge.node)?;
            if producer.annotations.stage != node.annotations.stage {
                return Err(PipelineError::UncutEdge {
                    producer: graph.display_name(edge.node),
                    consumer: graph.display_name(node.id),
                });
            }
        }
        let Some(p) = node.primitive() else {
            continue;
        };
        let Some(tag) = p.int_attr(ATTR_SR_TAG) else {
            continue;
        };
        let entry = tags.entry(tag).or_default();
        match p.name.as_str() {
            prim::SEND => {
                entry.0 += 1;
                entry.2 += 1;
            }
            prim::BROADCAST => {
                entry.0 += 1;
                entry.2 += p.int_list_attr(ATTR_DEST_RANKS).map_or(0, |r| r.len());
            }
            prim::RECEIVE => entry.1 += 1,
            _ => {}
        }
    }
    for (tag, (sends, receives, expected)) in tags {
        if sends != 1 || receives != expected {
            return Err(PipelineError::UnpairedTag {
                tag,
                sends,
                receives,
            });
        }
    }
    Ok(())
}
