use std::collections::BTreeMap;

use log::debug;

use crate::ir::{EdgeKind, FuncGraph, GraphError, NodeId};
use crate::parallel::pipeline::PipelineError;

/// Stage of every live node after coloring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageMap {
    stages: BTreeMap<NodeId, u32>,
}

impl StageMap {
    pub fn get(&self, id: NodeId) -> Option<u32> {
        self.stages.get(&id).copied()
    }

    pub(super) fn set(&mut self, id: NodeId, stage: u32) {
        self.stages.insert(id, stage);
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, u32)> + '_ {
        self.stages.iter().map(|(id, stage)| (*id, *stage))
    }

    pub fn write_back(&self, graph: &mut FuncGraph) -> Result<(), GraphError> {
        for (id, stage) in self.iter() {
            graph.set_stage(id, stage)?;
        }
        Ok(())
    }
}

/// Assigns a stage to every node.
///
/// Hinted calls keep their hint. Other calls take the latest stage among their
/// data producers, then the earliest among their data consumers, then stage 0.
/// Parameters and literals without a hint follow their earliest consumer.
pub(super) fn color(graph: &FuncGraph, stage_num: u32) -> Result<StageMap, PipelineError> {
    let order = graph.topo_order()?;
    let mut consumers: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
    for node in graph.nodes() {
        for (_, edge) in node.data_inputs() {
            consumers.entry(edge.node).or_default().push(node.id);
        }
    }

    let mut hints = BTreeMap::new();
    for node in graph.nodes() {
        if let Some(stage) = node.annotations.stage {
            if stage >= stage_num {
                return Err(PipelineError::StageOutOfRange {
                    node: graph.display_name(node.id),
                    stage,
                    stage_num,
                });
            }
            hints.insert(node.id, stage);
        }
    }

    let mut map = StageMap::default();
    for id in &order {
        let node = graph.get(*id)?;
        if !node.is_call() {
            continue;
        }
        let stage = hints.get(id).copied().or_else(|| {
            node.data_inputs()
                .filter_map(|(_, e)| graph.node(e.node).filter(|p| p.is_call()).and(map.get(e.node)))
                .max()
        });
        if let Some(stage) = stage {
            map.set(*id, stage);
        }
    }

    // Calls with no colored ancestor are traced forward through their users.
    for id in order.iter().rev() {
        let node = graph.get(*id)?;
        if !node.is_call() || map.get(*id).is_some() {
            continue;
        }
        let earliest = consumers
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|c| map.get(*c))
            .min();
        let stage = earliest.unwrap_or(0);
        debug!("{}: no stage ancestor, colored {stage}", graph.display_name(*id));
        map.set(*id, stage);
    }

    for node in graph.nodes() {
        if node.is_call() {
            continue;
        }
        let stage = hints.get(&node.id).copied().unwrap_or_else(|| {
            consumers
                .get(&node.id)
                .into_iter()
                .flatten()
                .filter_map(|c| map.get(*c))
                .min()
                .unwrap_or(0)
        });
        map.set(node.id, stage);
    }

    check_monotonic(graph, &map)?;
    Ok(map)
}

/// Data may only flow from a stage to the same or a later stage.
fn check_monotonic(graph: &FuncGraph, map: &StageMap) -> Result<(), PipelineError> {
    for node in graph.nodes() {
        let Some(consumer_stage) = map.get(node.id) else {
            continue;
        };
        for edge in node.inputs() {
            if edge.kind == EdgeKind::Order {
                continue;
            }
            let Some(producer) = graph.node(edge.node) else {
                continue;
            };
            if producer.is_constant() {
                continue;
            }
            let Some(producer_stage) = map.get(edge.node) else {
                continue;
            };
            if edge.kind == EdgeKind::Recurrent && producer_stage != consumer_stage {
                return Err(PipelineError::RecurrentAcrossStages {
                    producer: graph.display_name(edge.node),
                    consumer: graph.display_name(node.id),
                });
            }
            if producer_stage > consumer_stage {
                return Err(PipelineError::BackwardEdge {
                    producer: graph.display_name(edge.node),
                    producer_stage,
                    consumer: graph.display_name(node.id),
                    consumer_stage,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AbstractValue, DType, Primitive};

    fn relu(graph: &mut FuncGraph, input: NodeId) -> NodeId {
        graph.call(Primitive::new("ReLU"), &[input])
    }

    #[test]
    fn unhinted_calls_inherit_latest_producer_stage() {
        let mut g = FuncGraph::new("g");
        let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[4]));
        let a = relu(&mut g, x);
        let b = relu(&mut g, a);
        let c = relu(&mut g, b);
        g.set_stage(b, 1).unwrap();

        let map = color(&g, 2).unwrap();
        assert_eq!(map.get(a), Some(0));
        assert_eq!(map.get(b), Some(1));
        assert_eq!(map.get(c), Some(1));
        assert_eq!(map.get(x), Some(0));
    }

    #[test]
    fn later_producer_into_earlier_hint_is_fatal() {
        let mut g = FuncGraph::new("g");
        let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[4]));
        let a = relu(&mut g, x);
        let b = relu(&mut g, a);
        g.set_stage(a, 1).unwrap();
        g.set_stage(b, 0).unwrap();
        assert!(matches!(color(&g, 2), Err(PipelineError::BackwardEdge { .. })));
    }

    #[test]
    fn hint_beyond_stage_count_is_rejected() {
        let mut g = FuncGraph::new("g");
        let x = g.add_parameter("x", AbstractValue::tensor(DType::F32, &[4]));
        let a = relu(&mut g, x);
        g.set_stage(a, 3).unwrap();
        assert!(matches!(color(&g, 2), Err(PipelineError::StageOutOfRange { .. })));
    }
}
