use std::collections::HashMap;

use smallvec::SmallVec;

use crate::ir::graph::{FuncGraph, GraphError};
use crate::ir::node::{Edge, NodeId};

/// One consumer slot of a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Use {
    pub user: NodeId,
    pub input: usize,
}

/// Consumer lists and per-node version counters for a [`FuncGraph`].
#[derive(Debug, Clone, Default)]
pub struct UserIndex {
    users: HashMap<NodeId, SmallVec<[Use; 4]>>,
    versions: HashMap<NodeId, u32>,
    pub(crate) revision: u64,
}

impl UserIndex {
    /// Indexes the graph, rejecting edges that point at removed nodes.
    pub fn build(graph: &FuncGraph) -> Result<Self, GraphError> {
        let mut index = UserIndex {
            revision: graph.revision(),
            ..UserIndex::default()
        };
        for node in graph.nodes() {
            index.versions.insert(node.id, 0);
            for (input, edge) in node.inputs().iter().enumerate() {
                if !graph.contains(edge.node) {
                    return Err(GraphError::DanglingEdge {
                        user: graph.display_name(node.id),
                        input,
                        producer: edge.node,
                    });
                }
                index.add_use(edge.node, node.id, input);
            }
        }
        Ok(index)
    }

    pub fn users_of(&self, producer: NodeId) -> &[Use] {
        self.users
            .get(&producer)
            .map(|users| users.as_slice())
            .unwrap_or(&[])
    }

    pub fn add_use(&mut self, producer: NodeId, user: NodeId, input: usize) {
        let entry = self.users.entry(producer).or_default();
        let slot = Use { user, input };
        if !entry.contains(&slot) {
            entry.push(slot);
        }
    }

    pub fn add_uses(&mut self, user: NodeId, inputs: &[Edge]) {
        for (input, edge) in inputs.iter().enumerate() {
            self.add_use(edge.node, user, input);
        }
    }

    pub fn remove_use(&mut self, producer: NodeId, user: NodeId, input: usize) {
        if let Some(entry) = self.users.get_mut(&producer) {
            entry.retain(|u| !(u.user == user && u.input == input));
            if entry.is_empty() {
                self.users.remove(&producer);
            }
        }
    }

    pub fn version(&self, node: NodeId) -> u32 {
        self.versions.get(&node).copied().unwrap_or(0)
    }

    pub fn bump_version(&mut self, node: NodeId) {
        let entry = self.versions.entry(node).or_insert(0);
        *entry = entry.wrapping_add(1);
    }

    /// Carries version counters over from a previous index of the same graph.
    pub fn inherit_versions(&mut self, previous: &UserIndex) {
        for (node, version) in self.versions.iter_mut() {
            *version = previous.version(*node);
        }
    }

    pub fn register(&mut self, node: NodeId) {
        self.versions.entry(node).or_insert(0);
    }
}
