use log::{debug, warn};

use crate::ir::graph::{FuncGraph, GraphError};
use crate::ir::index::{Use, UserIndex};
use crate::ir::node::{Annotations, Edge, Node, NodeId, NodeKind, Primitive};
use crate::ir::types::{AbstractValue, GraphId};
use crate::ir::value::Value;

/// Graph editor that keeps the consumer index in sync with every edit it makes.
///
/// Edits made through `graph` directly bypass the index; the manager notices
/// through the graph revision and refuses to `replace` until [`refresh`] runs.
///
/// [`refresh`]: GraphManager::refresh
pub struct GraphManager<'g> {
    pub graph: &'g mut FuncGraph,
    index: UserIndex,
}

impl<'g> GraphManager<'g> {
    pub fn new(graph: &'g mut FuncGraph) -> Result<Self, GraphError> {
        let index = UserIndex::build(graph)?;
        Ok(Self { graph, index })
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.graph.get(id)
    }

    pub fn users(&self, id: NodeId) -> &[Use] {
        self.index.users_of(id)
    }

    /// Data consumers only; ordering anchors are not counted.
    pub fn data_users(&self, id: NodeId) -> Vec<Use> {
        self.users(id)
            .iter()
            .copied()
            .filter(|u| {
                self.graph
                    .node(u.user)
                    .and_then(|n| n.inputs().get(u.input))
                    .is_some_and(Edge::is_data)
            })
            .collect()
    }

    pub fn version(&self, id: NodeId) -> u32 {
        self.index.version(id)
    }

    pub fn is_stale(&self) -> bool {
        self.index.revision != self.graph.revision()
    }

    pub fn refresh(&mut self) -> Result<(), GraphError> {
        let mut index = UserIndex::build(self.graph)?;
        index.inherit_versions(&self.index);
        self.index = index;
        Ok(())
    }

    fn sync(&mut self) {
        self.index.revision = self.graph.revision();
    }

    fn ensure_fresh(&self) -> Result<(), GraphError> {
        if self.is_stale() {
            return Err(GraphError::StaleIndex {
                graph: self.graph.revision(),
                index: self.index.revision,
            });
        }
        Ok(())
    }

    pub fn add_call(&mut self, prim: Primitive, inputs: Vec<Edge>) -> NodeId {
        let id = self.graph.add_call(prim, inputs.clone());
        self.index.register(id);
        self.index.add_uses(id, &inputs);
        self.sync();
        id
    }

    pub fn add_literal(&mut self, value: Value) -> NodeId {
        let id = self.graph.add_literal(value);
        self.index.register(id);
        self.sync();
        id
    }

    pub fn add_graph_ref(&mut self, graph: GraphId) -> NodeId {
        let id = self.graph.add_graph_ref(graph);
        self.index.register(id);
        self.sync();
        id
    }

    pub fn set_abstract(&mut self, id: NodeId, value: AbstractValue) -> Result<(), GraphError> {
        self.graph.set_abstract(id, value)?;
        self.sync();
        Ok(())
    }

    /// Copies node attributes and annotations from `from` onto `to`.
    pub fn copy_metadata(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        let source = self.graph.get(from)?;
        let (attrs, annotations) = (source.attrs.clone(), source.annotations.clone());
        let target = self.graph.get_mut(to)?;
        target.attrs = attrs;
        target.annotations = annotations;
        self.index.bump_version(to);
        self.sync();
        Ok(())
    }

    pub fn set_annotations(&mut self, id: NodeId, annotations: Annotations) -> Result<(), GraphError> {
        self.graph.get_mut(id)?.annotations = annotations;
        self.index.bump_version(id);
        self.sync();
        Ok(())
    }

    pub fn set_node_attr(&mut self, id: NodeId, key: &str, value: Value) -> Result<(), GraphError> {
        self.graph.get_mut(id)?.attrs.insert(key.to_string(), value);
        self.index.bump_version(id);
        self.sync();
        Ok(())
    }

    pub fn set_prim_attr(&mut self, id: NodeId, key: &str, value: Value) -> Result<(), GraphError> {
        let name = self.graph.display_name(id);
        let prim = self
            .graph
            .get_mut(id)?
            .primitive_mut()
            .ok_or(GraphError::NotACall { node: name })?;
        prim.set_attr(key, value);
        self.index.bump_version(id);
        self.sync();
        Ok(())
    }

    pub fn rename_primitive(&mut self, id: NodeId, new_name: &str) -> Result<(), GraphError> {
        let name = self.graph.display_name(id);
        let prim = self
            .graph
            .get_mut(id)?
            .primitive_mut()
            .ok_or(GraphError::NotACall { node: name })?;
        prim.name = new_name.to_string();
        self.index.bump_version(id);
        self.sync();
        Ok(())
    }

    /// Rewires input `input` of `user` to `edge`.
    pub fn set_input(&mut self, user: NodeId, input: usize, edge: Edge) -> Result<(), GraphError> {
        self.ensure_fresh()?;
        let name = self.graph.display_name(user);
        let node = self.graph.get_mut(user)?;
        let NodeKind::Call { inputs, .. } = &mut node.kind else {
            return Err(GraphError::NotACall { node: name });
        };
        let slot = inputs
            .get_mut(input)
            .ok_or(GraphError::InputOutOfRange { node: name, input })?;
        let previous = std::mem::replace(slot, edge);
        self.index.remove_use(previous.node, user, input);
        self.index.add_use(edge.node, user, input);
        self.index.bump_version(user);
        self.sync();
        Ok(())
    }

    pub fn push_input(&mut self, user: NodeId, edge: Edge) -> Result<usize, GraphError> {
        self.ensure_fresh()?;
        let name = self.graph.display_name(user);
        let node = self.graph.get_mut(user)?;
        let NodeKind::Call { inputs, .. } = &mut node.kind else {
            return Err(GraphError::NotACall { node: name });
        };
        inputs.push(edge);
        let input = inputs.len() - 1;
        self.index.add_use(edge.node, user, input);
        self.index.bump_version(user);
        self.sync();
        Ok(input)
    }

    /// Redirects every consumer of `old` (and graph outputs) to `new`.
    ///
    /// Either every use moves or none does: a stale index or a rank conflict
    /// leaves the graph untouched and returns the error.
    pub fn replace(&mut self, old: NodeId, new: NodeId) -> Result<(), GraphError> {
        if old == new {
            return Ok(());
        }
        self.ensure_fresh()?;
        let old_node = self.graph.get(old)?;
        let new_node = self.graph.get(new)?;
        if let (Some(a), Some(b)) = (&old_node.abstract_value, &new_node.abstract_value) {
            if let (Some(ra), Some(rb)) = (a.rank(), b.rank()) {
                if ra != rb {
                    let err = GraphError::RankMismatch {
                        old: self.graph.display_name(old),
                        new: self.graph.display_name(new),
                        old_value: a.to_string(),
                        new_value: b.to_string(),
                    };
                    warn!("replace refused: {err}");
                    return Err(err);
                }
            }
        }

        let uses: Vec<Use> = self.index.users_of(old).to_vec();
        for slot in &uses {
            if slot.user == new {
                continue;
            }
            let node = self.graph.get_mut(slot.user)?;
            if let NodeKind::Call { inputs, .. } = &mut node.kind {
                if let Some(edge) = inputs.get_mut(slot.input) {
                    edge.node = new;
                }
            }
            self.index.remove_use(old, slot.user, slot.input);
            self.index.add_use(new, slot.user, slot.input);
            self.index.bump_version(slot.user);
        }

        if self.graph.outputs().iter().any(|e| e.node == old) {
            let outputs = self
                .graph
                .outputs()
                .iter()
                .map(|e| if e.node == old { Edge { node: new, ..*e } } else { *e })
                .collect();
            self.graph.set_outputs(outputs);
        }
        debug!(
            "replaced {} with {} ({} uses)",
            self.graph.display_name(old),
            self.graph.display_name(new),
            uses.len()
        );
        self.sync();
        Ok(())
    }
}
