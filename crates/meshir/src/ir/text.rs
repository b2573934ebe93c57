use std::fmt;

use crate::ir::graph::FuncGraph;
use crate::ir::node::{Edge, EdgeKind, Node, NodeKind};

fn write_edge(f: &mut fmt::Formatter<'_>, edge: &Edge) -> fmt::Result {
    match edge.kind {
        EdgeKind::Data => write!(f, "{}", edge.node)?,
        EdgeKind::Order => write!(f, "^{}", edge.node)?,
        EdgeKind::Recurrent => write!(f, "~{}", edge.node)?,
    }
    if edge.output != 0 {
        write!(f, "#{}", edge.output)?;
    }
    Ok(())
}

fn write_node(f: &mut fmt::Formatter<'_>, node: &Node) -> fmt::Result {
    write!(f, "  {} = ", node.id)?;
    match &node.kind {
        NodeKind::Call { prim, inputs } => {
            write!(f, "{}(", prim.name)?;
            for (i, edge) in inputs.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_edge(f, edge)?;
            }
            f.write_str(")")?;
            if !prim.attrs.is_empty() {
                f.write_str(" {")?;
                for (i, (key, value)) in prim.attrs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")?;
            }
        }
        NodeKind::Literal(value) => write!(f, "const {value}")?,
        NodeKind::Parameter { name, .. } => write!(f, "param @{name}")?,
        NodeKind::Graph(graph) => write!(f, "graph {graph}")?,
    }
    if let Some(value) = &node.abstract_value {
        write!(f, " : {value}")?;
    }
    let ann = &node.annotations;
    if let Some(stage) = ann.stage {
        write!(f, "  # stage={stage}")?;
    }
    if let Some(strategy) = &ann.strategy {
        write!(f, "  # strategy={strategy:?}")?;
    }
    writeln!(f)
}

impl fmt::Display for FuncGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph @{} {{", self.name)?;
        // Topological order when available, arena order for cyclic graphs.
        let order = self.topo_order().unwrap_or_else(|_| self.node_ids());
        for id in order {
            if let Some(node) = self.node(id) {
                write_node(f, node)?;
            }
        }
        f.write_str("  return ")?;
        for (i, edge) in self.outputs().iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write_edge(f, edge)?;
        }
        writeln!(f)?;
        f.write_str("}")
    }
}
