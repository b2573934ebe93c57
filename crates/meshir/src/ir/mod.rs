//! Graph model: arena-backed function graphs, values and the managed editor.

mod graph;
mod index;
mod manager;
mod node;
pub mod prim;
mod text;
mod types;
mod value;

pub use graph::{FuncGraph, GraphError};
pub use index::{Use, UserIndex};
pub use manager::GraphManager;
pub use node::{Annotations, Edge, EdgeKind, Node, NodeId, NodeKind, Primitive};
pub use types::{
    AbstractValue, DType, Dim, GraphId, MonadKind, Shape, ShapeError, TensorSpec, UNKNOWN_DIM, UNKNOWN_RANK,
};
pub use value::{TensorData, TensorLiteral, Value};
