//! Graph IR rewriting, shape inference and auto-parallel partitioning for ML
//! compute graphs.
//!
//! A [`FuncGraph`] is inferred, rewritten by pattern passes, adapted to a
//! backend's operator set, annotated with sharding strategies and finally cut
//! into pipeline stages. [`Compiler`] drives the whole sequence.

pub mod adapter;
mod compiler;
mod config;
mod env;
mod error;
pub mod infer;
pub mod ir;
pub mod parallel;
pub mod passes;
pub mod pattern;
mod registry;

pub use compiler::{CompileOutput, CompileStats, Compiler, PassStat, PipelineBuilder, Step};
pub use config::{CompileOptions, ParallelOptions};
pub use env::EnvOverrides;
pub use error::CompileError;
pub use ir::{AbstractValue, DType, Edge, FuncGraph, GraphManager, NodeId, Primitive, Shape, Value};
pub use parallel::{DeviceMesh, ParallelInputs, StrategyAssignment};
pub use registry::Registries;
