use thiserror::Error;

use crate::infer::InferError;
use crate::ir::GraphError;
use crate::parallel::{PipelineError, StrategyError};
use crate::pattern::RewriteError;

/// Fatal compile failure. Nothing of a failed compile is returned.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Infer(#[from] InferError),
    #[error(transparent)]
    Rewrite(#[from] RewriteError),
    #[error(transparent)]
    Strategy(#[from] StrategyError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("invalid compile options: {detail}")]
    Config { detail: String },
    #[error("pass {pass} failed: {source}")]
    Pass {
        pass: &'static str,
        #[source]
        source: Box<CompileError>,
    },
}

impl CompileError {
    pub(crate) fn in_pass(self, pass: &'static str) -> Self {
        match self {
            CompileError::Pass { .. } => self,
            other => CompileError::Pass {
                pass,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, with pass context stripped.
    pub fn root(&self) -> &CompileError {
        match self {
            CompileError::Pass { source, .. } => source.root(),
            other => other,
        }
    }
}
