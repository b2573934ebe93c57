use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::adapter::AdaptPhase;
use crate::env::EnvOverrides;
use crate::error::CompileError;
use crate::parallel::{DeviceMesh, StrategyError};

/// Device layout of a distributed compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelOptions {
    pub device_num: i64,
    pub stage_num: i64,
    /// Rank of the process this compile produces a graph for.
    pub global_rank: i64,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self {
            device_num: 1,
            stage_num: 1,
            global_rank: 0,
        }
    }
}

impl ParallelOptions {
    pub fn mesh(&self) -> Result<DeviceMesh, StrategyError> {
        DeviceMesh::new(self.device_num, self.stage_num)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Cap on pattern applications inside one greedy rewrite run.
    pub max_rewrite_iterations: usize,
    /// Cap on rewrite/re-infer rounds.
    pub fixed_point_iterations: usize,
    pub adaptation_phases: Vec<AdaptPhase>,
    /// Dump the graph at `trace` level after every pass.
    pub dump_ir: bool,
    /// Log per-pass statistics at `info` level.
    pub pass_stats: bool,
    pub parallel: Option<ParallelOptions>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            max_rewrite_iterations: 10_000,
            fixed_point_iterations: 4,
            adaptation_phases: vec![AdaptPhase::Unify, AdaptPhase::Backend],
            dump_ir: false,
            pass_stats: false,
            parallel: None,
        }
    }
}

impl CompileOptions {
    pub fn from_json_str(text: &str) -> Result<Self, CompileError> {
        serde_json::from_str(text).map_err(|e| CompileError::Config {
            detail: e.to_string(),
        })
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read compile options from {}", path.display()))?;
        let options: Self = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse compile options in {}", path.display()))?;
        Ok(options.with_env_overrides())
    }

    /// Applies the process's `MESHIR_*` environment overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(EnvOverrides::current())
    }

    pub fn with_overrides(mut self, overrides: EnvOverrides) -> Self {
        self.dump_ir |= overrides.dump_ir;
        self.pass_stats |= overrides.pass_stats;
        if let Some(iters) = overrides.max_rewrite_iters {
            self.max_rewrite_iterations = iters;
        }
        self
    }

    pub fn with_parallel(mut self, parallel: ParallelOptions) -> Self {
        self.parallel = Some(parallel);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), CompileError> {
        if self.max_rewrite_iterations == 0 {
            return Err(CompileError::Config {
                detail: "max_rewrite_iterations must be positive".to_string(),
            });
        }
        if let Some(parallel) = &self.parallel {
            let world = parallel.device_num;
            if !(0..world).contains(&parallel.global_rank) {
                return Err(CompileError::Config {
                    detail: format!(
                        "global_rank {} outside 0..{world}",
                        parallel.global_rank
                    ),
                });
            }
        }
        Ok(())
    }
}
