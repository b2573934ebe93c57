use std::collections::{HashMap, VecDeque};

use log::{debug, trace};

use crate::ir::{FuncGraph, GraphManager, NodeId};
use crate::pattern::{FrozenPatternSet, RewriteContext, RewriteError, RewriteOutcome};

#[derive(Debug, Clone)]
pub struct GreedyConfig {
    pub max_iterations: usize,
    pub enable_gc: bool,
}

impl Default for GreedyConfig {
    fn default() -> Self {
        Self {
            max_iterations: usize::MAX,
            enable_gc: true,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GreedyRewriteStats {
    pub iterations: usize,
    pub applied: usize,
    pub skipped: usize,
    pub gc_removed: usize,
}

/// Applies `patterns` until no pattern fires or the iteration cap is hit.
///
/// A (pattern, node) pair that failed is not retried until the node's version
/// changes. Fatal pattern errors abort the whole walk.
pub fn apply_patterns_greedily(
    graph: &mut FuncGraph,
    patterns: &FrozenPatternSet,
    cx: &RewriteContext,
    cfg: &GreedyConfig,
) -> Result<GreedyRewriteStats, RewriteError> {
    let mut stats = GreedyRewriteStats::default();
    if patterns.is_empty() {
        return Ok(stats);
    }

    {
        let mut mgr = GraphManager::new(graph)?;
        let mut worklist = VecDeque::new();
        seed_worklist(&mgr, &mut worklist)?;
        let mut failure_cache: HashMap<(usize, NodeId), u32> = HashMap::new();

        'outer: while let Some(node) = worklist.pop_front() {
            if stats.iterations >= cfg.max_iterations {
                debug!("rewrite iteration cap {} reached", cfg.max_iterations);
                break;
            }
            let Some(prim) = mgr.graph.node(node).and_then(|n| n.primitive()).cloned() else {
                continue;
            };
            let version = mgr.version(node);

            for (idx, pattern) in patterns.matching(&prim) {
                if failure_cache.get(&(idx, node)).copied() == Some(version) {
                    continue;
                }
                let outcome = pattern.match_and_rewrite(node, &mut mgr, cx)?;
                match outcome {
                    RewriteOutcome::Updated | RewriteOutcome::Replaced(_) => {
                        trace!("{} fired on {}", pattern.name(), mgr.graph.display_name(node));
                        stats.applied += 1;
                        stats.iterations += 1;
                        clear_failure_entries(node, &mut failure_cache);
                        seed_worklist(&mgr, &mut worklist)?;
                        continue 'outer;
                    }
                    RewriteOutcome::Skipped(reason) => {
                        debug!(
                            "{} skipped {}: {reason}",
                            pattern.name(),
                            mgr.graph.display_name(node)
                        );
                        stats.skipped += 1;
                        failure_cache.insert((idx, node), mgr.version(node));
                    }
                    RewriteOutcome::Unchanged => {
                        failure_cache.insert((idx, node), mgr.version(node));
                    }
                }
            }
        }
    }

    if cfg.enable_gc {
        stats.gc_removed = graph.sweep(&[]);
    }
    Ok(stats)
}

fn seed_worklist(mgr: &GraphManager, worklist: &mut VecDeque<NodeId>) -> Result<(), RewriteError> {
    worklist.clear();
    for id in mgr.graph.topo_order()? {
        if mgr.graph.node(id).is_some_and(|n| n.is_call()) {
            worklist.push_back(id);
        }
    }
    Ok(())
}

fn clear_failure_entries(node: NodeId, cache: &mut HashMap<(usize, NodeId), u32>) {
    cache.retain(|(_, cached), _| *cached != node);
}
