use std::sync::Arc;

use log::{debug, error};

use crate::adapter::{AdaptPhase, KernelQuery, KernelSupport, OpAdaptationInfo, OpAdaptationRegistry};
use crate::ir::prim::{
    ATTR_INPUT_NAMES, ATTR_IR_CHANGE, ATTR_ME_OP_NAME, ATTR_OP_ADAPTATION_PROCESSED,
};
use crate::ir::{prim, Edge, FuncGraph, GraphManager, NodeId, Primitive, Value};
use crate::pattern::{NodePattern, RewriteContext, RewriteError, RewriteOutcome, SkipReason};

/// Target call not yet added to the graph.
struct TargetPlan {
    prim: Primitive,
    inputs: Vec<Edge>,
    ir_change: bool,
}

enum Attempt {
    Converted(TargetPlan),
    Kept(Option<SkipReason>),
}

/// Applies [`OpAdaptationInfo`] records of one phase, one node at a time.
///
/// The original node is returned untouched whenever a step declines: a
/// failed pre-check, an input that cannot become an attribute, or a target
/// the kernel table rejects. Targets are planned before they are built, so a
/// rejected target never reaches the graph.
#[derive(Clone)]
pub struct OpAdapter {
    infos: Arc<OpAdaptationRegistry>,
    support: Arc<dyn KernelSupport>,
    phase: AdaptPhase,
}

impl OpAdapter {
    pub const NAME: &'static str = "op-adaptation";

    pub fn new(
        infos: Arc<OpAdaptationRegistry>,
        support: Arc<dyn KernelSupport>,
        phase: AdaptPhase,
    ) -> Self {
        Self {
            infos,
            support,
            phase,
        }
    }

    pub fn phase(&self) -> AdaptPhase {
        self.phase
    }

    /// Adapts `id` in place or replaces it with the target call.
    pub fn adapt(
        &self,
        mgr: &mut GraphManager,
        id: NodeId,
        cx: &RewriteContext,
    ) -> Result<RewriteOutcome, RewriteError> {
        let node = mgr.node(id)?;
        let Some(op) = node.op_name().map(str::to_string) else {
            return Ok(RewriteOutcome::Unchanged);
        };
        if node
            .attr(ATTR_OP_ADAPTATION_PROCESSED)
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return Ok(RewriteOutcome::Skipped(SkipReason::AlreadyProcessed));
        }
        let Some(info) = self.infos.get(self.phase, &op) else {
            return Ok(RewriteOutcome::Unchanged);
        };

        let me_op_name = Value::Str(info.me_op_name.clone());
        if node.attr(ATTR_ME_OP_NAME) != Some(&me_op_name) {
            mgr.set_node_attr(id, ATTR_ME_OP_NAME, me_op_name)?;
        }
        let renamed = self.rename(mgr, id, info)?;

        match self.attempt(mgr.graph, id, info, cx)? {
            Attempt::Converted(plan) => self.commit(mgr, id, info, plan),
            Attempt::Kept(reason) => {
                if let Some(reason) = &reason {
                    debug!("{}: kept as is: {reason}", mgr.graph.display_name(id));
                }
                Ok(match (renamed, reason) {
                    (true, _) => RewriteOutcome::Updated,
                    (false, Some(reason)) => RewriteOutcome::Skipped(reason),
                    (false, None) => RewriteOutcome::Unchanged,
                })
            }
        }
    }

    fn rename(
        &self,
        mgr: &mut GraphManager,
        id: NodeId,
        info: &OpAdaptationInfo,
    ) -> Result<bool, RewriteError> {
        if !info.renames() {
            return Ok(false);
        }
        mgr.rename_primitive(id, &info.backend_op_name)?;
        mgr.set_node_attr(id, ATTR_OP_ADAPTATION_PROCESSED, Value::Bool(true))?;
        for (name, value) in &info.rename_attrs {
            mgr.set_prim_attr(id, name, value.clone())?;
        }
        debug!(
            "renamed {} to {}",
            mgr.graph.display_name(id),
            info.backend_op_name
        );
        Ok(true)
    }

    fn attempt(
        &self,
        graph: &FuncGraph,
        id: NodeId,
        info: &OpAdaptationInfo,
        cx: &RewriteContext,
    ) -> Result<Attempt, RewriteError> {
        let node = graph.get(id)?;
        if let Some(check) = info.pre_check {
            if !check(graph, id) {
                return Ok(Attempt::Kept(Some(SkipReason::PreCheckRejected {
                    op: info.me_op_name.clone(),
                })));
            }
        }
        let Some(origin) = node.primitive() else {
            return Ok(Attempt::Kept(None));
        };
        let dynamic = node.is_dynamic();

        if info.need_support_check {
            if dynamic {
                let query = KernelQuery {
                    prim: origin,
                    output: node.abstract_value.as_ref(),
                    dynamic,
                };
                if self.support.supports(&query) {
                    return Ok(Attempt::Kept(Some(SkipReason::DynamicOriginSupported {
                        op: origin.name.clone(),
                    })));
                }
            }
            let plan = match plan_target(graph, id, info, cx)? {
                Ok(plan) => plan,
                Err(reason) => return Ok(Attempt::Kept(Some(reason))),
            };
            let query = KernelQuery {
                prim: &plan.prim,
                output: node.abstract_value.as_ref(),
                dynamic,
            };
            if let Err(unsupported) = self.support.check(&query) {
                debug!("{}: {unsupported}", graph.display_name(id));
                return Ok(Attempt::Kept(Some(SkipReason::Unsupported {
                    op: plan.prim.name,
                })));
            }
            Ok(Attempt::Converted(plan))
        } else if !info.input_attr_map.is_empty() {
            Ok(match plan_target(graph, id, info, cx)? {
                Ok(plan) => Attempt::Converted(plan),
                Err(reason) => Attempt::Kept(Some(reason)),
            })
        } else {
            Ok(Attempt::Kept(None))
        }
    }

    fn commit(
        &self,
        mgr: &mut GraphManager,
        id: NodeId,
        info: &OpAdaptationInfo,
        plan: TargetPlan,
    ) -> Result<RewriteOutcome, RewriteError> {
        let abstract_value = mgr.node(id)?.abstract_value.clone();
        let target = mgr.add_call(plan.prim, plan.inputs);
        if let Some(value) = abstract_value {
            mgr.set_abstract(target, value)?;
        }
        mgr.copy_metadata(id, target)?;
        mgr.set_node_attr(target, ATTR_OP_ADAPTATION_PROCESSED, Value::Bool(true))?;
        mgr.set_node_attr(target, ATTR_ME_OP_NAME, Value::Str(info.me_op_name.clone()))?;
        mgr.set_node_attr(target, ATTR_IR_CHANGE, Value::Bool(plan.ir_change))?;
        match mgr.replace(id, target) {
            Ok(()) => {
                // The detached origin lingers until the next sweep.
                mgr.set_node_attr(id, ATTR_OP_ADAPTATION_PROCESSED, Value::Bool(true))?;
                debug!(
                    "adapted {} to {}",
                    mgr.graph.display_name(id),
                    mgr.graph.display_name(target)
                );
                Ok(RewriteOutcome::Replaced(target))
            }
            Err(err) => Ok(RewriteOutcome::Skipped(SkipReason::ReplaceRefused(
                err.to_string(),
            ))),
        }
    }
}

/// Attribute names for the data inputs of `origin`.
fn input_names(origin: &Primitive, info: &OpAdaptationInfo, cx: &RewriteContext) -> Vec<String> {
    if let Some(Value::StrList(names)) = origin.attr(ATTR_INPUT_NAMES) {
        return names.clone();
    }
    cx.registry
        .input_names(&info.me_op_name)
        .or_else(|| cx.registry.input_names(&origin.name))
        .map(|names| names.iter().map(|n| n.to_string()).collect())
        .unwrap_or_default()
}

/// Builds the target primitive and its remaining inputs, converting the
/// mapped data inputs into attributes. Any input that is not a plain literal
/// aborts the plan.
fn plan_target(
    graph: &FuncGraph,
    id: NodeId,
    info: &OpAdaptationInfo,
    cx: &RewriteContext,
) -> Result<Result<TargetPlan, SkipReason>, RewriteError> {
    let node = graph.get(id)?;
    let display = graph.display_name(id);
    let Some(origin) = node.primitive() else {
        return Err(RewriteError::Invalid {
            pattern: OpAdapter::NAME,
            node: display,
            detail: "not a call".to_string(),
        });
    };
    let names = input_names(origin, info, cx);
    let mut target = Primitive {
        name: info.target_op_name.clone(),
        attrs: origin.attrs.clone(),
    };
    let mut inputs = Vec::with_capacity(node.inputs().len());
    let mut ir_change = false;
    let mut data_index = 0;

    for edge in node.inputs() {
        if !edge.is_data() {
            inputs.push(*edge);
            continue;
        }
        let input = data_index;
        data_index += 1;
        let Some(kind) = info.input_attr_map.get(&input) else {
            inputs.push(*edge);
            continue;
        };

        let producer = graph.get(edge.node)?;
        if producer.is_call_to(prim::DEPEND) {
            return Ok(Err(SkipReason::DependInput {
                node: display,
                input,
            }));
        }
        let value = match producer.literal() {
            Some(value) if value.is_monad() => {
                return Ok(Err(SkipReason::MonadInput {
                    node: display,
                    input,
                }))
            }
            Some(value) => value,
            None if producer
                .abstract_value
                .as_ref()
                .is_some_and(|v| v.is_monad()) =>
            {
                return Ok(Err(SkipReason::MonadInput {
                    node: display,
                    input,
                }))
            }
            None => {
                return Ok(Err(SkipReason::NonConstantInput {
                    node: display,
                    input,
                }))
            }
        };
        if matches!(value, Value::Tensor(t) if t.data.is_none()) {
            return Ok(Err(SkipReason::EmptyTensorData {
                node: display,
                input,
            }));
        }
        let Some(attr) = names.get(input).filter(|name| !name.is_empty()) else {
            return Ok(Err(SkipReason::MissingInputName {
                op: origin.name.clone(),
                input,
            }));
        };
        if origin.has_attr(attr) {
            error!("{display}: attribute '{attr}' already present, cannot convert input {input}");
            return Ok(Err(SkipReason::AttrAlreadyPresent {
                op: origin.name.clone(),
                attr: attr.clone(),
            }));
        }
        let Some(converted) = kind.convert(value) else {
            return Ok(Err(SkipReason::UnconvertibleValue {
                op: origin.name.clone(),
                attr: attr.clone(),
                value: value.to_string(),
            }));
        };
        target.set_attr(attr.clone(), converted);
        ir_change = true;
    }

    Ok(Ok(TargetPlan {
        prim: target,
        inputs,
        ir_change,
    }))
}

impl NodePattern for OpAdapter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn matches(&self, prim: &Primitive) -> bool {
        self.infos.get(self.phase, &prim.name).is_some()
    }

    fn process(
        &self,
        node: NodeId,
        mgr: &mut GraphManager,
        cx: &RewriteContext,
    ) -> Result<RewriteOutcome, RewriteError> {
        self.adapt(mgr, node, cx)
    }
}
