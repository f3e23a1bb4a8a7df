/*
 * Brushes
 *
 * A brush is one pure coloring step: graph × coloring → coloring, plus a
 * changed bit. Initial brushes seed rule-declared colors exactly once;
 * repeatable brushes propagate colors along graph edges and run to a
 * fixpoint. Every brush must be monotone in the coloring lattice — the
 * fixpoint (and the whole interprocedural worklist) relies on it.
 */

use rustc_hash::FxHashMap;

use crate::features::colored::domain::{ColoredObject, Coloring, PaintedColor, TraceItem};
use crate::features::colored::ports::RuleProvider;
use crate::features::colorless::domain::{Invocation, MethodDataGraph, NodeId, NodeKind};
use crate::shared::models::opcode as op;

/// Resolves a call site against the painting session: records the callee as
/// a dependency and returns whatever node colorings the callee's cached
/// result contributes.
pub type CalleeResolver<'c> = dyn FnMut(
        &Invocation,
        &[Option<ColoredObject>],
        &[Option<ColoredObject>],
    ) -> FxHashMap<NodeId, ColoredObject>
    + 'c;

/// Sink for detected source→sink intersections.
pub type IntersectionCallback<'c> = dyn FnMut(&TraceItem, &TraceItem) + 'c;

/// Everything a brush may consult besides the graph and the coloring.
pub struct BrushContext<'a, 'c> {
    pub rules: &'a dyn RuleProvider,
    pub resolve_callee: &'a mut CalleeResolver<'c>,
    pub on_intersection: &'a mut IntersectionCallback<'c>,
}

/// One coloring step.
pub trait Brush: Send + Sync {
    fn name(&self) -> &'static str;

    /// Apply the step; returns true if the coloring changed.
    fn paint(
        &self,
        graph: &MethodDataGraph,
        colors: &mut Coloring,
        ctx: &mut BrushContext<'_, '_>,
    ) -> bool;
}

/// Opcodes whose result is the unchanged input value.
const COPY_THROUGH_OPS: [u8; 7] = [
    op::CHECKCAST,
    op::I2B,
    op::I2C,
    op::I2D,
    op::I2F,
    op::I2L,
    op::I2S,
];

fn is_copy_through(opcode: u8) -> bool {
    COPY_THROUGH_OPS.contains(&opcode)
}

/// Fold the LUB of the inputs' colorings.
fn fold_inputs(colors: &Coloring, inputs: &[NodeId]) -> Option<ColoredObject> {
    let mut folded: Option<ColoredObject> = None;
    for input in inputs {
        folded = ColoredObject::merge_lub(folded.as_ref(), colors.get(*input));
    }
    folded
}

/// Initial: paints rule-declared colors onto the analyzed method's own
/// parameter and result nodes.
pub struct MethodParameterImplicitColorer;

impl Brush for MethodParameterImplicitColorer {
    fn name(&self) -> &'static str {
        "method-parameter-implicit"
    }

    fn paint(
        &self,
        graph: &MethodDataGraph,
        colors: &mut Coloring,
        ctx: &mut BrushContext<'_, '_>,
    ) -> bool {
        let method = &graph.method;
        let Some(rules) =
            ctx.rules
                .method_rules(&method.class_name, &method.name, &method.descriptor)
        else {
            return false;
        };
        let mut changed = false;
        for (index, node) in graph.parameters.iter().enumerate() {
            let Some(kind) = rules.param_colors.get(index).copied().flatten() else {
                continue;
            };
            let class = graph.node(*node).ty.class_key();
            let trace = TraceItem::root(format!(
                "declared {} on parameter {} of {}",
                kind,
                index,
                method.long_name()
            ));
            let coloring = ColoredObject::for_root(&class, PaintedColor::explicit(kind, trace));
            changed |= colors.merge_most_dangerous(*node, &coloring, ctx.on_intersection);
        }
        if let Some(kind) = rules.result_color {
            for node in &graph.results {
                let class = graph.node(*node).ty.class_key();
                let trace = TraceItem::root(format!(
                    "declared {} on result of {}",
                    kind,
                    method.long_name()
                ));
                let coloring = ColoredObject::for_root(&class, PaintedColor::explicit(kind, trace));
                changed |= colors.merge_most_dangerous(*node, &coloring, ctx.on_intersection);
            }
        }
        changed
    }
}

/// Initial: paints rule-declared colors onto call-site argument/result nodes
/// and onto field-read nodes.
pub struct InvocationsImplicitColorer;

impl Brush for InvocationsImplicitColorer {
    fn name(&self) -> &'static str {
        "invocations-implicit"
    }

    fn paint(
        &self,
        graph: &MethodDataGraph,
        colors: &mut Coloring,
        ctx: &mut BrushContext<'_, '_>,
    ) -> bool {
        let mut changed = false;
        for inv in &graph.invocations {
            let Some(rules) =
                ctx.rules
                    .method_rules(&inv.class_name, &inv.method_name, &inv.descriptor)
            else {
                continue;
            };
            for (index, node) in inv.parameters.iter().enumerate() {
                let Some(kind) = rules.param_colors.get(index).copied().flatten() else {
                    continue;
                };
                let class = graph.node(*node).ty.class_key();
                let trace = TraceItem::root(format!(
                    "declared {} on parameter {} of {}.{} call",
                    kind, index, inv.class_name, inv.method_name
                ));
                let coloring = ColoredObject::for_root(&class, PaintedColor::explicit(kind, trace));
                changed |= colors.merge_most_dangerous(*node, &coloring, ctx.on_intersection);
            }
            if let (Some(kind), Some(node)) = (rules.result_color, inv.result) {
                let class = graph.node(node).ty.class_key();
                let trace = TraceItem::root(format!(
                    "declared {} on result of {}.{} call",
                    kind, inv.class_name, inv.method_name
                ));
                let coloring = ColoredObject::for_root(&class, PaintedColor::explicit(kind, trace));
                changed |= colors.merge_most_dangerous(node, &coloring, ctx.on_intersection);
            }
        }
        for (id, node) in graph.nodes() {
            let field = match &node.kind {
                NodeKind::GetField { field } | NodeKind::GetStatic { field } => field,
                _ => continue,
            };
            let Some(kind) = ctx.rules.field_rules(&field.class_name, &field.name) else {
                continue;
            };
            let class = node.ty.class_key();
            let trace = TraceItem::root(format!("declared {} on field {}", kind, field));
            let coloring = ColoredObject::for_root(&class, PaintedColor::explicit(kind, trace));
            changed |= colors.merge_most_dangerous(id, &coloring, ctx.on_intersection);
        }
        changed
    }
}

/// Repeatable: nodes composing several inputs (arithmetic, array loads,
/// merges) take the LUB of their inputs, downgraded to inferred.
pub struct CompositionNodeBrush;

impl Brush for CompositionNodeBrush {
    fn name(&self) -> &'static str {
        "composition"
    }

    fn paint(
        &self,
        graph: &MethodDataGraph,
        colors: &mut Coloring,
        ctx: &mut BrushContext<'_, '_>,
    ) -> bool {
        let mut changed = false;
        for (id, node) in graph.nodes() {
            let composes = match &node.kind {
                NodeKind::Merge => !node.inputs.is_empty(),
                NodeKind::Operation { opcode } => {
                    !node.inputs.is_empty() && !is_copy_through(*opcode)
                }
                _ => false,
            };
            if !composes {
                continue;
            }
            let Some(folded) = fold_inputs(colors, &node.inputs) else {
                continue;
            };
            let stepped = folded.downgraded(&format!("flows through {}", node.label));
            changed |= colors.merge_most_dangerous(id, &stepped, ctx.on_intersection);
        }
        changed
    }
}

/// Repeatable: identity pass-throughs (checkcast, widening conversions) copy
/// their input coloring unchanged.
pub struct CopierBrush;

impl Brush for CopierBrush {
    fn name(&self) -> &'static str {
        "copier"
    }

    fn paint(
        &self,
        graph: &MethodDataGraph,
        colors: &mut Coloring,
        ctx: &mut BrushContext<'_, '_>,
    ) -> bool {
        let mut changed = false;
        for (id, node) in graph.nodes() {
            let NodeKind::Operation { opcode } = &node.kind else {
                continue;
            };
            if !is_copy_through(*opcode) || node.inputs.len() != 1 {
                continue;
            }
            let Some(incoming) = colors.get(node.inputs[0]).cloned() else {
                continue;
            };
            changed |= colors.merge_most_dangerous(id, &incoming, ctx.on_intersection);
        }
        changed
    }
}

/// Repeatable: a colored field read (or written value) files its color
/// under the parent object's field path.
pub struct ParentAttributesDefinerBrush;

impl Brush for ParentAttributesDefinerBrush {
    fn name(&self) -> &'static str {
        "parent-attributes"
    }

    fn paint(
        &self,
        graph: &MethodDataGraph,
        colors: &mut Coloring,
        _ctx: &mut BrushContext<'_, '_>,
    ) -> bool {
        let mut changed = false;
        for (id, node) in graph.nodes() {
            let NodeKind::GetField { field } = &node.kind else {
                continue;
            };
            let (Some(coloring), Some(parent)) =
                (colors.get(id).cloned(), node.inputs.first().copied())
            else {
                continue;
            };
            let wrapped = ColoredObject::with_field(&field.name, coloring);
            changed |= colors.merge_lub(parent, &wrapped);
        }
        for put in &graph.put_fields {
            let Some(coloring) = colors.get(put.value).cloned() else {
                continue;
            };
            let wrapped = ColoredObject::with_field(&put.field.name, coloring);
            changed |= colors.merge_lub(put.target, &wrapped);
        }
        changed
    }
}

/// Repeatable: every call site asks the painting session for the callee's
/// cached colorings and merges them back into the local nodes.
pub struct InvocationsBrush;

impl Brush for InvocationsBrush {
    fn name(&self) -> &'static str {
        "invocations"
    }

    fn paint(
        &self,
        graph: &MethodDataGraph,
        colors: &mut Coloring,
        ctx: &mut BrushContext<'_, '_>,
    ) -> bool {
        let mut changed = false;
        for inv in &graph.invocations {
            let ins = colors.snapshot(&inv.parameters);
            let outs: Vec<Option<ColoredObject>> = match inv.result {
                Some(result) => vec![colors.get(result).cloned()],
                None => Vec::new(),
            };
            let updates = (ctx.resolve_callee)(inv, &ins, &outs);
            for (node, coloring) in updates {
                changed |= colors.merge_most_dangerous(node, &coloring, ctx.on_intersection);
            }
        }
        changed
    }
}

/// Repeatable: invokedynamic results have no resolvable callee; the LUB of
/// the arguments flows into the result.
pub struct InvokeDynamicBrush;

impl Brush for InvokeDynamicBrush {
    fn name(&self) -> &'static str {
        "invokedynamic"
    }

    fn paint(
        &self,
        graph: &MethodDataGraph,
        colors: &mut Coloring,
        ctx: &mut BrushContext<'_, '_>,
    ) -> bool {
        let mut changed = false;
        for (id, node) in graph.nodes() {
            if !matches!(node.kind, NodeKind::InvokeDynamic { .. }) || node.inputs.is_empty() {
                continue;
            }
            let Some(folded) = fold_inputs(colors, &node.inputs) else {
                continue;
            };
            let stepped = folded.downgraded(&format!("flows through {}", node.label));
            changed |= colors.merge_most_dangerous(id, &stepped, ctx.on_intersection);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_through_set() {
        assert!(is_copy_through(op::CHECKCAST));
        assert!(is_copy_through(op::I2L));
        assert!(!is_copy_through(op::IADD));
        assert!(!is_copy_through(op::ARRAYLENGTH));
    }
}
