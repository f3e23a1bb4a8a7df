/*
 * Graph Colorer
 *
 * Runs the brush pipeline over one method graph: seed the boundary nodes
 * from the caller-supplied colorings, apply each initial brush once, then
 * repeat the repeatable brushes in fixed order until a full pass changes
 * nothing. A hard pass cap guards against a non-monotone brush; hitting it
 * logs a warning and returns the last state.
 */

use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

use crate::errors::Result;
use crate::features::colored::domain::{ColoredObject, Coloring};
use crate::features::colored::infrastructure::brushes::{
    Brush, BrushContext, CalleeResolver, CompositionNodeBrush, CopierBrush,
    IntersectionCallback, InvocationsBrush, InvocationsImplicitColorer, InvokeDynamicBrush,
    MethodParameterImplicitColorer, ParentAttributesDefinerBrush,
};
use crate::features::colored::ports::RuleProvider;
use crate::features::colorless::domain::MethodDataGraph;
use crate::features::colorless::infrastructure::MethodGraphBuilder;
use crate::shared::models::MethodRef;
use crate::shared::ports::ClassResolver;

/// Hard cap on repeatable-brush passes over one graph.
pub const MAX_BRUSH_PASSES: usize = 64;

/// Final boundary colorings of one coloring run: (parameters, results).
pub type BoundaryColors = (Vec<Option<ColoredObject>>, Vec<Option<ColoredObject>>);

/// Applies brushes over method graphs, caching built graphs per method.
pub struct GraphColorer<'a> {
    resolver: &'a dyn ClassResolver,
    rules: &'a dyn RuleProvider,
    graphs: DashMap<MethodRef, Arc<MethodDataGraph>>,
    initial: Vec<Box<dyn Brush>>,
    repeatable: Vec<Box<dyn Brush>>,
}

impl<'a> GraphColorer<'a> {
    pub fn new(resolver: &'a dyn ClassResolver, rules: &'a dyn RuleProvider) -> Self {
        Self {
            resolver,
            rules,
            graphs: DashMap::new(),
            initial: vec![
                Box::new(MethodParameterImplicitColorer),
                Box::new(InvocationsImplicitColorer),
            ],
            repeatable: vec![
                Box::new(CopierBrush),
                Box::new(CompositionNodeBrush),
                Box::new(ParentAttributesDefinerBrush),
                Box::new(InvokeDynamicBrush),
                Box::new(InvocationsBrush),
            ],
        }
    }

    /// Build (or fetch the cached) colorless graph of a method.
    /// `Ok(None)` when the method has no body.
    pub fn graph_of(&self, method: &MethodRef) -> Result<Option<Arc<MethodDataGraph>>> {
        if let Some(graph) = self.graphs.get(method) {
            return Ok(Some(graph.clone()));
        }
        let Some(body) = self.resolver.method_body(method)? else {
            return Ok(None);
        };
        let graph = Arc::new(MethodGraphBuilder::new(self.resolver).build(&body)?);
        self.graphs.insert(method.clone(), graph.clone());
        Ok(Some(graph))
    }

    /// Color one method. `ins`/`outs` seed the parameter and result nodes;
    /// the returned pair is their final colorings (receiver-inclusive).
    pub fn color(
        &self,
        method: &MethodRef,
        ins: &[Option<ColoredObject>],
        outs: &[Option<ColoredObject>],
        resolve_callee: &mut CalleeResolver<'_>,
        on_intersection: &mut IntersectionCallback<'_>,
    ) -> Result<Option<BoundaryColors>> {
        let Some(graph) = self.graph_of(method)? else {
            return Ok(None);
        };

        let mut colors = Coloring::new();
        for (node, coloring) in graph.parameters.iter().zip(ins.iter()) {
            if let Some(coloring) = coloring {
                colors.merge_lub(*node, coloring);
            }
        }
        if let Some(Some(coloring)) = outs.first() {
            for node in &graph.results {
                colors.merge_lub(*node, coloring);
            }
        }

        let mut ctx = BrushContext {
            rules: self.rules,
            resolve_callee,
            on_intersection,
        };
        for brush in &self.initial {
            brush.paint(&graph, &mut colors, &mut ctx);
        }

        let mut converged = false;
        for _pass in 0..MAX_BRUSH_PASSES {
            let mut changed = false;
            for brush in &self.repeatable {
                changed |= brush.paint(&graph, &mut colors, &mut ctx);
            }
            if !changed {
                converged = true;
                break;
            }
        }
        if !converged {
            warn!(
                method = %method.long_name(),
                passes = MAX_BRUSH_PASSES,
                "brush fixpoint did not converge; returning last state"
            );
        }

        let result_ins = colors.snapshot(&graph.parameters);
        let result_outs = if graph.returns_value {
            let mut folded: Option<ColoredObject> = None;
            for node in &graph.results {
                folded = ColoredObject::merge_lub(folded.as_ref(), colors.get(*node));
            }
            vec![folded]
        } else {
            Vec::new()
        };
        Ok(Some((result_ins, result_outs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::colored::domain::{ColorKind, PaintedColor, TraceItem};
    use crate::testkit::{kinds, ClassBuilder, FixtureResolver, MethodAsm, RuleSet};
    use rustc_hash::FxHashMap;

    fn no_callee() -> impl FnMut(
        &crate::features::colorless::domain::Invocation,
        &[Option<ColoredObject>],
        &[Option<ColoredObject>],
    ) -> FxHashMap<crate::features::colorless::domain::NodeId, ColoredObject> {
        |_, _, _| FxHashMap::default()
    }

    fn source_string() -> ColoredObject {
        ColoredObject::for_root(
            "java.lang.String",
            PaintedColor::explicit(ColorKind::SourceData, TraceItem::root("test source")),
        )
    }

    #[test]
    fn test_identity_method_passes_color_through() {
        let mut resolver = FixtureResolver::new();
        resolver
            .add_class(ClassBuilder::new("demo.Id").method(
                MethodAsm::new_static("identity", "(Ljava/lang/String;)Ljava/lang/String;")
                    .aload(0)
                    .areturn(),
            ))
            .unwrap();
        let rules = RuleSet::new();
        let colorer = GraphColorer::new(&resolver, &rules);
        let method = resolver.method_ref("demo.Id", "identity").unwrap();

        let ins = vec![Some(source_string())];
        let mut resolve = no_callee();
        let mut on_int = |_: &TraceItem, _: &TraceItem| panic!("no intersection expected");
        let (final_ins, final_outs) = colorer
            .color(&method, &ins, &[], &mut resolve, &mut on_int)
            .unwrap()
            .unwrap();
        assert_eq!(kinds(&final_ins), vec![Some(ColorKind::SourceData)]);
        assert_eq!(kinds(&final_outs), vec![Some(ColorKind::SourceData)]);
    }

    #[test]
    fn test_uncolored_identity_stays_uncolored() {
        let mut resolver = FixtureResolver::new();
        resolver
            .add_class(ClassBuilder::new("demo.Id").method(
                MethodAsm::new_static("identity", "(Ljava/lang/String;)Ljava/lang/String;")
                    .aload(0)
                    .areturn(),
            ))
            .unwrap();
        let rules = RuleSet::new();
        let colorer = GraphColorer::new(&resolver, &rules);
        let method = resolver.method_ref("demo.Id", "identity").unwrap();

        let mut resolve = no_callee();
        let mut on_int = |_: &TraceItem, _: &TraceItem| panic!("no intersection expected");
        let (final_ins, final_outs) = colorer
            .color(&method, &[None], &[], &mut resolve, &mut on_int)
            .unwrap()
            .unwrap();
        assert_eq!(kinds(&final_ins), vec![None]);
        assert_eq!(kinds(&final_outs), vec![None]);
    }

    #[test]
    fn test_composition_downgrades_confidence() {
        // static int add(int a, int b) { return a + b; }
        let mut resolver = FixtureResolver::new();
        resolver
            .add_class(ClassBuilder::new("demo.Math").method(
                MethodAsm::new_static("add", "(II)I")
                    .iload(0)
                    .iload(1)
                    .op(crate::shared::models::opcode::IADD)
                    .ireturn(),
            ))
            .unwrap();
        let mut rules = RuleSet::new();
        rules.color_parameter("demo.Math", "add", 0, ColorKind::SourceData);
        let colorer = GraphColorer::new(&resolver, &rules);
        let method = resolver.method_ref("demo.Math", "add").unwrap();

        let mut resolve = no_callee();
        let mut on_int = |_: &TraceItem, _: &TraceItem| panic!("no intersection expected");
        let (_, final_outs) = colorer
            .color(&method, &[None, None], &[], &mut resolve, &mut on_int)
            .unwrap()
            .unwrap();
        let out = final_outs[0].as_ref().unwrap();
        let color = out.dominant_color().unwrap();
        assert_eq!(color.kind, ColorKind::SourceData);
        assert_eq!(
            color.confidence,
            crate::features::colored::domain::Confidence::Inferred
        );
        // provenance chain reaches back to the declaration
        assert!(color.trace.chain().len() >= 2);
    }

    #[test]
    fn test_empty_method_colors_to_none() {
        let mut resolver = FixtureResolver::new();
        resolver
            .add_class(
                ClassBuilder::new("demo.Db")
                    .abstract_method("execute", "(Ljava/lang/String;)V", false),
            )
            .unwrap();
        let rules = RuleSet::new();
        let colorer = GraphColorer::new(&resolver, &rules);
        let method = resolver.method_ref("demo.Db", "execute").unwrap();

        let mut resolve = no_callee();
        let mut on_int = |_: &TraceItem, _: &TraceItem| {};
        assert!(colorer
            .color(&method, &[], &[], &mut resolve, &mut on_int)
            .unwrap()
            .is_none());
    }
}
