/*
 * Colored Objects
 *
 * A node's coloring: one painted color per runtime class observed at the
 * node, plus nested colorings for fields reached from it. Two merge flavors:
 *
 * - `merge_lub`: plain least-upper-bound; higher confidence wins per key.
 * - `merge_most_dangerous`: like the LUB, but a source-like color meeting a
 *   sink-like color at the same key is a detected flow — the intersection
 *   callback fires with both traces and the more explicitly declared color
 *   survives (source wins ties).
 *
 * They are not interchangeable; joining cached callee results uses the
 * dangerous flavor, structural folds use the plain one.
 */

use std::collections::BTreeMap;

use crate::features::colored::domain::color::{ColorKind, PaintedColor, TraceItem};

/// Callback invoked when a source-like and a sink-like color land on the
/// same key.
pub type IntersectionSink<'s> = dyn FnMut(&TraceItem, &TraceItem) + 's;

/// Coloring of one abstract value.
///
/// BTreeMaps keep iteration order canonical, which task-key summaries and
/// equality checks rely on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColoredObject {
    colors: BTreeMap<String, PaintedColor>,
    fields: BTreeMap<String, ColoredObject>,
}

impl ColoredObject {
    /// Coloring with a single class key and no field detail.
    pub fn for_root(class: &str, color: PaintedColor) -> Self {
        let mut colors = BTreeMap::new();
        colors.insert(class.to_string(), color);
        Self {
            colors,
            fields: BTreeMap::new(),
        }
    }

    /// Coloring that says nothing about the value itself but colors one of
    /// its fields.
    pub fn with_field(field: &str, coloring: ColoredObject) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), coloring);
        Self {
            colors: BTreeMap::new(),
            fields,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty() && self.fields.is_empty()
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.colors.keys().map(String::as_str)
    }

    pub fn class_count(&self) -> usize {
        self.colors.len()
    }

    pub fn color_of(&self, class: &str) -> Option<&PaintedColor> {
        self.colors.get(class)
    }

    pub fn field(&self, name: &str) -> Option<&ColoredObject> {
        self.fields.get(name)
    }

    /// Most authoritative color across the observed classes: highest
    /// confidence first, source-like before sink-like on ties.
    pub fn dominant_color(&self) -> Option<&PaintedColor> {
        self.colors
            .values()
            .max_by_key(|c| (c.confidence, c.kind.is_source_like()))
    }

    /// Projection onto a single observed class, keeping field detail.
    pub fn with_single_class(&self, class: &str) -> ColoredObject {
        let mut colors = BTreeMap::new();
        if let Some(color) = self.colors.get(class) {
            colors.insert(class.to_string(), color.clone());
        }
        Self {
            colors,
            fields: self.fields.clone(),
        }
    }

    /// Per-key summary of (class, kind), used by task keys.
    pub fn kind_summary(&self) -> BTreeMap<String, ColorKind> {
        self.colors
            .iter()
            .map(|(class, color)| (class.clone(), color.kind))
            .collect()
    }

    /// One propagation step later: every color downgraded to inferred with
    /// the trace extended by `step`.
    pub fn downgraded(&self, step: &str) -> ColoredObject {
        Self {
            colors: self
                .colors
                .iter()
                .map(|(class, color)| (class.clone(), color.downgraded(step)))
                .collect(),
            fields: self
                .fields
                .iter()
                .map(|(name, co)| (name.clone(), co.downgraded(step)))
                .collect(),
        }
    }

    fn pick_lub<'c>(a: &'c PaintedColor, b: &'c PaintedColor) -> &'c PaintedColor {
        if b.confidence > a.confidence {
            b
        } else {
            a
        }
    }

    /// Least upper bound of two optional colorings.
    pub fn merge_lub(a: Option<&ColoredObject>, b: Option<&ColoredObject>) -> Option<ColoredObject> {
        match (a, b) {
            (None, None) => None,
            (Some(x), None) | (None, Some(x)) => Some(x.clone()),
            (Some(x), Some(y)) => {
                let mut colors = x.colors.clone();
                for (class, color) in &y.colors {
                    colors
                        .entry(class.clone())
                        .and_modify(|existing| *existing = Self::pick_lub(existing, color).clone())
                        .or_insert_with(|| color.clone());
                }
                let mut fields = x.fields.clone();
                for (name, co) in &y.fields {
                    let merged = Self::merge_lub(fields.get(name), Some(co))
                        .expect("merge of a present coloring is present");
                    fields.insert(name.clone(), merged);
                }
                Some(ColoredObject { colors, fields })
            }
        }
    }

    /// Merge that also detects source/sink intersections per key.
    pub fn merge_most_dangerous(
        a: Option<&ColoredObject>,
        b: Option<&ColoredObject>,
        on_intersection: &mut IntersectionSink<'_>,
    ) -> Option<ColoredObject> {
        match (a, b) {
            (None, None) => None,
            (Some(x), None) | (None, Some(x)) => Some(x.clone()),
            (Some(x), Some(y)) => {
                let mut colors = x.colors.clone();
                for (class, incoming) in &y.colors {
                    match colors.get(class) {
                        None => {
                            colors.insert(class.clone(), incoming.clone());
                        }
                        Some(existing) => {
                            let winner = if existing.kind.is_source_like()
                                == incoming.kind.is_source_like()
                            {
                                Self::pick_lub(existing, incoming).clone()
                            } else {
                                let (source, sink) = if existing.kind.is_source_like() {
                                    (existing, incoming)
                                } else {
                                    (incoming, existing)
                                };
                                on_intersection(&source.trace, &sink.trace);
                                if source.confidence >= sink.confidence {
                                    source.clone()
                                } else {
                                    sink.clone()
                                }
                            };
                            colors.insert(class.clone(), winner);
                        }
                    }
                }
                let mut fields = x.fields.clone();
                for (name, co) in &y.fields {
                    let merged =
                        Self::merge_most_dangerous(fields.get(name), Some(co), on_intersection)
                            .expect("merge of a present coloring is present");
                    fields.insert(name.clone(), merged);
                }
                Some(ColoredObject { colors, fields })
            }
        }
    }

    /// Visit every combination of "one class per input" drawn from each
    /// input's observed-class set. Inputs without colors pass through
    /// untouched. Used so interprocedural queries can consider one concrete
    /// receiver class at a time.
    pub fn demultiplex(
        ins: &[Option<ColoredObject>],
        visit: &mut dyn FnMut(&[Option<ColoredObject>]),
    ) {
        let mut current: Vec<Option<ColoredObject>> = ins.to_vec();
        Self::demultiplex_from(ins, &mut current, 0, visit);
    }

    fn demultiplex_from(
        ins: &[Option<ColoredObject>],
        current: &mut Vec<Option<ColoredObject>>,
        position: usize,
        visit: &mut dyn FnMut(&[Option<ColoredObject>]),
    ) {
        if position == ins.len() {
            visit(current);
            return;
        }
        match &ins[position] {
            Some(co) if co.class_count() > 1 => {
                let classes: Vec<String> = co.classes().map(str::to_string).collect();
                for class in classes {
                    current[position] = Some(co.with_single_class(&class));
                    Self::demultiplex_from(ins, current, position + 1, visit);
                }
                current[position] = Some(co.clone());
            }
            _ => Self::demultiplex_from(ins, current, position + 1, visit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::colored::domain::color::Confidence;

    fn source(class: &str) -> ColoredObject {
        ColoredObject::for_root(
            class,
            PaintedColor::explicit(ColorKind::SourceData, TraceItem::root("test source")),
        )
    }

    fn sink(class: &str) -> ColoredObject {
        ColoredObject::for_root(
            class,
            PaintedColor::explicit(ColorKind::SinkTarget, TraceItem::root("test sink")),
        )
    }

    #[test]
    fn test_merge_lub_prefers_confidence() {
        let explicit = source("java.lang.String");
        let inferred = ColoredObject::for_root(
            "java.lang.String",
            PaintedColor::inferred(ColorKind::SinkTarget, TraceItem::root("guess")),
        );
        let merged = ColoredObject::merge_lub(Some(&inferred), Some(&explicit)).unwrap();
        let color = merged.color_of("java.lang.String").unwrap();
        assert_eq!(color.kind, ColorKind::SourceData);
        assert_eq!(color.confidence, Confidence::Explicitly);
    }

    #[test]
    fn test_merge_lub_unions_distinct_classes() {
        let a = source("java.lang.String");
        let b = sink("java.lang.StringBuilder");
        let merged = ColoredObject::merge_lub(Some(&a), Some(&b)).unwrap();
        assert_eq!(merged.class_count(), 2);
    }

    #[test]
    fn test_merge_lub_with_absent_side() {
        let a = source("java.lang.String");
        assert_eq!(ColoredObject::merge_lub(Some(&a), None), Some(a.clone()));
        assert_eq!(ColoredObject::merge_lub(None, None), None);
    }

    #[test]
    fn test_merge_most_dangerous_fires_intersection() {
        let a = source("java.lang.String");
        let b = sink("java.lang.String");
        let mut fired = Vec::new();
        let merged = ColoredObject::merge_most_dangerous(
            Some(&a),
            Some(&b),
            &mut |src: &TraceItem, snk: &TraceItem| {
                fired.push((src.describe().to_string(), snk.describe().to_string()));
            },
        )
        .unwrap();
        assert_eq!(fired, vec![("test source".to_string(), "test sink".to_string())]);
        // source wins the tie between two explicit declarations
        assert_eq!(
            merged.color_of("java.lang.String").unwrap().kind,
            ColorKind::SourceData
        );
    }

    #[test]
    fn test_merge_most_dangerous_same_family_is_silent() {
        let a = source("java.lang.String");
        let b = ColoredObject::for_root(
            "java.lang.String",
            PaintedColor::inferred(ColorKind::SourceData, TraceItem::root("propagated")),
        );
        let mut fired = 0usize;
        let merged =
            ColoredObject::merge_most_dangerous(Some(&a), Some(&b), &mut |_, _| fired += 1)
                .unwrap();
        assert_eq!(fired, 0);
        assert_eq!(
            merged.color_of("java.lang.String").unwrap().confidence,
            Confidence::Explicitly
        );
    }

    #[test]
    fn test_field_colorings_merge_recursively() {
        let inner = source("java.lang.String");
        let a = ColoredObject::with_field("query", inner.clone());
        let b = ColoredObject::with_field("query", sink("java.lang.String"));
        let mut fired = 0usize;
        let merged =
            ColoredObject::merge_most_dangerous(Some(&a), Some(&b), &mut |_, _| fired += 1)
                .unwrap();
        assert_eq!(fired, 1);
        assert!(merged.field("query").is_some());
    }

    #[test]
    fn test_demultiplex_single_class_per_combination() {
        let mut multi = source("java.lang.String");
        multi = ColoredObject::merge_lub(Some(&multi), Some(&source("demo.Sub"))).unwrap();
        let ins = vec![Some(multi), None, Some(source("int"))];
        let mut seen = Vec::new();
        ColoredObject::demultiplex(&ins, &mut |combo| {
            assert!(combo[0].as_ref().unwrap().class_count() == 1);
            seen.push(combo[0].as_ref().unwrap().classes().next().unwrap().to_string());
        });
        seen.sort();
        assert_eq!(seen, vec!["demo.Sub".to_string(), "java.lang.String".to_string()]);
    }

    #[test]
    fn test_downgrade_recurses_into_fields() {
        let co = ColoredObject::with_field("query", source("java.lang.String"));
        let down = co.downgraded("through call");
        let field_color = down
            .field("query")
            .unwrap()
            .color_of("java.lang.String")
            .unwrap();
        assert_eq!(field_color.confidence, Confidence::Inferred);
    }
}
