/*
 * Node Coloring Map
 *
 * The mutable coloring state of one painting pass: data-flow node →
 * ColoredObject. Owned by the task currently executing; the graph itself
 * stays untouched. Merge helpers report whether anything changed, which is
 * what the brush fixpoint loop runs on.
 */

use rustc_hash::FxHashMap;

use crate::features::colored::domain::colored_object::{ColoredObject, IntersectionSink};
use crate::features::colorless::domain::NodeId;

/// Colors painted over one method graph.
#[derive(Debug, Clone, Default)]
pub struct Coloring {
    map: FxHashMap<NodeId, ColoredObject>,
}

impl Coloring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: NodeId) -> Option<&ColoredObject> {
        self.map.get(&id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// LUB-merge `incoming` into the node's coloring; true if it changed.
    pub fn merge_lub(&mut self, id: NodeId, incoming: &ColoredObject) -> bool {
        let merged = ColoredObject::merge_lub(self.map.get(&id), Some(incoming))
            .expect("merge of a present coloring is present");
        self.store_if_changed(id, merged)
    }

    /// Dangerous-merge `incoming` into the node's coloring, firing the
    /// intersection callback when a source meets a sink; true if changed.
    pub fn merge_most_dangerous(
        &mut self,
        id: NodeId,
        incoming: &ColoredObject,
        on_intersection: &mut IntersectionSink<'_>,
    ) -> bool {
        let merged =
            ColoredObject::merge_most_dangerous(self.map.get(&id), Some(incoming), on_intersection)
                .expect("merge of a present coloring is present");
        self.store_if_changed(id, merged)
    }

    /// Current colorings of an ordered node list (parameters, results).
    pub fn snapshot(&self, ids: &[NodeId]) -> Vec<Option<ColoredObject>> {
        ids.iter().map(|id| self.map.get(id).cloned()).collect()
    }

    fn store_if_changed(&mut self, id: NodeId, merged: ColoredObject) -> bool {
        if merged.is_empty() {
            return false;
        }
        match self.map.get(&id) {
            Some(existing) if *existing == merged => false,
            _ => {
                self.map.insert(id, merged);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::colored::domain::color::{ColorKind, PaintedColor, TraceItem};

    fn source() -> ColoredObject {
        ColoredObject::for_root(
            "java.lang.String",
            PaintedColor::explicit(ColorKind::SourceData, TraceItem::root("test source")),
        )
    }

    #[test]
    fn test_merge_reports_change_once() {
        let mut colors = Coloring::new();
        let id = NodeId(11);
        assert!(colors.merge_lub(id, &source()));
        // idempotent on the second application
        assert!(!colors.merge_lub(id, &source()));
        assert_eq!(colors.len(), 1);
    }

    #[test]
    fn test_snapshot_preserves_order_and_gaps() {
        let mut colors = Coloring::new();
        colors.merge_lub(NodeId(2), &source());
        let snap = colors.snapshot(&[NodeId(1), NodeId(2)]);
        assert!(snap[0].is_none());
        assert!(snap[1].is_some());
    }
}
