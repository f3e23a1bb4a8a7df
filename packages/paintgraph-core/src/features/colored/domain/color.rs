/*
 * Color Model
 *
 * Taint labels attached to data-flow nodes. A `PaintedColor` carries the
 * color kind, how confidently it is known (declared by a rule vs inferred by
 * a brush), and a provenance trace. Two painted colors compare equal when
 * kind and confidence agree; trace identity is deliberately excluded so
 * fixpoint change detection is not defeated by fresh trace allocations.
 */

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Taint taxonomy. Extensible; every kind is either source-like or
/// sink-like, which is what the merge rules dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ColorKind {
    /// Attacker-controlled data (user input, request parameters)
    SourceData,
    /// Dangerous destination (command executors, query runners)
    SinkTarget,
}

impl ColorKind {
    pub fn is_source_like(&self) -> bool {
        matches!(self, ColorKind::SourceData)
    }

    pub fn is_sink_like(&self) -> bool {
        matches!(self, ColorKind::SinkTarget)
    }
}

impl fmt::Display for ColorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorKind::SourceData => write!(f, "source"),
            ColorKind::SinkTarget => write!(f, "sink"),
        }
    }
}

/// How a color became known. Ordered: an explicit rule outranks inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Confidence {
    Inferred,
    Explicitly,
}

/// One link in the provenance chain from a source or to a sink.
///
/// Cheap to clone; chains share their tails.
#[derive(Debug, Clone)]
pub struct TraceItem {
    inner: Arc<TraceNode>,
}

#[derive(Debug)]
struct TraceNode {
    description: String,
    previous: Option<TraceItem>,
}

impl TraceItem {
    /// Start a new chain.
    pub fn root(description: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TraceNode {
                description: description.into(),
                previous: None,
            }),
        }
    }

    /// Extend an existing chain.
    pub fn chained(description: impl Into<String>, previous: &TraceItem) -> Self {
        Self {
            inner: Arc::new(TraceNode {
                description: description.into(),
                previous: Some(previous.clone()),
            }),
        }
    }

    pub fn describe(&self) -> &str {
        &self.inner.description
    }

    pub fn previous(&self) -> Option<&TraceItem> {
        self.inner.previous.as_ref()
    }

    /// Full chain, most recent step first.
    pub fn chain(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut cursor = Some(self);
        while let Some(item) = cursor {
            out.push(item.describe());
            cursor = item.previous();
        }
        out
    }
}

/// A color as painted onto one node.
#[derive(Debug, Clone)]
pub struct PaintedColor {
    pub kind: ColorKind,
    pub confidence: Confidence,
    pub trace: TraceItem,
}

impl PaintedColor {
    /// Color declared by an external rule.
    pub fn explicit(kind: ColorKind, trace: TraceItem) -> Self {
        Self {
            kind,
            confidence: Confidence::Explicitly,
            trace,
        }
    }

    /// Color inferred by a brush.
    pub fn inferred(kind: ColorKind, trace: TraceItem) -> Self {
        Self {
            kind,
            confidence: Confidence::Inferred,
            trace,
        }
    }

    /// The same color one propagation step later: confidence drops to
    /// inferred and the trace grows a link.
    pub fn downgraded(&self, step: &str) -> Self {
        Self {
            kind: self.kind,
            confidence: Confidence::Inferred,
            trace: TraceItem::chained(step, &self.trace),
        }
    }
}

impl PartialEq for PaintedColor {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.confidence == other.confidence
    }
}

impl Eq for PaintedColor {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_ordering() {
        assert!(Confidence::Explicitly > Confidence::Inferred);
    }

    #[test]
    fn test_trace_chain() {
        let root = TraceItem::root("declared source on parameter 2");
        let step = TraceItem::chained("flows through iadd @4", &root);
        assert_eq!(
            step.chain(),
            vec!["flows through iadd @4", "declared source on parameter 2"]
        );
        assert_eq!(step.previous().unwrap().describe(), root.describe());
    }

    #[test]
    fn test_equality_ignores_trace_identity() {
        let a = PaintedColor::explicit(ColorKind::SourceData, TraceItem::root("a"));
        let b = PaintedColor::explicit(ColorKind::SourceData, TraceItem::root("b"));
        assert_eq!(a, b);
        let c = PaintedColor::inferred(ColorKind::SourceData, TraceItem::root("c"));
        assert_ne!(a, c);
    }

    #[test]
    fn test_downgrade() {
        let a = PaintedColor::explicit(ColorKind::SinkTarget, TraceItem::root("declared"));
        let d = a.downgraded("copied");
        assert_eq!(d.kind, ColorKind::SinkTarget);
        assert_eq!(d.confidence, Confidence::Inferred);
        assert_eq!(d.trace.chain(), vec!["copied", "declared"]);
    }
}
