// Color model and brushes: taint labels, their merge lattice, and the
// fixpoint passes that spread them over a colorless graph.

pub mod domain;
pub mod infrastructure;
pub mod ports;

pub use domain::{ColorKind, ColoredObject, Coloring, Confidence, PaintedColor, TraceItem};
pub use infrastructure::{BoundaryColors, GraphColorer};
pub use ports::{MethodColorRules, RuleProvider};
