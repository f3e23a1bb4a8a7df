pub mod color;
pub mod colored_object;
pub mod coloring;

pub use color::{ColorKind, Confidence, PaintedColor, TraceItem};
pub use colored_object::{ColoredObject, IntersectionSink};
pub use coloring::Coloring;
