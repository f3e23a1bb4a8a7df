pub mod brushes;
pub mod graph_colorer;

pub use brushes::{Brush, BrushContext, CalleeResolver, IntersectionCallback};
pub use graph_colorer::{BoundaryColors, GraphColorer, MAX_BRUSH_PASSES};
