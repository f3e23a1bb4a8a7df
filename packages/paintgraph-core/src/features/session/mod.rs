// Painting session: the interprocedural worklist over painting tasks.

pub mod domain;
pub mod infrastructure;

pub use domain::{ColoringSummary, PaintingTask, TaskId, TaskKey, TaskResult};
pub use infrastructure::{color_kinds, PaintingExecutor, PaintingSession};
