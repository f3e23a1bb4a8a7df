pub mod executor;
pub mod painting_session;

pub use executor::PaintingExecutor;
pub use painting_session::{color_kinds, PaintingSession, MAX_TASK_EXECUTIONS};
