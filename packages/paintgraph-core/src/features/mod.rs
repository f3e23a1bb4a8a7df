// Analysis layers, leaves first: colorless graphs → color model → session.

pub mod colored;
pub mod colorless;
pub mod session;
