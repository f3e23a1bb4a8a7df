// Shared models and ports used by every analysis layer.

pub mod models;
pub mod ports;
