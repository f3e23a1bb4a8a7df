// Colorless graph building: the symbolic interpreter that abstracts
// bytecode into per-method data-flow graphs, before any taint is painted.

pub mod domain;
pub mod infrastructure;

pub use domain::{
    BlockDataGraph, DataNode, Invocation, MethodDataGraph, NodeArena, NodeId, NodeKind,
    PutFieldRecord, PutStaticRecord,
};
pub use infrastructure::{BlockGraphBuilder, MethodGraphBuilder};
