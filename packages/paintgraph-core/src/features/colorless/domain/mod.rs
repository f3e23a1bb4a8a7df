pub mod block_graph;
pub mod data_node;
pub mod method_graph;

pub use block_graph::{BlockDataGraph, Invocation, PutFieldRecord, PutStaticRecord};
pub use data_node::{DataNode, NodeArena, NodeId, NodeKind, FLYWEIGHT_COUNT};
pub use method_graph::MethodDataGraph;
