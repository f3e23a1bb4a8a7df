/*
 * Method Data Graph
 *
 * The union of a method's block graphs plus the merge nodes stitched
 * between them. Owns the node arena; immutable once built, shared across
 * coloring passes via Arc. Colorings never live here — they are a separate
 * node-keyed map owned by whichever task is painting.
 */

use crate::features::colorless::domain::block_graph::{
    BlockDataGraph, Invocation, PutFieldRecord, PutStaticRecord,
};
use crate::features::colorless::domain::data_node::{DataNode, NodeArena, NodeId};
use crate::shared::models::MethodRef;

/// Complete colorless data-flow graph of one method.
#[derive(Debug, Clone)]
pub struct MethodDataGraph {
    pub method: MethodRef,
    arena: NodeArena,
    /// Per-block graphs, indexed like the control flow's block list.
    /// Unreachable blocks stay empty.
    pub blocks: Vec<BlockDataGraph>,
    /// Formal boundary: parameter nodes, receiver first for instance methods
    pub parameters: Vec<NodeId>,
    /// Return nodes, one per value-returning exit block
    pub results: Vec<NodeId>,
    /// Whether the descriptor declares a non-void return
    pub returns_value: bool,
    /// All call sites, aggregated over the blocks
    pub invocations: Vec<Invocation>,
    pub put_fields: Vec<PutFieldRecord>,
    pub put_statics: Vec<PutStaticRecord>,
}

impl MethodDataGraph {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        method: MethodRef,
        arena: NodeArena,
        blocks: Vec<BlockDataGraph>,
        parameters: Vec<NodeId>,
        results: Vec<NodeId>,
        returns_value: bool,
        invocations: Vec<Invocation>,
        put_fields: Vec<PutFieldRecord>,
        put_statics: Vec<PutStaticRecord>,
    ) -> Self {
        Self {
            method,
            arena,
            blocks,
            parameters,
            results,
            returns_value,
            invocations,
            put_fields,
            put_statics,
        }
    }

    pub fn node(&self, id: NodeId) -> &DataNode {
        self.arena.node(id)
    }

    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &DataNode)> {
        self.arena.iter()
    }
}
