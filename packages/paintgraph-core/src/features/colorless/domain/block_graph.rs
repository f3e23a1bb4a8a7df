/*
 * Per-Block Graph Artifacts
 *
 * What one pass of the symbolic interpreter produces for a basic block:
 * the nodes it touched, entry/exit stack and locals, and the side-effect
 * records (calls, field writes) discovered along the way.
 */

use std::collections::VecDeque;

use crate::features::colorless::domain::data_node::NodeId;
use crate::shared::models::FieldRef;

/// Record of one call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Dotted declared receiver class
    pub class_name: String,
    pub method_name: String,
    pub descriptor: String,
    /// Argument nodes; receiver first for non-static calls
    pub parameters: Vec<NodeId>,
    /// Result node, absent for void targets
    pub result: Option<NodeId>,
    pub static_call: bool,
}

/// Record of a `putfield`: value written into `target.field`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutFieldRecord {
    pub field: FieldRef,
    pub target: NodeId,
    pub value: NodeId,
}

/// Record of a `putstatic`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutStaticRecord {
    pub field: FieldRef,
    pub value: NodeId,
}

/// Data graph of a single basic block.
#[derive(Debug, Clone, Default)]
pub struct BlockDataGraph {
    /// Every node observed while interpreting the block, in first-seen order
    pub nodes: Vec<NodeId>,
    /// Entry local-variable nodes by slot (None = unassigned or wide filler)
    pub inc_locals: Vec<Option<NodeId>>,
    /// Entry operand stack, top at the front
    pub inc_stack: VecDeque<NodeId>,
    /// Exit local-variable nodes by slot
    pub out_locals: Vec<Option<NodeId>>,
    /// Exit operand stack, top at the front
    pub out_stack: VecDeque<NodeId>,
    pub invocations: Vec<Invocation>,
    pub put_fields: Vec<PutFieldRecord>,
    pub put_statics: Vec<PutStaticRecord>,
    /// Value returned if the block ends with a value-return
    pub returned: Option<NodeId>,
}
