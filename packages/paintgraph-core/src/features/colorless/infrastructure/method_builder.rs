/*
 * Inter-Block Stitching
 *
 * Builds the whole-method graph by running the block interpreter to a
 * fixpoint over the control-flow graph. Entry states are joined from
 * predecessor exits; where predecessors disagree on a slot, one merge node
 * per (block, slot) represents the union, with the least upper bound of the
 * input types. Back-edges make a predecessor's exit refine later, so blocks
 * requeue until entry states stabilize. Termination holds because the type
 * lattice has finite height and a slot that went to a merge node stays
 * merged.
 */

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use tracing::warn;

use crate::errors::{PaintError, Result};
use crate::features::colorless::domain::{
    BlockDataGraph, DataNode, MethodDataGraph, NodeArena, NodeId, NodeKind,
};
use crate::features::colorless::infrastructure::block_builder::BlockGraphBuilder;
use crate::shared::models::{parse_method_descriptor, AbstractType, MethodBody};
use crate::shared::ports::ClassResolver;

/// One joinable position at a block entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SlotKey {
    Local(usize),
    /// Stack position counted from the bottom
    Stack(usize),
}

type EntryState = (Vec<Option<NodeId>>, VecDeque<NodeId>);

/// Builds a `MethodDataGraph` for one method body.
pub struct MethodGraphBuilder<'a> {
    resolver: &'a dyn ClassResolver,
}

impl<'a> MethodGraphBuilder<'a> {
    pub fn new(resolver: &'a dyn ClassResolver) -> Self {
        Self { resolver }
    }

    pub fn build(&self, body: &MethodBody) -> Result<MethodDataGraph> {
        let descriptor = parse_method_descriptor(&body.method.descriptor)?;
        let block_count = body.control_flow.len();
        if block_count == 0 {
            return Err(PaintError::bad_bytecode(format!(
                "no basic blocks in {}",
                body.method.long_name()
            )));
        }

        let mut arena = NodeArena::new();

        // seed entry locals from the formal parameters; category-2 formals
        // occupy one node but two slots
        let mut parameters = Vec::new();
        let mut entry_locals: Vec<Option<NodeId>> = vec![None; body.max_locals];
        let mut slot = 0usize;
        if !body.is_static {
            let id = arena.alloc(DataNode::new(
                format!("parameter 0 ({})", body.method.class_name),
                NodeKind::Parameter { index: 0 },
                AbstractType::Reference(body.method.class_name.clone()),
            ));
            parameters.push(id);
            *entry_locals.get_mut(0).ok_or_else(|| {
                PaintError::bad_bytecode("max_locals smaller than parameter footprint")
            })? = Some(id);
            slot = 1;
        }
        for param in &descriptor.params {
            let index = parameters.len();
            let id = arena.alloc(DataNode::new(
                format!("parameter {} ({})", index, param.display_name()),
                NodeKind::Parameter { index },
                param.abstract_type(),
            ));
            parameters.push(id);
            *entry_locals.get_mut(slot).ok_or_else(|| {
                PaintError::bad_bytecode("max_locals smaller than parameter footprint")
            })? = Some(id);
            slot += param.slots();
        }

        let block_builder = BlockGraphBuilder::new(self.resolver, body);

        let mut entry_states: Vec<Option<EntryState>> = vec![None; block_count];
        let mut graphs: Vec<Option<BlockDataGraph>> = (0..block_count).map(|_| None).collect();
        let mut merges: FxHashMap<(usize, SlotKey), NodeId> = FxHashMap::default();

        let mut worklist: VecDeque<usize> = VecDeque::new();
        let mut in_queue = vec![false; block_count];
        worklist.push_back(0);
        in_queue[0] = true;

        let iteration_cap = block_count * 64 + 64;
        let mut iterations = 0usize;

        while let Some(b) = worklist.pop_front() {
            in_queue[b] = false;
            iterations += 1;
            if iterations > iteration_cap {
                warn!(
                    method = %body.method.long_name(),
                    iterations,
                    "block stitching exceeded its iteration cap"
                );
                break;
            }

            let entry = if b == 0 {
                (entry_locals.clone(), VecDeque::new())
            } else {
                match self.join_entry(&mut arena, &mut merges, body, &graphs, b)? {
                    Some(entry) => entry,
                    // no predecessor built yet; a later build will requeue us
                    None => continue,
                }
            };

            if graphs[b].is_some() && entry_states[b].as_ref() == Some(&entry) {
                continue;
            }

            let graph =
                block_builder.build(&mut arena, &body.control_flow.blocks[b], &entry.0, &entry.1)?;
            let exit_changed = match &graphs[b] {
                Some(prev) => prev.out_locals != graph.out_locals || prev.out_stack != graph.out_stack,
                None => true,
            };
            entry_states[b] = Some(entry);
            graphs[b] = Some(graph);

            if exit_changed {
                for &succ in &body.control_flow.blocks[b].successors {
                    if !in_queue[succ] {
                        in_queue[succ] = true;
                        worklist.push_back(succ);
                    }
                }
            }
        }

        // assemble the method-level view
        let mut blocks = Vec::with_capacity(block_count);
        let mut results = Vec::new();
        let mut invocations = Vec::new();
        let mut put_fields = Vec::new();
        let mut put_statics = Vec::new();
        for graph in graphs {
            match graph {
                Some(graph) => {
                    if let Some(returned) = graph.returned {
                        results.push(returned);
                    }
                    invocations.extend(graph.invocations.iter().cloned());
                    put_fields.extend(graph.put_fields.iter().cloned());
                    put_statics.extend(graph.put_statics.iter().cloned());
                    blocks.push(graph);
                }
                // unreachable block: keep the index positions aligned
                None => blocks.push(BlockDataGraph::default()),
            }
        }

        Ok(MethodDataGraph::new(
            body.method.clone(),
            arena,
            blocks,
            parameters,
            results,
            descriptor.ret.is_some(),
            invocations,
            put_fields,
            put_statics,
        ))
    }

    /// Join the exit states of the built predecessors of block `b`.
    fn join_entry(
        &self,
        arena: &mut NodeArena,
        merges: &mut FxHashMap<(usize, SlotKey), NodeId>,
        body: &MethodBody,
        graphs: &[Option<BlockDataGraph>],
        b: usize,
    ) -> Result<Option<EntryState>> {
        let block = &body.control_flow.blocks[b];
        let built: Vec<&BlockDataGraph> = block
            .predecessors
            .iter()
            .filter_map(|&p| graphs[p].as_ref())
            .collect();
        if built.is_empty() {
            return Ok(None);
        }

        let mut locals: Vec<Option<NodeId>> = vec![None; body.max_locals];
        for slot in 0..body.max_locals {
            let mut values = Vec::with_capacity(built.len());
            let mut usable = true;
            for graph in &built {
                match graph.out_locals.get(slot).copied().flatten() {
                    Some(v) => values.push(v),
                    None => {
                        usable = false;
                        break;
                    }
                }
            }
            if usable {
                locals[slot] = Some(self.joined_node(arena, merges, b, SlotKey::Local(slot), values));
            }
        }

        let depth = built[0].out_stack.len();
        if built.iter().any(|graph| graph.out_stack.len() != depth) {
            return Err(PaintError::bad_bytecode(format!(
                "predecessor stacks disagree at block {} of {}",
                b,
                body.method.long_name()
            )));
        }
        let mut stack = VecDeque::with_capacity(depth);
        for pos in 0..depth {
            let values: Vec<NodeId> = built.iter().map(|graph| graph.out_stack[pos]).collect();
            stack.push_back(self.joined_node(arena, merges, b, SlotKey::Stack(pos), values));
        }

        Ok(Some((locals, stack)))
    }

    /// Reuse the single agreed node, or get-or-create the merge node for this
    /// (block, slot) and refresh its inputs. Inputs stay one-per-predecessor
    /// so a merge node's arity mirrors the join's predecessor count.
    fn joined_node(
        &self,
        arena: &mut NodeArena,
        merges: &mut FxHashMap<(usize, SlotKey), NodeId>,
        block_index: usize,
        key: SlotKey,
        values: Vec<NodeId>,
    ) -> NodeId {
        debug_assert!(!values.is_empty());
        let merge_key = (block_index, key);

        if let Some(&m) = merges.get(&merge_key) {
            let mut ty = arena.node(values[0]).ty.clone();
            for v in &values[1..] {
                ty = ty.lub(&arena.node(*v).ty, self.resolver);
            }
            let node = arena.node(m);
            if node.inputs != values || node.ty != ty {
                let node = arena.node_mut(m);
                node.inputs = values;
                node.ty = ty;
            }
            return m;
        }

        if values.iter().all(|v| *v == values[0]) {
            return values[0];
        }

        let mut ty = arena.node(values[0]).ty.clone();
        for v in &values[1..] {
            ty = ty.lub(&arena.node(*v).ty, self.resolver);
        }
        let label = match key {
            SlotKey::Local(slot) => format!("merge of local {} at block {}", slot, block_index),
            SlotKey::Stack(pos) => format!("merge of stack {} at block {}", pos, block_index),
        };
        let m = arena.alloc(DataNode::new(label, NodeKind::Merge, ty).with_inputs(values));
        merges.insert(merge_key, m);
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::colorless::domain::NodeKind;
    use crate::shared::models::opcode as op;
    use crate::shared::models::{BasicBlock, ConstPool, ControlFlow, Frame, FrameTable};
    use crate::testkit::{ClassBuilder, FixtureResolver, MethodAsm};

    fn build(resolver: &FixtureResolver, class: &str, name: &str) -> MethodDataGraph {
        let method = resolver.method_ref(class, name).expect("method registered");
        let body = resolver.method_body(&method).unwrap().expect("has body");
        MethodGraphBuilder::new(resolver).build(&body).unwrap()
    }

    fn math_resolver() -> FixtureResolver {
        let mut resolver = FixtureResolver::new();
        resolver
            .add_class(
                ClassBuilder::new("demo.Math")
                    .method(
                        MethodAsm::new_static("add", "(II)I")
                            .iload(0)
                            .iload(1)
                            .op(op::IADD)
                            .ireturn(),
                    )
                    .method(MethodAsm::new_static("longId", "(J)J").lload(0).lreturn())
                    .method(
                        MethodAsm::new_static("dropLong", "(J)J")
                            .lload(0)
                            .pop2()
                            .lconst(0)
                            .lreturn(),
                    )
                    .method(
                        MethodAsm::new_static("dropPair", "(II)I")
                            .iload(0)
                            .iload(1)
                            .pop2()
                            .iconst(1)
                            .ireturn(),
                    )
                    .method(
                        MethodAsm::new_static(
                            "pick",
                            "(ZLjava/lang/String;Ljava/lang/String;)Ljava/lang/String;",
                        )
                        .iload(0)
                        .ifeq("right")
                        .aload(1)
                        .astore(3)
                        .goto_("join")
                        .label("right")
                        .aload(2)
                        .astore(3)
                        .label("join")
                        .aload(3)
                        .areturn(),
                    ),
            )
            .unwrap();
        resolver
    }

    #[test]
    fn test_straight_line_wiring() {
        let resolver = math_resolver();
        let graph = build(&resolver, "demo.Math", "add");
        assert_eq!(graph.parameters.len(), 2);
        assert_eq!(graph.results.len(), 1);
        let result = graph.node(graph.results[0]);
        assert_eq!(result.kind, NodeKind::Operation { opcode: op::IADD });
        // inputs in reverse pop order: deepest operand first
        assert_eq!(result.inputs, graph.parameters);
    }

    #[test]
    fn test_category2_value_is_one_node() {
        let resolver = math_resolver();
        let graph = build(&resolver, "demo.Math", "longId");
        assert_eq!(graph.parameters.len(), 1);
        assert_eq!(graph.results, graph.parameters);
    }

    #[test]
    fn test_pop2_drops_one_wide_value() {
        let resolver = math_resolver();
        let graph = build(&resolver, "demo.Math", "dropLong");
        assert_eq!(graph.results, vec![NodeArena::const_long(0).unwrap()]);
    }

    #[test]
    fn test_pop2_drops_two_narrow_values() {
        let resolver = math_resolver();
        let graph = build(&resolver, "demo.Math", "dropPair");
        assert_eq!(graph.results, vec![NodeArena::const_int(1).unwrap()]);
    }

    #[test]
    fn test_merge_node_at_join() {
        let resolver = math_resolver();
        let graph = build(&resolver, "demo.Math", "pick");
        let merges: Vec<_> = graph
            .nodes()
            .filter(|(_, node)| node.kind == NodeKind::Merge)
            .collect();
        assert_eq!(merges.len(), 1);
        let (merge_id, merge) = merges[0];
        // one input per predecessor of the join block
        assert_eq!(merge.inputs.len(), 2);
        assert_eq!(merge.inputs[0], graph.parameters[1]);
        assert_eq!(merge.inputs[1], graph.parameters[2]);
        assert_eq!(graph.results, vec![merge_id]);
        assert_eq!(
            merge.ty,
            crate::shared::models::AbstractType::Reference("java.lang.String".to_string())
        );
    }

    #[test]
    fn test_building_twice_is_deterministic() {
        let resolver = math_resolver();
        let a = build(&resolver, "demo.Math", "pick");
        let b = build(&resolver, "demo.Math", "pick");
        assert_eq!(a.node_count(), b.node_count());
        for ((_, x), (_, y)) in a.nodes().zip(b.nodes()) {
            assert_eq!(x, y);
        }
    }

    #[test]
    fn test_every_input_lives_in_the_same_arena() {
        let resolver = math_resolver();
        let graph = build(&resolver, "demo.Math", "pick");
        let count = graph.node_count() as u32;
        for (_, node) in graph.nodes() {
            for input in &node.inputs {
                assert!(input.0 < count);
            }
        }
    }

    #[test]
    fn test_unsupported_opcode_is_fatal() {
        let resolver = FixtureResolver::new();
        let mut frames = FrameTable::new();
        frames.insert(0, Frame::new(vec![], vec![]));
        let body = MethodBody {
            method: crate::shared::models::MethodRef::new("demo.X", "f", "()V"),
            is_static: true,
            max_locals: 0,
            bytecode: vec![95], // swap
            const_pool: ConstPool::new(),
            frames,
            control_flow: ControlFlow {
                blocks: vec![BasicBlock {
                    index: 0,
                    start: 0,
                    length: 1,
                    predecessors: vec![],
                    successors: vec![],
                }],
            },
        };
        let err = MethodGraphBuilder::new(&resolver).build(&body).unwrap_err();
        assert_eq!(err, PaintError::UnsupportedOpcode("swap"));
    }

    #[test]
    fn test_no_blocks_is_bad_bytecode() {
        let resolver = FixtureResolver::new();
        let body = MethodBody {
            method: crate::shared::models::MethodRef::new("demo.X", "f", "()V"),
            is_static: true,
            max_locals: 0,
            bytecode: vec![],
            const_pool: ConstPool::new(),
            frames: FrameTable::new(),
            control_flow: ControlFlow::default(),
        };
        assert!(matches!(
            MethodGraphBuilder::new(&resolver).build(&body),
            Err(PaintError::BadBytecode(_))
        ));
    }
}
