/*
 * Per-Block Symbolic Interpreter
 *
 * Abstracts one basic block into data-flow nodes: a mutable local array and
 * operand deque are walked over the bytecode, each instruction popping its
 * operands and (usually) pushing a fresh producer node. The verifier frame
 * at each offset is ground truth; stack-size and local-type disagreement is
 * a fatal internal error in debug builds.
 *
 * Category-2 values (long, double) sit on the symbolic stack as a single
 * node; the assertions account for their two verifier slots:
 * Σ size(stack) == verifier.top_index + 1.
 */

use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use tracing::trace;

use crate::errors::{PaintError, Result};
use crate::features::colorless::domain::{
    BlockDataGraph, DataNode, Invocation, NodeArena, NodeId, NodeKind, PutFieldRecord,
    PutStaticRecord,
};
use crate::shared::models::opcode as op;
use crate::shared::models::{
    opcode::{instruction_length, mnemonic},
    parse_method_descriptor, AbstractType, BasicBlock, FieldRef, MethodBody,
};
use crate::shared::ports::ClassResolver;

/// Interpreter for a single basic block.
pub struct BlockGraphBuilder<'a> {
    resolver: &'a dyn ClassResolver,
    body: &'a MethodBody,
}

/// Mutable interpretation state for one block walk.
struct BlockState<'b> {
    arena: &'b mut NodeArena,
    locals: Vec<Option<NodeId>>,
    /// Top of stack at the front
    stack: VecDeque<NodeId>,
    nodes: Vec<NodeId>,
    seen: FxHashSet<NodeId>,
    invocations: Vec<Invocation>,
    put_fields: Vec<PutFieldRecord>,
    put_statics: Vec<PutStaticRecord>,
    returned: Option<NodeId>,
}

impl<'b> BlockState<'b> {
    fn push(&mut self, id: NodeId) {
        self.stack.push_front(id);
    }

    fn pop(&mut self) -> Result<NodeId> {
        self.stack
            .pop_front()
            .ok_or_else(|| PaintError::bad_bytecode("operand stack underflow"))
    }

    fn peek(&self) -> Result<NodeId> {
        self.stack
            .front()
            .copied()
            .ok_or_else(|| PaintError::bad_bytecode("operand stack underflow"))
    }

    /// Remember every node currently visible on the stack or in locals.
    fn record_visible(&mut self) {
        for id in self.stack.iter().chain(self.locals.iter().flatten()) {
            if self.seen.insert(*id) {
                self.nodes.push(*id);
            }
        }
    }
}

impl<'a> BlockGraphBuilder<'a> {
    pub fn new(resolver: &'a dyn ClassResolver, body: &'a MethodBody) -> Self {
        Self { resolver, body }
    }

    /// Interpret `block` starting from the given entry state.
    pub fn build(
        &self,
        arena: &mut NodeArena,
        block: &BasicBlock,
        inc_locals: &[Option<NodeId>],
        inc_stack: &VecDeque<NodeId>,
    ) -> Result<BlockDataGraph> {
        let mut state = BlockState {
            arena,
            locals: inc_locals.to_vec(),
            stack: inc_stack.clone(),
            nodes: Vec::new(),
            seen: FxHashSet::default(),
            invocations: Vec::new(),
            put_fields: Vec::new(),
            put_statics: Vec::new(),
            returned: None,
        };
        state.record_visible();

        let mut offset = block.start;
        while offset < block.end() {
            let opcode = self.body.byte_at(offset);
            trace!(
                offset,
                instruction = mnemonic(opcode),
                stack_depth = state.stack.len(),
                "interpreting"
            );
            self.assert_frame_consistency(&state, offset);
            self.process(&mut state, offset, opcode)?;
            state.record_visible();
            let length = instruction_length(opcode).ok_or_else(|| {
                PaintError::bad_bytecode(format!(
                    "variable-length instruction {} at offset {}",
                    mnemonic(opcode),
                    offset
                ))
            })?;
            offset += length as u32;
        }

        Ok(BlockDataGraph {
            nodes: state.nodes,
            inc_locals: inc_locals.to_vec(),
            inc_stack: inc_stack.clone(),
            out_locals: state.locals,
            out_stack: state.stack,
            invocations: state.invocations,
            put_fields: state.put_fields,
            put_statics: state.put_statics,
            returned: state.returned,
        })
    }

    /// Verifier cross-check before each instruction (debug builds).
    fn assert_frame_consistency(&self, state: &BlockState<'_>, offset: u32) {
        #[cfg(debug_assertions)]
        {
            let Some(frame) = self.body.frames.frame_at(offset) else {
                return;
            };
            let symbolic: usize = state
                .stack
                .iter()
                .map(|id| state.arena.node(*id).ty.size())
                .sum();
            debug_assert_eq!(
                symbolic as isize,
                frame.top_index() + 1,
                "symbolic stack of {} slots disagrees with verifier at offset {} of {}",
                symbolic,
                offset,
                self.body.method.long_name()
            );
            for (slot, entry) in state.locals.iter().enumerate() {
                let Some(id) = entry else {
                    // unassigned, or the filler half of a wide neighbor
                    continue;
                };
                let expected = frame.local(slot);
                if *expected == AbstractType::Top {
                    continue;
                }
                let actual = &state.arena.node(*id).ty;
                debug_assert!(
                    expected.accepts(actual, self.resolver),
                    "local {} holds {} but verifier expects {} at offset {} of {}",
                    slot,
                    actual,
                    expected,
                    offset,
                    self.body.method.long_name()
                );
            }
        }
        #[cfg(not(debug_assertions))]
        {
            let _ = (state, offset);
        }
    }

    /// Type the verifier assigns to the value this instruction leaves on top
    /// of the stack, read from the frame of the following instruction.
    fn type_of_next_stack_top(&self, offset: u32, opcode: u8) -> Result<AbstractType> {
        let length = instruction_length(opcode).ok_or_else(|| {
            PaintError::bad_bytecode(format!("variable-length instruction {}", mnemonic(opcode)))
        })?;
        let next = offset + length as u32;
        let frame = self.body.frames.frame_at(next).ok_or_else(|| {
            PaintError::bad_bytecode(format!("no verification frame at offset {}", next))
        })?;
        frame
            .top_of_stack()
            .cloned()
            .ok_or_else(|| PaintError::bad_bytecode(format!("empty verifier stack after {}", next)))
    }

    /// Pop `pops` operands and push one fresh node typed from the next frame.
    /// Inputs are kept in reverse pop order (deepest operand first).
    fn stack_only(
        &self,
        state: &mut BlockState<'_>,
        offset: u32,
        opcode: u8,
        pops: usize,
        label: Option<String>,
        kind: Option<NodeKind>,
    ) -> Result<NodeId> {
        let ty = self.type_of_next_stack_top(offset, opcode)?;
        let mut inputs = Vec::with_capacity(pops);
        for _ in 0..pops {
            inputs.push(state.pop()?);
        }
        inputs.reverse();
        let node = DataNode::new(
            label.unwrap_or_else(|| format!("{} @{}", mnemonic(opcode), offset)),
            kind.unwrap_or(NodeKind::Operation { opcode }),
            ty,
        )
        .with_inputs(inputs);
        let id = state.arena.alloc(node);
        state.push(id);
        Ok(id)
    }

    fn load(&self, state: &mut BlockState<'_>, slot: usize) -> Result<()> {
        let id = state
            .locals
            .get(slot)
            .copied()
            .flatten()
            .ok_or_else(|| PaintError::bad_bytecode(format!("load from unassigned local {}", slot)))?;
        state.push(id);
        Ok(())
    }

    fn store(&self, state: &mut BlockState<'_>, slot: usize) -> Result<()> {
        let id = state.pop()?;
        if state.arena.node(id).ty.size() == 2 && slot + 1 < state.locals.len() {
            state.locals[slot + 1] = None;
        }
        state.locals[slot] = Some(id);
        Ok(())
    }

    fn resolve_field_at(&self, offset: u32) -> Result<FieldRef> {
        let index = self.body.u16_at(offset + 1);
        let (class, name, descriptor) = self.body.const_pool.fieldref(index)?;
        let (class, name, descriptor) = (class.to_string(), name.to_string(), descriptor.to_string());
        self.resolver.get_field(&class, &name, &descriptor)
    }

    fn process(&self, state: &mut BlockState<'_>, offset: u32, opcode: u8) -> Result<()> {
        let body = self.body;
        match opcode {
            op::ACONST_NULL => state.push(NodeArena::const_null()),

            op::ICONST_0..=op::ICONST_5 => {
                state.push(NodeArena::const_int(opcode - op::ICONST_0).expect("iconst range"))
            }

            op::LCONST_0 | op::LCONST_1 => {
                state.push(NodeArena::const_long(opcode - op::LCONST_0).expect("lconst range"))
            }

            op::BIPUSH => {
                let value = body.byte_at(offset + 1) as i8;
                self.stack_only(
                    state,
                    offset,
                    opcode,
                    0,
                    Some(format!("bipush {}", value)),
                    None,
                )?;
            }

            op::SIPUSH => {
                let value = body.u16_at(offset + 1) as i16;
                let id = state.arena.alloc(DataNode::new(
                    format!("short as int {}", value),
                    NodeKind::Operation { opcode },
                    AbstractType::Int,
                ));
                state.push(id);
            }

            op::LDC | op::LDC_W | op::LDC2_W => {
                let index = if opcode == op::LDC {
                    body.byte_at(offset + 1) as u16
                } else {
                    body.u16_at(offset + 1)
                };
                let ty = body.const_pool.loadable_type(index)?;
                let label = match body.const_pool.string(index) {
                    Ok(s) => format!("\"{}\"", s),
                    Err(_) => format!("constant #{}", index),
                };
                let id = state
                    .arena
                    .alloc(DataNode::new(label, NodeKind::Constant, ty));
                state.push(id);
            }

            op::ILOAD | op::LLOAD | op::FLOAD | op::DLOAD | op::ALOAD => {
                self.load(state, body.byte_at(offset + 1) as usize)?;
            }

            op::ILOAD_0..=op::ALOAD_3 => {
                self.load(state, ((opcode - op::ILOAD_0) % 4) as usize)?;
            }

            op::IALOAD..=op::SALOAD => {
                self.stack_only(state, offset, opcode, 2, None, None)?;
            }

            op::ISTORE | op::LSTORE | op::FSTORE | op::DSTORE | op::ASTORE => {
                self.store(state, body.byte_at(offset + 1) as usize)?;
            }

            op::ISTORE_0..=op::ASTORE_3 => {
                self.store(state, ((opcode - op::ISTORE_0) % 4) as usize)?;
            }

            op::IASTORE..=op::SASTORE => {
                state.pop()?;
                state.pop()?;
                state.pop()?;
            }

            op::POP => {
                let removed = state.pop()?;
                debug_assert_eq!(state.arena.node(removed).ty.size(), 1);
            }

            op::POP2 => {
                // one category-2 value, or two category-1 values
                let removed = state.pop()?;
                if state.arena.node(removed).ty.size() != 2 {
                    let second = state.pop()?;
                    debug_assert_eq!(state.arena.node(second).ty.size(), 1);
                }
            }

            op::DUP => {
                let top = state.peek()?;
                state.push(top);
            }

            op::IADD | op::IAND | op::IDIV | op::IMUL | op::IOR | op::IREM | op::ISHL
            | op::ISHR | op::ISUB | op::IUSHR | op::IXOR => {
                self.stack_only(state, offset, opcode, 2, None, None)?;
            }

            op::LADD | op::LAND | op::LCMP => {
                self.stack_only(state, offset, opcode, 2, None, None)?;
            }

            op::INEG | op::INSTANCEOF | op::ARRAYLENGTH | op::CHECKCAST => {
                self.stack_only(state, offset, opcode, 1, None, None)?;
            }

            op::I2L | op::I2F | op::I2D | op::I2B | op::I2C | op::I2S => {
                self.stack_only(state, offset, opcode, 1, None, None)?;
            }

            op::IINC => {
                let slot = body.byte_at(offset + 1) as usize;
                let prev = state.locals.get(slot).copied().flatten().ok_or_else(|| {
                    PaintError::bad_bytecode(format!("iinc on unassigned local {}", slot))
                })?;
                let ty = state.arena.node(prev).ty.clone();
                let id = state.arena.alloc(
                    DataNode::new(format!("iinc {} @{}", slot, offset), NodeKind::Operation { opcode }, ty)
                        .with_inputs(vec![prev]),
                );
                state.locals[slot] = Some(id);
            }

            op::IFEQ..=op::IFLE | op::IFNULL | op::IFNONNULL => {
                // branches consume their operands but produce no data
                state.pop()?;
            }

            op::IF_ICMPEQ..=op::IF_ACMPNE => {
                state.pop()?;
                state.pop()?;
            }

            op::GOTO => {}

            op::GETFIELD | op::GETSTATIC => {
                let field = self.resolve_field_at(offset)?;
                let label = field.to_string();
                if opcode == op::GETFIELD {
                    self.stack_only(
                        state,
                        offset,
                        opcode,
                        1,
                        Some(label),
                        Some(NodeKind::GetField { field }),
                    )?;
                } else {
                    self.stack_only(
                        state,
                        offset,
                        opcode,
                        0,
                        Some(label),
                        Some(NodeKind::GetStatic { field }),
                    )?;
                }
            }

            op::PUTFIELD | op::PUTSTATIC => {
                let field = self.resolve_field_at(offset)?;
                if opcode == op::PUTFIELD {
                    let value = state.pop()?;
                    let target = state.pop()?;
                    state.put_fields.push(PutFieldRecord {
                        field,
                        target,
                        value,
                    });
                } else {
                    let value = state.pop()?;
                    state.put_statics.push(PutStaticRecord { field, value });
                }
            }

            op::INVOKEVIRTUAL | op::INVOKESPECIAL | op::INVOKESTATIC | op::INVOKEINTERFACE => {
                let index = body.u16_at(offset + 1);
                let (class, name, descriptor) = body.const_pool.methodref(index)?;
                let (class, name, descriptor) =
                    (class.to_string(), name.to_string(), descriptor.to_string());
                let parsed = parse_method_descriptor(&descriptor)?;
                let static_call = opcode == op::INVOKESTATIC;

                let mut inputs = Vec::with_capacity(parsed.params.len() + 1);
                for _ in 0..parsed.params.len() {
                    inputs.push(state.pop()?);
                }
                if !static_call {
                    inputs.push(state.pop()?);
                }
                inputs.reverse();

                let result = match parsed.ret {
                    Some(ret) => {
                        let id = state.arena.alloc(
                            DataNode::new(
                                format!("result of {}.{}", class, name),
                                NodeKind::InvokeResult { opcode },
                                ret.abstract_type(),
                            )
                            .with_inputs(inputs.clone()),
                        );
                        state.push(id);
                        Some(id)
                    }
                    None => None,
                };

                state.invocations.push(Invocation {
                    class_name: class,
                    method_name: name,
                    descriptor,
                    parameters: inputs,
                    result,
                    static_call,
                });
            }

            op::INVOKEDYNAMIC => {
                let index = body.u16_at(offset + 1);
                let (name, descriptor) = body.const_pool.invokedynamic(index)?;
                let (name, descriptor) = (name.to_string(), descriptor.to_string());
                let parsed = parse_method_descriptor(&descriptor)?;

                let mut inputs = Vec::with_capacity(parsed.params.len());
                for _ in 0..parsed.params.len() {
                    inputs.push(state.pop()?);
                }
                inputs.reverse();

                if let Some(ret) = parsed.ret {
                    let id = state.arena.alloc(
                        DataNode::new(
                            format!("dynamic {}", name),
                            NodeKind::InvokeDynamic { name },
                            ret.abstract_type(),
                        )
                        .with_inputs(inputs),
                    );
                    state.push(id);
                }
            }

            op::ATHROW => {
                // the handler frame will see the thrown reference alone on
                // the stack
                let thrown = state.peek()?;
                state.stack.clear();
                state.push(thrown);
            }

            op::IRETURN | op::LRETURN | op::FRETURN | op::DRETURN | op::ARETURN => {
                state.returned = Some(state.pop()?);
            }

            op::RETURN => {
                state.returned = None;
            }

            op::NEW => {
                let index = body.u16_at(offset + 1);
                let label = match body.const_pool.class_name(index) {
                    Ok(name) => format!("new {}", name),
                    Err(_) => format!("new #{}", index),
                };
                self.stack_only(state, offset, opcode, 0, Some(label), None)?;
            }

            op::NEWARRAY => {
                self.stack_only(state, offset, opcode, 1, None, None)?;
            }

            other => return Err(PaintError::UnsupportedOpcode(mnemonic(other))),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::colorless::infrastructure::method_builder::MethodGraphBuilder;
    use crate::testkit::{ClassBuilder, FixtureResolver, MethodAsm};

    fn build(resolver: &FixtureResolver, class: &str, name: &str) -> crate::features::colorless::domain::MethodDataGraph {
        let method = resolver.method_ref(class, name).expect("method registered");
        let body = resolver.method_body(&method).unwrap().expect("has body");
        MethodGraphBuilder::new(resolver).build(&body).unwrap()
    }

    fn resolver() -> FixtureResolver {
        let mut resolver = FixtureResolver::new();
        resolver
            .add_class(
                ClassBuilder::new("demo.Consts")
                    .method(
                        MethodAsm::new_static("hello", "()Ljava/lang/String;")
                            .ldc_string("hello")
                            .areturn(),
                    )
                    .method(MethodAsm::new_static("zero", "()I").iconst(0).ireturn())
                    .method(
                        MethodAsm::new_static("shortPush", "()I")
                            .iconst(1000)
                            .ireturn(),
                    )
                    .method(
                        MethodAsm::new_static("twice", "(Ljava/lang/Object;)V")
                            .aload(0)
                            .dup()
                            .pop()
                            .pop()
                            .vreturn(),
                    )
                    .method(
                        MethodAsm::new_static("call", "(Ljava/lang/String;)V")
                            .aload(0)
                            .invokestatic("demo.Consts", "consume", "(Ljava/lang/String;)V")
                            .vreturn(),
                    )
                    .abstract_method("consume", "(Ljava/lang/String;)V", true),
            )
            .unwrap();
        resolver
    }

    #[test]
    fn test_string_constant_label_quotes_the_value() {
        let resolver = resolver();
        let graph = build(&resolver, "demo.Consts", "hello");
        let result = graph.node(graph.results[0]);
        assert_eq!(result.label, "\"hello\"");
        assert_eq!(result.kind, NodeKind::Constant);
        assert_eq!(
            result.ty,
            AbstractType::Reference("java.lang.String".to_string())
        );
    }

    #[test]
    fn test_small_int_constants_are_flyweights() {
        let resolver = resolver();
        let graph = build(&resolver, "demo.Consts", "zero");
        assert_eq!(graph.results[0], NodeArena::const_int(0).unwrap());
    }

    #[test]
    fn test_short_push_label() {
        let resolver = resolver();
        let graph = build(&resolver, "demo.Consts", "shortPush");
        assert_eq!(graph.node(graph.results[0]).label, "short as int 1000");
    }

    #[test]
    fn test_dup_pushes_the_same_node() {
        let resolver = resolver();
        let graph = build(&resolver, "demo.Consts", "twice");
        // parameter only; dup creates no node
        let non_flyweight = graph.node_count() as u32 - crate::features::colorless::domain::FLYWEIGHT_COUNT;
        assert_eq!(non_flyweight, 1);
    }

    #[test]
    fn test_invocation_record_for_static_call() {
        let resolver = resolver();
        let graph = build(&resolver, "demo.Consts", "call");
        assert_eq!(graph.invocations.len(), 1);
        let inv = &graph.invocations[0];
        assert_eq!(inv.class_name, "demo.Consts");
        assert_eq!(inv.method_name, "consume");
        assert!(inv.static_call);
        assert_eq!(inv.parameters, graph.parameters);
        assert_eq!(inv.result, None);
    }
}
