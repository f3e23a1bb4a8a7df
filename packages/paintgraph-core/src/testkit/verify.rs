/*
 * Mini-Verifier
 *
 * Computes per-offset verification frames and basic blocks for assembled
 * fixture methods, standing in for the collaborator's real verifier. Only
 * the supported opcode subset is simulated; frames follow verifier
 * conventions (category-2 values take two slots, the upper one Top).
 */

use std::collections::{BTreeSet, VecDeque};

use rustc_hash::FxHashMap;

use crate::errors::{PaintError, Result};
use crate::shared::models::opcode as op;
use crate::shared::models::{
    opcode::{instruction_length, mnemonic},
    parse_field_descriptor, parse_method_descriptor, AbstractType, BasicBlock, ConstPool,
    ControlFlow, Frame, FrameTable, TypeHierarchy,
};

fn is_conditional(opcode: u8) -> bool {
    matches!(opcode, op::IFEQ..=op::IF_ACMPNE | op::IFNULL | op::IFNONNULL)
}

fn is_terminal(opcode: u8) -> bool {
    matches!(opcode, op::IRETURN..=op::RETURN | op::ATHROW)
}

fn branch_target(code: &[u8], offset: u32) -> u32 {
    let rel = i16::from_be_bytes([code[offset as usize + 1], code[offset as usize + 2]]);
    (offset as i64 + rel as i64) as u32
}

/// Push honoring category-2 conventions.
fn push_t(stack: &mut Vec<AbstractType>, ty: AbstractType) {
    let wide = ty.size() == 2;
    stack.push(ty);
    if wide {
        stack.push(AbstractType::Top);
    }
}

/// Pop one value, looking through the Top filler of a category-2 value.
fn pop_t(stack: &mut Vec<AbstractType>) -> Result<AbstractType> {
    let top = stack
        .pop()
        .ok_or_else(|| PaintError::bad_bytecode("verifier stack underflow"))?;
    if top == AbstractType::Top {
        let below = stack
            .pop()
            .ok_or_else(|| PaintError::bad_bytecode("verifier stack underflow"))?;
        debug_assert_eq!(below.size(), 2);
        Ok(below)
    } else {
        Ok(top)
    }
}

fn element_type_of(array: &AbstractType) -> AbstractType {
    let AbstractType::Reference(name) = array else {
        return AbstractType::Reference("java.lang.Object".to_string());
    };
    let Some(element) = name.strip_suffix("[]") else {
        return AbstractType::Reference("java.lang.Object".to_string());
    };
    match element {
        "boolean" | "byte" | "char" | "short" | "int" => AbstractType::Int,
        "long" => AbstractType::Long,
        "float" => AbstractType::Float,
        "double" => AbstractType::Double,
        other => AbstractType::Reference(other.to_string()),
    }
}

struct Simulator<'a> {
    code: &'a [u8],
    pool: &'a ConstPool,
    hierarchy: &'a dyn TypeHierarchy,
}

type TypeState = (Vec<AbstractType>, Vec<AbstractType>);

impl<'a> Simulator<'a> {
    fn u16_at(&self, offset: u32) -> u16 {
        u16::from_be_bytes([
            self.code[offset as usize + 1],
            self.code[offset as usize + 2],
        ])
    }

    /// One instruction's effect on the type state.
    fn step(&self, offset: u32, opcode: u8, state: &mut TypeState) -> Result<()> {
        let (locals, stack) = state;
        match opcode {
            op::ACONST_NULL => push_t(stack, AbstractType::Null),
            op::ICONST_0..=op::ICONST_5 | op::BIPUSH | op::SIPUSH => {
                push_t(stack, AbstractType::Int)
            }
            op::LCONST_0 | op::LCONST_1 => push_t(stack, AbstractType::Long),
            op::LDC => {
                let index = self.code[offset as usize + 1] as u16;
                push_t(stack, self.pool.loadable_type(index)?);
            }
            op::LDC_W | op::LDC2_W => {
                let index = self.u16_at(offset);
                push_t(stack, self.pool.loadable_type(index)?);
            }
            op::ILOAD | op::LLOAD | op::FLOAD | op::DLOAD | op::ALOAD => {
                let slot = self.code[offset as usize + 1] as usize;
                push_t(stack, locals[slot].clone());
            }
            op::ILOAD_0..=op::ALOAD_3 => {
                let slot = ((opcode - op::ILOAD_0) % 4) as usize;
                push_t(stack, locals[slot].clone());
            }
            op::IALOAD | op::BALOAD | op::CALOAD | op::SALOAD => {
                pop_t(stack)?;
                pop_t(stack)?;
                push_t(stack, AbstractType::Int);
            }
            op::LALOAD => {
                pop_t(stack)?;
                pop_t(stack)?;
                push_t(stack, AbstractType::Long);
            }
            op::FALOAD => {
                pop_t(stack)?;
                pop_t(stack)?;
                push_t(stack, AbstractType::Float);
            }
            op::DALOAD => {
                pop_t(stack)?;
                pop_t(stack)?;
                push_t(stack, AbstractType::Double);
            }
            op::AALOAD => {
                pop_t(stack)?;
                let array = pop_t(stack)?;
                push_t(stack, element_type_of(&array));
            }
            op::ISTORE | op::LSTORE | op::FSTORE | op::DSTORE | op::ASTORE => {
                let slot = self.code[offset as usize + 1] as usize;
                self.store(locals, stack, slot)?;
            }
            op::ISTORE_0..=op::ASTORE_3 => {
                let slot = ((opcode - op::ISTORE_0) % 4) as usize;
                self.store(locals, stack, slot)?;
            }
            op::IASTORE..=op::SASTORE => {
                pop_t(stack)?;
                pop_t(stack)?;
                pop_t(stack)?;
            }
            op::POP => {
                pop_t(stack)?;
            }
            op::POP2 => {
                // a wide value's filler plus the value, or two narrow values
                for _ in 0..2 {
                    stack
                        .pop()
                        .ok_or_else(|| PaintError::bad_bytecode("verifier stack underflow"))?;
                }
            }
            op::DUP => {
                let top = stack
                    .last()
                    .cloned()
                    .ok_or_else(|| PaintError::bad_bytecode("verifier stack underflow"))?;
                stack.push(top);
            }
            op::IADD | op::IAND | op::IDIV | op::IMUL | op::IOR | op::IREM | op::ISHL
            | op::ISHR | op::ISUB | op::IUSHR | op::IXOR => {
                pop_t(stack)?;
                pop_t(stack)?;
                push_t(stack, AbstractType::Int);
            }
            op::LADD | op::LAND => {
                pop_t(stack)?;
                pop_t(stack)?;
                push_t(stack, AbstractType::Long);
            }
            op::LCMP => {
                pop_t(stack)?;
                pop_t(stack)?;
                push_t(stack, AbstractType::Int);
            }
            op::INEG => {
                pop_t(stack)?;
                push_t(stack, AbstractType::Int);
            }
            op::I2L => {
                pop_t(stack)?;
                push_t(stack, AbstractType::Long);
            }
            op::I2F => {
                pop_t(stack)?;
                push_t(stack, AbstractType::Float);
            }
            op::I2D => {
                pop_t(stack)?;
                push_t(stack, AbstractType::Double);
            }
            op::I2B | op::I2C | op::I2S => {
                pop_t(stack)?;
                push_t(stack, AbstractType::Int);
            }
            op::ARRAYLENGTH | op::INSTANCEOF => {
                pop_t(stack)?;
                push_t(stack, AbstractType::Int);
            }
            op::CHECKCAST => {
                pop_t(stack)?;
                let class = self.pool.class_name(self.u16_at(offset))?;
                push_t(stack, AbstractType::Reference(class.to_string()));
            }
            op::IINC => {}
            op::IFEQ..=op::IFLE | op::IFNULL | op::IFNONNULL => {
                pop_t(stack)?;
            }
            op::IF_ICMPEQ..=op::IF_ACMPNE => {
                pop_t(stack)?;
                pop_t(stack)?;
            }
            op::GOTO => {}
            op::GETFIELD => {
                pop_t(stack)?;
                let (_, _, descriptor) = self.pool.fieldref(self.u16_at(offset))?;
                push_t(stack, parse_field_descriptor(descriptor)?.abstract_type());
            }
            op::GETSTATIC => {
                let (_, _, descriptor) = self.pool.fieldref(self.u16_at(offset))?;
                push_t(stack, parse_field_descriptor(descriptor)?.abstract_type());
            }
            op::PUTFIELD => {
                pop_t(stack)?;
                pop_t(stack)?;
            }
            op::PUTSTATIC => {
                pop_t(stack)?;
            }
            op::INVOKEVIRTUAL | op::INVOKESPECIAL | op::INVOKESTATIC | op::INVOKEINTERFACE => {
                let (_, _, descriptor) = self.pool.methodref(self.u16_at(offset))?;
                let parsed = parse_method_descriptor(descriptor)?;
                for _ in 0..parsed.params.len() {
                    pop_t(stack)?;
                }
                if opcode != op::INVOKESTATIC {
                    pop_t(stack)?;
                }
                if let Some(ret) = parsed.ret {
                    push_t(stack, ret.abstract_type());
                }
            }
            op::INVOKEDYNAMIC => {
                let (_, descriptor) = self.pool.invokedynamic(self.u16_at(offset))?;
                let parsed = parse_method_descriptor(descriptor)?;
                for _ in 0..parsed.params.len() {
                    pop_t(stack)?;
                }
                if let Some(ret) = parsed.ret {
                    push_t(stack, ret.abstract_type());
                }
            }
            op::ATHROW => {
                pop_t(stack)?;
                stack.clear();
            }
            op::IRETURN | op::LRETURN | op::FRETURN | op::DRETURN | op::ARETURN => {
                pop_t(stack)?;
            }
            op::RETURN => {}
            op::NEW => {
                let class = self.pool.class_name(self.u16_at(offset))?;
                push_t(stack, AbstractType::Reference(class.to_string()));
            }
            op::NEWARRAY => {
                pop_t(stack)?;
                let element = match self.code[offset as usize + 1] {
                    4 => "boolean",
                    5 => "char",
                    6 => "float",
                    7 => "double",
                    8 => "byte",
                    9 => "short",
                    10 => "int",
                    11 => "long",
                    _ => "java.lang.Object",
                };
                push_t(stack, AbstractType::Reference(format!("{}[]", element)));
            }
            other => return Err(PaintError::UnsupportedOpcode(mnemonic(other))),
        }
        Ok(())
    }

    fn store(
        &self,
        locals: &mut [AbstractType],
        stack: &mut Vec<AbstractType>,
        slot: usize,
    ) -> Result<()> {
        let ty = pop_t(stack)?;
        let wide = ty.size() == 2;
        locals[slot] = ty;
        if wide && slot + 1 < locals.len() {
            locals[slot + 1] = AbstractType::Top;
        }
        Ok(())
    }

    fn merge_states(&self, existing: &TypeState, incoming: &TypeState) -> Result<(TypeState, bool)> {
        let (e_locals, e_stack) = existing;
        let (i_locals, i_stack) = incoming;
        if e_stack.len() != i_stack.len() {
            return Err(PaintError::bad_bytecode(
                "verifier stacks disagree at a join point",
            ));
        }
        let mut changed = false;
        let locals = e_locals
            .iter()
            .zip(i_locals.iter())
            .map(|(a, b)| {
                let merged = a.lub(b, self.hierarchy);
                changed |= merged != *a;
                merged
            })
            .collect();
        let stack = e_stack
            .iter()
            .zip(i_stack.iter())
            .map(|(a, b)| {
                let merged = a.lub(b, self.hierarchy);
                changed |= merged != *a;
                merged
            })
            .collect();
        Ok(((locals, stack), changed))
    }
}

/// Compute frames and basic blocks for one assembled method.
pub(crate) fn analyze_code(
    class_name: &str,
    is_static: bool,
    descriptor: &str,
    code: &[u8],
    pool: &ConstPool,
    max_locals: usize,
    hierarchy: &dyn TypeHierarchy,
) -> Result<(FrameTable, ControlFlow)> {
    if code.is_empty() {
        return Err(PaintError::bad_bytecode("empty code attribute"));
    }

    // instruction boundaries
    let mut offsets = Vec::new();
    let mut cursor = 0u32;
    while (cursor as usize) < code.len() {
        let opcode = code[cursor as usize];
        let length = instruction_length(opcode)
            .ok_or(PaintError::UnsupportedOpcode(mnemonic(opcode)))? as u32;
        offsets.push(cursor);
        cursor += length;
    }
    if cursor as usize != code.len() {
        return Err(PaintError::bad_bytecode("code ends mid-instruction"));
    }
    let code_len = code.len() as u32;

    // leaders
    let mut leaders: BTreeSet<u32> = BTreeSet::new();
    leaders.insert(0);
    for &offset in &offsets {
        let opcode = code[offset as usize];
        let next = offset + instruction_length(opcode).unwrap_or(1) as u32;
        if is_conditional(opcode) || opcode == op::GOTO {
            leaders.insert(branch_target(code, offset));
            if next < code_len {
                leaders.insert(next);
            }
        } else if is_terminal(opcode) && next < code_len {
            leaders.insert(next);
        }
    }

    // blocks in offset order
    let starts: Vec<u32> = leaders.into_iter().collect();
    let index_of = |start: u32| -> Result<usize> {
        starts
            .binary_search(&start)
            .map_err(|_| PaintError::bad_bytecode(format!("branch into mid-block offset {}", start)))
    };
    let mut blocks = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(code_len);
        blocks.push(BasicBlock {
            index: i,
            start,
            length: end - start,
            predecessors: Vec::new(),
            successors: Vec::new(),
        });
    }

    // edges from each block's last instruction
    for i in 0..blocks.len() {
        let block = &blocks[i];
        let mut last = block.start;
        for &offset in &offsets {
            if offset >= block.start && offset < block.end() {
                last = offset;
            }
        }
        let opcode = code[last as usize];
        let mut successors = Vec::new();
        if is_conditional(opcode) {
            successors.push(index_of(block.end())?);
            successors.push(index_of(branch_target(code, last))?);
        } else if opcode == op::GOTO {
            successors.push(index_of(branch_target(code, last))?);
        } else if !is_terminal(opcode) && block.end() < code_len {
            successors.push(index_of(block.end())?);
        }
        blocks[i].successors = successors.clone();
        for succ in successors {
            blocks[succ].predecessors.push(i);
        }
    }

    // initial type state from the method signature
    let parsed = parse_method_descriptor(descriptor)?;
    let mut locals = vec![AbstractType::Top; max_locals];
    let mut slot = 0usize;
    if !is_static {
        locals[0] = AbstractType::Reference(class_name.to_string());
        slot = 1;
    }
    for param in &parsed.params {
        let ty = param.abstract_type();
        let wide = ty.size() == 2;
        if slot >= max_locals {
            return Err(PaintError::bad_bytecode("max_locals too small for signature"));
        }
        locals[slot] = ty;
        if wide && slot + 1 < max_locals {
            locals[slot + 1] = AbstractType::Top;
        }
        slot += param.slots();
    }

    // fixpoint over blocks
    let simulator = Simulator {
        code,
        pool,
        hierarchy,
    };
    let mut entries: Vec<Option<TypeState>> = vec![None; blocks.len()];
    entries[0] = Some((locals, Vec::new()));
    let mut frames: FxHashMap<u32, Frame> = FxHashMap::default();
    let mut worklist: VecDeque<usize> = VecDeque::new();
    worklist.push_back(0);
    let mut guard = 0usize;
    let guard_cap = blocks.len() * 64 + 64;

    while let Some(b) = worklist.pop_front() {
        guard += 1;
        if guard > guard_cap {
            return Err(PaintError::bad_bytecode("verifier fixpoint did not converge"));
        }
        let mut state = entries[b].clone().expect("queued block has an entry state");
        let block = &blocks[b];
        for &offset in &offsets {
            if offset < block.start || offset >= block.end() {
                continue;
            }
            frames.insert(offset, Frame::new(state.0.clone(), state.1.clone()));
            simulator.step(offset, code[offset as usize], &mut state)?;
        }
        for &succ in &blocks[b].successors {
            match &entries[succ] {
                None => {
                    entries[succ] = Some(state.clone());
                    worklist.push_back(succ);
                }
                Some(existing) => {
                    let (merged, changed) = simulator.merge_states(existing, &state)?;
                    if changed {
                        entries[succ] = Some(merged);
                        worklist.push_back(succ);
                    }
                }
            }
        }
    }

    let mut table = FrameTable::new();
    for (offset, frame) in frames {
        table.insert(offset, frame);
    }
    Ok((table, ControlFlow { blocks }))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlatHierarchy;

    impl TypeHierarchy for FlatHierarchy {
        fn is_subtype(&self, sub: &str, sup: &str) -> bool {
            sub == sup || sup == "java.lang.Object"
        }
        fn common_superclass(&self, a: &str, b: &str) -> String {
            if a == b {
                a.to_string()
            } else {
                "java.lang.Object".to_string()
            }
        }
    }

    #[test]
    fn test_straight_line_frames() {
        // static int add(int, int): iload_0 iload_1 iadd ireturn
        let code = vec![op::ILOAD_0, op::ILOAD_0 + 1, op::IADD, op::IRETURN];
        let pool = ConstPool::new();
        let (frames, flow) =
            analyze_code("demo.Math", true, "(II)I", &code, &pool, 4, &FlatHierarchy).unwrap();
        assert_eq!(flow.len(), 1);
        assert_eq!(frames.frame_at(0).unwrap().top_index(), -1);
        assert_eq!(frames.frame_at(2).unwrap().top_index(), 1);
        assert_eq!(
            frames.frame_at(3).unwrap().top_of_stack(),
            Some(&AbstractType::Int)
        );
    }

    #[test]
    fn test_wide_values_take_two_slots() {
        // static long id(long): lload_0 lreturn
        let code = vec![op::LLOAD_0, op::LRETURN];
        let pool = ConstPool::new();
        let (frames, _) =
            analyze_code("demo.Math", true, "(J)J", &code, &pool, 4, &FlatHierarchy).unwrap();
        let frame = frames.frame_at(1).unwrap();
        assert_eq!(frame.top_index(), 1);
        assert_eq!(frame.top_of_stack(), Some(&AbstractType::Long));
        assert_eq!(frame.local(0), &AbstractType::Long);
        assert_eq!(frame.local(1), &AbstractType::Top);
    }

    #[test]
    fn test_branch_blocks_and_preds() {
        // static int pick(int): iload_0 ifeq +6 iconst_1 ireturn [6] iconst_0 ireturn
        let code = vec![
            op::ILOAD_0,
            op::IFEQ,
            0,
            5,
            op::ICONST_1,
            op::IRETURN,
            op::ICONST_0,
            op::IRETURN,
        ];
        let pool = ConstPool::new();
        let (_, flow) =
            analyze_code("demo.Math", true, "(I)I", &code, &pool, 2, &FlatHierarchy).unwrap();
        assert_eq!(flow.len(), 3);
        assert_eq!(flow.blocks[0].successors, vec![1, 2]);
        assert_eq!(flow.blocks[1].predecessors, vec![0]);
        assert_eq!(flow.blocks[2].predecessors, vec![0]);
    }

    #[test]
    fn test_unsupported_opcode_is_reported() {
        let code = vec![0xC8, 0, 0, 0, 0]; // goto_w
        let pool = ConstPool::new();
        let err = analyze_code("demo.Math", true, "()V", &code, &pool, 1, &FlatHierarchy)
            .unwrap_err();
        assert_eq!(err, PaintError::UnsupportedOpcode("goto_w"));
    }
}
