/*
 * Verification Frames
 *
 * Per-offset records of the verifier's view: the abstract type in every
 * local slot and operand-stack slot. Category-2 values occupy two stack
 * slots, the upper one holding Top. Consumed as ground truth by the
 * symbolic interpreter's assertions and result typing.
 */

use rustc_hash::FxHashMap;

use crate::shared::models::abstract_type::AbstractType;

/// The verifier's state at one bytecode offset, before the instruction there
/// executes.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Local-variable types, padded with Top to the method's max_locals.
    pub locals: Vec<AbstractType>,
    /// Operand stack, bottom first; category-2 values are [value, Top].
    pub stack: Vec<AbstractType>,
}

impl Frame {
    pub fn new(locals: Vec<AbstractType>, stack: Vec<AbstractType>) -> Self {
        Self { locals, stack }
    }

    /// Index of the topmost stack slot; -1 for an empty stack.
    pub fn top_index(&self) -> isize {
        self.stack.len() as isize - 1
    }

    pub fn local(&self, slot: usize) -> &AbstractType {
        self.locals.get(slot).unwrap_or(&AbstractType::Top)
    }

    /// Type of the value on top of the stack, looking through the Top filler
    /// of a category-2 value.
    pub fn top_of_stack(&self) -> Option<&AbstractType> {
        let top = self.stack.last()?;
        if *top == AbstractType::Top && self.stack.len() >= 2 {
            let below = &self.stack[self.stack.len() - 2];
            debug_assert_eq!(below.size(), 2, "Top filler without a wide value below");
            Some(below)
        } else {
            Some(top)
        }
    }
}

/// All frames of one method body, keyed by instruction offset.
#[derive(Debug, Clone, Default)]
pub struct FrameTable {
    frames: FxHashMap<u32, Frame>,
}

impl FrameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, offset: u32, frame: Frame) {
        self.frames.insert(offset, frame);
    }

    pub fn frame_at(&self, offset: u32) -> Option<&Frame> {
        self.frames.get(&offset)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
