/*
 * Method and Field References, Method Bodies
 *
 * `MethodRef`/`FieldRef` identify program entities by (class, name,
 * descriptor). `MethodBody` bundles everything the engine needs to interpret
 * one method: raw bytecode, the resolved constant pool, verification frames,
 * and basic blocks. Bodies are immutable once built and shared via `Arc`.
 */

use std::fmt;

use crate::shared::models::const_pool::ConstPool;
use crate::shared::models::control_flow::ControlFlow;
use crate::shared::models::frame::FrameTable;

/// Identity of a method or constructor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Dotted declaring-class name
    pub class_name: String,
    /// Simple name; `<init>` for constructors
    pub name: String,
    pub descriptor: String,
}

impl MethodRef {
    pub fn new(
        class_name: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Self {
            class_name: class_name.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    /// Fully qualified rendering for log messages.
    pub fn long_name(&self) -> String {
        format!("{}.{}{}", self.class_name, self.name, self.descriptor)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class_name, self.name)
    }
}

/// Identity of a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub class_name: String,
    pub name: String,
    pub descriptor: String,
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class_name, self.name)
    }
}

/// Decoded body of one concrete method.
#[derive(Debug, Clone)]
pub struct MethodBody {
    pub method: MethodRef,
    pub is_static: bool,
    pub max_locals: usize,
    pub bytecode: Vec<u8>,
    pub const_pool: ConstPool,
    pub frames: FrameTable,
    pub control_flow: ControlFlow,
}

impl MethodBody {
    pub fn byte_at(&self, offset: u32) -> u8 {
        self.bytecode[offset as usize]
    }

    pub fn u16_at(&self, offset: u32) -> u16 {
        let i = offset as usize;
        u16::from_be_bytes([self.bytecode[i], self.bytecode[i + 1]])
    }

    pub fn len(&self) -> usize {
        self.bytecode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytecode.is_empty()
    }
}
