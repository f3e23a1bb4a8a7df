/*
 * Bytecode Assembler
 *
 * Builds real JVM instruction encodings plus the constant-pool entries they
 * reference, for fixture classes. Branch targets are symbolic labels patched
 * at finalization. Strictly test support: panics on misuse (unknown label,
 * oversized constants) rather than returning errors.
 */

use rustc_hash::FxHashMap;

use crate::shared::models::opcode as op;
use crate::shared::models::{parse_method_descriptor, ConstEntry, ConstPool};

/// Fixture class under construction.
pub struct ClassBuilder {
    pub(crate) name: String,
    pub(crate) superclass: String,
    pub(crate) methods: Vec<MethodAsm>,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            superclass: "java.lang.Object".to_string(),
            methods: Vec::new(),
        }
    }

    pub fn superclass(mut self, name: &str) -> Self {
        self.superclass = name.to_string();
        self
    }

    pub fn method(mut self, method: MethodAsm) -> Self {
        self.methods.push(method);
        self
    }

    /// Method that exists but has no code (abstract/native/external).
    pub fn abstract_method(mut self, name: &str, descriptor: &str, is_static: bool) -> Self {
        self.methods.push(MethodAsm::bodyless(name, descriptor, is_static));
        self
    }
}

struct Fixup {
    patch_at: usize,
    label: String,
    base: u32,
}

/// One method's bytecode under assembly.
pub struct MethodAsm {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) is_static: bool,
    pub(crate) has_code: bool,
    pub(crate) code: Vec<u8>,
    pub(crate) pool: ConstPool,
    explicit_max_locals: Option<usize>,
    labels: FxHashMap<String, u32>,
    fixups: Vec<Fixup>,
}

impl MethodAsm {
    /// Instance method.
    pub fn new(name: &str, descriptor: &str) -> Self {
        Self {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            is_static: false,
            has_code: true,
            code: Vec::new(),
            pool: ConstPool::new(),
            explicit_max_locals: None,
            labels: FxHashMap::default(),
            fixups: Vec::new(),
        }
    }

    pub fn new_static(name: &str, descriptor: &str) -> Self {
        let mut m = Self::new(name, descriptor);
        m.is_static = true;
        m
    }

    pub(crate) fn bodyless(name: &str, descriptor: &str, is_static: bool) -> Self {
        let mut m = Self::new(name, descriptor);
        m.is_static = is_static;
        m.has_code = false;
        m
    }

    pub fn max_locals(mut self, n: usize) -> Self {
        self.explicit_max_locals = Some(n);
        self
    }

    pub(crate) fn resolved_max_locals(&self) -> usize {
        if let Some(n) = self.explicit_max_locals {
            return n;
        }
        let descriptor =
            parse_method_descriptor(&self.descriptor).expect("fixture descriptor parses");
        let receiver = usize::from(!self.is_static);
        receiver + descriptor.param_slots() + 4
    }

    /// Patch all branch fixups. Called once by the fixture resolver.
    pub(crate) fn finalize(&mut self) {
        for fixup in &self.fixups {
            let target = *self
                .labels
                .get(&fixup.label)
                .unwrap_or_else(|| panic!("undefined label '{}'", fixup.label));
            let rel = target as i64 - fixup.base as i64;
            let rel = i16::try_from(rel).expect("branch offset fits in i16");
            let [hi, lo] = rel.to_be_bytes();
            self.code[fixup.patch_at] = hi;
            self.code[fixup.patch_at + 1] = lo;
        }
        self.fixups.clear();
    }

    /// Raw single-byte instruction (arithmetic, stack ops, returns...).
    pub fn op(mut self, opcode: u8) -> Self {
        self.code.push(opcode);
        self
    }

    fn var_op(mut self, short_base: u8, wide_op: u8, slot: u8) -> Self {
        if slot <= 3 {
            self.code.push(short_base + slot);
        } else {
            self.code.push(wide_op);
            self.code.push(slot);
        }
        self
    }

    pub fn aload(self, slot: u8) -> Self {
        self.var_op(op::ALOAD_0, op::ALOAD, slot)
    }

    pub fn iload(self, slot: u8) -> Self {
        self.var_op(op::ILOAD_0, op::ILOAD, slot)
    }

    pub fn lload(self, slot: u8) -> Self {
        self.var_op(op::LLOAD_0, op::LLOAD, slot)
    }

    pub fn astore(self, slot: u8) -> Self {
        self.var_op(op::ASTORE_0, op::ASTORE, slot)
    }

    pub fn istore(self, slot: u8) -> Self {
        self.var_op(op::ISTORE_0, op::ISTORE, slot)
    }

    pub fn lstore(self, slot: u8) -> Self {
        self.var_op(op::LSTORE_0, op::LSTORE, slot)
    }

    pub fn iconst(mut self, value: i32) -> Self {
        match value {
            0..=5 => self.code.push(op::ICONST_0 + value as u8),
            -128..=127 => {
                self.code.push(op::BIPUSH);
                self.code.push(value as i8 as u8);
            }
            _ => {
                let value = i16::try_from(value).expect("sipush operand fits in i16");
                self.code.push(op::SIPUSH);
                self.code.extend_from_slice(&value.to_be_bytes());
            }
        }
        self
    }

    pub fn lconst(mut self, value: u8) -> Self {
        assert!(value <= 1, "lconst takes 0 or 1");
        self.code.push(op::LCONST_0 + value);
        self
    }

    pub fn aconst_null(mut self) -> Self {
        self.code.push(op::ACONST_NULL);
        self
    }

    pub fn ldc_string(mut self, value: &str) -> Self {
        let index = self.pool.push(ConstEntry::Str(value.to_string()));
        if index <= u8::MAX as u16 {
            self.code.push(op::LDC);
            self.code.push(index as u8);
        } else {
            self.code.push(op::LDC_W);
            self.code.extend_from_slice(&index.to_be_bytes());
        }
        self
    }

    pub fn ldc2_long(mut self, value: i64) -> Self {
        let index = self.pool.push(ConstEntry::Long(value));
        self.code.push(op::LDC2_W);
        self.code.extend_from_slice(&index.to_be_bytes());
        self
    }

    fn methodref_op(mut self, opcode: u8, class: &str, name: &str, descriptor: &str) -> Self {
        let index = self.pool.push(ConstEntry::Methodref {
            class: class.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        });
        self.code.push(opcode);
        self.code.extend_from_slice(&index.to_be_bytes());
        if opcode == op::INVOKEINTERFACE {
            let parsed = parse_method_descriptor(descriptor).expect("fixture descriptor parses");
            self.code.push((1 + parsed.param_slots()) as u8);
            self.code.push(0);
        }
        self
    }

    pub fn invokevirtual(self, class: &str, name: &str, descriptor: &str) -> Self {
        self.methodref_op(op::INVOKEVIRTUAL, class, name, descriptor)
    }

    pub fn invokespecial(self, class: &str, name: &str, descriptor: &str) -> Self {
        self.methodref_op(op::INVOKESPECIAL, class, name, descriptor)
    }

    pub fn invokestatic(self, class: &str, name: &str, descriptor: &str) -> Self {
        self.methodref_op(op::INVOKESTATIC, class, name, descriptor)
    }

    pub fn invokeinterface(self, class: &str, name: &str, descriptor: &str) -> Self {
        self.methodref_op(op::INVOKEINTERFACE, class, name, descriptor)
    }

    pub fn invokedynamic(mut self, name: &str, descriptor: &str) -> Self {
        let index = self.pool.push(ConstEntry::InvokeDynamic {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        });
        self.code.push(op::INVOKEDYNAMIC);
        self.code.extend_from_slice(&index.to_be_bytes());
        self.code.push(0);
        self.code.push(0);
        self
    }

    fn fieldref_op(mut self, opcode: u8, class: &str, name: &str, descriptor: &str) -> Self {
        let index = self.pool.push(ConstEntry::Fieldref {
            class: class.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        });
        self.code.push(opcode);
        self.code.extend_from_slice(&index.to_be_bytes());
        self
    }

    pub fn getfield(self, class: &str, name: &str, descriptor: &str) -> Self {
        self.fieldref_op(op::GETFIELD, class, name, descriptor)
    }

    pub fn putfield(self, class: &str, name: &str, descriptor: &str) -> Self {
        self.fieldref_op(op::PUTFIELD, class, name, descriptor)
    }

    pub fn getstatic(self, class: &str, name: &str, descriptor: &str) -> Self {
        self.fieldref_op(op::GETSTATIC, class, name, descriptor)
    }

    pub fn putstatic(self, class: &str, name: &str, descriptor: &str) -> Self {
        self.fieldref_op(op::PUTSTATIC, class, name, descriptor)
    }

    fn classref_op(mut self, opcode: u8, class: &str) -> Self {
        let index = self.pool.push(ConstEntry::Class(class.to_string()));
        self.code.push(opcode);
        self.code.extend_from_slice(&index.to_be_bytes());
        self
    }

    pub fn checkcast(self, class: &str) -> Self {
        self.classref_op(op::CHECKCAST, class)
    }

    pub fn instanceof_(self, class: &str) -> Self {
        self.classref_op(op::INSTANCEOF, class)
    }

    pub fn new_object(self, class: &str) -> Self {
        self.classref_op(op::NEW, class)
    }

    pub fn label(mut self, name: &str) -> Self {
        self.labels.insert(name.to_string(), self.code.len() as u32);
        self
    }

    /// Branch with a symbolic target, patched at finalization.
    pub fn branch(mut self, opcode: u8, label: &str) -> Self {
        let base = self.code.len() as u32;
        self.code.push(opcode);
        self.fixups.push(Fixup {
            patch_at: self.code.len(),
            label: label.to_string(),
            base,
        });
        self.code.push(0);
        self.code.push(0);
        self
    }

    pub fn ifeq(self, label: &str) -> Self {
        self.branch(op::IFEQ, label)
    }

    pub fn ifne(self, label: &str) -> Self {
        self.branch(op::IFNE, label)
    }

    pub fn ifnull(self, label: &str) -> Self {
        self.branch(op::IFNULL, label)
    }

    pub fn goto_(self, label: &str) -> Self {
        self.branch(op::GOTO, label)
    }

    pub fn vreturn(self) -> Self {
        self.op(op::RETURN)
    }

    pub fn areturn(self) -> Self {
        self.op(op::ARETURN)
    }

    pub fn ireturn(self) -> Self {
        self.op(op::IRETURN)
    }

    pub fn lreturn(self) -> Self {
        self.op(op::LRETURN)
    }

    pub fn pop(self) -> Self {
        self.op(op::POP)
    }

    pub fn pop2(self) -> Self {
        self.op(op::POP2)
    }

    pub fn dup(self) -> Self {
        self.op(op::DUP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_and_wide_variable_ops() {
        let m = MethodAsm::new_static("f", "()V").aload(1).aload(7);
        assert_eq!(m.code, vec![op::ALOAD_0 + 1, op::ALOAD, 7]);
    }

    #[test]
    fn test_iconst_selects_encoding() {
        let m = MethodAsm::new_static("f", "()V").iconst(3).iconst(100).iconst(1000);
        assert_eq!(
            m.code,
            vec![op::ICONST_3, op::BIPUSH, 100, op::SIPUSH, 0x03, 0xE8]
        );
    }

    #[test]
    fn test_branch_patching() {
        let mut m = MethodAsm::new_static("f", "(I)V")
            .iload(0)
            .ifeq("skip")
            .iconst(0)
            .pop()
            .label("skip")
            .vreturn();
        m.finalize();
        // ifeq sits at offset 1, its target "skip" at offset 6: rel = +5
        assert_eq!(m.code[1], op::IFEQ);
        assert_eq!(i16::from_be_bytes([m.code[2], m.code[3]]), 5);
    }

    #[test]
    fn test_invokeinterface_count_operand() {
        let m = MethodAsm::new_static("f", "()V").invokeinterface(
            "java.util.List",
            "add",
            "(Ljava/lang/Object;)Z",
        );
        assert_eq!(m.code.len(), 5);
        assert_eq!(m.code[3], 2); // receiver + one reference argument
    }
}
