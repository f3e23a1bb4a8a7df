/*
 * Constant-Pool Model
 *
 * Flattened constant-pool entries as delivered by the class-resolver
 * collaborator. Reference entries arrive pre-resolved (names instead of
 * index chains), so the engine never chases Utf8 indices itself.
 */

use crate::errors::{PaintError, Result};
use crate::shared::models::abstract_type::AbstractType;

/// One resolved constant-pool entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstEntry {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Str(String),
    /// Class constant, dotted name
    Class(String),
    Fieldref {
        class: String,
        name: String,
        descriptor: String,
    },
    Methodref {
        class: String,
        name: String,
        descriptor: String,
    },
    /// Invokedynamic call site, flattened to its name-and-type
    InvokeDynamic {
        name: String,
        descriptor: String,
    },
}

/// Constant pool with JVM-style 1-based indexing.
#[derive(Debug, Clone, Default)]
pub struct ConstPool {
    entries: Vec<ConstEntry>,
}

impl ConstPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, returning its 1-based index.
    pub fn push(&mut self, entry: ConstEntry) -> u16 {
        self.entries.push(entry);
        self.entries.len() as u16
    }

    pub fn entry(&self, index: u16) -> Result<&ConstEntry> {
        if index == 0 {
            return Err(PaintError::bad_bytecode("constant pool index 0"));
        }
        self.entries
            .get(index as usize - 1)
            .ok_or_else(|| PaintError::bad_bytecode(format!("constant pool index {} out of range", index)))
    }

    /// Abstract type of a loadable constant, per its pool tag.
    pub fn loadable_type(&self, index: u16) -> Result<AbstractType> {
        match self.entry(index)? {
            ConstEntry::Integer(_) => Ok(AbstractType::Int),
            ConstEntry::Float(_) => Ok(AbstractType::Float),
            ConstEntry::Long(_) => Ok(AbstractType::Long),
            ConstEntry::Double(_) => Ok(AbstractType::Double),
            ConstEntry::Str(_) => Ok(AbstractType::Reference("java.lang.String".to_string())),
            ConstEntry::Class(_) => Ok(AbstractType::Reference("java.lang.Class".to_string())),
            other => Err(PaintError::bad_bytecode(format!(
                "bad LDC [pos = {}]: {:?}",
                index, other
            ))),
        }
    }

    pub fn string(&self, index: u16) -> Result<&str> {
        match self.entry(index)? {
            ConstEntry::Str(s) => Ok(s),
            other => Err(PaintError::bad_bytecode(format!(
                "expected string constant at {}, found {:?}",
                index, other
            ))),
        }
    }

    /// (class, name, descriptor) of a field reference.
    pub fn fieldref(&self, index: u16) -> Result<(&str, &str, &str)> {
        match self.entry(index)? {
            ConstEntry::Fieldref {
                class,
                name,
                descriptor,
            } => Ok((class, name, descriptor)),
            other => Err(PaintError::bad_bytecode(format!(
                "expected fieldref at {}, found {:?}",
                index, other
            ))),
        }
    }

    /// (class, name, descriptor) of a method reference.
    pub fn methodref(&self, index: u16) -> Result<(&str, &str, &str)> {
        match self.entry(index)? {
            ConstEntry::Methodref {
                class,
                name,
                descriptor,
            } => Ok((class, name, descriptor)),
            other => Err(PaintError::bad_bytecode(format!(
                "expected methodref at {}, found {:?}",
                index, other
            ))),
        }
    }

    /// (name, descriptor) of an invokedynamic call site.
    pub fn invokedynamic(&self, index: u16) -> Result<(&str, &str)> {
        match self.entry(index)? {
            ConstEntry::InvokeDynamic { name, descriptor } => Ok((name, descriptor)),
            other => Err(PaintError::bad_bytecode(format!(
                "expected invokedynamic at {}, found {:?}",
                index, other
            ))),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&str> {
        match self.entry(index)? {
            ConstEntry::Class(name) => Ok(name),
            other => Err(PaintError::bad_bytecode(format!(
                "expected class constant at {}, found {:?}",
                index, other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_based_indexing() {
        let mut pool = ConstPool::new();
        let a = pool.push(ConstEntry::Integer(7));
        let b = pool.push(ConstEntry::Str("hello".to_string()));
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(pool.string(b).unwrap(), "hello");
        assert!(pool.entry(0).is_err());
        assert!(pool.entry(3).is_err());
    }

    #[test]
    fn test_loadable_types() {
        let mut pool = ConstPool::new();
        let s = pool.push(ConstEntry::Str("x".to_string()));
        let l = pool.push(ConstEntry::Long(1));
        let c = pool.push(ConstEntry::Class("demo.Simple".to_string()));
        let m = pool.push(ConstEntry::Methodref {
            class: "demo.Simple".to_string(),
            name: "f".to_string(),
            descriptor: "()V".to_string(),
        });
        assert_eq!(
            pool.loadable_type(s).unwrap(),
            AbstractType::Reference("java.lang.String".to_string())
        );
        assert_eq!(pool.loadable_type(l).unwrap(), AbstractType::Long);
        assert_eq!(
            pool.loadable_type(c).unwrap(),
            AbstractType::Reference("java.lang.Class".to_string())
        );
        // methodref is not loadable: the distinguished bad-LDC error
        assert!(pool.loadable_type(m).is_err());
    }
}
