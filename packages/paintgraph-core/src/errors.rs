//! Error types for paintgraph-core
//!
//! Provides unified error handling across the crate.
//!
//! Policy: `BadBytecode` and `UnsupportedOpcode` are fatal for the task that
//! hit them (the task is abandoned, never retried). Resolution misses
//! (`ClassNotFound`, `MethodNotFound`, `FieldNotFound`) raised while chasing a
//! call target degrade to an empty coloring for that call site. Invariant
//! violations are `debug_assert!`s, not error values.

use thiserror::Error;

/// Main error type for paintgraph-core operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PaintError {
    /// Malformed or inconsistent bytecode (bad constant tag, frame mismatch)
    #[error("bad bytecode: {0}")]
    BadBytecode(String),

    /// Opcode outside the supported instruction set
    #[error("unsupported opcode: {0}")]
    UnsupportedOpcode(&'static str),

    /// Referenced class cannot be resolved
    #[error("class not found: {0}")]
    ClassNotFound(String),

    /// Referenced method cannot be resolved
    #[error("method not found: {class}.{name}{descriptor}")]
    MethodNotFound {
        class: String,
        name: String,
        descriptor: String,
    },

    /// Referenced field cannot be resolved
    #[error("field not found: {class}.{name}")]
    FieldNotFound { class: String, name: String },

    /// Field or method descriptor that does not parse
    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(String),
}

impl PaintError {
    /// Create a bad-bytecode error
    pub fn bad_bytecode(msg: impl Into<String>) -> Self {
        PaintError::BadBytecode(msg.into())
    }
}

/// Result type alias for paintgraph operations
pub type Result<T> = std::result::Result<T, PaintError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PaintError::bad_bytecode("bad LDC tag 42");
        assert_eq!(err.to_string(), "bad bytecode: bad LDC tag 42");
    }

    #[test]
    fn test_method_not_found_display() {
        let err = PaintError::MethodNotFound {
            class: "demo.Db".to_string(),
            name: "execute".to_string(),
            descriptor: "(Ljava/lang/String;)V".to_string(),
        };
        assert!(err.to_string().contains("demo.Db.execute"));
    }
}
