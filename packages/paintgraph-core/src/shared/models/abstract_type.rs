/*
 * Verification-Type Lattice
 *
 * Abstract types as the bytecode verifier sees them. Category-2 values
 * (long, double) occupy two verifier slots; the symbolic interpreter keeps
 * them as a single value and consults `size()` when comparing against frames.
 *
 * Lattice (references only): Null ⊑ Reference(C) ⊑ Reference(super(C)) ⊑ Top.
 * Primitives are incomparable with everything but themselves.
 */

use std::fmt;

/// Resolves questions the lattice cannot answer alone: subtype tests and
/// common superclasses of reference types. Implemented by the class-resolver
/// collaborator.
pub trait TypeHierarchy {
    /// True if `sub` is `sup` or a (transitive) subtype of it.
    fn is_subtype(&self, sub: &str, sup: &str) -> bool;

    /// Nearest common superclass of two classes. `java.lang.Object` is always
    /// an acceptable answer.
    fn common_superclass(&self, a: &str, b: &str) -> String;
}

/// Abstract value type drawn from the verifier's lattice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AbstractType {
    /// int-alike: boolean, byte, char, short, int
    Int,
    Float,
    Long,
    Double,
    /// Object reference with its dotted class name
    Reference(String),
    /// The null constant, below every reference type
    Null,
    /// Uninitialized reference (fresh `new`, unset `this` in constructors)
    Uninit,
    /// Unknown / unusable (also the filler slot of a category-2 value)
    Top,
}

impl AbstractType {
    /// Category size in stack/local slots as the verifier counts them.
    pub fn size(&self) -> usize {
        match self {
            AbstractType::Long | AbstractType::Double => 2,
            _ => 1,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, AbstractType::Reference(_) | AbstractType::Null)
    }

    fn is_primitive(&self) -> bool {
        matches!(
            self,
            AbstractType::Int | AbstractType::Float | AbstractType::Long | AbstractType::Double
        )
    }

    /// Key under which a coloring for a value of this type is filed.
    /// References use their class name; primitives use the JVM keyword.
    pub fn class_key(&self) -> String {
        match self {
            AbstractType::Reference(name) => name.clone(),
            AbstractType::Int => "int".to_string(),
            AbstractType::Float => "float".to_string(),
            AbstractType::Long => "long".to_string(),
            AbstractType::Double => "double".to_string(),
            AbstractType::Null => "null".to_string(),
            AbstractType::Uninit | AbstractType::Top => "java.lang.Object".to_string(),
        }
    }

    /// Least upper bound on the verification lattice.
    pub fn lub<H: TypeHierarchy + ?Sized>(&self, other: &AbstractType, hierarchy: &H) -> AbstractType {
        if self == other {
            return self.clone();
        }
        match (self, other) {
            (AbstractType::Null, AbstractType::Reference(c))
            | (AbstractType::Reference(c), AbstractType::Null) => AbstractType::Reference(c.clone()),
            (AbstractType::Reference(a), AbstractType::Reference(b)) => {
                AbstractType::Reference(hierarchy.common_superclass(a, b))
            }
            _ => AbstractType::Top,
        }
    }

    /// Compatibility check used by the interpreter's frame assertions:
    /// can a value of type `actual` live in a slot the verifier typed `self`?
    pub fn accepts<H: TypeHierarchy + ?Sized>(&self, actual: &AbstractType, hierarchy: &H) -> bool {
        if self == actual || *self == AbstractType::Top {
            return true;
        }
        match (self, actual) {
            (AbstractType::Reference(_), AbstractType::Null)
            | (AbstractType::Reference(_), AbstractType::Uninit) => true,
            (AbstractType::Reference(sup), AbstractType::Reference(sub)) => {
                hierarchy.is_subtype(sub, sup)
            }
            // int-alike variants all collapse onto Int, so remaining primitive
            // pairs only match when categories agree
            (a, b) => a.is_primitive() && b.is_primitive() && a.size() == b.size(),
        }
    }
}

impl fmt::Display for AbstractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbstractType::Reference(name) => write!(f, "{}", name),
            other => write!(f, "{}", other.class_key()),
        }
    }
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
    fn test_category_sizes() {
        assert_eq!(AbstractType::Long.size(), 2);
        assert_eq!(AbstractType::Double.size(), 2);
        assert_eq!(AbstractType::Int.size(), 1);
        assert_eq!(AbstractType::Reference("java.lang.String".into()).size(), 1);
    }

    #[test]
    fn test_lub_null_absorbed_by_reference() {
        let string = AbstractType::Reference("java.lang.String".into());
        assert_eq!(AbstractType::Null.lub(&string, &FlatHierarchy), string);
        assert_eq!(string.lub(&AbstractType::Null, &FlatHierarchy), string);
    }

    #[test]
    fn test_lub_distinct_references_meet_at_common_superclass() {
        let a = AbstractType::Reference("java.lang.String".into());
        let b = AbstractType::Reference("java.lang.StringBuilder".into());
        assert_eq!(
            a.lub(&b, &FlatHierarchy),
            AbstractType::Reference("java.lang.Object".into())
        );
    }

    #[test]
    fn test_lub_primitive_mismatch_is_top() {
        assert_eq!(
            AbstractType::Int.lub(&AbstractType::Long, &FlatHierarchy),
            AbstractType::Top
        );
    }

    #[test]
    fn test_accepts_subtype_and_null() {
        let object = AbstractType::Reference("java.lang.Object".into());
        let string = AbstractType::Reference("java.lang.String".into());
        assert!(object.accepts(&string, &FlatHierarchy));
        assert!(string.accepts(&AbstractType::Null, &FlatHierarchy));
        assert!(!string.accepts(&AbstractType::Int, &FlatHierarchy));
        assert!(AbstractType::Top.accepts(&AbstractType::Long, &FlatHierarchy));
    }
}
