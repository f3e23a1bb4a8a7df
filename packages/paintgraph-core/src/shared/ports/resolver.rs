/*
 * Class-Resolver Protocol
 *
 * The reflection/class-pool seam. Implementations decode class files (or
 * fake them, for tests) and answer entity lookups; the engine consumes the
 * plain-data `MethodBody` they return and never touches class files itself.
 */

use std::sync::Arc;

use crate::errors::Result;
use crate::shared::models::{FieldRef, MethodBody, MethodRef, TypeHierarchy};

/// Class-resolver protocol
///
/// Any resolver implementation must answer:
/// - method / constructor / field lookups by (class, name, descriptor)
/// - body retrieval for a resolved method
///
/// plus the `TypeHierarchy` queries the lattice needs.
pub trait ClassResolver: TypeHierarchy + Send + Sync {
    /// Resolve a method on `class` (searching superclasses as the
    /// implementation sees fit). Errors with ClassNotFound / MethodNotFound.
    fn get_method(&self, class: &str, name: &str, descriptor: &str) -> Result<MethodRef>;

    /// Resolve a constructor on `class` by descriptor.
    fn get_constructor(&self, class: &str, descriptor: &str) -> Result<MethodRef> {
        self.get_method(class, "<init>", descriptor)
    }

    /// Resolve a field on `class`.
    fn get_field(&self, class: &str, name: &str, descriptor: &str) -> Result<FieldRef>;

    /// Decoded body of a resolved method. `Ok(None)` means the method exists
    /// but has no code (abstract, native, or zero-instruction) — an analysis
    /// boundary, not an error.
    fn method_body(&self, method: &MethodRef) -> Result<Option<Arc<MethodBody>>>;
}
