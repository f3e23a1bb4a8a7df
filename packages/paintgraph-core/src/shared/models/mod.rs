// Shared data models consumed across features: the verification-type
// lattice, opcode tables, descriptors, and the plain-data structures the
// class-resolver collaborator delivers (constant pool, frames, blocks).

pub mod abstract_type;
pub mod const_pool;
pub mod control_flow;
pub mod descriptor;
pub mod frame;
pub mod method;
pub mod opcode;

pub use abstract_type::{AbstractType, TypeHierarchy};
pub use const_pool::{ConstEntry, ConstPool};
pub use control_flow::{BasicBlock, ControlFlow};
pub use descriptor::{parse_field_descriptor, parse_method_descriptor, JavaType, MethodDescriptor};
pub use frame::{Frame, FrameTable};
pub use method::{FieldRef, MethodBody, MethodRef};
