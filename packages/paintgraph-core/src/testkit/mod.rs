// Test support: a bytecode assembler, a mini-verifier producing frames and
// blocks for the supported opcode subset, and in-memory resolver/rule
// fixtures. Shared by unit tests and the scenario tests in tests/.

pub mod assemble;
pub mod fixtures;
pub(crate) mod verify;

pub use assemble::{ClassBuilder, MethodAsm};
pub use fixtures::{kinds, source_of, FixtureResolver, RuleSet};
