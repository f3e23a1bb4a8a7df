/*
 * Paintgraph Core - Taint-Coloring Engine for JVM Bytecode
 *
 * Feature-First Hexagonal Architecture:
 * - shared/           : Models (type lattice, opcodes, frames) + resolver port
 * - features/colorless: L1 - symbolic interpreter building data-flow graphs
 * - features/colored  : L2 - color model and fixpoint brushes
 * - features/session  : L3 - interprocedural worklist of painting tasks
 * - testkit/          : assembler, mini-verifier, in-memory fixtures
 *
 * Data flow: entry method → colorless graph → brushes color it, querying the
 * session per call site → callee tasks run and feed results back → repeat
 * until the worklist drains. Source-meets-sink intersections surface through
 * a caller-supplied callback with full provenance traces.
 */

/// Shared models and ports
pub mod shared;

/// Analysis layers (colorless → colored → session)
pub mod features;

/// Error types
pub mod errors;

/// Test support (assembler, mini-verifier, fixtures)
pub mod testkit;

pub use errors::{PaintError, Result};
pub use features::colored::{
    BoundaryColors, ColorKind, ColoredObject, Confidence, GraphColorer, MethodColorRules,
    PaintedColor, RuleProvider, TraceItem,
};
pub use features::colorless::{Invocation, MethodDataGraph, MethodGraphBuilder, NodeId, NodeKind};
pub use features::session::{color_kinds, PaintingSession};
pub use shared::models::{AbstractType, MethodBody, MethodRef, TypeHierarchy};
pub use shared::ports::ClassResolver;
