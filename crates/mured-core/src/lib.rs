//! # mured-core
//!
//! The deterministic rewriting engine for mured - THE LOGIC.
//!
//! Values are JSON-shaped trees ([`MuValue`]). Projections are named
//! pattern → body rules. A step rewrites a value with the first projection
//! whose pattern matches; a run steps until nothing changes or a budget runs
//! out.
//!
//! ## Layers
//!
//! - `value`, `arena`: the value type and the only door for cyclic input
//! - `classify`: linked-list / dict encodings and how they are told apart
//! - `matcher`, `substitute`: pattern matching and body instantiation
//! - `kernel`: ordered projection sets, `step` and `run`
//! - `engine`: per-execution state machine with closure detection
//! - `seed`: checksummed projection files
//! - `export`: trace encodings
//!
//! ## Architectural Constraints
//!
//! - Every traversal uses an explicit stack; none recurses on the host stack
//! - No floating-point arithmetic, no randomness, no global state
//! - Match failure, stalls and exhausted budgets are data, not errors
//! - Has NO async, NO network dependencies (pure Rust)

// =============================================================================
// MODULES
// =============================================================================

pub mod arena;
pub mod classify;
pub mod engine;
pub mod export;
pub mod kernel;
pub mod matcher;
pub mod primitives;
pub mod seed;
pub mod substitute;
pub mod types;
pub mod value;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Bindings, ClosureEvidence, ExecutionStatus, Halt, MatchResult, MuredError, Projection,
    ProjectionId, Resource, SeedIntegrityError, StallReason, TraceEvent, ValidationError,
    ValueHash,
};
pub use value::{Extent, Limits, MuValue};

// =============================================================================
// RE-EXPORTS: Rewriting
// =============================================================================

pub use arena::{MuArena, NodeRef};
pub use classify::{Shape, classify, classify_arena, denormalize, normalize};
pub use engine::{Execution, ExecutionEvent, ExecutionState, Transition};
pub use kernel::{
    KernelPhase, ProjectionChain, ProjectionKernel, ProjectionSet, RunOutcome, SeedOrigin,
    StepOutcome, run, step,
};
pub use matcher::{Matcher, match_pattern};
pub use substitute::{Substitution, substitute};

// =============================================================================
// RE-EXPORTS: Seeds & Traces
// =============================================================================

pub use export::{
    CanonicalTrace, TraceHeader, export_trace, import_trace, trace_checksum, trace_to_jsonl,
};
pub use seed::{SeedDocument, SeedLoader, SeedMeta, load_projections, seal_seed, seed_checksum};
