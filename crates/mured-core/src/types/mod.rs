//! # Core Type Definitions
//!
//! This module contains the shared types of the mured engine:
//! - Identifiers (`ValueHash`, `ProjectionId`)
//! - Rules and match results (`Projection`, `Bindings`, `MatchResult`)
//! - Run reporting (`TraceEvent`, `StallReason`, `Resource`, `Halt`)
//! - Execution observations (`ExecutionStatus`, `ClosureEvidence`)
//! - Error types (`ValidationError`, `SeedIntegrityError`, `MuredError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer identifiers and BLAKE3 digests only (no floating-point)
//! - Implement `Ord` where they key a `BTreeMap`
//! - Never carry host pointers or identity; equality is by content

use crate::primitives::{NO_MATCH_ID, SECOND_INDEPENDENT_STALL, is_reserved_key};
use crate::value::{Limits, MuValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// BLAKE3 digest of a value's canonical serialization.
///
/// Two values are structurally equal exactly when their hashes are equal.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValueHash(pub [u8; 32]);

impl ValueHash {
    /// Hash raw canonical bytes.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// The raw digest.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full lowercase hex form (64 characters).
    #[must_use]
    pub fn to_hex(&self) -> String {
        blake3::Hash::from_bytes(self.0).to_hex().to_string()
    }

    /// Short form used in log lines (first 16 hex characters).
    #[must_use]
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(16);
        hex
    }
}

impl fmt::Display for ValueHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ValueHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueHash({})", self.short())
    }
}

/// Name of a projection, unique within a projection set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectionId(pub String);

impl ProjectionId {
    /// Create a new projection id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The pattern id recorded for stalls where nothing matched.
    #[must_use]
    pub fn no_match() -> Self {
        Self(NO_MATCH_ID.to_string())
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// =============================================================================
// PROJECTION
// =============================================================================

/// A named rewrite rule: values matching `pattern` become `body`.
///
/// Variable sites (`{"var": name}`) in the pattern bind; in the body they
/// refer back to what was bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    /// Unique id within its set.
    pub id: ProjectionId,
    /// Structure a value must have for this projection to fire.
    pub pattern: MuValue,
    /// Template instantiated from the pattern's bindings.
    pub body: MuValue,
}

impl Projection {
    /// Create a new projection.
    #[must_use]
    pub fn new(id: impl Into<String>, pattern: MuValue, body: MuValue) -> Self {
        Self {
            id: ProjectionId::new(id),
            pattern,
            body,
        }
    }

    /// Validate the projection before it may join a set.
    ///
    /// Checks the id, the bounds of pattern and body, the control namespace
    /// and variable names.
    pub fn validate(&self, limits: &Limits) -> Result<(), ValidationError> {
        let id = self.id.as_str();
        if id.is_empty() || id.starts_with('<') || id.trim() != id {
            return Err(ValidationError::InvalidProjectionId(id.to_string()));
        }

        for side in [&self.pattern, &self.body] {
            side.validate(limits)?;
            side.ensure_no_reserved()?;
            if side.variable_names().iter().any(|name| name.is_empty()) {
                return Err(ValidationError::EmptyVariableName);
            }
        }

        Ok(())
    }

    /// Render the projection as a Mu map `{"id", "pattern", "body"}`.
    #[must_use]
    pub fn to_mu(&self) -> MuValue {
        MuValue::map([
            ("id", MuValue::from(self.id.as_str())),
            ("pattern", self.pattern.clone()),
            ("body", self.body.clone()),
        ])
    }
}

// =============================================================================
// MATCHING
// =============================================================================

/// Variable name to the value it captured.
///
/// Sorted so that any rendering of bindings is deterministic.
pub type Bindings = BTreeMap<String, MuValue>;

/// Outcome of matching a pattern against a value.
///
/// Failure is an ordinary value, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    /// The pattern matched; every variable site captured a value.
    Success(Bindings),
    /// The pattern does not describe the value.
    Failure,
}

impl MatchResult {
    /// Returns true for `Success`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The bindings of a successful match.
    #[must_use]
    pub fn into_bindings(self) -> Option<Bindings> {
        match self {
            Self::Success(bindings) => Some(bindings),
            Self::Failure => None,
        }
    }
}

// =============================================================================
// RUN REPORTING
// =============================================================================

/// A budget that can run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    /// The step budget of a run.
    Steps,
    /// Nesting depth of a produced value.
    Depth,
    /// Breadth of a produced value.
    Width,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Steps => write!(f, "steps"),
            Self::Depth => write!(f, "depth"),
            Self::Width => write!(f, "width"),
        }
    }
}

/// Why a step made no progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum StallReason {
    /// No projection in the set matched the value.
    NoMatch,
    /// A projection matched but its body names a variable the pattern never bound.
    Unbound {
        projection: ProjectionId,
        variable: String,
    },
    /// A projection fired and produced a value equal to its input.
    FixedPoint { projection: ProjectionId },
    /// The caller reported the stall for a pattern of its own.
    External { pattern: ProjectionId },
}

impl StallReason {
    /// Short tag naming the kind of stall.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::NoMatch => "no_match",
            Self::Unbound { .. } => "unbound_variable",
            Self::FixedPoint { .. } => "fixed_point",
            Self::External { .. } => "external",
        }
    }

    /// The pattern this stall is attributed to for closure detection.
    #[must_use]
    pub fn pattern_id(&self) -> ProjectionId {
        match self {
            Self::NoMatch => ProjectionId::no_match(),
            Self::Unbound { projection, .. } | Self::FixedPoint { projection } => {
                projection.clone()
            }
            Self::External { pattern } => pattern.clone(),
        }
    }

    /// The projection that fired during the stalled step, if any.
    #[must_use]
    pub fn fired(&self) -> Option<ProjectionId> {
        match self {
            Self::Unbound { projection, .. } | Self::FixedPoint { projection } => {
                Some(projection.clone())
            }
            Self::NoMatch | Self::External { .. } => None,
        }
    }
}

impl fmt::Display for StallReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMatch => write!(f, "no projection matched"),
            Self::Unbound {
                projection,
                variable,
            } => write!(f, "projection {} references unbound variable {}", projection, variable),
            Self::FixedPoint { projection } => {
                write!(f, "projection {} produced an unchanged value", projection)
            }
            Self::External { pattern } => write!(f, "stall reported for {}", pattern),
        }
    }
}

/// How a run ended.
///
/// A stall and an exhausted budget are deliberately different variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Halt {
    /// A fixed point: the last step produced no change.
    Stalled(StallReason),
    /// A budget ran out before a fixed point was reached.
    Exhausted(Resource),
}

impl fmt::Display for Halt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stalled(reason) => write!(f, "stalled ({})", reason),
            Self::Exhausted(resource) => write!(f, "exhausted {}", resource),
        }
    }
}

/// One entry of a run trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Position in the run, contiguous from zero.
    pub index: u64,
    /// Hash of the value the step started from.
    pub before: ValueHash,
    /// Hash of the value the step produced (equal to `before` on a stall).
    pub after: ValueHash,
    /// The projection that fired, or `None`.
    pub projection: Option<ProjectionId>,
}

// =============================================================================
// EXECUTION OBSERVATIONS
// =============================================================================

/// Lifecycle of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Steps may be taken.
    Active,
    /// The last step made no progress; only a fix resumes.
    Stalled,
    /// Closed by the caller; nothing leaves this state.
    Terminal,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Stalled => write!(f, "STALLED"),
            Self::Terminal => write!(f, "TERMINAL"),
        }
    }
}

/// A (value, pattern) pair has stalled twice with no change in between.
///
/// Purely observational: recording it never halts an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureEvidence {
    pub value_hash: ValueHash,
    pub pattern_id: ProjectionId,
    pub reason: String,
}

impl ClosureEvidence {
    /// Evidence of a second independent stall.
    #[must_use]
    pub fn second_stall(value_hash: ValueHash, pattern_id: ProjectionId) -> Self {
        Self {
            value_hash,
            pattern_id,
            reason: SECOND_INDEPENDENT_STALL.to_string(),
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// A value or projection is not admissible.
///
/// Raised at the boundary, before any matching is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The input cannot be read as a Mu value.
    #[error("Malformed value: {0}")]
    Malformed(String),

    /// Nesting deeper than the configured limit.
    #[error("Depth {depth} exceeds limit {limit}")]
    DepthExceeded { depth: usize, limit: usize },

    /// A list or map wider than the configured limit.
    #[error("Width {width} exceeds limit {limit}")]
    WidthExceeded { width: usize, limit: usize },

    /// An arena graph expands to more nodes than allowed.
    #[error("Value expands to more than {limit} nodes")]
    TooLarge { limit: usize },

    /// An arena graph refers back to one of its own ancestors.
    #[error("Cycle detected at arena node {0}")]
    Cycle(usize),

    /// An arena reference points outside the arena.
    #[error("Dangling arena reference {0}")]
    DanglingReference(usize),

    /// A map was given the same key twice.
    #[error("Duplicate map key: {0}")]
    DuplicateKey(String),

    /// NaN or an infinity.
    #[error("Non-finite float")]
    NonFiniteFloat,

    /// A float where the limits do not permit one.
    #[error("Floating-point values are not permitted")]
    FloatNotPermitted,

    /// Caller data carries a kernel control field.
    #[error("Reserved control field in caller data: {0}")]
    ReservedField(String),

    /// A variable site whose name is the empty string.
    #[error("Variable site with empty name")]
    EmptyVariableName,

    /// Empty, padded, or `<`-prefixed projection id.
    #[error("Invalid projection id: {0:?}")]
    InvalidProjectionId(String),

    /// Two projections in one set share an id.
    #[error("Duplicate projection id: {0}")]
    DuplicateProjectionId(String),

    /// More projections than one set may hold.
    #[error("Projection count {count} exceeds limit {limit}")]
    TooManyProjections { count: usize, limit: usize },
}

impl ValidationError {
    /// Reserved-field error for `key`, if it is reserved.
    pub(crate) fn reserved(key: &str) -> Option<Self> {
        is_reserved_key(key).then(|| Self::ReservedField(key.to_string()))
    }
}

/// A seed could not be turned into a trusted projection set.
///
/// Loading aborts entirely; no partial set is ever returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeedIntegrityError {
    /// The seed file could not be read.
    #[error("I/O error: {0}")]
    IoError(String),

    /// The seed is not valid JSON.
    #[error("Malformed seed: {0}")]
    Malformed(String),

    /// The document does not have the seed structure.
    #[error("Seed schema violation: {0}")]
    Schema(String),

    /// The schema marker names a format this loader does not read.
    #[error("Unsupported seed schema: {0}")]
    UnsupportedSchema(String),

    /// One projection failed validation.
    #[error("Invalid projection {id}: {source}")]
    InvalidProjection {
        id: String,
        #[source]
        source: ValidationError,
    },

    /// The projections are individually valid but cannot form a set.
    #[error("Invalid projection set: {0}")]
    InvalidSet(#[source] ValidationError),

    /// The canonical checksum differs from the expected one.
    #[error("Checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Expected projection ids are absent.
    #[error("Missing projections: {0:?}")]
    MissingProjections(Vec<String>),

    /// The fallback projection is not the last one.
    #[error("Fallback projection {fallback} must be last, found {last}")]
    FallbackNotLast { fallback: String, last: String },
}

/// Errors that can occur in the mured system.
///
/// - No silent failures
/// - Stalls, match failures and exhausted budgets are data, not errors
/// - The engine should never panic; all errors must be recoverable
#[derive(Debug, Error)]
pub enum MuredError {
    /// Input rejected at the boundary.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Seed rejected by the loader.
    #[error(transparent)]
    SeedIntegrity(#[from] SeedIntegrityError),

    /// An execution operation was attempted in the wrong state.
    #[error("Cannot {operation} while {status}")]
    InvalidTransition {
        operation: &'static str,
        status: ExecutionStatus,
    },

    /// A fix was aimed at a value the execution no longer holds.
    #[error("Fix targets {expected:?} but current value is {actual:?}")]
    FixTargetMismatch {
        expected: ValueHash,
        actual: ValueHash,
    },

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),

    /// The configuration could not be read.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

// =============================================================================
// TESTS
// =============================================================================
