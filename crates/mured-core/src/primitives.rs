//! # Innate Primitives
//!
//! Hardcoded runtime constants for the mured engine.
//!
//! These values are compiled into the binary. The numeric bounds are defaults;
//! callers narrow or widen them per execution through [`Limits`](crate::Limits),
//! but the reserved names below are fixed.
//!
//! ## Primitives
//!
//! 1. **Shape Primitive**: the spelling of variable sites and linked encodings.
//! 2. **Bound Primitive**: depth, width and step budgets.
//! 3. **Namespace Primitive**: control fields that caller data may never carry.

// =============================================================================
// SHAPE PRIMITIVES
// =============================================================================

/// Key of a variable site: `{"var": "<name>"}`.
pub const VAR_KEY: &str = "var";

/// Key of the normalization tag placed on the root of a linked encoding.
pub const TYPE_TAG_KEY: &str = "_type";

/// Tag value for a linked-list encoded sequence.
pub const LIST_TAG: &str = "list";

/// Tag value for a linked-list encoded map.
pub const DICT_TAG: &str = "dict";

/// Head field of a linked node.
pub const HEAD_KEY: &str = "head";

/// Tail field of a linked node.
pub const TAIL_KEY: &str = "tail";

// =============================================================================
// BOUND PRIMITIVES
// =============================================================================

/// Default maximum nesting depth of a value.
///
/// - A scalar has depth 0; every enclosing list or map adds one.
/// - Kept below the nesting limit of the JSON parser used at the boundary.
pub const MAX_DEPTH: usize = 100;

/// Default maximum breadth (list length or map size) at any single node.
pub const MAX_WIDTH: usize = 1024;

/// Default step budget for `run` when the caller does not supply one.
pub const DEFAULT_MAX_STEPS: usize = 1000;

/// Hard ceiling on the step budget of a single `run`.
///
/// Larger requests are clamped, never rejected.
pub const MAX_RUN_STEPS: usize = 50_000;

/// Maximum number of events a single execution keeps in its event log.
///
/// One full-budget `run` logs at most one event per step plus its halt, so a
/// single run is never truncated. Repeated stall/fix cycles can still fill it.
pub const MAX_TRACE_ENTRIES: usize = 2 * MAX_RUN_STEPS;

/// Maximum number of projections accepted in one projection set.
pub const MAX_PROJECTIONS: usize = 4096;

/// Maximum size of a seed file read from disk (16 MB).
pub const MAX_SEED_FILE_SIZE: u64 = 16 * 1024 * 1024;

// =============================================================================
// NAMESPACE PRIMITIVES
// =============================================================================

/// Control fields the kernel uses to carry phase state between sub-steps.
///
/// A caller-supplied value containing any of these keys, at any depth, is
/// rejected at the entry boundary so it cannot impersonate kernel state.
pub const RESERVED_KEYS: [&str; 5] = ["_mode", "_step", "_projs", "_match", "_bindings"];

/// Pattern id recorded for a stall where no projection matched.
///
/// Seed ids may not start with `<`, so this never collides with a real id.
pub const NO_MATCH_ID: &str = "<no-match>";

/// Reason string attached to closure evidence.
pub const SECOND_INDEPENDENT_STALL: &str = "second_independent_stall";

/// Schema marker every seed document must carry in `meta.schema`.
pub const SEED_SCHEMA: &str = "mured.seed/v1";

/// Returns true if `key` belongs to the kernel control namespace.
pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_keys_are_underscored() {
        for key in RESERVED_KEYS {
            assert!(key.starts_with('_'));
            assert!(is_reserved_key(key));
        }
    }

    #[test]
    fn shape_keys_are_not_reserved() {
        // The normalization tag is data, not kernel state.
        assert!(!is_reserved_key(TYPE_TAG_KEY));
        assert!(!is_reserved_key(HEAD_KEY));
        assert!(!is_reserved_key(VAR_KEY));
    }

    #[test]
    fn default_bounds_are_ordered() {
        assert!(DEFAULT_MAX_STEPS <= MAX_RUN_STEPS);
        assert!(MAX_TRACE_ENTRIES > MAX_RUN_STEPS + 2);
        assert!(MAX_DEPTH < 128);
    }
}
