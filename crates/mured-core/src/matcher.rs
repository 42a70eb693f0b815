//! # Matcher
//!
//! Structural pattern matching with variable binding.
//!
//! Rules, first applicable wins:
//! 1. A scalar pattern matches an identical scalar (null, bool, int, float, string).
//! 2. A variable site matches anything. The first occurrence of a name binds;
//!    later occurrences match without comparing (no unification).
//! 3. A sequence pattern matches a sequence value of the same length,
//!    element by element.
//! 4. A dict pattern matches a dict value when every pattern key is present
//!    in the value and matches. Extra value keys are allowed.
//! 5. Anything else fails.
//!
//! Sequences and dicts are seen through the classifier, so a native list and
//! its tagged linked encoding are interchangeable on either side. When that
//! comparison fails and the pattern is an ordinary non-empty map, its keys are
//! matched against the value's raw keys instead (rule 4 on the encoding
//! itself), so `{"head": .., "tail": ..}` destructures a linked list.
//!
//! Traversal keeps pending (pattern, value) pairs on an explicit frame stack.
//! Siblings are visited in order (list order, sorted keys), which fixes which
//! occurrence of a repeated variable is "first".

use crate::classify::{Shape, View, classify, view};
use crate::types::{Bindings, MatchResult};
use crate::value::{Limits, MuValue};

type Pairs<'a> = Vec<(&'a MuValue, &'a MuValue)>;

/// One pending comparison.
struct Frame<'a> {
    pattern: &'a MuValue,
    value: &'a MuValue,
    depth: usize,
}

/// Pattern matcher bounded by a depth limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct Matcher {
    limits: Limits,
}

impl Matcher {
    /// Create a matcher with the given limits.
    #[must_use]
    pub const fn new(limits: Limits) -> Self {
        Self { limits }
    }

    /// Match `pattern` against `value`.
    ///
    /// Never fails with an error: a value the pattern does not describe, or a
    /// frame nested past the depth limit, is [`MatchResult::Failure`].
    #[must_use]
    pub fn match_pattern(&self, pattern: &MuValue, value: &MuValue) -> MatchResult {
        let mut bindings = Bindings::new();
        let mut frames = vec![Frame {
            pattern,
            value,
            depth: 0,
        }];

        while let Some(frame) = frames.pop() {
            if frame.depth > self.limits.max_depth {
                return MatchResult::Failure;
            }

            if frame.pattern.is_scalar() {
                if !same_scalar(frame.pattern, frame.value) {
                    return MatchResult::Failure;
                }
                continue;
            }

            if let Some(name) = frame.pattern.var_name() {
                if !bindings.contains_key(name) {
                    bindings.insert(name.to_string(), frame.value.clone());
                }
                continue;
            }

            let Some(pairs) = encoded_pairs(frame.pattern, frame.value)
                .or_else(|| raw_pairs(frame.pattern, frame.value))
            else {
                return MatchResult::Failure;
            };
            let depth = frame.depth + 1;
            frames.extend(
                pairs
                    .into_iter()
                    .rev()
                    .map(|(pattern, value)| Frame {
                        pattern,
                        value,
                        depth,
                    }),
            );
        }

        MatchResult::Success(bindings)
    }
}

/// Match with default limits.
#[must_use]
pub fn match_pattern(pattern: &MuValue, value: &MuValue) -> MatchResult {
    Matcher::default().match_pattern(pattern, value)
}

/// Child pairs of two containers compared through their encodings.
///
/// `None` when the views disagree: a sequence against a dict, unequal
/// lengths, or a pattern key the value lacks.
fn encoded_pairs<'a>(pattern: &'a MuValue, value: &'a MuValue) -> Option<Pairs<'a>> {
    match (view(pattern), view(value)) {
        (View::Seq(patterns), View::Seq(values)) => {
            (patterns.len() == values.len()).then(|| patterns.into_iter().zip(values).collect())
        }
        (View::Dict(patterns), View::Dict(values)) => patterns
            .into_iter()
            .map(|(key, pattern)| View::lookup(&values, key).map(|value| (pattern, value)))
            .collect(),
        _ => None,
    }
}

/// Child pairs of an ordinary map pattern against the raw keys of a map value.
///
/// Lets a pattern take a linked encoding apart by `_type`, `head` and `tail`.
/// An empty pattern is left to the encoded comparison, so `{}` never matches
/// a sequence in either encoding.
fn raw_pairs<'a>(pattern: &'a MuValue, value: &'a MuValue) -> Option<Pairs<'a>> {
    let (MuValue::Map(patterns), MuValue::Map(values)) = (pattern, value) else {
        return None;
    };
    if patterns.is_empty() || classify(pattern) != Shape::Map {
        return None;
    }
    patterns
        .iter()
        .map(|(key, pattern)| values.get(key).map(|value| (pattern, value)))
        .collect()
}

/// Scalar equality with the same outcome as comparing content hashes.
///
/// Floats compare by bit pattern, so `0.0` and `-0.0` differ exactly as their
/// canonical forms do.
fn same_scalar(pattern: &MuValue, value: &MuValue) -> bool {
    match (pattern, value) {
        (MuValue::Null, MuValue::Null) => true,
        (MuValue::Bool(a), MuValue::Bool(b)) => a == b,
        (MuValue::Int(a), MuValue::Int(b)) => a == b,
        (MuValue::Float(a), MuValue::Float(b)) => a.to_bits() == b.to_bits(),
        (MuValue::String(a), MuValue::String(b)) => a == b,
        _ => false,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::classify::normalize;

    fn parse(text: &str) -> MuValue {
        MuValue::parse(text, &Limits::default().with_floats()).expect("parse")
    }

    fn linked(text: &str) -> MuValue {
        normalize(&parse(text), &Limits::default()).expect("normalize")
    }

    fn bindings(pattern: &str, value: &str) -> Option<Bindings> {
        match_pattern(&parse(pattern), &parse(value)).into_bindings()
    }

    fn bindings_of(pattern: &str, value: &MuValue) -> Bindings {
        match_pattern(&parse(pattern), value)
            .into_bindings()
            .expect("match")
    }

    #[test]
    fn scalars_match_by_equality() {
        assert!(bindings("1", "1").is_some());
        assert!(bindings(r#""a""#, r#""a""#).is_some());
        assert!(bindings("null", "null").is_some());
        assert!(bindings("1", "2").is_none());
        assert!(bindings("1", "1.0").is_none());
        assert!(bindings("0.0", "-0.0").is_none());
        assert!(bindings("1", "[1]").is_none());
    }

    #[test]
    fn variable_binds_anything() {
        let b = bindings(r#"{"var": "x"}"#, r#"{"deep": [1, 2]}"#).expect("match");
        assert_eq!(b.get("x"), Some(&parse(r#"{"deep": [1, 2]}"#)));
    }

    #[test]
    fn map_matching_is_open() {
        let b = bindings(r#"{"x": {"var": "v"}}"#, r#"{"x": 1, "extra": 2}"#).expect("match");
        assert_eq!(b.get("v"), Some(&MuValue::Int(1)));
        assert!(bindings(r#"{"x": 1, "y": 2}"#, r#"{"x": 1}"#).is_none());
    }

    #[test]
    fn lists_require_equal_length() {
        assert!(bindings(r#"[{"var": "a"}, 2]"#, "[1, 2]").is_some());
        assert!(bindings(r#"[{"var": "a"}]"#, "[1, 2]").is_none());
        assert!(bindings("[]", "[]").is_some());
    }

    #[test]
    fn empty_list_does_not_match_empty_map() {
        assert!(bindings("[]", "{}").is_none());
        assert!(bindings("{}", "[]").is_none());
        assert!(bindings("{}", r#"{"a": 1}"#).is_some());
    }

    #[test]
    fn first_occurrence_wins() {
        let b = bindings(r#"[{"var": "x"}, {"var": "x"}]"#, "[1, 2]").expect("match");
        assert_eq!(b.get("x"), Some(&MuValue::Int(1)));

        // Sorted key order decides the first occurrence inside maps.
        let b = bindings(
            r#"{"b": {"var": "x"}, "a": {"var": "x"}}"#,
            r#"{"a": "first", "b": "second"}"#,
        )
        .expect("match");
        assert_eq!(b.get("x"), Some(&MuValue::from("first")));
    }

    #[test]
    fn native_pattern_matches_linked_value() {
        let value = linked(r#"[1, {"k": 2}]"#);
        let b = match_pattern(&parse(r#"[{"var": "h"}, {"k": {"var": "v"}}]"#), &value)
            .into_bindings()
            .expect("match");
        assert_eq!(b.get("h"), Some(&MuValue::Int(1)));
        assert_eq!(b.get("v"), Some(&MuValue::Int(2)));
    }

    #[test]
    fn head_tail_pattern_destructures_linked_list() {
        let value = linked("[1, 2]");
        let b = match_pattern(&parse(r#"{"head": {"var": "h"}, "tail": {"var": "t"}}"#), &value)
            .into_bindings()
            .expect("match");
        assert_eq!(b.get("h"), Some(&MuValue::Int(1)));
        assert_eq!(b.get("t"), Some(&parse(r#"{"head": 2, "tail": null}"#)));

        let tagged = parse(r#"{"_type": "list", "head": {"var": "h"}, "tail": {"var": "t"}}"#);
        let b = match_pattern(&tagged, &value).into_bindings().expect("match");
        assert_eq!(b.get("h"), Some(&MuValue::Int(1)));

        assert!(!match_pattern(&tagged, &linked(r#"{"a": 1}"#)).is_success());
        assert!(!match_pattern(&tagged, &parse("[1, 2]")).is_success());
    }

    #[test]
    fn map_pattern_on_linked_dict_prefers_entries() {
        let value = linked(r#"{"a": 1, "head": 5}"#);
        let b = bindings_of(r#"{"head": {"var": "v"}}"#, &value);
        assert_eq!(b.get("v"), Some(&MuValue::Int(5)));

        let single = linked(r#"{"a": 1}"#);
        let b = bindings_of(r#"{"_type": {"var": "tag"}, "tail": {"var": "t"}}"#, &single);
        assert_eq!(b.get("tag"), Some(&MuValue::from("dict")));
        assert_eq!(b.get("t"), Some(&MuValue::Null));
    }

    #[test]
    fn empty_map_pattern_never_matches_a_sequence() {
        assert!(!match_pattern(&parse("{}"), &linked("[]")).is_success());
        assert!(!match_pattern(&parse("{}"), &linked("[1]")).is_success());
        assert!(match_pattern(&parse("{}"), &linked("{}")).is_success());
    }

    #[test]
    fn head_tail_user_map_is_not_a_sequence() {
        let value = parse(r#"{"head": 1, "tail": null}"#);
        assert!(match_pattern(&parse("[1]"), &value).into_bindings().is_none());
        assert!(match_pattern(&parse(r#"{"head": {"var": "h"}}"#), &value).is_success());
    }

    #[test]
    fn value_side_var_site_is_data() {
        let b = bindings(r#"{"var": {"var": "n"}}"#, r#"{"var": "x"}"#).expect("match");
        assert_eq!(b.get("n"), Some(&MuValue::from("x")));
    }

    #[test]
    fn depth_limit_fails_closed() {
        let matcher = Matcher::new(Limits {
            max_depth: 1,
            ..Limits::default()
        });
        let pattern = parse(r#"{"a": {"b": {"var": "x"}}}"#);
        let value = parse(r#"{"a": {"b": 1}}"#);
        assert_eq!(matcher.match_pattern(&pattern, &value), MatchResult::Failure);
        assert!(match_pattern(&pattern, &value).is_success());
    }
}
