//! # Substituter
//!
//! Instantiates a projection body from the bindings of a match.
//!
//! The body is walked with an explicit work stack. Every container under
//! construction is a frame in an arena, linked to its parent frame by index;
//! a finished child is attached to its parent, and a frame whose last child
//! arrived is folded into its own parent in turn. Map keys are visited in
//! sorted order.
//!
//! A variable site is replaced by a copy of its bound value. Bound values are
//! inserted verbatim, never substituted again.

use crate::types::Bindings;
use crate::value::MuValue;
use std::collections::BTreeMap;

/// Outcome of substituting bindings into a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Substitution {
    /// Every variable site was bound.
    Complete(MuValue),
    /// The first variable site (in traversal order) with no binding.
    Unbound(String),
}

impl Substitution {
    /// The instantiated value, if substitution completed.
    #[must_use]
    pub fn into_value(self) -> Option<MuValue> {
        match self {
            Self::Complete(value) => Some(value),
            Self::Unbound(_) => None,
        }
    }
}

/// A container whose children are still being produced.
enum Partial {
    List(Vec<MuValue>),
    Map(BTreeMap<String, MuValue>),
}

struct Frame<'a> {
    parent: Option<usize>,
    key: Option<&'a str>,
    remaining: usize,
    partial: Partial,
}

/// A body node waiting to be instantiated.
struct Enter<'a> {
    node: &'a MuValue,
    parent: Option<usize>,
    key: Option<&'a str>,
}

/// Replace every variable site of `body` with its binding.
#[must_use]
pub fn substitute(body: &MuValue, bindings: &Bindings) -> Substitution {
    let mut frames: Vec<Frame<'_>> = Vec::new();
    let mut work = vec![Enter {
        node: body,
        parent: None,
        key: None,
    }];

    while let Some(Enter { node, parent, key }) = work.pop() {
        let produced = if let Some(name) = node.var_name() {
            match bindings.get(name) {
                Some(bound) => bound.clone(),
                None => return Substitution::Unbound(name.to_string()),
            }
        } else {
            match node {
                MuValue::List(items) if !items.is_empty() => {
                    let index = frames.len();
                    frames.push(Frame {
                        parent,
                        key,
                        remaining: items.len(),
                        partial: Partial::List(Vec::with_capacity(items.len())),
                    });
                    work.extend(items.iter().rev().map(|child| Enter {
                        node: child,
                        parent: Some(index),
                        key: None,
                    }));
                    continue;
                }
                MuValue::Map(map) if !map.is_empty() => {
                    let index = frames.len();
                    frames.push(Frame {
                        parent,
                        key,
                        remaining: map.len(),
                        partial: Partial::Map(BTreeMap::new()),
                    });
                    work.extend(map.iter().rev().map(|(k, child)| Enter {
                        node: child,
                        parent: Some(index),
                        key: Some(k.as_str()),
                    }));
                    continue;
                }
                other => other.clone(),
            }
        };

        if let Some(done) = attach(&mut frames, produced, parent, key) {
            return Substitution::Complete(done);
        }
    }

    // The root completes before the work stack drains.
    Substitution::Complete(MuValue::Null)
}

/// Attach a finished value to its parent, folding completed frames upward.
///
/// Returns the root once it is complete.
fn attach(
    frames: &mut [Frame<'_>],
    value: MuValue,
    parent: Option<usize>,
    key: Option<&str>,
) -> Option<MuValue> {
    let mut value = value;
    let mut parent = parent;
    let mut key = key.map(str::to_owned);

    loop {
        let Some(index) = parent else {
            return Some(value);
        };
        let frame = frames.get_mut(index)?;
        match &mut frame.partial {
            Partial::List(items) => items.push(value),
            Partial::Map(map) => {
                map.insert(key.take().unwrap_or_default(), value);
            }
        }
        frame.remaining -= 1;
        if frame.remaining > 0 {
            return None;
        }

        value = match std::mem::replace(&mut frame.partial, Partial::List(Vec::new())) {
            Partial::List(items) => MuValue::List(items),
            Partial::Map(map) => MuValue::Map(map),
        };
        key = frame.key.map(str::to_owned);
        parent = frame.parent;
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::value::Limits;

    fn parse(text: &str) -> MuValue {
        MuValue::parse(text, &Limits::default()).expect("parse")
    }

    fn bind(pairs: &[(&str, MuValue)]) -> Bindings {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn replaces_variable_sites() {
        let body = parse(r#"{"result": {"var": "v"}, "list": [{"var": "v"}, 2]}"#);
        let out = substitute(&body, &bind(&[("v", MuValue::Int(1))]));
        assert_eq!(
            out,
            Substitution::Complete(parse(r#"{"list": [1, 2], "result": 1}"#))
        );
    }

    #[test]
    fn bare_variable_body() {
        let out = substitute(&MuValue::var("n"), &bind(&[("n", MuValue::from("zero"))]));
        assert_eq!(out.into_value(), Some(MuValue::from("zero")));
    }

    #[test]
    fn unbound_variable_is_reported() {
        let body = parse(r#"{"a": {"var": "x"}, "b": {"var": "y"}}"#);
        let out = substitute(&body, &bind(&[("y", MuValue::Null)]));
        assert_eq!(out, Substitution::Unbound("x".to_string()));
    }

    #[test]
    fn first_unbound_in_sorted_order() {
        let body = parse(r#"{"z": {"var": "late"}, "a": {"var": "early"}}"#);
        assert_eq!(
            substitute(&body, &Bindings::new()),
            Substitution::Unbound("early".to_string())
        );
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let out = substitute(&MuValue::var("x"), &bind(&[("x", MuValue::var("y"))]));
        assert_eq!(out.into_value(), Some(MuValue::var("y")));
    }

    #[test]
    fn empty_containers_survive() {
        let body = parse(r#"{"l": [], "m": {}, "n": [[]]}"#);
        assert_eq!(
            substitute(&body, &Bindings::new()).into_value(),
            Some(body.clone())
        );
    }

    #[test]
    fn deep_body_without_recursion() {
        let mut body = MuValue::var("leaf");
        for _ in 0..50_000 {
            body = MuValue::list([body]);
        }
        let out = substitute(&body, &bind(&[("leaf", MuValue::Int(7))]))
            .into_value()
            .expect("complete");
        assert_eq!(out.extent().depth, 50_000);
    }
}
