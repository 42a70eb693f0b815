//! # Mu Values
//!
//! The universal value type of the engine: JSON-shaped trees.
//!
//! - Values are immutable once built; every rewrite produces a new value.
//! - Maps are `BTreeMap`s, so iteration is always in sorted key order.
//! - Equality is content-hash equality over the canonical serialization.
//! - Clone, drop, equality, hashing and validation all walk the tree with an
//!   explicit stack. Nothing here recurses on the host call stack, so a value
//!   as deep as the limits allow is safe on any thread.

use crate::primitives::{MAX_DEPTH, MAX_WIDTH, VAR_KEY};
use crate::types::{Resource, ValidationError, ValueHash};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// LIMITS
// =============================================================================

/// Bounds a value must respect to be admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Limits {
    /// Maximum nesting depth (a scalar has depth 0).
    pub max_depth: usize,
    /// Maximum length of any list and size of any map.
    pub max_width: usize,
    /// Whether floats are admitted at all.
    pub allow_floats: bool,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_depth: MAX_DEPTH,
            max_width: MAX_WIDTH,
            allow_floats: false,
        }
    }
}

impl Limits {
    /// The same limits with floats permitted.
    #[must_use]
    pub fn with_floats(mut self) -> Self {
        self.allow_floats = true;
        self
    }
}

// =============================================================================
// MU VALUE
// =============================================================================

/// A Mu value.
#[derive(Default)]
pub enum MuValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<MuValue>),
    Map(BTreeMap<String, MuValue>),
}

/// Size measurements of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent {
    /// Nesting depth.
    pub depth: usize,
    /// Largest list length or map size.
    pub width: usize,
    /// Total number of nodes, scalars included.
    pub nodes: usize,
}

impl MuValue {
    /// A string value.
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// A list value.
    #[must_use]
    pub fn list(items: impl IntoIterator<Item = MuValue>) -> Self {
        Self::List(items.into_iter().collect())
    }

    /// A map value. Later duplicates of a key replace earlier ones.
    #[must_use]
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, MuValue)>) -> Self {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// A variable site `{"var": name}`.
    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::map([(VAR_KEY, Self::String(name.into()))])
    }

    /// If this is a variable site, its name.
    #[must_use]
    pub fn var_name(&self) -> Option<&str> {
        match self {
            Self::Map(map) if map.len() == 1 => match map.get(VAR_KEY) {
                Some(Self::String(name)) => Some(name),
                _ => None,
            },
            _ => None,
        }
    }

    /// True for null, bool, int, float and string.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Self::List(_) | Self::Map(_))
    }

    /// Get the value as a string slice.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a key of a map value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&MuValue> {
        match self {
            Self::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Name of the variant, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Direct children in canonical order (list order, sorted map keys).
    fn children(&self) -> Box<dyn DoubleEndedIterator<Item = &MuValue> + '_> {
        match self {
            Self::List(items) => Box::new(items.iter()),
            Self::Map(map) => Box::new(map.values()),
            _ => Box::new(std::iter::empty()),
        }
    }

    /// Breadth of this node alone.
    fn breadth(&self) -> usize {
        match self {
            Self::List(items) => items.len(),
            Self::Map(map) => map.len(),
            _ => 0,
        }
    }

    // =========================================================================
    // MEASUREMENT & VALIDATION
    // =========================================================================

    /// Measure depth, width and node count.
    #[must_use]
    pub fn extent(&self) -> Extent {
        let mut extent = Extent::default();
        let mut stack: Vec<(&MuValue, usize)> = vec![(self, 0)];

        while let Some((node, level)) = stack.pop() {
            extent.nodes = extent.nodes.saturating_add(1);
            if !node.is_scalar() {
                extent.depth = extent.depth.max(level + 1);
                extent.width = extent.width.max(node.breadth());
                stack.extend(node.children().map(|child| (child, level + 1)));
            }
        }

        extent
    }

    /// The budget this value overruns, if any.
    #[must_use]
    pub fn exceeds(&self, limits: &Limits) -> Option<Resource> {
        let extent = self.extent();
        if extent.depth > limits.max_depth {
            Some(Resource::Depth)
        } else if extent.width > limits.max_width {
            Some(Resource::Width)
        } else {
            None
        }
    }

    /// Validate against `limits`.
    ///
    /// Stops at the first violation, so the reported depth or width is the
    /// first one found past the limit rather than the maximum.
    pub fn validate(&self, limits: &Limits) -> Result<(), ValidationError> {
        let mut stack: Vec<(&MuValue, usize)> = vec![(self, 0)];

        while let Some((node, level)) = stack.pop() {
            match node {
                Self::Float(f) => {
                    if !f.is_finite() {
                        return Err(ValidationError::NonFiniteFloat);
                    }
                    if !limits.allow_floats {
                        return Err(ValidationError::FloatNotPermitted);
                    }
                }
                Self::List(_) | Self::Map(_) => {
                    let depth = level + 1;
                    if depth > limits.max_depth {
                        return Err(ValidationError::DepthExceeded {
                            depth,
                            limit: limits.max_depth,
                        });
                    }
                    let width = node.breadth();
                    if width > limits.max_width {
                        return Err(ValidationError::WidthExceeded {
                            width,
                            limit: limits.max_width,
                        });
                    }
                    stack.extend(node.children().map(|child| (child, depth)));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// First kernel control field found anywhere in the value.
    pub fn ensure_no_reserved(&self) -> Result<(), ValidationError> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if let Self::Map(map) = node {
                if let Some(err) = map.keys().find_map(|key| ValidationError::reserved(key)) {
                    return Err(err);
                }
            }
            stack.extend(node.children());
        }
        Ok(())
    }

    /// Names of every variable site, in traversal order, repeats included.
    #[must_use]
    pub fn variable_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node.var_name() {
                Some(name) => names.push(name),
                None => stack.extend(node.children().rev()),
            }
        }
        names
    }

    // =========================================================================
    // CANONICAL FORM
    // =========================================================================

    /// Canonical JSON: sorted keys, no whitespace, shortest float form.
    #[must_use]
    pub fn canonical_json(&self) -> String {
        enum Token<'a> {
            Value(&'a MuValue),
            Key(&'a str),
            Raw(&'static str),
        }

        let mut out = String::new();
        let mut stack = vec![Token::Value(self)];

        while let Some(token) = stack.pop() {
            match token {
                Token::Raw(s) => out.push_str(s),
                Token::Key(key) => {
                    write_json_string(&mut out, key);
                    out.push(':');
                }
                Token::Value(value) => match value {
                    Self::Null => out.push_str("null"),
                    Self::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
                    Self::Int(i) => out.push_str(&i.to_string()),
                    Self::Float(f) => match serde_json::Number::from_f64(*f) {
                        Some(n) => out.push_str(&n.to_string()),
                        None => out.push_str(&f.to_string()),
                    },
                    Self::String(s) => write_json_string(&mut out, s),
                    Self::List(items) => {
                        out.push('[');
                        stack.push(Token::Raw("]"));
                        for (i, item) in items.iter().enumerate().rev() {
                            stack.push(Token::Value(item));
                            if i > 0 {
                                stack.push(Token::Raw(","));
                            }
                        }
                    }
                    Self::Map(map) => {
                        out.push('{');
                        stack.push(Token::Raw("}"));
                        for (i, (key, item)) in map.iter().enumerate().rev() {
                            stack.push(Token::Value(item));
                            stack.push(Token::Key(key));
                            if i > 0 {
                                stack.push(Token::Raw(","));
                            }
                        }
                    }
                },
            }
        }

        out
    }

    /// Content hash of the canonical form.
    #[must_use]
    pub fn content_hash(&self) -> ValueHash {
        ValueHash::of_bytes(self.canonical_json().as_bytes())
    }

    // =========================================================================
    // BOUNDARY CONVERSION
    // =========================================================================

    /// Parse JSON text into a validated value.
    pub fn parse(text: &str, limits: &Limits) -> Result<Self, ValidationError> {
        let json: serde_json::Value =
            serde_json::from_str(text).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        Self::from_json(&json, limits)
    }

    /// Convert a JSON value, enforcing `limits` along the way.
    pub fn from_json(json: &serde_json::Value, limits: &Limits) -> Result<Self, ValidationError> {
        use serde_json::Value as Json;

        enum Task<'a> {
            Visit(&'a Json, usize),
            List(usize),
            Map(Vec<&'a str>),
        }

        let mut tasks = vec![Task::Visit(json, 0)];
        let mut out: Vec<MuValue> = Vec::new();

        while let Some(task) = tasks.pop() {
            match task {
                Task::Visit(node, level) => match node {
                    Json::Null => out.push(Self::Null),
                    Json::Bool(b) => out.push(Self::Bool(*b)),
                    Json::String(s) => out.push(Self::String(s.clone())),
                    Json::Number(n) => out.push(number_to_mu(n, limits)?),
                    Json::Array(items) => {
                        check_container(level, items.len(), limits)?;
                        tasks.push(Task::List(items.len()));
                        tasks.extend(items.iter().rev().map(|c| Task::Visit(c, level + 1)));
                    }
                    Json::Object(map) => {
                        check_container(level, map.len(), limits)?;
                        let mut entries: Vec<(&str, &Json)> =
                            map.iter().map(|(k, v)| (k.as_str(), v)).collect();
                        entries.sort_by(|a, b| a.0.cmp(b.0));
                        tasks.push(Task::Map(entries.iter().map(|(k, _)| *k).collect()));
                        tasks.extend(entries.iter().rev().map(|(_, v)| Task::Visit(*v, level + 1)));
                    }
                },
                Task::List(len) => {
                    let items = out.split_off(out.len().saturating_sub(len));
                    out.push(Self::List(items));
                }
                Task::Map(keys) => {
                    let values = out.split_off(out.len().saturating_sub(keys.len()));
                    out.push(Self::Map(
                        keys.into_iter().map(str::to_owned).zip(values).collect(),
                    ));
                }
            }
        }

        out.pop()
            .ok_or_else(|| ValidationError::Malformed("empty document".to_string()))
    }

    /// Convert to a JSON value (for pretty-printing at the boundary).
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        enum Task<'a> {
            Visit(&'a MuValue),
            List(usize),
            Map(Vec<&'a str>),
        }

        let mut tasks = vec![Task::Visit(self)];
        let mut out: Vec<Json> = Vec::new();

        while let Some(task) = tasks.pop() {
            match task {
                Task::Visit(node) => match node {
                    Self::Null => out.push(Json::Null),
                    Self::Bool(b) => out.push(Json::Bool(*b)),
                    Self::Int(i) => out.push(Json::from(*i)),
                    Self::Float(f) => out.push(
                        serde_json::Number::from_f64(*f)
                            .map(Json::Number)
                            .unwrap_or(Json::Null),
                    ),
                    Self::String(s) => out.push(Json::String(s.clone())),
                    Self::List(items) => {
                        tasks.push(Task::List(items.len()));
                        tasks.extend(items.iter().rev().map(Task::Visit));
                    }
                    Self::Map(map) => {
                        tasks.push(Task::Map(map.keys().map(String::as_str).collect()));
                        tasks.extend(map.values().rev().map(Task::Visit));
                    }
                },
                Task::List(len) => {
                    let items = out.split_off(out.len().saturating_sub(len));
                    out.push(Json::Array(items));
                }
                Task::Map(keys) => {
                    let values = out.split_off(out.len().saturating_sub(keys.len()));
                    out.push(Json::Object(
                        keys.into_iter().map(str::to_owned).zip(values).collect(),
                    ));
                }
            }
        }

        out.pop().unwrap_or(Json::Null)
    }
}

fn check_container(level: usize, width: usize, limits: &Limits) -> Result<(), ValidationError> {
    let depth = level + 1;
    if depth > limits.max_depth {
        return Err(ValidationError::DepthExceeded {
            depth,
            limit: limits.max_depth,
        });
    }
    if width > limits.max_width {
        return Err(ValidationError::WidthExceeded {
            width,
            limit: limits.max_width,
        });
    }
    Ok(())
}

fn number_to_mu(n: &serde_json::Number, limits: &Limits) -> Result<MuValue, ValidationError> {
    if let Some(i) = n.as_i64() {
        return Ok(MuValue::Int(i));
    }
    if n.is_u64() {
        return Err(ValidationError::Malformed(format!(
            "integer {} out of range",
            n
        )));
    }
    match n.as_f64() {
        Some(f) if !f.is_finite() => Err(ValidationError::NonFiniteFloat),
        Some(_) if !limits.allow_floats => Err(ValidationError::FloatNotPermitted),
        Some(f) => Ok(MuValue::Float(f)),
        None => Err(ValidationError::Malformed(format!("unreadable number {}", n))),
    }
}

/// Write `s` as a JSON string literal.
fn write_json_string(out: &mut String, s: &str) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

// =============================================================================
// STACK-SAFE TRAIT IMPLEMENTATIONS
// =============================================================================

impl Clone for MuValue {
    fn clone(&self) -> Self {
        enum Task<'a> {
            Visit(&'a MuValue),
            List(usize),
            Map(Vec<&'a str>),
        }

        let mut tasks = vec![Task::Visit(self)];
        let mut out: Vec<MuValue> = Vec::new();

        while let Some(task) = tasks.pop() {
            match task {
                Task::Visit(node) => match node {
                    Self::Null => out.push(Self::Null),
                    Self::Bool(b) => out.push(Self::Bool(*b)),
                    Self::Int(i) => out.push(Self::Int(*i)),
                    Self::Float(f) => out.push(Self::Float(*f)),
                    Self::String(s) => out.push(Self::String(s.clone())),
                    Self::List(items) => {
                        tasks.push(Task::List(items.len()));
                        tasks.extend(items.iter().rev().map(Task::Visit));
                    }
                    Self::Map(map) => {
                        tasks.push(Task::Map(map.keys().map(String::as_str).collect()));
                        tasks.extend(map.values().rev().map(Task::Visit));
                    }
                },
                Task::List(len) => {
                    let items = out.split_off(out.len().saturating_sub(len));
                    out.push(Self::List(items));
                }
                Task::Map(keys) => {
                    let values = out.split_off(out.len().saturating_sub(keys.len()));
                    out.push(Self::Map(
                        keys.into_iter().map(str::to_owned).zip(values).collect(),
                    ));
                }
            }
        }

        out.pop().unwrap_or_default()
    }
}

impl Drop for MuValue {
    fn drop(&mut self) {
        let mut pending: Vec<MuValue> = match self {
            Self::List(items) if !items.is_empty() => std::mem::take(items),
            Self::Map(map) if !map.is_empty() => std::mem::take(map).into_values().collect(),
            _ => return,
        };

        // Children are detached before each node drops, so every nested
        // drop sees an empty container and returns immediately.
        while let Some(mut node) = pending.pop() {
            match &mut node {
                Self::List(items) => pending.append(items),
                Self::Map(map) => pending.extend(std::mem::take(map).into_values()),
                _ => {}
            }
        }
    }
}

impl PartialEq for MuValue {
    fn eq(&self, other: &Self) -> bool {
        self.content_hash() == other.content_hash()
    }
}

impl Eq for MuValue {}

impl fmt::Debug for MuValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MuValue({})", self.canonical_json())
    }
}

impl fmt::Display for MuValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_json())
    }
}

impl From<bool> for MuValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for MuValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<&str> for MuValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for MuValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

// =============================================================================
// TESTS
// =============================================================================
