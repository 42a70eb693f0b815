//! # Classifier
//!
//! Tells linked encodings apart from ordinary maps.
//!
//! A sequence or map can be spelled as a chain of `{head, tail}` nodes. The
//! root of such a chain carries a `_type` tag (`"list"` or `"dict"`) set at
//! normalization time; that tag, and only that tag, makes a chain a linked
//! structure. An untagged map with user keys `head` and `tail` is an ordinary
//! map.
//!
//! ## Encoding
//!
//! ```text
//! []          -> {"_type": "list"}
//! [a, b]      -> {"_type": "list", "head": a, "tail": {"head": b, "tail": null}}
//! {}          -> {"_type": "dict"}
//! {"k": v}    -> {"_type": "dict", "head": {"head": "k", "tail": {"head": v, "tail": null}}, "tail": null}
//! ```
//!
//! Empty containers keep their tag, so an empty list never collapses into an
//! empty map or into null.

use crate::arena::{ArenaNode, MuArena, NodeRef};
use crate::primitives::{DICT_TAG, HEAD_KEY, LIST_TAG, TAIL_KEY, TYPE_TAG_KEY, VAR_KEY};
use crate::types::ValidationError;
use crate::value::{Limits, MuValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Structural shape of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    /// Null, bool, int, float or string.
    Atom,
    /// A variable site `{"var": name}`.
    Variable,
    /// A native list.
    List,
    /// An ordinary map.
    Map,
    /// A tagged head/tail chain encoding a sequence.
    LinkedList,
    /// A tagged head/tail chain of key/value pairs encoding a map.
    LinkedDict,
}

impl Shape {
    /// True for both native and linked sequences.
    #[must_use]
    pub fn is_sequence(self) -> bool {
        matches!(self, Self::List | Self::LinkedList)
    }
}

/// Classify a value.
#[must_use]
pub fn classify(value: &MuValue) -> Shape {
    match value {
        MuValue::List(_) => Shape::List,
        MuValue::Map(_) if value.var_name().is_some() => Shape::Variable,
        MuValue::Map(_) => match linked(value) {
            Some(Linked::Seq(_)) => Shape::LinkedList,
            Some(Linked::Dict(_)) => Shape::LinkedDict,
            None => Shape::Map,
        },
        _ => Shape::Atom,
    }
}

// =============================================================================
// VIEWS
// =============================================================================

/// A container seen through its encoding.
pub(crate) enum View<'a> {
    /// Not a container.
    Leaf,
    /// Items in order.
    Seq(Vec<&'a MuValue>),
    /// Entries sorted by key, keys unique.
    Dict(Vec<(&'a str, &'a MuValue)>),
}

impl<'a> View<'a> {
    /// Look up a key of a dict view.
    pub(crate) fn lookup(entries: &[(&'a str, &'a MuValue)], key: &str) -> Option<&'a MuValue> {
        entries
            .binary_search_by(|(k, _)| (*k).cmp(key))
            .ok()
            .and_then(|i| entries.get(i))
            .map(|(_, v)| *v)
    }
}

/// View a value as a sequence or dict regardless of native/linked encoding.
///
/// Variable sites are ordinary dicts here; callers that treat them
/// specially check for them first.
pub(crate) fn view(value: &MuValue) -> View<'_> {
    match value {
        MuValue::List(items) => View::Seq(items.iter().collect()),
        MuValue::Map(map) => match linked(value) {
            Some(Linked::Seq(items)) => View::Seq(items),
            Some(Linked::Dict(entries)) => View::Dict(entries),
            None => View::Dict(map.iter().map(|(k, v)| (k.as_str(), v)).collect()),
        },
        _ => View::Leaf,
    }
}

enum Linked<'a> {
    Seq(Vec<&'a MuValue>),
    Dict(Vec<(&'a str, &'a MuValue)>),
}

/// Decode a tagged linked structure. `None` means "not linked".
fn linked(value: &MuValue) -> Option<Linked<'_>> {
    let MuValue::Map(root) = value else {
        return None;
    };
    let tag = root.get(TYPE_TAG_KEY)?.as_str()?;
    if tag != LIST_TAG && tag != DICT_TAG {
        return None;
    }

    let mut items = Vec::new();
    match root.len() {
        1 => {}
        3 => {
            items.push(root.get(HEAD_KEY)?);
            let mut cursor = root.get(TAIL_KEY)?;
            loop {
                match cursor {
                    MuValue::Null => break,
                    MuValue::Map(node) if node.len() == 2 => {
                        items.push(node.get(HEAD_KEY)?);
                        cursor = node.get(TAIL_KEY)?;
                    }
                    _ => return None,
                }
            }
        }
        _ => return None,
    }

    if tag == LIST_TAG {
        return Some(Linked::Seq(items));
    }

    let mut entries: BTreeMap<&str, &MuValue> = BTreeMap::new();
    for item in items {
        let (key, value) = kv_pair(item)?;
        if entries.insert(key, value).is_some() {
            return None;
        }
    }
    Some(Linked::Dict(entries.into_iter().collect()))
}

/// Decode `{"head": key, "tail": {"head": value, "tail": null}}`.
fn kv_pair(item: &MuValue) -> Option<(&str, &MuValue)> {
    let MuValue::Map(pair) = item else {
        return None;
    };
    if pair.len() != 2 {
        return None;
    }
    let key = pair.get(HEAD_KEY)?.as_str()?;
    let MuValue::Map(rest) = pair.get(TAIL_KEY)? else {
        return None;
    };
    if rest.len() != 2 || !matches!(rest.get(TAIL_KEY)?, MuValue::Null) {
        return None;
    }
    Some((key, rest.get(HEAD_KEY)?))
}

// =============================================================================
// NORMALIZE / DENORMALIZE
// =============================================================================

/// Rewrite every native list and map into its tagged linked encoding.
///
/// Variable sites and scalars are kept as they are. Already-linked structures
/// are re-encoded from their items, so `normalize(normalize(x)) == normalize(x)`.
///
/// A chain nests one level per element, so the encoding of a valid value can
/// be deeper than `limits` allow. That is reported, never returned.
pub fn normalize(value: &MuValue, limits: &Limits) -> Result<MuValue, ValidationError> {
    let encoded = rebuild(value, encode_list, encode_dict);
    encoded.validate(limits)?;
    Ok(encoded)
}

/// Turn tagged linked encodings back into native lists and maps.
///
/// For values without `_type` keys, `denormalize(&normalize(x)) == x`.
#[must_use]
pub fn denormalize(value: &MuValue) -> MuValue {
    rebuild(value, MuValue::List, |entries| {
        MuValue::Map(entries.into_iter().collect())
    })
}

fn rebuild(
    root: &MuValue,
    seq_out: fn(Vec<MuValue>) -> MuValue,
    dict_out: fn(Vec<(String, MuValue)>) -> MuValue,
) -> MuValue {
    enum Task<'a> {
        Visit(&'a MuValue),
        Seq(usize),
        Dict(Vec<&'a str>),
    }

    let mut tasks = vec![Task::Visit(root)];
    let mut out: Vec<MuValue> = Vec::new();

    while let Some(task) = tasks.pop() {
        match task {
            Task::Visit(node) if node.var_name().is_some() => out.push(node.clone()),
            Task::Visit(node) => match view(node) {
                View::Leaf => out.push(node.clone()),
                View::Seq(items) => {
                    tasks.push(Task::Seq(items.len()));
                    tasks.extend(items.into_iter().rev().map(Task::Visit));
                }
                View::Dict(entries) => {
                    tasks.push(Task::Dict(entries.iter().map(|(k, _)| *k).collect()));
                    tasks.extend(entries.into_iter().rev().map(|(_, v)| Task::Visit(v)));
                }
            },
            Task::Seq(len) => {
                let items = out.split_off(out.len().saturating_sub(len));
                out.push(seq_out(items));
            }
            Task::Dict(keys) => {
                let values = out.split_off(out.len().saturating_sub(keys.len()));
                let entries = keys.into_iter().map(str::to_owned).zip(values).collect();
                out.push(dict_out(entries));
            }
        }
    }

    out.pop().unwrap_or_default()
}

fn link(head: MuValue, tail: MuValue) -> MuValue {
    MuValue::map([(HEAD_KEY, head), (TAIL_KEY, tail)])
}

fn encode_chain(items: Vec<MuValue>, tag: &str) -> MuValue {
    if items.is_empty() {
        return MuValue::map([(TYPE_TAG_KEY, MuValue::from(tag))]);
    }
    let mut chain = MuValue::Null;
    for item in items.into_iter().rev() {
        chain = link(item, chain);
    }
    if let MuValue::Map(root) = &mut chain {
        root.insert(TYPE_TAG_KEY.to_string(), MuValue::from(tag));
    }
    chain
}

fn encode_list(items: Vec<MuValue>) -> MuValue {
    encode_chain(items, LIST_TAG)
}

fn encode_dict(entries: Vec<(String, MuValue)>) -> MuValue {
    let pairs = entries
        .into_iter()
        .map(|(key, value)| link(MuValue::String(key), link(value, MuValue::Null)))
        .collect();
    encode_chain(pairs, DICT_TAG)
}

// =============================================================================
// ARENA CLASSIFICATION
// =============================================================================

/// Classify a node of an untrusted arena graph.
///
/// Walking the tail chain uses a visited set; a chain that loops back on
/// itself is not a linked structure and classifies as [`Shape::Map`].
#[must_use]
pub fn classify_arena(arena: &MuArena, root: NodeRef) -> Shape {
    let len = match arena.node(root) {
        Some(ArenaNode::Leaf(_)) | None => return Shape::Atom,
        Some(ArenaNode::List(_)) => return Shape::List,
        Some(ArenaNode::Map(entries)) => entries.len(),
    };

    if len == 1 && arena_str(arena, arena_entry(arena, root, VAR_KEY)).is_some() {
        return Shape::Variable;
    }

    let tag = match arena_str(arena, arena_entry(arena, root, TYPE_TAG_KEY)) {
        Some(tag) if tag == LIST_TAG || tag == DICT_TAG => tag,
        _ => return Shape::Map,
    };

    let mut heads = Vec::new();
    match len {
        1 => {}
        3 => {
            let mut visited = vec![false; arena.len()];
            let mut node = root;
            loop {
                let (Some(head), Some(tail)) = (
                    arena_entry(arena, node, HEAD_KEY),
                    arena_entry(arena, node, TAIL_KEY),
                ) else {
                    return Shape::Map;
                };
                heads.push(head);
                if arena_is_null(arena, Some(tail)) {
                    break;
                }
                if arena_map_len(arena, tail) != Some(2) || visited[tail.0] {
                    return Shape::Map;
                }
                visited[tail.0] = true;
                node = tail;
            }
        }
        _ => return Shape::Map,
    }

    if tag == LIST_TAG {
        return Shape::LinkedList;
    }

    let mut keys: Vec<&str> = Vec::new();
    for head in heads {
        let key = arena_str(arena, arena_entry(arena, head, HEAD_KEY));
        let rest = arena_entry(arena, head, TAIL_KEY);
        let well_formed = arena_map_len(arena, head) == Some(2)
            && rest.and_then(|r| arena_map_len(arena, r)) == Some(2)
            && rest.and_then(|r| arena_entry(arena, r, HEAD_KEY)).is_some()
            && arena_is_null(arena, rest.and_then(|r| arena_entry(arena, r, TAIL_KEY)));
        match key {
            Some(key) if well_formed && !keys.contains(&key) => keys.push(key),
            _ => return Shape::Map,
        }
    }
    Shape::LinkedDict
}

fn arena_entry(arena: &MuArena, node: NodeRef, key: &str) -> Option<NodeRef> {
    match arena.node(node)? {
        ArenaNode::Map(entries) => entries
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, child)| *child),
        _ => None,
    }
}

fn arena_str(arena: &MuArena, node: Option<NodeRef>) -> Option<&str> {
    match arena.node(node?)? {
        ArenaNode::Leaf(value) => value.as_str(),
        _ => None,
    }
}

fn arena_is_null(arena: &MuArena, node: Option<NodeRef>) -> bool {
    matches!(
        node.and_then(|n| arena.node(n)),
        Some(ArenaNode::Leaf(MuValue::Null))
    )
}

fn arena_map_len(arena: &MuArena, node: NodeRef) -> Option<usize> {
    match arena.node(node)? {
        ArenaNode::Map(entries) => Some(entries.len()),
        _ => None,
    }
}

// =============================================================================
// TESTS
// =============================================================================
