//! # Value Arena
//!
//! Untrusted structure arrives as a graph, not a tree: nodes may be shared
//! or refer back to their own ancestors. The arena holds such a graph as
//! index-linked nodes, and [`MuArena::freeze`] is the only way out of it.
//! Freezing walks the graph with an explicit ancestor set, so a cycle is
//! reported as [`ValidationError::Cycle`] instead of being followed.

use crate::types::ValidationError;
use crate::value::{Limits, MuValue};
use std::collections::BTreeMap;

/// Upper bound on the size of a frozen tree.
///
/// Shared nodes are copied once per reference, so a small arena can describe
/// an exponentially large tree.
pub const MAX_FROZEN_NODES: usize = 1_000_000;

/// Index of a node inside a [`MuArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeRef(pub usize);

/// A node of the arena graph.
#[derive(Debug, Clone)]
pub(crate) enum ArenaNode {
    Leaf(MuValue),
    List(Vec<NodeRef>),
    Map(Vec<(String, NodeRef)>),
}

/// Index-linked value graph.
#[derive(Debug, Clone, Default)]
pub struct MuArena {
    nodes: Vec<ArenaNode>,
}

impl MuArena {
    /// Create an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if no node was added yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a scalar leaf. Containers must be built with `list`/`map`.
    pub fn leaf(&mut self, value: MuValue) -> Result<NodeRef, ValidationError> {
        if !value.is_scalar() {
            return Err(ValidationError::Malformed(format!(
                "arena leaf must be a scalar, got {}",
                value.kind()
            )));
        }
        Ok(self.add(ArenaNode::Leaf(value)))
    }

    /// Add an empty list node.
    pub fn list(&mut self) -> NodeRef {
        self.add(ArenaNode::List(Vec::new()))
    }

    /// Add an empty map node.
    pub fn map(&mut self) -> NodeRef {
        self.add(ArenaNode::Map(Vec::new()))
    }

    /// Append `child` to the list node `list`.
    pub fn push(&mut self, list: NodeRef, child: NodeRef) -> Result<(), ValidationError> {
        self.check(child)?;
        match self.nodes.get_mut(list.0) {
            Some(ArenaNode::List(children)) => {
                children.push(child);
                Ok(())
            }
            Some(_) => Err(ValidationError::Malformed(format!(
                "arena node {} is not a list",
                list.0
            ))),
            None => Err(ValidationError::DanglingReference(list.0)),
        }
    }

    /// Set `key` of the map node `map` to `child`.
    pub fn insert(
        &mut self,
        map: NodeRef,
        key: impl Into<String>,
        child: NodeRef,
    ) -> Result<(), ValidationError> {
        self.check(child)?;
        let key = key.into();
        match self.nodes.get_mut(map.0) {
            Some(ArenaNode::Map(entries)) => {
                if entries.iter().any(|(k, _)| *k == key) {
                    return Err(ValidationError::DuplicateKey(key));
                }
                entries.push((key, child));
                Ok(())
            }
            Some(_) => Err(ValidationError::Malformed(format!(
                "arena node {} is not a map",
                map.0
            ))),
            None => Err(ValidationError::DanglingReference(map.0)),
        }
    }

    pub(crate) fn node(&self, node: NodeRef) -> Option<&ArenaNode> {
        self.nodes.get(node.0)
    }

    fn add(&mut self, node: ArenaNode) -> NodeRef {
        self.nodes.push(node);
        NodeRef(self.nodes.len() - 1)
    }

    fn check(&self, node: NodeRef) -> Result<(), ValidationError> {
        if node.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(ValidationError::DanglingReference(node.0))
        }
    }

    /// Convert the graph reachable from `root` into an owned, validated tree.
    ///
    /// Fails on a cycle, on bound violations, and on floats the limits do not
    /// permit. Shared (non-cyclic) nodes are duplicated.
    pub fn freeze(&self, root: NodeRef, limits: &Limits) -> Result<MuValue, ValidationError> {
        enum Task<'a> {
            Visit(NodeRef, usize),
            List(NodeRef, usize),
            Map(NodeRef, Vec<&'a str>),
        }

        self.check(root)?;
        let mut on_path = vec![false; self.nodes.len()];
        let mut produced = 0usize;
        let mut tasks = vec![Task::Visit(root, 0)];
        let mut out: Vec<MuValue> = Vec::new();

        while let Some(task) = tasks.pop() {
            match task {
                Task::Visit(node, level) => {
                    produced += 1;
                    if produced > MAX_FROZEN_NODES {
                        return Err(ValidationError::TooLarge {
                            limit: MAX_FROZEN_NODES,
                        });
                    }
                    let Some(arena_node) = self.nodes.get(node.0) else {
                        return Err(ValidationError::DanglingReference(node.0));
                    };
                    if let ArenaNode::Leaf(value) = arena_node {
                        value.validate(limits)?;
                        out.push(value.clone());
                        continue;
                    }
                    if on_path[node.0] {
                        return Err(ValidationError::Cycle(node.0));
                    }
                    on_path[node.0] = true;

                    let width = match arena_node {
                        ArenaNode::List(children) => children.len(),
                        ArenaNode::Map(entries) => entries.len(),
                        ArenaNode::Leaf(_) => 0,
                    };
                    if level + 1 > limits.max_depth {
                        return Err(ValidationError::DepthExceeded {
                            depth: level + 1,
                            limit: limits.max_depth,
                        });
                    }
                    if width > limits.max_width {
                        return Err(ValidationError::WidthExceeded {
                            width,
                            limit: limits.max_width,
                        });
                    }

                    match arena_node {
                        ArenaNode::List(children) => {
                            tasks.push(Task::List(node, children.len()));
                            tasks.extend(children.iter().rev().map(|c| Task::Visit(*c, level + 1)));
                        }
                        ArenaNode::Map(entries) => {
                            let mut sorted: Vec<(&str, NodeRef)> =
                                entries.iter().map(|(k, c)| (k.as_str(), *c)).collect();
                            sorted.sort_by(|a, b| a.0.cmp(b.0));
                            tasks.push(Task::Map(node, sorted.iter().map(|(k, _)| *k).collect()));
                            tasks.extend(sorted.iter().rev().map(|(_, c)| Task::Visit(*c, level + 1)));
                        }
                        ArenaNode::Leaf(_) => {}
                    }
                }
                Task::List(node, len) => {
                    on_path[node.0] = false;
                    let items = out.split_off(out.len().saturating_sub(len));
                    out.push(MuValue::List(items));
                }
                Task::Map(node, keys) => {
                    on_path[node.0] = false;
                    let values = out.split_off(out.len().saturating_sub(keys.len()));
                    let map: BTreeMap<String, MuValue> =
                        keys.into_iter().map(str::to_owned).zip(values).collect();
                    out.push(MuValue::Map(map));
                }
            }
        }

        out.pop()
            .ok_or_else(|| ValidationError::Malformed("empty arena".to_string()))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn freeze_builds_sorted_tree() {
        let mut arena = MuArena::new();
        let root = arena.map();
        let one = arena.leaf(MuValue::Int(1)).expect("leaf");
        let list = arena.list();
        arena.push(list, one).expect("push");
        arena.insert(root, "z", one).expect("insert");
        arena.insert(root, "a", list).expect("insert");

        let value = arena.freeze(root, &Limits::default()).expect("freeze");
        assert_eq!(value.canonical_json(), r#"{"a":[1],"z":1}"#);
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let mut arena = MuArena::new();
        let list = arena.list();
        arena.push(list, list).expect("push");
        assert_eq!(
            arena.freeze(list, &Limits::default()),
            Err(ValidationError::Cycle(list.0))
        );
    }

    #[test]
    fn indirect_cycle_detected() {
        let mut arena = MuArena::new();
        let a = arena.map();
        let b = arena.map();
        let c = arena.list();
        arena.insert(a, "next", b).expect("insert");
        arena.insert(b, "items", c).expect("insert");
        arena.push(c, a).expect("push");
        assert!(matches!(
            arena.freeze(a, &Limits::default()),
            Err(ValidationError::Cycle(_))
        ));
    }

    #[test]
    fn shared_node_is_not_a_cycle() {
        let mut arena = MuArena::new();
        let shared = arena.map();
        let leaf = arena.leaf(MuValue::string("s")).expect("leaf");
        arena.insert(shared, "v", leaf).expect("insert");
        let root = arena.list();
        arena.push(root, shared).expect("push");
        arena.push(root, shared).expect("push");

        let value = arena.freeze(root, &Limits::default()).expect("freeze");
        assert_eq!(value.canonical_json(), r#"[{"v":"s"},{"v":"s"}]"#);
    }

    #[test]
    fn arena_rejects_bad_construction() {
        let mut arena = MuArena::new();
        let map = arena.map();
        let leaf = arena.leaf(MuValue::Null).expect("leaf");
        arena.insert(map, "k", leaf).expect("insert");
        assert_eq!(
            arena.insert(map, "k", leaf),
            Err(ValidationError::DuplicateKey("k".to_string()))
        );
        assert_eq!(
            arena.push(map, NodeRef(99)),
            Err(ValidationError::DanglingReference(99))
        );
        assert!(arena.leaf(MuValue::list([])).is_err());
    }

    #[test]
    fn freeze_enforces_depth() {
        let mut arena = MuArena::new();
        let mut current = arena.leaf(MuValue::Int(0)).expect("leaf");
        for _ in 0..5 {
            let list = arena.list();
            arena.push(list, current).expect("push");
            current = list;
        }
        let limits = Limits {
            max_depth: 4,
            ..Limits::default()
        };
        assert!(matches!(
            arena.freeze(current, &limits),
            Err(ValidationError::DepthExceeded { .. })
        ));
    }
}
