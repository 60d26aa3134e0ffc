// src/changes/tree.rs

//! Path-segment trie over container filesystem change records.
//!
//! The daemon reports every touched path, including each ancestor directory
//! of a change. Inserting the flat list into a trie collapses that noise:
//! the leaves are the paths that actually need copying, and the tree shape
//! determines the smallest set of recursive fetches that covers them.
//!
//! Children are kept in a `BTreeMap` so every traversal is lexicographic and
//! two walks over an unmodified tree produce identical output.

use std::collections::BTreeMap;

use super::ChangeKind;

#[derive(Debug, Default)]
struct Node {
    children: BTreeMap<String, Node>,
    kind: Option<ChangeKind>,
}

impl Node {
    /// A leaf is a node without children. Whether a kind was ever recorded
    /// does not matter; intermediate directories stay unclassified.
    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

fn join(prefix: &str, segment: &str) -> String {
    if prefix == "/" {
        format!("/{segment}")
    } else {
        format!("{prefix}/{segment}")
    }
}

/// Trie of changed paths, keyed by `/`-separated segments.
#[derive(Debug, Default)]
pub struct ChangeTree {
    root: Node,
}

impl ChangeTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from `(path, kind)` pairs.
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, ChangeKind)>,
    {
        let mut tree = Self::new();
        for (path, kind) in records {
            tree.insert(path, kind);
        }
        tree
    }

    /// True when the tree holds no paths at all.
    pub fn is_empty(&self) -> bool {
        self.root.is_leaf()
    }

    /// Insert one changed path and classify its terminal node.
    ///
    /// Intermediate nodes are created on demand here and only here; read
    /// operations never create nodes as a side effect of looking one up.
    pub fn insert(&mut self, path: &str, kind: ChangeKind) {
        let mut node = &mut self.root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.kind = Some(kind);
    }

    /// Every leaf path, in lexicographic order.
    ///
    /// The result is a fresh vector on each call; repeated calls over an
    /// unmodified tree return identical sequences.
    pub fn leaves(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![(&self.root, String::from("/"))];
        while let Some((node, prefix)) = stack.pop() {
            if node.is_leaf() {
                out.push(prefix);
                continue;
            }
            for (name, child) in node.children.iter().rev() {
                stack.push((child, join(&prefix, name)));
            }
        }
        out
    }

    /// Leaves whose recorded kind is not `Created`, with their kind.
    pub fn modified_leaves(&self) -> Vec<(ChangeKind, String)> {
        let mut out = Vec::new();
        let mut stack = vec![(&self.root, String::from("/"))];
        while let Some((node, prefix)) = stack.pop() {
            if node.is_leaf() {
                if let Some(kind) = node.kind
                    && kind != ChangeKind::Created
                {
                    out.push((kind, prefix));
                }
                continue;
            }
            for (name, child) in node.children.iter().rev() {
                stack.push((child, join(&prefix, name)));
            }
        }
        out
    }

    /// Prune every leaf whose kind is in `disallowed`, bottom-up.
    ///
    /// `on_removed` fires exactly once per pruned leaf. An ancestor whose
    /// own kind is disallowed and which empties out as a consequence is cut
    /// without a second callback; unclassified ancestors stay behind as
    /// structurally emptied leaves. Returns whether anything was removed.
    pub fn remove_modified_leaves<F>(&mut self, disallowed: &[ChangeKind], mut on_removed: F) -> bool
    where
        F: FnMut(ChangeKind, &str),
    {
        Self::remove_in(&mut self.root, "/", disallowed, &mut on_removed)
    }

    fn remove_in<F>(node: &mut Node, prefix: &str, disallowed: &[ChangeKind], on_removed: &mut F) -> bool
    where
        F: FnMut(ChangeKind, &str),
    {
        let mut removed_any = false;
        let mut doomed: Vec<(String, ChangeKind, bool)> = Vec::new();
        for (name, child) in node.children.iter_mut() {
            let path = join(prefix, name);
            let removed_below = Self::remove_in(child, &path, disallowed, on_removed);
            removed_any |= removed_below;
            if child.is_leaf()
                && let Some(kind) = child.kind
                && disallowed.contains(&kind)
            {
                doomed.push((name.clone(), kind, removed_below));
            }
        }
        for (name, kind, removed_below) in doomed {
            node.children.remove(&name);
            removed_any = true;
            if !removed_below {
                on_removed(kind, &join(prefix, &name));
            }
        }
        removed_any
    }

    /// Minimal set of paths whose recursive fetch covers every leaf, with no
    /// ancestor/descendant overlap among the returned paths.
    ///
    /// A directory with several children, at least one of them a leaf, is
    /// fetched whole; its deeper subtrees ride along with the recursive
    /// fetch. A chain with a single leaf at the bottom narrows to that leaf,
    /// so a lone changed file is fetched as itself rather than dragging in
    /// its whole parent directory.
    pub fn smallest_superset(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.root.is_leaf() {
            return out;
        }
        let mut stack = vec![(&self.root, String::from("/"))];
        while let Some((node, prefix)) = stack.pop() {
            if node.children.len() == 1 {
                if let Some((name, child)) = node.children.iter().next() {
                    let path = join(&prefix, name);
                    if child.is_leaf() {
                        out.push(path);
                    } else {
                        stack.push((child, path));
                    }
                }
                continue;
            }
            if node.children.values().any(Node::is_leaf) {
                out.push(prefix);
                continue;
            }
            for (name, child) in node.children.iter().rev() {
                stack.push((child, join(&prefix, name)));
            }
        }
        out
    }

    /// Drop every subtree whose root path matches `predicate`.
    ///
    /// A matching subtree is removed without descending into it; children of
    /// non-matching nodes are visited recursively.
    pub fn reject<P>(&mut self, predicate: P)
    where
        P: Fn(&str) -> bool,
    {
        Self::reject_in(&mut self.root, "/", &predicate);
    }

    fn reject_in<P>(node: &mut Node, prefix: &str, predicate: &P)
    where
        P: Fn(&str) -> bool,
    {
        let doomed: Vec<String> = node
            .children
            .keys()
            .filter(|name| predicate(&join(prefix, name)))
            .cloned()
            .collect();
        for name in doomed {
            node.children.remove(&name);
        }
        for (name, child) in node.children.iter_mut() {
            Self::reject_in(child, &join(prefix, name), predicate);
        }
    }

    /// Remove the node addressed by `path` from its parent's children, then
    /// trim any ancestors left both childless and unclassified. Ancestors
    /// that carried their own change record stay, as structurally emptied
    /// leaves.
    pub fn delete(&mut self, path: &str) {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return;
        }
        Self::delete_in(&mut self.root, &segments);
    }

    fn delete_in(node: &mut Node, segments: &[&str]) {
        let Some((head, rest)) = segments.split_first() else {
            return;
        };
        if rest.is_empty() {
            node.children.remove(*head);
            return;
        }
        let mut prune = false;
        if let Some(child) = node.children.get_mut(*head) {
            Self::delete_in(child, rest);
            prune = child.is_leaf() && child.kind.is_none();
        }
        if prune {
            node.children.remove(*head);
        }
    }
}
