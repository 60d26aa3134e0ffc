// src/changes/processor.rs

//! Turns a raw change list into a staging plan.
//!
//! The planner is pure: it never touches the network or the filesystem. It
//! builds a [`ChangeTree`] from the records, rejects ignored paths, drops
//! modified/deleted leaves per policy, maps surviving leaves to staging
//! destinations through an ordered rule list, and reduces the result to the
//! fetch requests worth issuing against the daemon.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use glob::Pattern;
use tracing::{debug, warn};

use super::tree::ChangeTree;
use super::{ChangeKind, ChangeRecord};
use crate::error::{Error, Result};

/// Paths never staged from a container, regardless of configuration.
const FIXED_IGNORES: &[&str] = &["/dev", "/tmp", "/root/.bash_history", "/.bash_history"];

fn compile_pattern(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern).map_err(|e| Error::Pattern {
        pattern: pattern.to_string(),
        detail: e.to_string(),
    })
}

/// Glob patterns are matched against the absolute path and against the path
/// without its leading slash, so both `a` and `/a` drop the `/a` subtree.
fn pattern_matches(pattern: &Pattern, path: &str) -> bool {
    pattern.matches(path) || pattern.matches(path.trim_start_matches('/'))
}

/// Maps a path glob to a destination prefix. Rules are tried in order; the
/// first match decides where a leaf is staged.
#[derive(Debug, Clone)]
pub struct DestinationRule {
    pattern: Pattern,
    prefix: PathBuf,
}

impl DestinationRule {
    pub fn new(pattern: &str, prefix: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            pattern: compile_pattern(pattern)?,
            prefix: prefix.into(),
        })
    }

    fn matches(&self, path: &str) -> bool {
        pattern_matches(&self.pattern, path)
    }

    /// Reroot a leaf path under this rule's prefix.
    fn destination(&self, leaf: &str) -> PathBuf {
        self.prefix.join(leaf.trim_start_matches('/'))
    }
}

/// One fetch against the daemon's archive endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRequest {
    /// In-container path to fetch recursively.
    pub path: String,
    /// Restrict extraction to exactly these leaf paths, if set.
    pub only: Option<BTreeSet<String>>,
}

/// The outcome of planning one change list.
#[derive(Debug, Default)]
pub struct ChangePlan {
    /// Leaf path to staging destination.
    pub destinations: BTreeMap<String, PathBuf>,
    /// Fetches to issue, in order.
    pub requests: Vec<CopyRequest>,
}

/// Applies ignore rules and drop policies to a change list and reduces the
/// survivors to destinations plus a minimal fetch set.
#[derive(Debug, Default)]
pub struct ChangeSetProcessor {
    excludes: Vec<Pattern>,
    keep_modified_files: bool,
}

impl ChangeSetProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add user glob excludes on top of the fixed ignore list.
    pub fn with_excludes<I, S>(mut self, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pattern in patterns {
            self.excludes.push(compile_pattern(pattern.as_ref())?);
        }
        Ok(self)
    }

    /// Keep files the diff reports as modified instead of dropping them.
    pub fn keep_modified_files(mut self, keep: bool) -> Self {
        self.keep_modified_files = keep;
        self
    }

    fn ignored(&self, path: &str) -> bool {
        if FIXED_IGNORES
            .iter()
            .any(|fixed| path == *fixed || path.starts_with(&format!("{fixed}/")))
        {
            return true;
        }
        self.excludes.iter().any(|p| pattern_matches(p, path))
    }

    /// Reduce `records` to a staging plan under the given destination rules.
    pub fn plan(
        &self,
        records: &[ChangeRecord],
        rules: &[DestinationRule],
        broken_symlinks: bool,
    ) -> ChangePlan {
        let mut tree = ChangeTree::from_records(records.iter().map(|r| (r.path.as_str(), r.kind)));

        tree.reject(|path| self.ignored(path));

        let mut disallowed = vec![ChangeKind::Deleted];
        if !self.keep_modified_files {
            disallowed.push(ChangeKind::Modified);
        }
        tree.remove_modified_leaves(&disallowed, |kind, path| {
            if kind == ChangeKind::Deleted {
                warn!("cannot delete files as part of a package: {path}");
            } else {
                warn!("cannot modify files in a package: {path}");
            }
        });

        let mut plan = ChangePlan::default();
        if tree.is_empty() {
            debug!("no changes left to stage");
            return plan;
        }

        let mut unmapped = Vec::new();
        for leaf in tree.leaves() {
            match rules.iter().find(|rule| rule.matches(&leaf)) {
                Some(rule) => {
                    plan.destinations.insert(leaf.clone(), rule.destination(&leaf));
                }
                None => {
                    warn!("no destination for changed path, skipping: {leaf}");
                    unmapped.push(leaf);
                }
            }
        }
        for leaf in &unmapped {
            tree.delete(leaf);
        }
        if plan.destinations.is_empty() {
            return plan;
        }

        if broken_symlinks {
            // Affected daemons resolve a symlink handed to the archive
            // endpoint into its target's listing. Fetching the enclosing
            // directory with an extraction filter sidesteps that.
            let mut parents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
            for leaf in tree.leaves() {
                parents.entry(parent_of(&leaf)).or_default().insert(leaf);
            }
            for (parent, only) in parents {
                plan.requests.push(CopyRequest {
                    path: parent,
                    only: Some(only),
                });
            }
        } else {
            for path in tree.smallest_superset() {
                plan.requests.push(CopyRequest { path, only: None });
            }
        }
        plan
    }
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}
