// src/changes/mod.rs

//! Filesystem change records as reported by the container daemon.
//!
//! The daemon reports one flat record per touched path, integer-coded on the
//! wire: `{"Path": "/usr/bin/foo", "Kind": 1}` with 0 = modified,
//! 1 = created, 2 = deleted. The [`tree`] module reduces a record list to
//! the minimal set of paths worth fetching; the [`processor`] module applies
//! staging policy on top.

pub mod processor;
pub mod tree;

use serde::Deserialize;

/// How a path changed relative to the container's base image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "u8")]
pub enum ChangeKind {
    Modified,
    Created,
    Deleted,
}

impl TryFrom<u8> for ChangeKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Modified),
            1 => Ok(Self::Created),
            2 => Ok(Self::Deleted),
            other => Err(format!("unknown change kind {other}")),
        }
    }
}

/// One changed path in a container filesystem snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChangeRecord {
    #[serde(rename = "Path")]
    pub path: String,
    #[serde(rename = "Kind")]
    pub kind: ChangeKind,
}
