// src/lib.rs

//! Stevedore
//!
//! Turns a container filesystem snapshot into the file tree a packaging tool
//! must stage, and builds patched source trees with reproducible cache keys.
//!
//! # Architecture
//!
//! - Change reduction: a path-segment trie collapses the daemon's flat
//!   change list into leaves, prunes ignored and disallowed paths, and
//!   computes a minimal fetch set
//! - Staging: each fetch is one recursive archive request against the
//!   daemon, extracted through a destination map; daemons with broken
//!   symlink handling get per-directory fetches with extraction filters
//! - Patched sources: extract an inner source, apply unified diffs in
//!   order, re-archive, and fingerprint the result with SHA-256

pub mod archive;
pub mod changes;
pub mod client;
mod error;
pub mod hash;
pub mod source;
pub mod stage;

pub use changes::processor::{ChangePlan, ChangeSetProcessor, CopyRequest, DestinationRule};
pub use changes::tree::ChangeTree;
pub use changes::{ChangeKind, ChangeRecord};
pub use client::{ContainerClient, CopyOptions, HttpContainerClient};
pub use error::{Error, Result};
pub use source::{decorate, PatchedSource, PatchedSourceCache, Source, SourceCache, SourceOptions};
pub use stage::Stager;
