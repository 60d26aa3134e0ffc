// src/error.rs

//! Crate-wide error and result types.
//!
//! Every fatal condition maps to one variant of [`Error`]; advisory
//! conditions (a leaf without a destination, a dropped modified path) are
//! logged and never surface here.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Non-success response or transport failure from the container daemon.
    /// Carries the reason the daemon reported.
    #[error("container daemon error: {0}")]
    RemoteApi(String),

    /// A patch process exited non-zero or could not be spawned. Already
    /// applied patches are not rolled back; the working directory must be
    /// discarded.
    #[error("failed to apply patch {}: {detail}", patch.display())]
    PatchApplication { patch: PathBuf, detail: String },

    /// The external patch tool could not be located on this system.
    #[error("patch tool not found: {0}")]
    PatchToolNotFound(String),

    /// Malformed or truncated archive stream during extraction or creation.
    #[error("archive error: {0}")]
    Archive(String),

    /// Invalid user-supplied glob in an exclude list or destination rule.
    #[error("invalid glob pattern '{pattern}': {detail}")]
    Pattern { pattern: String, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
