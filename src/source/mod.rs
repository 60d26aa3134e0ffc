// src/source/mod.rs

//! Package source abstraction.
//!
//! A [`Source`] knows how to build a cache of itself inside a caller-owned
//! working directory; the resulting [`SourceCache`] can serialize that tree
//! as a tar stream and fingerprint it with a content-derived key. Sources
//! that can materialize straight into a directory advertise it through
//! [`SourceCache::supports_direct_copy`], letting decorators skip an
//! extract-and-retar round trip.

pub mod patched;

pub use patched::{PatchedSource, PatchedSourceCache};

use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Something that can build a cached copy of itself.
pub trait Source {
    /// Build a cache rooted at `workdir`. The directory's lifetime and
    /// cleanup belong to the caller; after a failed build its contents are
    /// undefined and must be discarded.
    fn build_cache(&self, workdir: &Path) -> Result<Box<dyn SourceCache>>;
}

/// A built source cache.
pub trait SourceCache {
    /// Serialize the cached tree as a tar stream. May be called repeatedly;
    /// the stream is content-stable as long as the tree is unchanged.
    fn tar_stream(&self) -> Result<Box<dyn Read>>;

    /// Content-derived fingerprint of this source, as a lowercase hex
    /// digest.
    fn cache_key(&self) -> Result<String>;

    /// Whether [`copy_to`](Self::copy_to) can materialize the tree without
    /// going through a tar stream.
    fn supports_direct_copy(&self) -> bool {
        false
    }

    /// Materialize the cached tree directly into `dst`.
    fn copy_to(&self, dst: &Path) -> Result<()> {
        let _ = dst;
        Err(Error::Archive(
            "source cannot materialize directly into a directory".to_string(),
        ))
    }
}

/// Construction options threaded through source factories.
#[derive(Debug, Default)]
pub struct SourceOptions {
    /// Unified-diff patch files to apply on top of the built source, in
    /// order.
    pub patches: Vec<PathBuf>,
}

/// Build a source through `build_inner`, wrapping it in a patch-applying
/// decorator only when `options.patches` is non-empty. The patch list is
/// taken out of the options before the inner builder sees them.
pub fn decorate<F>(mut options: SourceOptions, build_inner: F) -> Result<Box<dyn Source>>
where
    F: FnOnce(SourceOptions) -> Result<Box<dyn Source>>,
{
    if options.patches.is_empty() {
        return build_inner(options);
    }
    let patches = std::mem::take(&mut options.patches);
    let inner = build_inner(options)?;
    Ok(Box::new(PatchedSource::new(inner, patches)))
}
