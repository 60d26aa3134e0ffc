// src/source/patched.rs

//! Applies an ordered list of unified-diff patches on top of an inner
//! source.
//!
//! Building the cache extracts the inner source into the working directory
//! (or lets it materialize directly when it can), then runs the external
//! `patch` tool once per patch with `-p1` semantics rooted at that
//! directory. A failing patch aborts the build; nothing is rolled back and
//! the working directory must be discarded by the caller.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info};

use super::{Source, SourceCache};
use crate::archive;
use crate::error::{Error, Result};
use crate::hash::Sha256Hasher;

/// A source decorated with patches applied after extraction.
pub struct PatchedSource {
    inner: Box<dyn Source>,
    patches: Vec<PathBuf>,
}

impl PatchedSource {
    pub fn new(inner: Box<dyn Source>, patches: Vec<PathBuf>) -> Self {
        Self { inner, patches }
    }
}

impl Source for PatchedSource {
    fn build_cache(&self, workdir: &Path) -> Result<Box<dyn SourceCache>> {
        let cache = PatchedSourceCache::new(
            self.inner.build_cache(workdir)?,
            workdir.to_path_buf(),
            self.patches.clone(),
        );
        cache.update()?;
        Ok(Box::new(cache))
    }
}

/// Working-directory cache of a patched source.
pub struct PatchedSourceCache {
    inner: Box<dyn SourceCache>,
    workdir: PathBuf,
    patches: Vec<PathBuf>,
}

impl PatchedSourceCache {
    fn new(inner: Box<dyn SourceCache>, workdir: PathBuf, patches: Vec<PathBuf>) -> Self {
        Self {
            inner,
            workdir,
            patches,
        }
    }

    /// Fill the working directory from the inner source and apply each patch
    /// in list order.
    fn update(&self) -> Result<()> {
        if self.inner.supports_direct_copy() {
            debug!("materializing source directly into {}", self.workdir.display());
            self.inner.copy_to(&self.workdir)?;
        } else {
            let stream = self.inner.tar_stream()?;
            archive::extract(stream, &self.workdir)?;
        }
        if self.patches.is_empty() {
            return Ok(());
        }
        let tool = which::which("patch").map_err(|e| Error::PatchToolNotFound(e.to_string()))?;
        for patch in &self.patches {
            self.apply(&tool, patch)?;
        }
        info!(
            "applied {} patches in {}",
            self.patches.len(),
            self.workdir.display()
        );
        Ok(())
    }

    fn apply(&self, tool: &Path, patch: &Path) -> Result<()> {
        let patch_file = fs::canonicalize(patch).map_err(|e| Error::PatchApplication {
            patch: patch.to_path_buf(),
            detail: format!("cannot resolve patch file: {e}"),
        })?;
        debug!(
            "running {} -p1 -i {} in {}",
            tool.display(),
            patch_file.display(),
            self.workdir.display()
        );
        let output = Command::new(tool)
            .arg("-p1")
            .arg("-i")
            .arg(&patch_file)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .output()
            .map_err(|e| Error::PatchApplication {
                patch: patch.to_path_buf(),
                detail: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(Error::PatchApplication {
                patch: patch.to_path_buf(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl SourceCache for PatchedSourceCache {
    /// Re-archive the patched working directory. Entry order is stable for
    /// an unchanged tree, so repeated reads yield identical streams.
    fn tar_stream(&self) -> Result<Box<dyn Read>> {
        Ok(Box::new(archive::create(&self.workdir)?))
    }

    /// `sha256(inner_key \0 patch1 \0 patch2 \0 ...)` over the patch byte
    /// contents in application order. Depends only on the inner key and the
    /// patch bytes, never on the working directory, so it can be computed
    /// before (or without) an update. An empty patch list passes the inner
    /// key through untouched.
    fn cache_key(&self) -> Result<String> {
        let inner_key = self.inner.cache_key()?;
        if self.patches.is_empty() {
            return Ok(inner_key);
        }
        let mut hasher = Sha256Hasher::new();
        hasher.update(inner_key.as_bytes());
        hasher.update(b"\0");
        for patch in &self.patches {
            hasher.update(&fs::read(patch)?);
            hasher.update(b"\0");
        }
        Ok(hasher.finalize_hex())
    }
}
