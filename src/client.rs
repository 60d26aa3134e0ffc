// src/client.rs

//! Container daemon client.
//!
//! [`ContainerClient`] is the narrow capability set this crate consumes:
//! list the filesystem changes of a container, fetch a path as a tar stream
//! and extract it through a destination map, and report whether the daemon
//! mishandles symlinks on its archive endpoint. [`HttpContainerClient`]
//! implements it over the daemon's HTTP API.

use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::changes::ChangeRecord;
use crate::error::{Error, Result};

/// Default timeout for daemon requests (30 seconds).
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for a single copy request.
#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    /// Apply remote ownership to extracted files. Off for packaging: the
    /// staging tree belongs to the invoking user.
    pub chown: bool,
    /// Restrict extraction to exactly these in-container paths.
    pub only: Option<BTreeSet<String>>,
}

/// The capability set consumed from a container daemon.
pub trait ContainerClient {
    /// Filesystem changes recorded for the container against its base image.
    fn changes(&self, container: &str) -> Result<Vec<ChangeRecord>>;

    /// Fetch `path` recursively and extract every entry that resolves
    /// through `destinations` (exact match, or longest mapped ancestor with
    /// the remainder appended).
    fn copy(
        &self,
        container: &str,
        path: &str,
        destinations: &BTreeMap<String, PathBuf>,
        options: &CopyOptions,
    ) -> Result<()>;

    /// Whether the daemon resolves symlinks handed to its archive endpoint
    /// into their target's listing instead of returning the link itself.
    fn broken_symlinks(&self) -> bool;
}

impl<C: ContainerClient + ?Sized> ContainerClient for &C {
    fn changes(&self, container: &str) -> Result<Vec<ChangeRecord>> {
        (**self).changes(container)
    }

    fn copy(
        &self,
        container: &str,
        path: &str,
        destinations: &BTreeMap<String, PathBuf>,
        options: &CopyOptions,
    ) -> Result<()> {
        (**self).copy(container, path, destinations, options)
    }

    fn broken_symlinks(&self) -> bool {
        (**self).broken_symlinks()
    }
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "Version")]
    version: String,
}

/// HTTP client against a container daemon.
pub struct HttpContainerClient {
    client: reqwest::blocking::Client,
    base_url: String,
    broken: OnceCell<bool>,
}

impl HttpContainerClient {
    /// Create a client for the daemon at `base_url`
    /// (e.g. `http://localhost:2375`).
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::RemoteApi(format!("failed to create HTTP client: {e}")))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            broken: OnceCell::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::RemoteApi(format!("request to {url} failed: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let reason = response.text().unwrap_or_default();
            return Err(Error::RemoteApi(format!(
                "HTTP {status} from {url}: {}",
                reason.trim()
            )));
        }
        Ok(response)
    }

    fn probe_broken_symlinks(&self) -> Result<bool> {
        let info: VersionInfo = self
            .get(&self.url("/version"))?
            .json()
            .map_err(|e| Error::RemoteApi(format!("failed to parse version response: {e}")))?;
        debug!("daemon version {}", info.version);
        Ok(version_resolves_symlinks(&info.version))
    }
}

impl ContainerClient for HttpContainerClient {
    fn changes(&self, container: &str) -> Result<Vec<ChangeRecord>> {
        let url = self.url(&format!("/containers/{container}/changes"));
        // The daemon reports null rather than an empty list when the
        // container is pristine.
        let records: Option<Vec<ChangeRecord>> = self
            .get(&url)?
            .json()
            .map_err(|e| Error::RemoteApi(format!("failed to parse change list: {e}")))?;
        Ok(records.unwrap_or_default())
    }

    fn copy(
        &self,
        container: &str,
        path: &str,
        destinations: &BTreeMap<String, PathBuf>,
        options: &CopyOptions,
    ) -> Result<()> {
        let url = self.url(&format!("/containers/{container}/archive"));
        debug!("fetching {path} from container {container}");
        let response = self
            .client
            .get(&url)
            .query(&[("path", path)])
            .send()
            .map_err(|e| Error::RemoteApi(format!("request to {url} failed: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let reason = response.text().unwrap_or_default();
            return Err(Error::RemoteApi(format!(
                "HTTP {status} from {url}: {}",
                reason.trim()
            )));
        }

        let parent = parent_of(path);
        let mut archive = tar::Archive::new(response);
        archive.set_preserve_permissions(true);
        archive.set_preserve_ownerships(options.chown);
        let entries = archive
            .entries()
            .map_err(|e| Error::Archive(format!("unreadable archive for {path}: {e}")))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| Error::Archive(format!("truncated archive for {path}: {e}")))?;
            let name = entry
                .path()
                .map_err(|e| Error::Archive(format!("bad entry path: {e}")))?
                .to_string_lossy()
                .into_owned();
            let abs = absolute_entry_path(&parent, &name);
            if let Some(only) = &options.only
                && !only.contains(&abs)
            {
                continue;
            }
            let Some(dest) = resolve_destination(destinations, &abs) else {
                debug!("no destination for {abs}, skipping");
                continue;
            };
            if let Some(dir) = dest.parent() {
                fs::create_dir_all(dir)?;
            }
            entry
                .unpack(&dest)
                .map_err(|e| Error::Archive(format!("failed to extract {abs}: {e}")))?;
        }
        Ok(())
    }

    fn broken_symlinks(&self) -> bool {
        *self.broken.get_or_init(|| {
            self.probe_broken_symlinks().unwrap_or_else(|e| {
                warn!("could not determine daemon version, assuming sane symlink handling: {e}");
                false
            })
        })
    }
}

/// Daemons before 1.10 resolve a symlink given to the archive endpoint into
/// its target directory's listing instead of returning the link itself.
fn version_resolves_symlinks(version: &str) -> bool {
    match parse_major_minor(version) {
        Some((major, minor)) => major < 1 || (major == 1 && minor < 10),
        None => false,
    }
}

/// Lenient `major.minor` parse. Daemon versions such as `17.03.0-ce` carry
/// leading zeros and suffixes, so only the leading numeric components count.
fn parse_major_minor(version: &str) -> Option<(u64, u64)> {
    let mut parts = version.split(['.', '-']);
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

/// The archive endpoint roots its stream at the basename of the requested
/// path; rebuild each entry's absolute in-container path from the request's
/// parent directory.
fn absolute_entry_path(parent: &str, name: &str) -> String {
    let trimmed = name.trim_start_matches("./").trim_end_matches('/');
    if trimmed.is_empty() {
        return parent.to_string();
    }
    if parent == "/" {
        format!("/{trimmed}")
    } else {
        format!("{parent}/{trimmed}")
    }
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Resolve a fetched path against the destination map: an exact match wins,
/// otherwise the longest mapped ancestor does, with the remainder appended.
fn resolve_destination(destinations: &BTreeMap<String, PathBuf>, path: &str) -> Option<PathBuf> {
    if let Some(dest) = destinations.get(path) {
        return Some(dest.clone());
    }
    destinations
        .iter()
        .filter(|(key, _)| {
            path.strip_prefix(key.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
        })
        .max_by_key(|(key, _)| key.len())
        .map(|(key, dest)| dest.join(&path[key.len() + 1..]))
}
