// src/stage.rs

//! Orchestrates one container staging run.
//!
//! [`Stager`] fetches the change list, hands it to the planner, and issues
//! the resulting copy requests sequentially. All policy lives in
//! [`ChangeSetProcessor`](crate::changes::processor::ChangeSetProcessor);
//! all I/O lives in the client.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::changes::processor::{ChangeSetProcessor, DestinationRule};
use crate::client::{ContainerClient, CopyOptions};
use crate::error::Result;

/// Stages the changed files of a container into destination directories.
pub struct Stager<C> {
    client: C,
    staging_dir: PathBuf,
    processor: ChangeSetProcessor,
}

impl<C: ContainerClient> Stager<C> {
    /// Create a stager that targets `staging_dir` by default.
    pub fn new(client: C, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            staging_dir: staging_dir.into(),
            processor: ChangeSetProcessor::new(),
        }
    }

    /// Add user glob excludes on top of the fixed ignore list. Patterns are
    /// matched against changed paths with and without the leading slash.
    pub fn with_excludes<I, S>(mut self, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.processor = self.processor.with_excludes(patterns)?;
        Ok(self)
    }

    /// Keep files the diff reports as modified instead of dropping them.
    pub fn keep_modified_files(mut self, keep: bool) -> Self {
        self.processor = self.processor.keep_modified_files(keep);
        self
    }

    /// Stage every changed file under the configured staging directory.
    pub fn input(&self, container: &str) -> Result<()> {
        let rule = DestinationRule::new("**", self.staging_dir.clone())?;
        self.split(container, &[rule])
    }

    /// Stage changed files according to an ordered destination rule list.
    pub fn split(&self, container: &str, rules: &[DestinationRule]) -> Result<()> {
        let records = self.client.changes(container)?;
        debug!("container {container} reported {} changes", records.len());

        let broken = self.client.broken_symlinks();
        let plan = self.processor.plan(&records, rules, broken);
        if plan.requests.is_empty() {
            info!("nothing to stage for container {container}");
            return Ok(());
        }

        for request in &plan.requests {
            let options = CopyOptions {
                chown: false,
                only: request.only.clone(),
            };
            self.client
                .copy(container, &request.path, &plan.destinations, &options)?;
        }
        info!(
            "staged {} paths from container {container}",
            plan.destinations.len()
        );
        Ok(())
    }
}
