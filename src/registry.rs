//! # Published-Artifact Registry
//!
//! The registry is a black box this crate queries for the latest published
//! versions of targets and for the members of a published group. Publishing a
//! new group goes through [`GroupPublisher`].
//!
//! [`CommandRegistry`] implements both by running a configured executable:
//!
//! ```text
//! registry-query latest NAME=LABEL...           # NAME=VERSION[FLAVOR] lines
//! registry-query members NAME=VERSION           # transitive member lines
//! registry-query commit FILE NAME LABEL VERSION # commit a group recipe
//! registry-query cook NAME=LABEL                # build the committed group
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::process::Command;

use log::debug;

use crate::error::{Error, Result};
use crate::version::{collect_published, Label, LatestVersions, Version};

/// Artifact name to the labels to look it up on.
pub type LatestQuery = BTreeMap<String, BTreeSet<Label>>;

/// Read side of the registry - allows mocking in tests
pub trait Registry {
    /// Latest versions per name on the requested labels. Names with nothing
    /// published are absent from the result.
    fn latest_versions(&self, query: &LatestQuery) -> Result<LatestVersions>;

    /// Transitive members of a published group version.
    fn group_members(&self, name: &str, version: &Version) -> Result<LatestVersions>;
}

/// Write side of the registry for group artifacts
pub trait GroupPublisher {
    /// Commits `recipe` as a new source revision of group `name`.
    fn commit(&self, recipe: &Path, name: &str, label: &Label, version: &str) -> Result<()>;

    /// Builds the committed group.
    fn cook(&self, name: &str, label: &Label) -> Result<()>;
}

/// Builds a single-name query.
pub fn query_for(name: &str, label: &Label) -> LatestQuery {
    let mut query = LatestQuery::new();
    query
        .entry(name.to_string())
        .or_default()
        .insert(label.clone());
    query
}

/// Registry backed by an external command.
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    exec: String,
}

impl CommandRegistry {
    pub fn new(exec: impl Into<String>) -> Self {
        Self { exec: exec.into() }
    }

    fn run(&self, args: &[String]) -> Result<String> {
        debug!("{} {}", self.exec, args.join(" "));
        let output = Command::new(&self.exec)
            .args(args)
            .output()
            .map_err(|e| Error::Registry {
                message: format!("failed to run {}: {}", self.exec, e),
            })?;
        if !output.status.success() {
            return Err(Error::Registry {
                message: format!(
                    "{} {} exited with {}: {}",
                    self.exec,
                    args.first().map(String::as_str).unwrap_or_default(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Registry for CommandRegistry {
    fn latest_versions(&self, query: &LatestQuery) -> Result<LatestVersions> {
        let mut args = vec!["latest".to_string()];
        for (name, labels) in query {
            args.extend(labels.iter().map(|label| format!("{}={}", name, label)));
        }
        if args.len() == 1 {
            return Ok(LatestVersions::new());
        }
        collect_published(&self.run(&args)?)
    }

    fn group_members(&self, name: &str, version: &Version) -> Result<LatestVersions> {
        let args = vec!["members".to_string(), format!("{}={}", name, version)];
        collect_published(&self.run(&args)?)
    }
}

impl GroupPublisher for CommandRegistry {
    fn commit(&self, recipe: &Path, name: &str, label: &Label, version: &str) -> Result<()> {
        let args = vec![
            "commit".to_string(),
            recipe.display().to_string(),
            name.to_string(),
            label.to_string(),
            version.to_string(),
        ];
        self.run(&args).map(|_| ())
    }

    fn cook(&self, name: &str, label: &Label) -> Result<()> {
        let args = vec!["cook".to_string(), format!("{}={}", name, label)];
        self.run(&args).map(|_| ())
    }
}
