//! The per-target record carried from discovery through build to the report.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::scm::{Controller, RepositoryDeclaration};
use crate::version::{FlavorSet, Label, Version};

/// Plan tree section a target was discovered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Projects,
    Products,
    External,
    Common,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Projects => "projects",
            Section::Products => "products",
            Section::External => "external",
            Section::Common => "common",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a target ended up after the build pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    #[default]
    Pending,
    Built,
    Failed,
    Skipped,
}

/// One declared build target.
#[derive(Debug, Clone, Serialize)]
pub struct Target {
    pub name: String,
    pub label: Option<Label>,
    pub branch: Option<String>,
    #[serde(skip)]
    pub repositories: BTreeMap<String, RepositoryDeclaration>,
    #[serde(skip)]
    pub controllers: BTreeMap<String, Arc<Controller>>,
    /// Commit the source currently points at.
    pub commit: Option<String>,
    /// Upstream part of the latest published version.
    pub revision: Option<String>,
    pub version: Option<Version>,
    #[serde(skip)]
    pub latest: BTreeMap<Version, FlavorSet>,
    /// `None` until change detection has run.
    pub change: Option<bool>,
    pub plan: PathBuf,
    pub log: Option<String>,
    pub scm: Option<String>,
    pub tag: Option<String>,
    pub section: Section,
    pub outcome: Outcome,
}

impl Target {
    pub fn new(name: impl Into<String>, plan: impl Into<PathBuf>, section: Section) -> Self {
        Self {
            name: name.into(),
            label: None,
            branch: None,
            repositories: BTreeMap::new(),
            controllers: BTreeMap::new(),
            commit: None,
            revision: None,
            version: None,
            latest: BTreeMap::new(),
            change: None,
            plan: plan.into(),
            log: None,
            scm: None,
            tag: None,
            section,
            outcome: Outcome::Pending,
        }
    }

    /// True once detection decided the target needs a build.
    pub fn is_changed(&self) -> bool {
        self.change == Some(true)
    }

    /// Version override handed to the build executor: `BRANCH.COMMIT[..12]`.
    pub fn build_version(&self) -> Option<String> {
        let commit = self.commit.as_deref()?;
        let short = commit.get(..12).unwrap_or(commit);
        Some(match &self.branch {
            Some(branch) => format!("{}.{}", branch, short),
            None => short.to_string(),
        })
    }

    /// Stores a registry answer: the newest version becomes `version`, and its
    /// upstream part `revision`.
    pub fn record_published(&mut self, latest: BTreeMap<Version, FlavorSet>) {
        self.version = latest.keys().next_back().cloned();
        self.revision = self.version.as_ref().map(|v| v.revision().to_string());
        self.latest = latest;
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
