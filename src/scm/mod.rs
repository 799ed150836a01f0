//! # Revision Sources
//!
//! Every repository a plan declares is resolved through a [`Controller`],
//! which wraps one [`RevisionSource`] variant:
//!
//! - **`wms`**: a remote poll service ([`wms::WmsSource`]).
//! - **`git`**: a git remote via the system binary ([`git::GitSource`]).
//! - **`local`**: a directory on this machine ([`local::LocalSource`]).
//!
//! `hg` is recognised as a declaration type but has no backend; declaring it
//! is a configuration error. The variant is picked by [`create_controller`]
//! from the declaration's [`ScmKind`], with the collaborators it needs passed
//! in through an [`ScmContext`] rather than looked up globally.
//!
//! A controller resolves its revision lazily and keeps it for the rest of the
//! run. [`Controller::refresh`] is the only way to query the source again.

pub mod git;
pub mod local;
pub mod wms;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use log::debug;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::ledger::Ledger;
use git::{DefaultGitOperations, GitOperations, GitSource};
use local::LocalSource;
use wms::{HttpPollClient, PollClient, WmsSource};

/// Repository declaration type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScmKind {
    Wms,
    Git,
    Hg,
    Local,
}

impl ScmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScmKind::Wms => "wms",
            ScmKind::Git => "git",
            ScmKind::Hg => "hg",
            ScmKind::Local => "local",
        }
    }
}

impl fmt::Display for ScmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScmKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "wms" => Ok(ScmKind::Wms),
            "git" => Ok(ScmKind::Git),
            "hg" => Ok(ScmKind::Hg),
            "local" => Ok(ScmKind::Local),
            other => Err(Error::Configuration {
                message: format!("unknown repository type '{}'", other),
                hint: Some("Supported types are wms, git and local".to_string()),
            }),
        }
    }
}

/// Where a target's source lives. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryDeclaration {
    pub kind: ScmKind,
    pub base: String,
    pub path: String,
    pub branch: Option<String>,
}

impl RepositoryDeclaration {
    /// Builds a declaration from a plan's `TYPE LOCATION [BRANCH]` triple.
    ///
    /// `wms_base` is the poll service used for `wms` locations, which carry
    /// only the repository path.
    pub fn from_location(
        kind: ScmKind,
        location: &str,
        branch: Option<&str>,
        wms_base: &str,
    ) -> Result<Self> {
        let branch = branch.map(str::to_string);
        let (base, path, branch) = match kind {
            ScmKind::Wms => {
                let path = location
                    .split('/')
                    .filter(|segment| !segment.is_empty())
                    .collect::<Vec<_>>()
                    .join("/");
                (wms_base.trim_end_matches('/').to_string(), path, branch)
            }
            ScmKind::Git => {
                let (location, suffix) = match location.split_once('?') {
                    Some((location, suffix)) => (location, Some(suffix.to_string())),
                    None => (location, None),
                };
                let (base, path) = split_git_location(location);
                (base, path, suffix.filter(|b| !b.is_empty()).or(branch))
            }
            ScmKind::Hg => {
                return Err(Error::Configuration {
                    message: format!("hg repository '{}' is not supported", location),
                    hint: Some("Mirror the repository to git and declare it as 'git'".to_string()),
                })
            }
            ScmKind::Local => (String::new(), location.to_string(), branch),
        };

        let declaration = Self {
            kind,
            base,
            path,
            branch,
        };
        declaration.validate()?;
        Ok(declaration)
    }

    fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(Error::configuration(format!(
                "{} repository declaration has no path",
                self.kind
            )));
        }
        if self.kind != ScmKind::Local && self.base.is_empty() {
            return Err(Error::configuration(format!(
                "{} repository '{}' has no resolvable base",
                self.kind, self.path
            )));
        }
        Ok(())
    }

    /// Address of the repository as its backend understands it.
    pub fn uri(&self) -> String {
        match self.kind {
            ScmKind::Local => self.path.clone(),
            _ if self.path.starts_with('/') => format!("{}{}", self.base, self.path),
            _ => format!("{}/{}", self.base, self.path),
        }
    }
}

fn split_git_location(location: &str) -> (String, String) {
    if let Some(rest) = location.strip_prefix("file://") {
        return ("file://".to_string(), rest.to_string());
    }
    if location.starts_with('/') {
        return ("file://".to_string(), location.to_string());
    }
    match location.split_once("://") {
        Some((scheme, rest)) => {
            let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
            (format!("{}://{}", scheme, host), path.to_string())
        }
        None => (String::new(), location.to_string()),
    }
}

/// Capability contract every revision source variant implements.
pub trait RevisionSource: Send + Sync {
    /// Human-readable address used in logs and errors.
    fn locator(&self) -> String;

    /// True when the source is reachable and not empty.
    fn check(&self) -> Result<bool>;

    /// Head revision of the configured branch, if the source has one.
    fn latest(&self) -> Result<Option<String>>;

    /// True when `candidate` is still a head of the source.
    fn compare_heads(&self, _candidate: &str) -> Result<bool> {
        Err(Error::NotImplemented {
            feature: format!("compare_heads for {}", self.locator()),
        })
    }

    /// Materializes `revision` (or the branch head) into `dest` and returns
    /// the path prefix the tree landed under, relative to `dest`.
    fn snapshot(&self, revision: Option<&str>, dest: &Path, subtree: Option<&str>) -> Result<PathBuf>;
}

/// Collaborators the revision sources are built with.
#[derive(Clone)]
pub struct ScmContext {
    pub cache_dir: PathBuf,
    pub ledger: Arc<Ledger>,
    pub poll: Arc<dyn PollClient>,
    pub git: Arc<dyn GitOperations>,
}

impl ScmContext {
    pub fn new(cache_dir: PathBuf, ledger: Ledger) -> Self {
        Self {
            cache_dir,
            ledger: Arc::new(ledger),
            poll: Arc::new(HttpPollClient::new()),
            git: Arc::new(DefaultGitOperations),
        }
    }

    pub fn with_poll_client(mut self, poll: Arc<dyn PollClient>) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_git_operations(mut self, git: Arc<dyn GitOperations>) -> Self {
        self.git = git;
        self
    }
}

/// Builds the controller for a declaration.
pub fn create_controller(declaration: &RepositoryDeclaration, ctx: &ScmContext) -> Result<Controller> {
    declaration.validate()?;
    let source: Box<dyn RevisionSource> = match declaration.kind {
        ScmKind::Wms => Box::new(WmsSource::new(
            &declaration.base,
            &declaration.path,
            declaration.branch.as_deref(),
            ctx.poll.clone(),
            ctx.ledger.clone(),
            ctx.git.clone(),
            ctx.cache_dir.clone(),
        )?),
        ScmKind::Git => Box::new(GitSource::new(
            declaration.uri(),
            declaration.branch.clone(),
            ctx.cache_dir.clone(),
            ctx.git.clone(),
        )),
        ScmKind::Local => Box::new(LocalSource::new(&declaration.path)),
        ScmKind::Hg => {
            return Err(Error::configuration(format!(
                "no revision source for hg repository '{}'",
                declaration.path
            )))
        }
    };
    debug!("Created {} controller for {}", declaration.kind, source.locator());
    Ok(Controller::new(declaration.clone(), source))
}

/// One per distinct repository declaration per run.
pub struct Controller {
    declaration: RepositoryDeclaration,
    source: Box<dyn RevisionSource>,
    resolved: Mutex<Option<Option<String>>>,
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("declaration", &self.declaration)
            .field("locator", &self.source.locator())
            .finish()
    }
}

impl Controller {
    pub fn new(declaration: RepositoryDeclaration, source: Box<dyn RevisionSource>) -> Self {
        Self {
            declaration,
            source,
            resolved: Mutex::new(None),
        }
    }

    pub fn declaration(&self) -> &RepositoryDeclaration {
        &self.declaration
    }

    pub fn kind(&self) -> ScmKind {
        self.declaration.kind
    }

    pub fn branch(&self) -> Option<&str> {
        self.declaration.branch.as_deref()
    }

    pub fn locator(&self) -> String {
        self.source.locator()
    }

    pub fn check(&self) -> Result<bool> {
        self.source.check()
    }

    /// Head revision, resolved on first use. Ledger pins are applied by the
    /// source's own `latest()`.
    pub fn revision(&self) -> Result<Option<String>> {
        let mut resolved = self.lock()?;
        if let Some(revision) = resolved.as_ref() {
            return Ok(revision.clone());
        }
        let revision = self.source.latest()?;
        *resolved = Some(revision.clone());
        Ok(revision)
    }

    /// Queries the source again, replacing the remembered revision.
    pub fn refresh(&self) -> Result<Option<String>> {
        let revision = self.source.latest()?;
        *self.lock()? = Some(revision.clone());
        Ok(revision)
    }

    pub fn compare_heads(&self, candidate: &str) -> Result<bool> {
        self.source.compare_heads(candidate)
    }

    /// Materializes the resolved revision into `dest`.
    pub fn snapshot(&self, dest: &Path, subtree: Option<&str>) -> Result<PathBuf> {
        let revision = self.revision()?;
        self.source.snapshot(revision.as_deref(), dest, subtree)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<Option<String>>>> {
        self.resolved.lock().map_err(|_| Error::LockPoisoned {
            context: format!("revision of {}", self.declaration.uri()),
        })
    }
}
