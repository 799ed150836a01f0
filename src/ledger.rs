//! # Revision Ledger
//!
//! The ledger pins repository paths to specific revisions so that a run can
//! build exactly what a previous step (usually CI) recorded, without polling
//! the live branch head.
//!
//! Two local files are read, in a fixed order, from the ledger directory:
//!
//! 1. `tips`: legacy format, one `<path> <revision>` pair per line.
//! 2. `revision.txt`: `<path> <branch> <revision>` per line.
//!
//! A later file wins on conflicting paths. Entries are also indexed by a
//! *basename*: the last path segment with any `?`/`#` suffix and `.git`
//! extension removed, so a CI trigger that only knows its project name can
//! find the full path.
//!
//! On top of the files, a Gerrit-triggered CI job exports a single override
//! through `GERRIT_*` environment variables. It replaces whatever the files
//! say for the one path its project resolves to, and carries a branch that
//! must agree with the branch the consuming target resolved; a disagreement is
//! a configuration error, never a silent skip.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Error, Result};

/// Legacy ledger file name.
pub const LEGACY_FILE: &str = "tips";
/// Ledger file name carrying branches.
pub const FULL_FILE: &str = "revision.txt";

/// A pinned revision for one repository path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Pinned revision id.
    pub revision: String,
    /// Branch recorded with the pin, if any.
    pub branch: Option<String>,
    /// Repository URI supplied by a CI override.
    pub uri: Option<String>,
    /// Repository path supplied by a CI override.
    pub path: Option<String>,
    /// True when the entry came from the CI environment.
    pub from_override: bool,
}

impl LedgerEntry {
    fn pinned(revision: &str, branch: Option<&str>) -> Self {
        Self {
            revision: revision.trim().to_string(),
            branch: branch.map(|b| b.trim().to_string()),
            uri: None,
            path: None,
            from_override: false,
        }
    }
}

/// A single CI-supplied override (Gerrit trigger variables).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiOverride {
    pub project: String,
    pub revision: String,
    pub branch: String,
    pub scheme: String,
    pub host: String,
    pub port: String,
    pub name: String,
}

impl CiOverride {
    /// Reads the override from the process environment.
    ///
    /// Returns `Ok(None)` when `GERRIT_PROJECT` is unset. Once the project is
    /// set, every other variable is required.
    pub fn from_env() -> Result<Option<Self>> {
        let Ok(project) = env::var("GERRIT_PROJECT") else {
            return Ok(None);
        };
        let var = |name: &str| {
            env::var(name).map_err(|_| Error::Ledger {
                message: format!("GERRIT_PROJECT is set but {} is not", name),
            })
        };
        Ok(Some(Self {
            project,
            revision: var("GERRIT_PATCHSET_REVISION")?,
            branch: var("GERRIT_REFSPEC")?,
            scheme: var("GERRIT_SCHEME")?,
            host: var("GERRIT_HOST")?,
            port: var("GERRIT_PORT")?,
            name: var("GERRIT_NAME")?,
        }))
    }

    fn uri(&self) -> String {
        format!(
            "{}://{}:{}/{}",
            self.scheme, self.host, self.port, self.project
        )
    }

    fn path(&self) -> String {
        format!("{}/{}", self.name, self.project)
    }

    fn basename(&self) -> String {
        basename(&self.project)
    }
}

/// Pinned revisions for the duration of a run.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    entries: BTreeMap<String, LedgerEntry>,
    basenames: BTreeMap<String, String>,
    source: Option<PathBuf>,
}

impl Ledger {
    /// An empty ledger: every lookup misses.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads the ledger files from `dir` and applies the CI override from the
    /// environment.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut ledger = Self::empty();
        let legacy = dir.join(LEGACY_FILE);
        if legacy.is_file() {
            ledger.merge_legacy(&fs::read_to_string(&legacy)?, &legacy)?;
        }
        let full = dir.join(FULL_FILE);
        if full.is_file() {
            ledger.merge_full(&fs::read_to_string(&full)?, &full)?;
        }
        if let Some(ci) = CiOverride::from_env()? {
            ledger.apply_override(&ci)?;
        }
        debug!(
            "Loaded {} ledger entries from {}",
            ledger.len(),
            dir.display()
        );
        Ok(ledger)
    }

    /// Merges `<path> <revision>` lines.
    pub fn merge_legacy(&mut self, content: &str, origin: &Path) -> Result<()> {
        for (number, line) in significant_lines(content) {
            let (path, revision) = line.split_once(char::is_whitespace).ok_or_else(|| {
                malformed(origin, number, "expected '<path> <revision>'")
            })?;
            if revision.trim().is_empty() {
                return Err(malformed(origin, number, "missing revision"));
            }
            self.insert(path, LedgerEntry::pinned(revision, None));
        }
        self.source = Some(origin.to_path_buf());
        Ok(())
    }

    /// Merges `<path> <branch> <revision>` lines.
    pub fn merge_full(&mut self, content: &str, origin: &Path) -> Result<()> {
        for (number, line) in significant_lines(content) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [path, branch, revision] = fields.as_slice() else {
                return Err(malformed(
                    origin,
                    number,
                    "expected '<path> <branch> <revision>'",
                ));
            };
            self.insert(path, LedgerEntry::pinned(revision, Some(branch)));
        }
        self.source = Some(origin.to_path_buf());
        Ok(())
    }

    /// Replaces the entry whose basename matches the override's project.
    pub fn apply_override(&mut self, ci: &CiOverride) -> Result<()> {
        let Some(source) = &self.source else {
            return Err(Error::Ledger {
                message: format!(
                    "GERRIT_PROJECT is set but no {} or {} was found",
                    FULL_FILE, LEGACY_FILE
                ),
            });
        };
        let project = ci.basename();
        let path = self.basenames.get(&project).cloned().ok_or_else(|| Error::Ledger {
            message: format!(
                "GERRIT_PROJECT is set to '{}' but no repository with that basename is in {}",
                ci.project,
                source.display()
            ),
        })?;
        debug!("CI override pins {} to {}", path, ci.revision);
        self.entries.insert(
            path,
            LedgerEntry {
                revision: ci.revision.clone(),
                branch: Some(ci.branch.clone()),
                uri: Some(ci.uri()),
                path: Some(ci.path()),
                from_override: true,
            },
        );
        Ok(())
    }

    /// Entry recorded for `path`.
    pub fn get(&self, path: &str) -> Option<&LedgerEntry> {
        self.entries.get(path)
    }

    /// Entry whose path has the given basename.
    pub fn by_basename(&self, name: &str) -> Option<&LedgerEntry> {
        self.basenames
            .get(name)
            .and_then(|path| self.entries.get(path))
    }

    /// Entry pinning `path`, checked against the branch the caller resolved.
    ///
    /// A CI override whose branch differs from `branch` is an error.
    pub fn pinned(&self, path: &str, branch: Option<&str>) -> Result<Option<&LedgerEntry>> {
        let Some(entry) = self.entries.get(path) else {
            return Ok(None);
        };
        if entry.from_override {
            let pinned_branch = entry.branch.as_deref().unwrap_or_default();
            if let Some(branch) = branch {
                if branch != pinned_branch {
                    return Err(Error::Configuration {
                        message: format!(
                            "CI override for '{}' is on branch '{}' but the target resolved branch '{}'",
                            path, pinned_branch, branch
                        ),
                        hint: Some("Check GERRIT_REFSPEC against the plan's branch macro".to_string()),
                    });
                }
            }
        }
        Ok(Some(entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, path: &str, entry: LedgerEntry) {
        self.basenames.insert(basename(path), path.to_string());
        self.entries.insert(path.to_string(), entry);
    }
}

/// Last path segment with `?`/`#` suffixes and a `.git` extension removed.
pub fn basename(path: &str) -> String {
    let trimmed = path.split(['?', '#']).next().unwrap_or(path);
    let last = trimmed
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    last.strip_suffix(".git").unwrap_or(last).to_string()
}

fn significant_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

fn malformed(origin: &Path, line: usize, message: &str) -> Error {
    Error::Ledger {
        message: format!("{}:{}: {}", origin.display(), line, message),
    }
}
