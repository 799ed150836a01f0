//! Remote-poll revision source.
//!
//! A poll service fronts a set of git repositories addressed as
//! `silo/subpath`. For a repository and branch it exposes:
//!
//! - `{base}/api/repos/{silo}/{subpath}/poll/{branch}` returning
//!   `path branch revision` lines, and
//! - `{base}/api/repos/{silo}/{subpath}/show_url` returning the git URI.
//!
//! `/` inside the subpath is written as `:` so it stays one URL segment.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use url::Url;

use super::git::{GitOperations, GitSource};
use super::RevisionSource;
use crate::error::{Error, Result};
use crate::ledger::Ledger;

/// Branch polled when a declaration names none.
pub const DEFAULT_BRANCH: &str = "master";

/// Length of a full commit id returned by a poll.
const REVISION_LEN: usize = 40;

/// Transport for poll requests - allows mocking in tests
pub trait PollClient: Send + Sync {
    /// Fetches `url` and returns its non-empty lines.
    fn fetch_lines(&self, url: &str) -> Result<Vec<String>>;
}

/// `PollClient` over a blocking HTTP client.
pub struct HttpPollClient {
    client: reqwest::blocking::Client,
}

impl HttpPollClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl Default for HttpPollClient {
    fn default() -> Self {
        Self::new()
    }
}

impl PollClient for HttpPollClient {
    fn fetch_lines(&self, url: &str) -> Result<Vec<String>> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::unavailable(url, e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::unavailable(url, format!("HTTP {}", status)));
        }
        let body = response
            .text()
            .map_err(|e| Error::unavailable(url, e.to_string()))?;
        Ok(body
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Endpoints for one repository on a poll service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WmsEndpoints {
    pub repos: Url,
    pub poll: Url,
    pub locator: Url,
}

impl WmsEndpoints {
    /// Builds the endpoints for `silo/subpath` on `base`.
    pub fn new(base: &str, path: &str, branch: &str) -> Result<Self> {
        let (silo, subpath) = path.split_once('/').ok_or_else(|| Error::Configuration {
            message: format!("poll repository path '{}' is not 'silo/subpath'", path),
            hint: None,
        })?;

        let quoted = subpath.replace('/', ":");
        let mut repos = Url::parse(base)?;
        repos
            .path_segments_mut()
            .map_err(|_| Error::configuration(format!("'{}' cannot be a poll base", base)))?
            .pop_if_empty()
            .extend(["api", "repos", silo, quoted.as_str()]);

        let mut poll = repos.clone();
        let mut locator = repos.clone();
        if let Ok(mut segments) = poll.path_segments_mut() {
            segments.extend(["poll", branch]);
        }
        if let Ok(mut segments) = locator.path_segments_mut() {
            segments.push("show_url");
        }
        Ok(Self {
            repos,
            poll,
            locator,
        })
    }
}

/// A repository followed through a poll service.
pub struct WmsSource {
    path: String,
    branch: String,
    endpoints: WmsEndpoints,
    client: Arc<dyn PollClient>,
    ledger: Arc<Ledger>,
    git: Arc<dyn GitOperations>,
    cache_root: PathBuf,
}

impl WmsSource {
    pub fn new(
        base: &str,
        path: &str,
        branch: Option<&str>,
        client: Arc<dyn PollClient>,
        ledger: Arc<Ledger>,
        git: Arc<dyn GitOperations>,
        cache_root: PathBuf,
    ) -> Result<Self> {
        let branch = branch.unwrap_or(DEFAULT_BRANCH).to_string();
        let endpoints = WmsEndpoints::new(base, path, &branch)?;
        Ok(Self {
            path: path.to_string(),
            branch,
            endpoints,
            client,
            ledger,
            git,
            cache_root,
        })
    }

    pub fn endpoints(&self) -> &WmsEndpoints {
        &self.endpoints
    }

    fn poll(&self) -> Result<String> {
        let url = self.endpoints.poll.as_str();
        let lines = self.client.fetch_lines(url)?;
        let [line] = lines.as_slice() else {
            return Err(Error::unavailable(
                url,
                format!("expected one poll line, got {}", lines.len()),
            ));
        };
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [_path, _branch, tip] = fields.as_slice() else {
            return Err(Error::unavailable(url, format!("malformed poll line '{}'", line)));
        };
        if tip.len() != REVISION_LEN {
            return Err(Error::unavailable(url, format!("'{}' is not a full revision", tip)));
        }
        Ok(tip.to_string())
    }

    fn git_uri(&self) -> Result<String> {
        let url = self.endpoints.locator.as_str();
        self.client
            .fetch_lines(url)?
            .into_iter()
            .next()
            .map(|line| line.trim().to_string())
            .ok_or_else(|| Error::unavailable(url, "locator returned no URI"))
    }
}

impl RevisionSource for WmsSource {
    fn locator(&self) -> String {
        self.endpoints.repos.to_string()
    }

    fn check(&self) -> Result<bool> {
        Ok(!self.client.fetch_lines(self.endpoints.poll.as_str())?.is_empty())
    }

    fn latest(&self) -> Result<Option<String>> {
        if let Some(entry) = self.ledger.pinned(&self.path, Some(&self.branch))? {
            debug!("{} pinned by ledger at {}", self.path, entry.revision);
            return Ok(Some(entry.revision.clone()));
        }
        self.poll().map(Some)
    }

    fn snapshot(&self, revision: Option<&str>, dest: &Path, subtree: Option<&str>) -> Result<PathBuf> {
        let uri = self.git_uri()?;
        let git = GitSource::new(
            uri,
            Some(self.branch.clone()),
            self.cache_root.clone(),
            self.git.clone(),
        );
        git.snapshot(revision, dest, subtree)
    }
}
