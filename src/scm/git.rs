//! Distributed-vcs revision source backed by the system `git` command.
//!
//! Using the system binary means SSH keys, credential helpers and anything in
//! `~/.gitconfig` apply unchanged. Snapshots go through a bare cache
//! repository under the configured cache directory so repeated archives of the
//! same remote only fetch what changed.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;

use log::{debug, warn};

use super::RevisionSource;
use crate::error::{Error, Result};

/// One line of `git ls-remote` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRef {
    pub revision: String,
    pub name: String,
}

/// Trait for git operations - allows mocking in tests
pub trait GitOperations: Send + Sync {
    /// Lists remote references, optionally restricted to a pattern.
    fn ls_remote(&self, uri: &str, pattern: Option<&str>) -> Result<Vec<RemoteRef>>;

    /// Ensures `repo_dir` is a bare repository holding `branch` from `uri`.
    fn fetch_into_cache(&self, uri: &str, branch: &str, repo_dir: &Path) -> Result<()>;

    /// Extracts `revision` (optionally only `subtree`) from `repo_dir` into `dest`.
    fn archive(
        &self,
        repo_dir: &Path,
        revision: &str,
        subtree: Option<&str>,
        dest: &Path,
    ) -> Result<()>;
}

/// The default implementation of `GitOperations`, which runs the system `git`.
pub struct DefaultGitOperations;

impl GitOperations for DefaultGitOperations {
    fn ls_remote(&self, uri: &str, pattern: Option<&str>) -> Result<Vec<RemoteRef>> {
        ls_remote(uri, pattern)
    }

    fn fetch_into_cache(&self, uri: &str, branch: &str, repo_dir: &Path) -> Result<()> {
        fetch_into_cache(uri, branch, repo_dir)
    }

    fn archive(
        &self,
        repo_dir: &Path,
        revision: &str,
        subtree: Option<&str>,
        dest: &Path,
    ) -> Result<()> {
        archive(repo_dir, revision, subtree, dest)
    }
}

fn run_git(args: &[&str], uri: &str, cwd: Option<&Path>) -> Result<String> {
    let mut command = Command::new("git");
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
        debug!("(cd '{}'; git {})", dir.display(), args.join(" "));
    } else {
        debug!("git {}", args.join(" "));
    }

    let output = command.output().map_err(|e| Error::GitCommand {
        command: args.join(" "),
        url: uri.to_string(),
        stderr: e.to_string(),
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::GitCommand {
            command: args.join(" "),
            url: uri.to_string(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Runs `git ls-remote URI [PATTERN]`.
pub fn ls_remote(uri: &str, pattern: Option<&str>) -> Result<Vec<RemoteRef>> {
    let mut args = vec!["ls-remote", uri];
    if let Some(pattern) = pattern {
        args.push(pattern);
    }
    let stdout = run_git(&args, uri, None)?;
    Ok(parse_ls_remote(&stdout))
}

/// Parses `<hash>\t<ref>` lines, ignoring anything malformed.
pub fn parse_ls_remote(output: &str) -> Vec<RemoteRef> {
    output
        .lines()
        .filter_map(|line| {
            let (revision, name) = line.split_once('\t')?;
            Some(RemoteRef {
                revision: revision.trim().to_string(),
                name: name.trim().to_string(),
            })
        })
        .collect()
}

/// Creates the bare cache repository if needed and fetches `+BRANCH:BRANCH`.
pub fn fetch_into_cache(uri: &str, branch: &str, repo_dir: &Path) -> Result<()> {
    fs::create_dir_all(repo_dir)?;
    if !repo_dir.join("refs").is_dir() && !repo_dir.join(".git/refs").is_dir() {
        run_git(&["init", "-q", "--bare"], uri, Some(repo_dir))?;
    }
    let refspec = format!("+{}:{}", branch, branch);
    run_git(&["fetch", "-q", uri, &refspec], uri, Some(repo_dir))?;
    Ok(())
}

/// Pipes `git archive --format=tar REV [SUBTREE]` into `tar -x -C DEST`.
pub fn archive(repo_dir: &Path, revision: &str, subtree: Option<&str>, dest: &Path) -> Result<()> {
    let uri = repo_dir.display().to_string();
    let mut args = vec!["archive", "--format=tar", revision];
    if let Some(subtree) = subtree {
        args.push(subtree);
    }
    let command = args.join(" ");
    let spawn_error = |e: std::io::Error| Error::GitCommand {
        command: command.clone(),
        url: uri.clone(),
        stderr: e.to_string(),
    };

    fs::create_dir_all(dest)?;
    let mut git = Command::new("git")
        .args(&args)
        .current_dir(repo_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_error)?;
    let stream = git.stdout.take().ok_or_else(|| Error::GitCommand {
        command: command.clone(),
        url: uri.clone(),
        stderr: "archive produced no output stream".to_string(),
    })?;
    let tar_status = match Command::new("tar")
        .arg("-x")
        .arg("-C")
        .arg(dest)
        .stdin(Stdio::from(stream))
        .status()
    {
        Ok(status) => status,
        Err(err) => {
            reap(&mut git);
            return Err(err.into());
        }
    };
    let git_output = git.wait_with_output().map_err(spawn_error)?;

    if !git_output.status.success() {
        return Err(Error::GitCommand {
            command,
            url: uri,
            stderr: String::from_utf8_lossy(&git_output.stderr).trim().to_string(),
        });
    }
    if !tar_status.success() {
        return Err(Error::GitCommand {
            command,
            url: uri,
            stderr: format!("tar exited with {}", tar_status),
        });
    }
    Ok(())
}

/// Stops a child whose output is no longer read and collects its status.
fn reap(child: &mut Child) {
    if let Err(err) = child.kill() {
        debug!("git archive already exited: {}", err);
    }
    if let Err(err) = child.wait() {
        warn!("Failed to wait for git archive: {}", err);
    }
}

/// Bare cache location for a remote: a hash of the URI keeps it filesystem-safe.
pub fn cache_path(cache_root: &Path, uri: &str) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    uri.hash(&mut hasher);
    let tail = crate::ledger::basename(uri);
    cache_root
        .join(format!("{:x}-{}", hasher.finish(), tail))
        .join("git")
}

/// A git remote followed on one branch.
pub struct GitSource {
    uri: String,
    branch: Option<String>,
    cache_root: PathBuf,
    ops: Arc<dyn GitOperations>,
}

impl GitSource {
    pub fn new(
        uri: impl Into<String>,
        branch: Option<String>,
        cache_root: PathBuf,
        ops: Arc<dyn GitOperations>,
    ) -> Self {
        Self {
            uri: uri.into(),
            branch,
            cache_root,
            ops,
        }
    }

    fn head_ref(&self) -> String {
        match &self.branch {
            Some(branch) => format!("refs/heads/{}", branch),
            None => "HEAD".to_string(),
        }
    }

    fn list(&self) -> Result<Vec<RemoteRef>> {
        self.ops
            .ls_remote(&self.uri, self.branch.as_deref())
            .map_err(|e| Error::unavailable(&self.uri, e.to_string()))
    }
}

impl RevisionSource for GitSource {
    fn locator(&self) -> String {
        self.uri.clone()
    }

    fn check(&self) -> Result<bool> {
        Ok(!self.list()?.is_empty())
    }

    fn latest(&self) -> Result<Option<String>> {
        let head = self.head_ref();
        let refs = self.list()?;
        refs.into_iter()
            .find(|r| r.name == head)
            .map(|r| Some(r.revision))
            .ok_or_else(|| Error::unavailable(&self.uri, format!("no {} in ls-remote output", head)))
    }

    fn compare_heads(&self, candidate: &str) -> Result<bool> {
        Ok(self.list()?.iter().any(|r| r.revision == candidate))
    }

    fn snapshot(&self, revision: Option<&str>, dest: &Path, subtree: Option<&str>) -> Result<PathBuf> {
        let branch = self.branch.as_deref().unwrap_or("HEAD");
        let revision = revision.unwrap_or(branch);
        let repo_dir = cache_path(&self.cache_root, &self.uri);
        self.ops
            .fetch_into_cache(&self.uri, branch, &repo_dir)
            .and_then(|_| self.ops.archive(&repo_dir, revision, subtree, dest))
            .map_err(|e| Error::unavailable(&self.uri, e.to_string()))?;
        Ok(PathBuf::new())
    }
}
