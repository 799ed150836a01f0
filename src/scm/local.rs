//! Local-filesystem revision source.
//!
//! A local tree has no history to query, so it never reports a revision.

use std::path::{Path, PathBuf};

use super::RevisionSource;
use crate::error::{Error, Result};

pub struct LocalSource {
    path: PathBuf,
}

impl LocalSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RevisionSource for LocalSource {
    fn locator(&self) -> String {
        self.path.display().to_string()
    }

    fn check(&self) -> Result<bool> {
        Ok(self.path.exists())
    }

    fn latest(&self) -> Result<Option<String>> {
        Ok(None)
    }

    fn snapshot(&self, _revision: Option<&str>, _dest: &Path, _subtree: Option<&str>) -> Result<PathBuf> {
        Err(Error::NotImplemented {
            feature: format!("snapshot of local tree {}", self.path.display()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_check_is_existence() {
        let dir = TempDir::new().unwrap();
        assert!(LocalSource::new(dir.path()).check().unwrap());
        assert!(!LocalSource::new(dir.path().join("missing")).check().unwrap());
    }

    #[test]
    fn test_latest_is_none() {
        assert_eq!(LocalSource::new("/srv/src").latest().unwrap(), None);
    }

    #[test]
    fn test_snapshot_is_not_implemented() {
        let dir = TempDir::new().unwrap();
        let err = LocalSource::new("/srv/src")
            .snapshot(None, dir.path(), None)
            .unwrap_err();
        assert!(matches!(err, Error::NotImplemented { .. }));
    }
}
