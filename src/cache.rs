//! In-process cache of controllers
//!
//! Targets in one plan, and often across plans, declare the same repository.
//! The cache hands every one of them the same [`Controller`] so a revision is
//! resolved once per declaration per run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::scm::{Controller, RepositoryDeclaration};

type Entries = HashMap<RepositoryDeclaration, Arc<Controller>>;

/// Controllers keyed by their declaration
#[derive(Debug, Clone, Default)]
pub struct ControllerCache {
    cache: Arc<Mutex<Entries>>,
}

impl ControllerCache {
    /// Create a new empty controller cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the cached controller, or create and cache it if not present
    pub fn get_or_create<F>(&self, key: &RepositoryDeclaration, create: F) -> Result<Arc<Controller>>
    where
        F: FnOnce() -> Result<Controller>,
    {
        let mut cache = self.lock()?;
        if let Some(cached) = cache.get(key) {
            return Ok(cached.clone());
        }
        let controller = Arc::new(create()?);
        cache.insert(key.clone(), controller.clone());
        Ok(controller)
    }

    /// Get a controller without creating one
    pub fn get(&self, key: &RepositoryDeclaration) -> Result<Option<Arc<Controller>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    /// Get the number of cached controllers
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Entries>> {
        self.cache.lock().map_err(|_| Error::LockPoisoned {
            context: "controller cache".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scm::tests::MockSource;
    use crate::scm::ScmKind;

    fn declaration(path: &str) -> RepositoryDeclaration {
        RepositoryDeclaration::from_location(ScmKind::Local, path, None, "").unwrap()
    }

    fn build(decl: &RepositoryDeclaration) -> Result<Controller> {
        Ok(Controller::new(decl.clone(), Box::new(MockSource::new(Some("abc")))))
    }

    #[test]
    fn test_same_declaration_shares_controller() {
        let cache = ControllerCache::new();
        let key = declaration("/srv/a");
        let first = cache.get_or_create(&key, || build(&key)).unwrap();
        let second = cache
            .get_or_create(&key, || panic!("should not create twice"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn test_distinct_declarations_get_distinct_controllers() {
        let cache = ControllerCache::new();
        let a = declaration("/srv/a");
        let b = declaration("/srv/b");
        cache.get_or_create(&a, || build(&a)).unwrap();
        cache.get_or_create(&b, || build(&b)).unwrap();
        assert_eq!(cache.len().unwrap(), 2);
        assert!(cache.get(&a).unwrap().is_some());
    }

    #[test]
    fn test_creation_error_is_not_cached() {
        let cache = ControllerCache::new();
        let key = declaration("/srv/a");
        let result = cache.get_or_create(&key, || Err(Error::configuration("nope")));
        assert!(result.is_err());
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn test_clones_share_entries() {
        let cache = ControllerCache::new();
        let clone = cache.clone();
        let key = declaration("/srv/a");
        cache.get_or_create(&key, || build(&key)).unwrap();
        assert_eq!(clone.len().unwrap(), 1);
    }
}
