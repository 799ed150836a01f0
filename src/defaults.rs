//! Default values for buildtide configuration.
//!
//! This module provides centralized default values used across commands,
//! ensuring consistency and avoiding duplication.

use std::path::PathBuf;

/// Environment variable naming an extra configuration file.
pub const CONFIG_ENV: &str = "BUILDTIDE_CONFIG";

/// System-wide configuration file.
pub const SYSTEM_CONFIG: &str = "/etc/buildtide.yaml";

/// Per-user configuration file name, relative to the home directory.
pub const USER_CONFIG: &str = ".buildtide.yaml";

/// Returns the default cache root directory.
///
/// Uses the platform-appropriate cache directory:
/// - Linux: `~/.cache/buildtide` (XDG Base Directory)
/// - macOS: `~/Library/Caches/buildtide`
/// - Windows: `{FOLDERID_LocalAppData}\buildtide`
///
/// Falls back to `.buildtide-cache` in the current directory if the
/// platform cache directory cannot be determined.
pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".buildtide-cache"))
        .join("buildtide")
}

/// Configuration files read before any explicit `--config`, in order.
pub fn config_search_path() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(SYSTEM_CONFIG)];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(USER_CONFIG));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cache_root_returns_path() {
        let cache_root = default_cache_root();
        assert!(cache_root.ends_with("buildtide"));
    }

    #[test]
    fn test_default_cache_root_is_absolute_or_fallback() {
        let cache_root = default_cache_root();
        assert!(
            cache_root.is_absolute() || cache_root.starts_with(".buildtide-cache"),
            "Expected absolute path or fallback, got: {:?}",
            cache_root
        );
    }

    #[test]
    fn test_search_path_starts_with_system_file() {
        let paths = config_search_path();
        assert_eq!(paths[0], PathBuf::from(SYSTEM_CONFIG));
        assert!(paths.len() <= 2);
    }
}
