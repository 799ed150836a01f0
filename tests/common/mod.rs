//! Shared test utilities for E2E tests.
//!
//! ## Usage
//!
//! Add `mod common;` to your test file, then use the helpers:
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! #[test]
//! fn test_example() {
//!     let fixture = TestFixture::new().with_plan("projects/widget.bob", plans::WIDGET);
//!     fixture.command().arg("build").arg("--repo").arg(fixture.plans_dir()).assert().success();
//! }
//! ```

use assert_fs::prelude::*;
use std::path::{Path, PathBuf};

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use assert_fs::TempDir;
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::plans;
    pub use super::TestFixture;
}

/// Plan snippets.
#[allow(dead_code)]
pub mod plans {
    /// Shared macros included by the other plans.
    pub const COMMON: &str = "macros branch main\ntargetLabel build.example.com@corp:%(branch)s\n";

    /// One plan, two targets.
    pub const WIDGET: &str = "includeConfigFile ../config/common.conf\ntarget widget widget-docs\n";

    /// One plan, one target.
    pub const GADGET: &str = "includeConfigFile ../config/common.conf\ntarget gadget\n";

    /// A plan on another branch.
    pub const LEGACY: &str = "macros branch release-4\ntarget legacy\n";
}

/// A temporary plan tree plus the configuration and collaborator scripts a
/// run needs.
pub struct TestFixture {
    temp_dir: assert_fs::TempDir,
    config: Vec<String>,
}

impl TestFixture {
    /// A fixture whose registry knows nothing and whose executor succeeds.
    pub fn new() -> Self {
        let fixture = Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
            config: Vec::new(),
        };
        fixture
            .with_file("bob-plans/config/common.conf", plans::COMMON)
            .with_registry("exit 0")
            .with_executor("exit 0")
    }

    /// Add a plan under `bob-plans/`.
    pub fn with_plan(self, path: &str, content: &str) -> Self {
        self.with_file(&format!("bob-plans/{}", path), content)
    }

    /// Add a file with the given path and content.
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.temp_dir
            .child(path)
            .write_str(content)
            .expect("Failed to write file");
        self
    }

    /// Replace the registry executable with a shell script body.
    pub fn with_registry(self, body: &str) -> Self {
        self.with_script("registry-query", body)
    }

    /// Replace the build executable with a shell script body.
    pub fn with_executor(self, body: &str) -> Self {
        self.with_script("bob", body)
    }

    /// Add a raw line to the generated configuration file.
    #[allow(dead_code)]
    pub fn with_config_line(mut self, line: &str) -> Self {
        self.config.push(line.to_string());
        self
    }

    fn with_script(self, name: &str, body: &str) -> Self {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("Failed to write script");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .expect("Failed to make script executable");
        }
        self
    }

    /// Get the path to the temporary directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Get a child path within the temp directory.
    #[allow(dead_code)]
    pub fn child(&self, path: &str) -> assert_fs::fixture::ChildPath {
        self.temp_dir.child(path)
    }

    /// The directory passed as `--repo`.
    pub fn plans_dir(&self) -> PathBuf {
        self.path().to_path_buf()
    }

    /// Get the path to the config file.
    pub fn config_path(&self) -> PathBuf {
        self.path().join("buildtide.yaml")
    }

    fn write_config(&self) {
        let root = self.path();
        let mut lines = vec![
            format!("build_exec: {}", root.join("bob").display()),
            format!("registry_exec: {}", root.join("registry-query").display()),
            format!("tmp_dir: {}", root.join("tmp").display()),
            format!("cache_dir: {}", root.join("cache").display()),
            format!("ledger_dir: {}", root.join("ledger").display()),
        ];
        lines.extend(self.config.iter().cloned());
        std::fs::write(self.config_path(), lines.join("\n") + "\n").expect("Failed to write config file");
    }

    /// Create a command using this fixture's configuration, isolated from the
    /// user's own configuration file.
    pub fn command(&self) -> assert_cmd::Command {
        self.write_config();
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("buildtide");
        cmd.current_dir(self.path())
            .env("HOME", self.path())
            .env("BUILDTIDE_CONFIG", self.config_path())
            .env_remove("GERRIT_PROJECT")
            .env_remove("RUST_LOG")
            .arg("--color")
            .arg("never");
        cmd
    }

    /// `buildtide build --repo <fixture>` with extra arguments.
    #[allow(dead_code)]
    pub fn build(&self, args: &[&str]) -> assert_cmd::Command {
        let mut cmd = self.command();
        cmd.arg("build").arg("--repo").arg(self.plans_dir()).args(args);
        cmd
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
