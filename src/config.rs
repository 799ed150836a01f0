//! # Tool Configuration
//!
//! buildtide reads YAML configuration files into [`ConfigFile`], where every
//! field is optional, and layers them over built-in defaults to produce a
//! [`Config`]:
//!
//! 1. built-in defaults,
//! 2. `/etc/buildtide.yaml`,
//! 3. `~/.buildtide.yaml`,
//! 4. the file named by `--config` or `BUILDTIDE_CONFIG`.
//!
//! Later layers win field by field. Missing files in the search path are
//! skipped; an explicitly named file that is missing is an error.
//!
//! ```yaml
//! build_exec: /usr/bin/bob
//! registry_exec: /usr/local/bin/registry-query
//! wms_base: http://wms.example.com
//! macros:
//!   branch: main
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};
use crate::macros::Macros;

/// One configuration file as written. Unset fields leave lower layers alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub build_exec: Option<String>,
    pub registry_exec: Option<String>,
    pub wms_base: Option<String>,
    pub tmp_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub plans_subdir: Option<String>,
    pub projects_dir: Option<String>,
    pub products_dir: Option<String>,
    pub external_dir: Option<String>,
    pub common_dir: Option<String>,
    pub group_config: Option<String>,
    pub file_name_blacklist: Option<Vec<String>>,
    pub ledger_dir: Option<PathBuf>,
    pub test_only: Option<bool>,
    pub debug_mode: Option<bool>,
    pub macros: Option<BTreeMap<String, String>>,
    pub plan_preload: Option<Vec<PathBuf>>,
}

impl ConfigFile {
    pub fn parse(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| Error::Configuration {
            message: format!("{}: {}", path.display(), e),
            hint: None,
        })
    }
}

/// Effective configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub build_exec: String,
    pub registry_exec: String,
    pub wms_base: String,
    pub tmp_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub plans_subdir: String,
    pub projects_dir: String,
    pub products_dir: String,
    pub external_dir: String,
    pub common_dir: String,
    pub group_config: String,
    pub file_name_blacklist: Vec<String>,
    pub ledger_dir: PathBuf,
    pub test_only: bool,
    pub debug_mode: bool,
    pub macros: Macros,
    pub plan_preload: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            build_exec: "/usr/bin/bob".to_string(),
            registry_exec: "registry-query".to_string(),
            wms_base: "http://localhost/wms".to_string(),
            tmp_dir: PathBuf::from("tmp"),
            cache_dir: defaults::default_cache_root(),
            plans_subdir: "bob-plans".to_string(),
            projects_dir: "projects".to_string(),
            products_dir: "products".to_string(),
            external_dir: "external".to_string(),
            common_dir: "config".to_string(),
            group_config: "group.conf".to_string(),
            file_name_blacklist: vec!["common.conf".to_string()],
            ledger_dir: PathBuf::from("."),
            test_only: false,
            debug_mode: false,
            macros: Macros::new(),
            plan_preload: Vec::new(),
        }
    }
}

impl Config {
    /// Loads the search path and then `explicit`, if given.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        for path in defaults::config_search_path() {
            if path.is_file() {
                debug!("Reading configuration from {}", path.display());
                config.apply(ConfigFile::from_file(&path)?);
            }
        }
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(Error::Configuration {
                    message: format!("configuration file {} not found", path.display()),
                    hint: Some(format!(
                        "Check --config or the {} environment variable",
                        defaults::CONFIG_ENV
                    )),
                });
            }
            debug!("Reading configuration from {}", path.display());
            config.apply(ConfigFile::from_file(path)?);
        }
        Ok(config)
    }

    /// Overlays the fields set in `file`. Macros merge by name.
    pub fn apply(&mut self, file: ConfigFile) {
        fn set<T>(slot: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *slot = value;
            }
        }
        set(&mut self.build_exec, file.build_exec);
        set(&mut self.registry_exec, file.registry_exec);
        set(&mut self.wms_base, file.wms_base);
        set(&mut self.tmp_dir, file.tmp_dir);
        set(&mut self.cache_dir, file.cache_dir);
        set(&mut self.plans_subdir, file.plans_subdir);
        set(&mut self.projects_dir, file.projects_dir);
        set(&mut self.products_dir, file.products_dir);
        set(&mut self.external_dir, file.external_dir);
        set(&mut self.common_dir, file.common_dir);
        set(&mut self.group_config, file.group_config);
        set(&mut self.file_name_blacklist, file.file_name_blacklist);
        set(&mut self.ledger_dir, file.ledger_dir);
        set(&mut self.test_only, file.test_only);
        set(&mut self.debug_mode, file.debug_mode);
        set(&mut self.plan_preload, file.plan_preload);
        if let Some(macros) = file.macros {
            self.macros.extend(macros);
        }
    }

    /// The effective configuration as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
