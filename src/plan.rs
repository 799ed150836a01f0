//! # Build Plans
//!
//! A plan is a line-oriented `key value` file declaring build targets, the
//! repositories they are built from and the macros used to fill in both.
//!
//! ```text
//! includeConfigFile ../config/common.conf
//! macros project_name widget
//! macros branch main
//! targetLabel build.example.com@corp:%(project_name)s-%(branch)s
//! wmsBase http://wms.example.com
//! scm widget git https://git.example.com/corp/widget.git %(branch)s
//! target widget widget-docs
//!
//! [target:widget-docs]
//! scm widget
//! ```
//!
//! Values are kept as written. Macro references (`%(name)s`) are expanded by
//! the accessors, so the same plan can be read with different override maps.
//! Keys this crate does not use are ignored; plans are shared with the build
//! executor, which understands many more.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Error, Result};
use crate::macros::{expand_macros, expand_str, layer, lookup, Macros};
use crate::scm::ScmKind;
use crate::version::Label;

/// Deepest `includeConfigFile` chain accepted.
pub const MAX_INCLUDE_DEPTH: usize = 16;

/// Macro the plan's target label is exposed under.
pub const TARGET_LABEL_MACRO: &str = "target_label";

/// An `scm` line after macro expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySpec {
    pub kind: ScmKind,
    pub location: String,
    pub branch: Option<String>,
}

/// Keys of a `[target:NAME]` section. `tag` is passed to the build executor
/// as a tag override.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSection {
    pub scm: Option<String>,
    pub source_tree: Option<String>,
    pub version: Option<String>,
    pub flavor_set: Option<String>,
    pub tag: Option<String>,
}

/// What the rest of the pipeline needs from a plan.
pub trait PlanAccessor {
    /// Path the plan was read from; the build dedup key.
    fn path(&self) -> &Path;

    /// Declared target names in declaration order.
    fn targets(&self) -> Vec<String>;

    /// Resolved macros, including `target_label`.
    fn macros(&self) -> Result<Macros>;

    /// Resolved value of one macro. Fails only when that value references an
    /// undefined macro.
    fn macro_value(&self, name: &str) -> Result<Option<String>> {
        Ok(self.macros()?.remove(name))
    }

    /// Repository declarations by scm name. `None` expands with the plan's own
    /// macros; `Some(overrides)` layers `overrides` over them.
    fn repositories(&self, overrides: Option<&Macros>) -> Result<BTreeMap<String, RepositorySpec>>;

    /// Registry label the plan's targets publish under.
    fn target_label(&self) -> Result<Option<Label>>;

    /// Scm name a target takes its commit from.
    fn primary_scm(&self, target: &str) -> Option<String>;

    /// Poll service base declared by the plan.
    fn wms_base(&self) -> Option<String>;

    /// Tag override for a target's build.
    fn target_tag(&self, _target: &str) -> Option<String> {
        None
    }

    /// Branch the plan declares: the `branch` macro, else `sourceControlBranch`.
    fn declared_branch(&self) -> Result<Option<String>> {
        let branch = match self.macro_value("branch")? {
            Some(branch) => Some(branch),
            None => self.macro_value("sourceControlBranch")?,
        };
        Ok(branch.filter(|b| !b.is_empty()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RawScm {
    kind: String,
    location: String,
    branch: Option<String>,
}

/// A parsed plan file.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    path: PathBuf,
    targets: Vec<String>,
    declared: Macros,
    overrides: Macros,
    target_label: Option<String>,
    scm: BTreeMap<String, RawScm>,
    wms_base: Option<String>,
    sections: BTreeMap<String, TargetSection>,
}

enum Block {
    Top,
    Target(String),
    Other,
}

impl Plan {
    /// Reads `path`, after the `preload` files, with `overrides` layered over
    /// the plan's macros.
    pub fn load(path: &Path, preload: &[PathBuf], overrides: &Macros) -> Result<Self> {
        let mut plan = Plan {
            path: path.to_path_buf(),
            overrides: overrides.clone(),
            ..Default::default()
        };
        for file in preload {
            plan.read_file(file, 0)?;
        }
        plan.read_file(path, 0)?;
        debug!(
            "Read plan {} with {} targets and {} repositories",
            path.display(),
            plan.targets.len(),
            plan.scm.len()
        );
        Ok(plan)
    }

    /// Parses plan text as if it were read from `path`.
    pub fn parse(path: &Path, content: &str, overrides: &Macros) -> Result<Self> {
        let mut plan = Plan {
            path: path.to_path_buf(),
            overrides: overrides.clone(),
            ..Default::default()
        };
        plan.read_str(path, content, 0)?;
        Ok(plan)
    }

    /// Section of a target, if the plan has one.
    pub fn section(&self, target: &str) -> Option<&TargetSection> {
        self.sections.get(target)
    }

    fn read_file(&mut self, path: &Path, depth: usize) -> Result<()> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(Error::PlanParse {
                path: path.to_path_buf(),
                line: 0,
                message: format!("includes nested deeper than {}", MAX_INCLUDE_DEPTH),
            });
        }
        let content = fs::read_to_string(path).map_err(|e| Error::PlanParse {
            path: path.to_path_buf(),
            line: 0,
            message: e.to_string(),
        })?;
        self.read_str(path, &content, depth)
    }

    fn read_str(&mut self, origin: &Path, content: &str, depth: usize) -> Result<()> {
        let mut block = Block::Top;
        for (number, line) in logical_lines(content) {
            let parse_error = |message: String| Error::PlanParse {
                path: origin.to_path_buf(),
                line: number,
                message,
            };

            if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                block = match header.strip_prefix("target:") {
                    Some(name) => Block::Target(name.trim().to_string()),
                    None => Block::Other,
                };
                continue;
            }

            let (key, value) = match line.split_once(char::is_whitespace) {
                Some((key, value)) => (key, value.trim()),
                None => (line.as_str(), ""),
            };

            match &block {
                Block::Target(name) => {
                    let entry = self.sections.entry(name.clone()).or_default();
                    match key {
                        "scm" => entry.scm = Some(value.to_string()),
                        "sourceTree" => entry.source_tree = Some(value.to_string()),
                        "version" => entry.version = Some(value.to_string()),
                        "flavor_set" => entry.flavor_set = Some(value.to_string()),
                        "tag" => entry.tag = Some(value.to_string()),
                        _ => debug!("{}:{}: ignoring '{}' in target section", origin.display(), number, key),
                    }
                }
                Block::Other => {}
                Block::Top => match key {
                    "includeConfigFile" => {
                        if value.is_empty() {
                            return Err(parse_error("includeConfigFile needs a path".to_string()));
                        }
                        let include = origin
                            .parent()
                            .map(|dir| dir.join(value))
                            .unwrap_or_else(|| PathBuf::from(value));
                        self.read_file(&include, depth + 1)?;
                    }
                    "macros" => {
                        let (name, value) = value
                            .split_once(char::is_whitespace)
                            .map(|(n, v)| (n, v.trim()))
                            .unwrap_or((value, ""));
                        if name.is_empty() {
                            return Err(parse_error("macros needs a name".to_string()));
                        }
                        self.declared.insert(name.to_string(), value.to_string());
                    }
                    "targetLabel" => self.target_label = Some(value.to_string()),
                    "wmsBase" => self.wms_base = Some(value.to_string()),
                    "target" => {
                        if value == "[]" {
                            self.targets.clear();
                        } else {
                            for name in value.split_whitespace() {
                                if !self.targets.iter().any(|t| t == name) {
                                    self.targets.push(name.to_string());
                                }
                            }
                        }
                    }
                    "scm" => {
                        let fields: Vec<&str> = value.split_whitespace().collect();
                        let (name, kind, location, branch) = match fields.as_slice() {
                            [name, kind, location] => (*name, *kind, *location, None),
                            [name, kind, location, branch] => {
                                (*name, *kind, *location, Some(branch.to_string()))
                            }
                            _ => {
                                return Err(parse_error(
                                    "expected 'scm NAME TYPE LOCATION [BRANCH]'".to_string(),
                                ))
                            }
                        };
                        self.scm.insert(
                            name.to_string(),
                            RawScm {
                                kind: kind.to_string(),
                                location: location.to_string(),
                                branch,
                            },
                        );
                    }
                    _ => {}
                },
            }
        }
        Ok(())
    }

    /// Expands `raw` if the macros it references resolve, else returns it as
    /// written.
    fn expand_lossy(&self, raw: String) -> String {
        expand_str(&raw, &self.layered(None)).unwrap_or(raw)
    }

    /// Declared macros with the load-time overrides and then `extra` on top,
    /// still unexpanded.
    fn layered(&self, extra: Option<&Macros>) -> Macros {
        let mut overrides = self.overrides.clone();
        if let Some(extra) = extra {
            overrides.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        layer(&self.declared_with_label(), &overrides)
    }

    fn declared_with_label(&self) -> Macros {
        let mut declared = self.declared.clone();
        if let Some(label) = &self.target_label {
            declared.insert(TARGET_LABEL_MACRO.to_string(), label.clone());
        }
        declared
    }
}

impl PlanAccessor for Plan {
    fn path(&self) -> &Path {
        &self.path
    }

    fn targets(&self) -> Vec<String> {
        self.targets.clone()
    }

    fn macros(&self) -> Result<Macros> {
        expand_macros(&self.declared_with_label(), &self.overrides)
    }

    fn macro_value(&self, name: &str) -> Result<Option<String>> {
        lookup(name, &self.layered(None))
    }

    fn repositories(&self, overrides: Option<&Macros>) -> Result<BTreeMap<String, RepositorySpec>> {
        let macros = self.layered(overrides);

        let mut repositories = BTreeMap::new();
        for (name, raw) in &self.scm {
            let kind = expand_str(&raw.kind, &macros)?.parse::<ScmKind>()?;
            let location = expand_str(&raw.location, &macros)?;
            let branch = match &raw.branch {
                Some(branch) => Some(expand_str(branch, &macros)?).filter(|b| !b.is_empty()),
                None => None,
            };
            repositories.insert(
                name.clone(),
                RepositorySpec {
                    kind,
                    location,
                    branch,
                },
            );
        }
        Ok(repositories)
    }

    fn target_label(&self) -> Result<Option<Label>> {
        Ok(self.macro_value(TARGET_LABEL_MACRO)?.map(Label::new))
    }

    fn primary_scm(&self, target: &str) -> Option<String> {
        let section = self.sections.get(target)?;
        let raw = section.scm.clone().or_else(|| {
            section
                .source_tree
                .as_deref()
                .and_then(|tree| tree.split_whitespace().next())
                .map(str::to_string)
        })?;
        Some(self.expand_lossy(raw))
    }

    fn wms_base(&self) -> Option<String> {
        let raw = self.wms_base.clone()?;
        Some(self.expand_lossy(raw))
    }

    fn target_tag(&self, target: &str) -> Option<String> {
        let raw = self.sections.get(target)?.tag.clone()?;
        Some(self.expand_lossy(raw))
    }
}

/// Joins `\` continuations and drops blank and `#` comment lines, keeping the
/// number of the first physical line.
fn logical_lines(content: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;
    for (index, raw) in content.lines().enumerate() {
        let (number, mut text) = match pending.take() {
            Some((number, mut text)) => {
                text.push(' ');
                text.push_str(raw.trim());
                (number, text)
            }
            None => (index + 1, raw.trim().to_string()),
        };
        if let Some(stripped) = text.strip_suffix('\\') {
            text = stripped.trim_end().to_string();
            pending = Some((number, text));
            continue;
        }
        if !text.is_empty() && !text.starts_with('#') {
            lines.push((number, text));
        }
    }
    if let Some((number, text)) = pending {
        if !text.is_empty() && !text.starts_with('#') {
            lines.push((number, text));
        }
    }
    lines
}
