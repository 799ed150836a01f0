//! Plan discovery on disk.
//!
//! Plans live in a tree whose section directories (`projects`, `products`,
//! `external` and the common config directory, all configurable) may appear at
//! any depth. Every regular file directly inside a directory with one of those
//! names is a plan of that section, unless its file name is blacklisted.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use log::debug;
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::target::Section;

/// Plan files by section, each list sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanTree {
    sections: BTreeMap<Section, BTreeSet<PathBuf>>,
}

impl PlanTree {
    /// Plans of one section.
    pub fn plans(&self, section: Section) -> impl Iterator<Item = &PathBuf> {
        self.sections.get(&section).into_iter().flatten()
    }

    pub fn insert(&mut self, section: Section, plan: PathBuf) {
        self.sections.entry(section).or_default().insert(plan);
    }

    /// Keeps only plans whose path ends with one of `selected`.
    pub fn restrict_to(&mut self, selected: &[PathBuf]) {
        if selected.is_empty() {
            return;
        }
        for plans in self.sections.values_mut() {
            plans.retain(|plan| selected.iter().any(|wanted| plan.ends_with(wanted)));
        }
    }

    pub fn len(&self) -> usize {
        self.sections.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Walks `root` and buckets plan files by section directory name.
pub fn read_plans(root: &Path, config: &Config) -> Result<PlanTree> {
    let names = [
        (config.projects_dir.as_str(), Section::Projects),
        (config.products_dir.as_str(), Section::Products),
        (config.external_dir.as_str(), Section::External),
        (config.common_dir.as_str(), Section::Common),
    ];

    debug!("Gathering plan files from {}", root.display());
    let mut tree = PlanTree::default();
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if config.file_name_blacklist.iter().any(|b| *b == file_name) {
            continue;
        }
        let parent = entry
            .path()
            .parent()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned());
        let Some(parent) = parent else { continue };
        if let Some((_, section)) = names.iter().find(|(name, _)| *name == parent) {
            tree.insert(*section, entry.path().to_path_buf());
        }
    }
    debug!("Found {} plan files", tree.len());
    Ok(tree)
}
