//! Orchestrator for a complete reconciliation run
//!
//! This module coordinates the phases into one run and collects what they
//! report. Nothing in a run is concurrent: plans, targets, builds and the group
//! step are handled one after another.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;
use tempfile::TempDir;

use super::build::{self, BuildReport};
use super::detection;
use super::discovery::{self, DiscoveryContext};
use super::group::{self, GroupContext, GroupDefinition, GroupOutcome};
use super::PlanFailure;
use crate::cache::ControllerCache;
use crate::config::Config;
use crate::error::Result;
use crate::executor::BuildExecutor;
use crate::plan::Plan;
use crate::reader::{self, PlanTree};
use crate::registry::{GroupPublisher, Registry};
use crate::scm::{create_controller, RepositoryDeclaration, ScmContext, ScmKind};
use crate::target::{Section, Target};

/// What the caller asked for.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Branch every plan must declare.
    pub branch: Option<String>,
    /// Targets built regardless of their change flag.
    pub force: BTreeSet<String>,
    pub dry_run: bool,
    /// Discover and build the products section too.
    pub include_products: bool,
    /// Discover the external section, for group membership.
    pub include_external: bool,
    /// Group to reconcile instead of the one in the group config plan.
    pub group: Option<GroupDefinition>,
    /// Restricts the run to plans whose path ends with one of these.
    pub plans: Vec<PathBuf>,
    /// Stop after change detection.
    pub detect_only: bool,
}

/// Collaborators a run talks to.
pub struct Collaborators<'a> {
    pub registry: &'a dyn Registry,
    pub publisher: &'a dyn GroupPublisher,
    pub executor: &'a dyn BuildExecutor,
    pub scm: &'a ScmContext,
    pub cache: &'a ControllerCache,
}

/// Everything a run produced.
#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub targets: Vec<Target>,
    pub build: Option<BuildReport>,
    pub group: Option<GroupOutcome>,
    pub group_error: Option<String>,
    /// Plans and targets dropped from the run.
    pub errors: Vec<PlanFailure>,
}

impl RunReport {
    /// Exit status rule: a build pass that built nothing but failed something,
    /// a failed group publish, or with `strict` any dropped plan or target.
    pub fn is_failure(&self, strict: bool) -> bool {
        self.build.as_ref().is_some_and(BuildReport::is_failure)
            || self.group_error.is_some()
            || (strict && !self.errors.is_empty())
    }

    pub fn changed(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter().filter(|t| t.is_changed())
    }
}

/// A plan tree on disk, with the snapshot directory it lives in when fetched.
#[derive(Debug)]
pub struct PlanRoot {
    pub path: PathBuf,
    _snapshot: Option<TempDir>,
}

impl PlanRoot {
    /// A directory used in place.
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _snapshot: None,
        }
    }
}

/// Resolves `--repo`: a local directory is used in place, anything else is a
/// `wms` or `git` locator snapshotted under the configured tmp dir. The
/// snapshot is removed when the returned [`PlanRoot`] is dropped.
pub fn fetch_plans(
    repo: &str,
    branch: Option<&str>,
    config: &Config,
    scm: &ScmContext,
    cache: &ControllerCache,
) -> Result<PlanRoot> {
    let local = Path::new(repo);
    if local.is_dir() {
        let nested = local.join(&config.plans_subdir);
        let path = if nested.is_dir() { nested } else { local.to_path_buf() };
        debug!("Reading plans from {}", path.display());
        return Ok(PlanRoot::local(path));
    }

    let declaration = plan_repository(repo, branch, config)?;
    let controller = cache.get_or_create(&declaration, || create_controller(&declaration, scm))?;
    fs::create_dir_all(&config.tmp_dir)?;
    let snapshot = tempfile::Builder::new()
        .prefix("buildtide-plans-")
        .tempdir_in(&config.tmp_dir)?;
    info!("Fetching plans from {}", controller.locator());
    let prefix = controller.snapshot(snapshot.path(), None)?;

    let fetched = snapshot.path().join(prefix);
    let nested = fetched.join(&config.plans_subdir);
    let path = if nested.is_dir() { nested } else { fetched };
    Ok(PlanRoot {
        path,
        _snapshot: Some(snapshot),
    })
}

/// Declaration of the repository holding the plans.
pub fn plan_repository(repo: &str, branch: Option<&str>, config: &Config) -> Result<RepositoryDeclaration> {
    let wms_base = config.wms_base.trim_end_matches('/');
    match repo.strip_prefix(wms_base) {
        Some(rest) if !wms_base.is_empty() => {
            let path = rest
                .trim_start_matches('/')
                .trim_start_matches("api/repos/")
                .replace(':', "/");
            RepositoryDeclaration::from_location(ScmKind::Wms, &path, branch, wms_base)
        }
        _ => RepositoryDeclaration::from_location(ScmKind::Git, repo, branch, wms_base),
    }
}

/// Group definition from the options, else from the group config plan.
pub fn resolve_group(tree: &PlanTree, config: &Config, options: &RunOptions) -> Result<Option<GroupDefinition>> {
    if let Some(group) = &options.group {
        return Ok(Some(group.clone()));
    }
    let Some(path) = tree
        .plans(Section::Common)
        .find(|p| p.file_name().is_some_and(|n| *n == *config.group_config))
    else {
        return Ok(None);
    };
    let plan = Plan::load(path, &config.plan_preload, &config.macros)?;
    GroupDefinition::from_plan(&plan)
}

/// Runs discovery, detection, the build pass and the group step over the
/// plans under `root`.
pub fn execute(root: &Path, config: &Config, options: &RunOptions, with: &Collaborators<'_>) -> Result<RunReport> {
    let mut tree = reader::read_plans(root, config)?;
    let group = resolve_group(&tree, config, options)?;
    tree.restrict_to(&options.plans);
    let include_external = options.include_external || group.as_ref().is_some_and(|g| g.include_external);

    let mut sections = vec![Section::Projects];
    if options.include_products {
        sections.push(Section::Products);
    }

    let ctx = DiscoveryContext {
        scm: with.scm,
        cache: with.cache,
        run_branch: options.branch.as_deref(),
        wms_base: &config.wms_base,
        overrides: &config.macros,
        preload: &config.plan_preload,
    };

    // Phase 1: Discovery
    let mut report = RunReport::default();
    let discovered = discovery::execute(&tree, &sections, &ctx);
    let mut buildable = discovered.targets;
    report.errors.extend(discovered.failures);

    let mut external = Vec::new();
    if include_external {
        let discovered = discovery::execute(&tree, &[Section::External], &ctx);
        external = discovered.targets;
        report.errors.extend(discovered.failures);
    }
    info!(
        "Discovered {} targets ({} external) in {} plans",
        buildable.len() + external.len(),
        external.len(),
        tree.len()
    );

    // Phase 2: Change Detection
    report
        .errors
        .extend(detection::execute(&mut buildable, with.registry, &options.force));
    report
        .errors
        .extend(detection::execute(&mut external, with.registry, &options.force));

    if options.detect_only {
        report.targets = buildable.into_iter().chain(external).collect();
        return Ok(report);
    }

    // Phase 3: Build
    let build_report = build::execute(&mut buildable, with.executor, with.registry);
    build::log_report(&build_report, &buildable, options.dry_run);

    // Phase 4: Group
    if let Some(definition) = &group {
        if build_report.built.is_empty() && !options.dry_run {
            info!("Nothing was built; leaving group {} alone", definition.name);
        } else {
            let ctx = GroupContext {
                registry: with.registry,
                publisher: with.publisher,
                dry_run: options.dry_run,
                tmp_dir: &config.tmp_dir,
            };
            let members = buildable
                .iter()
                .filter(|t| t.section == Section::Projects)
                .chain(external.iter().filter(|_| definition.include_external));
            match group::execute(definition, members, &ctx) {
                Ok(outcome) => report.group = Some(outcome),
                Err(err) => {
                    warn!("Group {} was not published: {}", definition.name, err);
                    report.group_error = Some(err.to_string());
                }
            }
        }
    }

    report.build = Some(build_report);
    report.targets = buildable.into_iter().chain(external).collect();
    Ok(report)
}
