//! Phase 1: Discovery
//!
//! Turns plan files into [`Target`] records ready for change detection.
//!
//! ## Process
//!
//! 1.  **Branch resolution (`resolve_branch`)**: a plan declares its branch with
//!     the `branch` macro, or the legacy `sourceControlBranch`. When the run
//!     asks for a branch, a plan without one fails with `BranchMissing` and a
//!     plan with a different one fails with `BranchMismatch`. Either error drops
//!     that plan only.
//!
//! 2.  **Repositories (`declarations`)**: the plan's `scm` lines are expanded with
//!     its own macros first. If that fails (typically a `%(branch)s` the plan
//!     leaves to the caller) they are expanded again with the resolved branch
//!     layered on top.
//!
//! 3.  **Controllers**: each declaration gets its controller from the shared
//!     [`ControllerCache`], so targets declaring the same repository share it.

use std::collections::BTreeMap;
use std::path::PathBuf;

use log::{debug, error, info, warn};

use super::PlanFailure;
use crate::cache::ControllerCache;
use crate::error::{Error, Result};
use crate::macros::Macros;
use crate::plan::{Plan, PlanAccessor};
use crate::reader::PlanTree;
use crate::scm::{create_controller, RepositoryDeclaration, ScmContext};
use crate::target::{Section, Target};

/// What discovery needs besides the plans themselves.
pub struct DiscoveryContext<'a> {
    pub scm: &'a ScmContext,
    pub cache: &'a ControllerCache,
    /// Branch requested for the whole run.
    pub run_branch: Option<&'a str>,
    /// Poll service base for plans that declare none.
    pub wms_base: &'a str,
    /// Macro overrides applied to every plan.
    pub overrides: &'a Macros,
    /// Files read before every plan.
    pub preload: &'a [PathBuf],
}

/// Targets found, and the plans that could not be read.
#[derive(Debug, Default)]
pub struct Discovered {
    pub targets: Vec<Target>,
    pub failures: Vec<PlanFailure>,
}

/// Executes Phase 1 for the given sections of a plan tree.
pub fn execute(tree: &PlanTree, sections: &[Section], ctx: &DiscoveryContext<'_>) -> Discovered {
    let mut discovered = Discovered::default();
    for &section in sections {
        for path in tree.plans(section) {
            let result = Plan::load(path, ctx.preload, ctx.overrides)
                .and_then(|plan| discover_plan(&plan, section, ctx));
            match result {
                Ok(targets) => discovered.targets.extend(targets),
                Err(err) => {
                    error!("Skipping plan {}: {}", path.display(), err);
                    discovered.failures.push(PlanFailure::plan(path, &err));
                }
            }
        }
    }
    discovered
}

/// Branch a plan's targets are built from.
pub fn resolve_branch(plan: &dyn PlanAccessor, run_branch: Option<&str>) -> Result<Option<String>> {
    let declared = plan.declared_branch()?;
    match (run_branch, declared) {
        (Some(requested), None) => Err(Error::BranchMissing {
            plan: plan.path().to_path_buf(),
            requested: requested.to_string(),
        }),
        (Some(requested), Some(declared)) if declared != requested => Err(Error::BranchMismatch {
            plan: plan.path().to_path_buf(),
            declared,
            requested: requested.to_string(),
        }),
        (Some(requested), Some(_)) => Ok(Some(requested.to_string())),
        (None, declared) => Ok(declared),
    }
}

/// Repository declarations of a plan, retrying expansion with the branch.
pub fn declarations(
    plan: &dyn PlanAccessor,
    branch: Option<&str>,
    default_wms_base: &str,
) -> Result<BTreeMap<String, RepositoryDeclaration>> {
    let specs = match plan.repositories(None) {
        Ok(specs) => specs,
        Err(err) => {
            warn!(
                "Unable to read repositories from {}: {}; retrying with branch macro",
                plan.path().display(),
                err
            );
            let mut extra = Macros::new();
            if let Some(branch) = branch {
                extra.insert("branch".to_string(), branch.to_string());
            }
            plan.repositories(Some(&extra))?
        }
    };

    let wms_base = plan
        .wms_base()
        .unwrap_or_else(|| default_wms_base.to_string());
    specs
        .into_iter()
        .map(|(name, spec)| {
            let branch = spec.branch.as_deref().or(branch);
            let declaration = RepositoryDeclaration::from_location(spec.kind, &spec.location, branch, &wms_base)
                .map_err(|err| match err {
                    Error::Configuration { message, hint } => Error::Configuration {
                        message: format!("{} (scm '{}' in {})", message, name, plan.path().display()),
                        hint,
                    },
                    other => other,
                })?;
            Ok((name, declaration))
        })
        .collect()
}

/// Builds the targets of one plan.
pub fn discover_plan(
    plan: &dyn PlanAccessor,
    section: Section,
    ctx: &DiscoveryContext<'_>,
) -> Result<Vec<Target>> {
    let branch = resolve_branch(plan, ctx.run_branch)?;
    let label = plan.target_label()?;
    let repositories = declarations(plan, branch.as_deref(), ctx.wms_base)?;

    let mut controllers = BTreeMap::new();
    for (name, declaration) in &repositories {
        let controller = ctx
            .cache
            .get_or_create(declaration, || create_controller(declaration, ctx.scm))?;
        controllers.insert(name.clone(), controller);
    }

    let mut targets = Vec::new();
    for name in plan.targets() {
        info!("Working on {}", name);
        if let Some(label) = &label {
            debug!("Target label: {}", label);
        }
        let mut target = Target::new(&name, plan.path(), section);
        target.label = label.clone();
        target.branch = branch.clone();
        target.repositories = repositories.clone();
        target.controllers = controllers.clone();
        target.scm = plan.primary_scm(&name);
        target.tag = plan.target_tag(&name);
        targets.push(target);
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use crate::scm::ScmKind;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const WMS: &str = "http://wms.example.com";

    fn plan(content: &str) -> Plan {
        Plan::parse(Path::new("projects/widget.bob"), content, &Macros::new()).unwrap()
    }

    fn with_context<T>(run_branch: Option<&str>, f: impl FnOnce(&DiscoveryContext<'_>) -> T) -> T {
        let scm = ScmContext::new(PathBuf::from("/tmp/buildtide-cache"), Ledger::empty());
        let cache = ControllerCache::new();
        let overrides = Macros::new();
        let ctx = DiscoveryContext {
            scm: &scm,
            cache: &cache,
            run_branch,
            wms_base: WMS,
            overrides: &overrides,
            preload: &[],
        };
        f(&ctx)
    }

    #[test]
    fn test_resolve_branch_from_plan() {
        let p = plan("macros branch main\n");
        assert_eq!(resolve_branch(&p, None).unwrap().as_deref(), Some("main"));
        assert_eq!(resolve_branch(&p, Some("main")).unwrap().as_deref(), Some("main"));
    }

    #[test]
    fn test_resolve_branch_mismatch_carries_both_branches() {
        let p = plan("macros branch release-4\n");
        let err = resolve_branch(&p, Some("release-5")).unwrap_err();
        match err {
            Error::BranchMismatch {
                declared,
                requested,
                plan,
            } => {
                assert_eq!(declared, "release-4");
                assert_eq!(requested, "release-5");
                assert_eq!(plan, PathBuf::from("projects/widget.bob"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolve_branch_missing() {
        let p = plan("target widget\n");
        assert!(matches!(
            resolve_branch(&p, Some("main")),
            Err(Error::BranchMissing { .. })
        ));
        assert_eq!(resolve_branch(&p, None).unwrap(), None);
    }

    #[test]
    fn test_declarations_retry_with_branch() {
        let p = plan("scm src git https://git.example.com/corp/widget.git %(branch)s\n");
        let decls = declarations(&p, Some("release-5"), WMS).unwrap();
        assert_eq!(decls["src"].branch.as_deref(), Some("release-5"));
        assert_eq!(decls["src"].kind, ScmKind::Git);
    }

    #[test]
    fn test_declarations_default_branch_and_wms_base() {
        let p = plan("scm docs wms corp/docs\n");
        let decls = declarations(&p, Some("main"), WMS).unwrap();
        assert_eq!(decls["docs"].base, WMS);
        assert_eq!(decls["docs"].branch.as_deref(), Some("main"));

        let own = plan("wmsBase http://other.example.com\nscm docs wms corp/docs\n");
        assert_eq!(declarations(&own, None, WMS).unwrap()["docs"].base, "http://other.example.com");
    }

    #[test]
    fn test_declarations_configuration_error_names_scm() {
        let p = plan("scm old hg http://hg.example.com/x\n");
        let err = declarations(&p, None, WMS).unwrap_err();
        assert!(err.to_string().contains("scm 'old'"));
    }

    #[test]
    fn test_discover_plan_builds_targets() {
        let p = plan(
            "macros branch main\n\
             targetLabel build.example.com@corp:widget-%(branch)s\n\
             scm src local /srv/src/widget\n\
             target widget widget-test\n\
             [target:widget]\n\
             scm src\n",
        );
        let targets = with_context(Some("main"), |ctx| discover_plan(&p, Section::Projects, ctx)).unwrap();
        assert_eq!(targets.len(), 2);
        let widget = &targets[0];
        assert_eq!(widget.name, "widget");
        assert_eq!(widget.branch.as_deref(), Some("main"));
        assert_eq!(
            widget.label.as_ref().unwrap().as_str(),
            "build.example.com@corp:widget-main"
        );
        assert_eq!(widget.scm.as_deref(), Some("src"));
        assert_eq!(widget.controllers.len(), 1);
        assert_eq!(widget.change, None);
        assert_eq!(targets[1].scm, None);
    }

    #[test]
    fn test_discover_legacy_plan_with_branch_only_in_source_control_branch() {
        let p = plan(
            "macros sourceControlBranch release-4\n\
             macros gitUrl https://git.example.com/corp/widget.git?%(branch)s\n\
             scm src git %(gitUrl)s\n\
             target widget\n",
        );
        let targets = with_context(None, |ctx| discover_plan(&p, Section::Projects, ctx)).unwrap();
        assert_eq!(targets.len(), 1);
        let widget = &targets[0];
        assert_eq!(widget.branch.as_deref(), Some("release-4"));
        assert_eq!(widget.label, None);
        let src = &widget.repositories["src"];
        assert_eq!(src.branch.as_deref(), Some("release-4"));
        assert_eq!(src.path, "corp/widget.git");
        assert_eq!(widget.controllers.len(), 1);

        let requested = with_context(Some("release-4"), |ctx| discover_plan(&p, Section::Projects, ctx));
        assert_eq!(requested.unwrap()[0].branch.as_deref(), Some("release-4"));
    }

    #[test]
    fn test_targets_share_controllers() {
        let p = plan("scm src local /srv/src/widget\ntarget a b\n");
        let targets = with_context(None, |ctx| {
            let targets = discover_plan(&p, Section::Projects, ctx).unwrap();
            assert_eq!(ctx.cache.len().unwrap(), 1);
            targets
        });
        assert!(std::sync::Arc::ptr_eq(
            &targets[0].controllers["src"],
            &targets[1].controllers["src"]
        ));
    }

    #[test]
    fn test_execute_isolates_failing_plans() {
        let dir = TempDir::new().unwrap();
        let projects = dir.path().join("projects");
        fs::create_dir_all(&projects).unwrap();
        fs::write(projects.join("good.bob"), "macros branch main\ntarget good\n").unwrap();
        fs::write(projects.join("old.bob"), "macros branch release-4\ntarget old\n").unwrap();

        let mut tree = PlanTree::default();
        tree.insert(Section::Projects, projects.join("good.bob"));
        tree.insert(Section::Projects, projects.join("old.bob"));

        let discovered = with_context(Some("main"), |ctx| execute(&tree, &[Section::Projects], ctx));
        assert_eq!(discovered.targets.len(), 1);
        assert_eq!(discovered.targets[0].name, "good");
        assert_eq!(discovered.failures.len(), 1);
        assert!(discovered.failures[0].message.contains("release-4"));
    }
}
