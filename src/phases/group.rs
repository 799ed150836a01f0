//! Phase 4: Group Reconciliation
//!
//! A group is a published artifact whose content is a versioned list of
//! members. After a build pass the group is compared with the versions the
//! targets now carry, and a new group version is committed and built when the
//! two disagree.
//!
//! ## Process
//!
//! 1.  **Published membership (`published_members`)**: the latest group version
//!     under its label is expanded into its transitive members. Components
//!     (`name:part`) and nested groups (`group-*`) are left out.
//!
//! 2.  **Desired membership (`desired_members`)**: every target except `*-test`
//!     ones, with the version detection or the build pass recorded for it.
//!
//! 3.  **Diff (`diff_membership`)**: a versioned desired member that is missing
//!     from the group, or whose version differs from the newest published one,
//!     changes the group. Unversioned members never do.
//!
//! 4.  **Publish**: when changed and not a dry run, the recipe is rendered at a
//!     fresh timestamp version, committed, and built once. Nothing here retries.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use log::{debug, info};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::plan::PlanAccessor;
use crate::registry::{query_for, GroupPublisher, Registry};
use crate::target::Target;
use crate::templates::GroupTemplate;
use crate::version::{Label, Version};

/// Format of the version stamp of a new group recipe.
pub const STAMP_FORMAT: &str = "%Y.%m.%d_%H%M.%S";

/// Which group to reconcile and what goes into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupDefinition {
    pub name: String,
    pub label: Label,
    /// Whether external targets are members too.
    pub include_external: bool,
}

impl GroupDefinition {
    pub fn new(name: impl Into<String>, label: &str, include_external: bool) -> Self {
        Self {
            name: name.into(),
            label: normalize_label(label),
            include_external,
        }
    }

    /// Reads `groupName`, `groupTargetLabel` and `includeExternal` from a
    /// group config plan. `None` when the plan names no group.
    pub fn from_plan(plan: &dyn PlanAccessor) -> Result<Option<Self>> {
        let Some(name) = plan.macro_value("groupName")?.filter(|n| !n.is_empty()) else {
            return Ok(None);
        };
        let label = plan.macro_value("groupTargetLabel")?.ok_or_else(|| Error::Configuration {
            message: format!(
                "group config {} sets groupName but no groupTargetLabel",
                plan.path().display()
            ),
            hint: None,
        })?;
        let include_external = plan
            .macro_value("includeExternal")?
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Ok(Some(Self::new(name, &label, include_external)))
    }
}

/// `/host@ns:tag/` and `host@ns:tag` name the same label.
fn normalize_label(label: &str) -> Label {
    Label::new(
        label
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or(label),
    )
}

/// What the group phase decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupOutcome {
    pub name: String,
    pub changed: bool,
    pub published: bool,
    /// Version of the committed recipe, when one was committed.
    pub version: Option<String>,
    /// Member specs as they appear in the recipe.
    pub members: Vec<String>,
    /// Recipe a dry run would have committed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe: Option<String>,
}

/// Collaborators of the group phase.
pub struct GroupContext<'a> {
    pub registry: &'a dyn Registry,
    pub publisher: &'a dyn GroupPublisher,
    pub dry_run: bool,
    /// Where the rendered recipe is written before commit.
    pub tmp_dir: &'a Path,
}

/// Published member name to its versions.
pub type Membership = BTreeMap<String, Vec<Version>>;

/// Members of the latest published version of the group.
pub fn published_members(definition: &GroupDefinition, registry: &dyn Registry) -> Result<Membership> {
    let mut latest = registry.latest_versions(&query_for(&definition.name, &definition.label))?;
    let Some(current) = latest
        .remove(&definition.name)
        .and_then(|versions| versions.into_keys().next_back())
    else {
        debug!("{} has no published version yet", definition.name);
        return Ok(Membership::new());
    };
    debug!("Current group version: {}", current);

    let members = registry.group_members(&definition.name, &current)?;
    Ok(members
        .into_iter()
        .filter(|(name, _)| !name.contains(':') && !name.starts_with("group-"))
        .map(|(name, versions)| (name, versions.into_keys().collect()))
        .collect())
}

/// Desired member name to the version it should carry.
pub fn desired_members<'a>(targets: impl IntoIterator<Item = &'a Target>) -> BTreeMap<String, Option<Version>> {
    targets
        .into_iter()
        .filter(|t| !t.name.ends_with("-test"))
        .map(|t| (t.name.clone(), t.version.clone()))
        .collect()
}

/// True when the group has to be republished.
pub fn diff_membership(desired: &BTreeMap<String, Option<Version>>, published: &Membership) -> bool {
    desired.iter().any(|(name, version)| {
        let Some(version) = version else {
            return false;
        };
        match published.get(name).and_then(|versions| versions.iter().max()) {
            Some(current) => current != version,
            None => true,
        }
    })
}

/// Recipe member specs: `NAME=VERSION`, or `NAME` when unversioned.
pub fn member_specs(desired: &BTreeMap<String, Option<Version>>) -> Vec<String> {
    desired
        .iter()
        .map(|(name, version)| match version {
            Some(version) => format!("{}={}", name, version),
            None => name.clone(),
        })
        .collect()
}

/// Executes Phase 4 for `members`.
pub fn execute<'a>(
    definition: &GroupDefinition,
    members: impl IntoIterator<Item = &'a Target>,
    ctx: &GroupContext<'_>,
) -> Result<GroupOutcome> {
    let published = published_members(definition, ctx.registry)?;
    let desired = desired_members(members);
    let changed = diff_membership(&desired, &published);
    let specs = member_specs(&desired);

    let mut outcome = GroupOutcome {
        name: definition.name.clone(),
        changed,
        published: false,
        version: None,
        members: specs,
        recipe: None,
    };

    let version = chrono::Local::now().format(STAMP_FORMAT).to_string();
    let template = GroupTemplate::new(&definition.name, &version, outcome.members.clone());
    if ctx.dry_run {
        let recipe = template.render();
        info!("Group recipe for {}:\n{}", definition.name, recipe);
        outcome.recipe = Some(recipe);
    }

    if ctx.dry_run || !changed {
        info!("Skipping group build for {}", definition.name);
        info!("Group members: {}", outcome.members.join(" "));
        return Ok(outcome);
    }

    publish(definition, &template, ctx)?;

    info!("Published {}={} on {}", definition.name, version, definition.label);
    outcome.published = true;
    outcome.version = Some(version);
    Ok(outcome)
}

fn publish(definition: &GroupDefinition, template: &GroupTemplate, ctx: &GroupContext<'_>) -> Result<()> {
    fs::create_dir_all(ctx.tmp_dir)?;
    let mut recipe = tempfile::Builder::new()
        .prefix(&format!("{}-", definition.name))
        .suffix(".recipe")
        .tempfile_in(ctx.tmp_dir)?;
    recipe.write_all(template.render().as_bytes())?;
    recipe.flush()?;
    debug!("Wrote group recipe to {}", recipe.path().display());

    ctx.publisher
        .commit(recipe.path(), &definition.name, &definition.label, &template.version)?;
    ctx.publisher.cook(&definition.name, &definition.label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::Macros;
    use crate::plan::Plan;
    use crate::registry::tests::MockRegistry;
    use crate::target::Section;
    use tempfile::TempDir;

    const LABEL: &str = "build.example.com@corp:main";

    fn member(name: &str, version: Option<&str>) -> Target {
        let mut target = Target::new(name, format!("projects/{}.bob", name), Section::Projects);
        target.version = version.map(|v| Version::parse(v).unwrap());
        target
    }

    fn definition() -> GroupDefinition {
        GroupDefinition::new("group-widget", LABEL, false)
    }

    fn published_group() -> MockRegistry {
        MockRegistry::default()
            .publish("group-widget", "/build.example.com@corp:main/100.0:2026.01.01_0000.00-1-1")
            .with_members(
                "group-widget",
                "pkgA=/build.example.com@corp:main/1.0-1\n\
                 pkgA:runtime=/build.example.com@corp:main/1.0-1\n\
                 group-nested=/build.example.com@corp:main/1-1\n",
            )
    }

    fn run(registry: &MockRegistry, targets: &[Target], dry_run: bool) -> GroupOutcome {
        let dir = TempDir::new().unwrap();
        let ctx = GroupContext {
            registry,
            publisher: registry,
            dry_run,
            tmp_dir: dir.path(),
        };
        execute(&definition(), targets, &ctx).unwrap()
    }

    #[test]
    fn test_published_members_exclude_components_and_groups() {
        let members = published_members(&definition(), &published_group()).unwrap();
        assert_eq!(members.keys().collect::<Vec<_>>(), vec!["pkgA"]);
    }

    #[test]
    fn test_unpublished_group_has_no_members() {
        let members = published_members(&definition(), &MockRegistry::default()).unwrap();
        assert!(members.is_empty());
    }

    #[test]
    fn test_missing_member_changes_group() {
        let registry = published_group();
        let targets = vec![
            member("pkgA", Some("/build.example.com@corp:main/1.0-1")),
            member("pkgB", Some("/build.example.com@corp:main/2.0-1")),
        ];
        let outcome = run(&registry, &targets, false);

        assert!(outcome.changed);
        assert!(outcome.published);
        assert_eq!(registry.commits.borrow().len(), 1);
        assert_eq!(*registry.cooks.borrow(), vec!["group-widget".to_string()]);
        let commits = registry.commits.borrow();
        let (name, label, version) = &commits[0];
        assert_eq!(name, "group-widget");
        assert_eq!(label, LABEL);
        assert_eq!(outcome.version.as_ref(), Some(version));
    }

    #[test]
    fn test_identical_membership_is_not_published() {
        let registry = published_group();
        let targets = vec![member("pkgA", Some("/build.example.com@corp:main/1.0-1"))];
        let outcome = run(&registry, &targets, false);

        assert!(!outcome.changed);
        assert!(!outcome.published);
        assert!(registry.commits.borrow().is_empty());
        assert!(registry.cooks.borrow().is_empty());
        assert_eq!(outcome.members, vec!["pkgA=/build.example.com@corp:main/1.0-1"]);
    }

    #[test]
    fn test_dry_run_never_publishes() {
        let registry = published_group();
        let targets = vec![member("pkgB", Some("/build.example.com@corp:main/2.0-1"))];
        let outcome = run(&registry, &targets, true);
        assert!(outcome.changed);
        assert!(!outcome.published);
        assert!(registry.commits.borrow().is_empty());

        let recipe = outcome.recipe.unwrap();
        assert!(recipe.contains("class GroupWidget(GroupSetRecipe)"));
        assert!(recipe.contains("'pkgB=/build.example.com@corp:main/2.0-1'"));
    }

    #[test]
    fn test_recipe_only_kept_for_dry_run() {
        let registry = published_group();
        let targets = vec![member("pkgB", Some("/build.example.com@corp:main/2.0-1"))];
        assert!(run(&registry, &targets, false).recipe.is_none());
    }

    #[test]
    fn test_version_mismatch_changes_group() {
        let mut desired = BTreeMap::new();
        desired.insert("pkgA".to_string(), Some(Version::parse("/l@n:t/1.1-1").unwrap()));
        let mut published = Membership::new();
        published.insert("pkgA".to_string(), vec![Version::parse("/l@n:t/1.0-1").unwrap()]);
        assert!(diff_membership(&desired, &published));
    }

    #[test]
    fn test_unversioned_and_test_members() {
        let targets = vec![member("pkgA-test", Some("/l@n:t/1.0-1")), member("pkgC", None)];
        let desired = desired_members(&targets);
        assert_eq!(desired.len(), 1);
        assert!(!diff_membership(&desired, &Membership::new()));
        assert_eq!(member_specs(&desired), vec!["pkgC"]);
    }

    #[test]
    fn test_definition_from_plan() {
        let plan = Plan::parse(
            Path::new("config/group.conf"),
            "macros branch main\n\
             macros groupName group-widget\n\
             macros groupTargetLabel /build.example.com@corp:%(branch)s/\n\
             macros includeExternal True\n",
            &Macros::new(),
        )
        .unwrap();
        let definition = GroupDefinition::from_plan(&plan).unwrap().unwrap();
        assert_eq!(definition.name, "group-widget");
        assert_eq!(definition.label.as_str(), LABEL);
        assert!(definition.include_external);
    }

    #[test]
    fn test_definition_without_group_name() {
        let plan = Plan::parse(Path::new("config/group.conf"), "macros branch main\n", &Macros::new()).unwrap();
        assert!(GroupDefinition::from_plan(&plan).unwrap().is_none());
    }
}
