//! Phase 2: Change Detection
//!
//! For every discovered target this phase decides whether the upstream source
//! moved since the last published version.
//!
//! ## Process
//!
//! 1.  **Commit (`resolve_commit`)**: the controller named by the target's
//!     primary scm is asked for its revision. A target whose primary scm is
//!     unknown falls back to the plan's only controller; with several
//!     candidates it fails with `AmbiguousController`.
//!
//! 2.  **Published revision (`lookup_published`)**: the registry is asked for
//!     the target's latest version under its label. Nothing published is a
//!     valid answer and marks a new target.
//!
//! 3.  **Change flag (`detect_change`)**: the published revision stores a
//!     truncated commit, so the commit only has to start with the revision's
//!     last dot-delimited segment. Forced targets always change.
//!
//! Failures are scoped to the target: its change flag stays unset and the run
//! goes on with the others.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::{debug, error, info};

use super::PlanFailure;
use crate::error::{Error, Result};
use crate::registry::{query_for, Registry};
use crate::scm::Controller;
use crate::target::Target;
use crate::version::revision_tail;

/// Executes Phase 2 over `targets`, in place.
pub fn execute(targets: &mut [Target], registry: &dyn Registry, force: &BTreeSet<String>) -> Vec<PlanFailure> {
    let mut failures = Vec::new();
    for target in targets.iter_mut() {
        match detect(target, registry, force.contains(&target.name)) {
            Ok(changed) => {
                info!(
                    "{}: commit {}, published {}, change {}",
                    target.name,
                    target.commit.as_deref().unwrap_or("-"),
                    target.revision.as_deref().unwrap_or("-"),
                    changed
                );
            }
            Err(err) => {
                error!("Change detection failed for {}: {}", target.name, err);
                target.change = None;
                failures.push(PlanFailure::target(&target.plan, &target.name, &err));
            }
        }
    }
    failures
}

/// Resolves commit and published revision, then sets the change flag.
pub fn detect(target: &mut Target, registry: &dyn Registry, forced: bool) -> Result<bool> {
    target.commit = resolve_commit(target)?;
    lookup_published(target, registry)?;
    let changed = detect_change(target.commit.as_deref(), target.revision.as_deref(), forced);
    target.change = Some(changed);
    Ok(changed)
}

/// The controller a target takes its commit from.
pub fn select_controller(target: &Target) -> Result<Option<Arc<Controller>>> {
    if let Some(controller) = target.scm.as_ref().and_then(|scm| target.controllers.get(scm)) {
        return Ok(Some(controller.clone()));
    }
    let mut candidates = target.controllers.values();
    match (candidates.next(), candidates.next()) {
        (None, _) => Ok(None),
        (Some(only), None) => Ok(Some(only.clone())),
        _ => Err(Error::AmbiguousController {
            target: target.name.clone(),
            plan: target.plan.clone(),
            scm: target.scm.clone(),
            candidates: target.controllers.keys().cloned().collect(),
        }),
    }
}

/// Commit the target's source currently points at.
pub fn resolve_commit(target: &Target) -> Result<Option<String>> {
    match select_controller(target)? {
        Some(controller) => controller.revision(),
        None => Ok(None),
    }
}

/// Asks the registry for the target's published versions and records them.
pub fn lookup_published(target: &mut Target, registry: &dyn Registry) -> Result<()> {
    let Some(label) = target.label.clone() else {
        debug!("{} has no target label; treating as unpublished", target.name);
        target.record_published(Default::default());
        return Ok(());
    };
    let mut latest = registry.latest_versions(&query_for(&target.name, &label))?;
    target.record_published(latest.remove(&target.name).unwrap_or_default());
    Ok(())
}

/// The change rule.
pub fn detect_change(commit: Option<&str>, revision: Option<&str>, forced: bool) -> bool {
    if forced {
        return true;
    }
    match (commit, revision) {
        (_, None) => true,
        (Some(commit), Some(revision)) => !commit.starts_with(revision_tail(revision)),
        (None, Some(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::MockRegistry;
    use crate::scm::tests::mock_controller;
    use crate::scm::ScmKind;
    use crate::target::Section;
    use crate::version::Label;
    use proptest::prelude::*;

    const COMMIT: &str = "3abc000000000000000000000000000000000000";

    fn target(name: &str, controllers: &[(&str, Option<&str>)]) -> Target {
        let mut target = Target::new(name, format!("projects/{}.bob", name), Section::Projects);
        target.label = Some(Label::new("build.example.com@corp:main"));
        target.branch = Some("main".to_string());
        for (scm, head) in controllers {
            target
                .controllers
                .insert(scm.to_string(), Arc::new(mock_controller(ScmKind::Git, scm, *head)));
        }
        target
    }

    #[test]
    fn test_prefix_match_law() {
        assert!(!detect_change(Some(COMMIT), Some("1.2.3"), false));
        assert!(detect_change(
            Some("9abc000000000000000000000000000000000000"),
            Some("1.2.3"),
            false
        ));
    }

    #[test]
    fn test_new_target_law() {
        assert!(detect_change(Some(COMMIT), None, false));
        assert!(detect_change(None, None, false));
    }

    #[test]
    fn test_force_law() {
        assert!(detect_change(Some(COMMIT), Some("1.0.3abc"), true));
    }

    #[test]
    fn test_no_commit_with_published_revision_is_unchanged() {
        assert!(!detect_change(None, Some("1.0.3abc"), false));
    }

    proptest! {
        #[test]
        fn prop_commit_extending_tail_is_unchanged(tail in "[0-9a-f]{1,12}", rest in "[0-9a-f]{0,28}") {
            let revision = format!("1.0.{}", tail);
            let commit = format!("{}{}", tail, rest);
            prop_assert!(!detect_change(Some(&commit), Some(&revision), false));
            prop_assert!(detect_change(Some(&commit), Some(&revision), true));
        }
    }

    #[test]
    fn test_detect_unchanged_target() {
        let registry = MockRegistry::default().publish("widget", "/build.example.com@corp:main/100.0:1.0.3abc-1-1");
        let mut widget = target("widget", &[("src", Some(COMMIT))]);
        assert!(!detect(&mut widget, &registry, false).unwrap());
        assert_eq!(widget.commit.as_deref(), Some(COMMIT));
        assert_eq!(widget.revision.as_deref(), Some("1.0.3abc"));
        assert_eq!(widget.change, Some(false));
    }

    #[test]
    fn test_detection_is_idempotent() {
        let registry = MockRegistry::default().publish("widget", "/build.example.com@corp:main/100.0:1.0.3abc-1-1");
        let mut targets = vec![target("widget", &[("src", Some(COMMIT))])];
        let force = BTreeSet::new();
        assert!(execute(&mut targets, &registry, &force).is_empty());
        assert!(execute(&mut targets, &registry, &force).is_empty());
        assert_eq!(targets[0].change, Some(false));
    }

    #[test]
    fn test_controller_selected_by_primary_scm() {
        let mut widget = target("widget", &[("docs", Some("9999")), ("src", Some(COMMIT))]);
        widget.scm = Some("src".to_string());
        assert_eq!(resolve_commit(&widget).unwrap().as_deref(), Some(COMMIT));
    }

    #[test]
    fn test_single_controller_is_used_without_primary_scm() {
        let mut widget = target("widget", &[("src", Some(COMMIT))]);
        widget.scm = Some("unknown".to_string());
        assert_eq!(resolve_commit(&widget).unwrap().as_deref(), Some(COMMIT));
    }

    #[test]
    fn test_ambiguous_controller_fails() {
        let widget = target("widget", &[("docs", Some("9999")), ("src", Some(COMMIT))]);
        match resolve_commit(&widget).unwrap_err() {
            Error::AmbiguousController {
                target, candidates, ..
            } => {
                assert_eq!(target, "widget");
                assert_eq!(candidates, vec!["docs", "src"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_no_controllers_means_no_commit() {
        let widget = target("widget", &[]);
        assert_eq!(resolve_commit(&widget).unwrap(), None);
    }

    #[test]
    fn test_target_errors_are_isolated() {
        let registry = MockRegistry::default().failing_for("broken");
        let mut targets = vec![
            target("broken", &[("src", Some(COMMIT))]),
            target("ambiguous", &[("a", None), ("b", None)]),
            target("fresh", &[("src", Some(COMMIT))]),
        ];
        let failures = execute(&mut targets, &registry, &BTreeSet::new());

        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].target.as_deref(), Some("broken"));
        assert_eq!(failures[1].target.as_deref(), Some("ambiguous"));
        assert_eq!(targets[0].change, None);
        assert_eq!(targets[1].change, None);
        assert_eq!(targets[2].change, Some(true));
    }

    #[test]
    fn test_force_list_overrides_match() {
        let registry = MockRegistry::default().publish("widget", "/build.example.com@corp:main/100.0:1.0.3abc-1-1");
        let mut targets = vec![target("widget", &[("src", Some(COMMIT))])];
        let force: BTreeSet<String> = ["widget".to_string()].into();
        execute(&mut targets, &registry, &force);
        assert_eq!(targets[0].change, Some(true));
    }

    #[test]
    fn test_unlabelled_target_skips_registry() {
        let registry = MockRegistry::default();
        let mut widget = target("widget", &[("src", Some(COMMIT))]);
        widget.label = None;
        assert!(detect(&mut widget, &registry, false).unwrap());
        assert!(registry.queries.borrow().is_empty());
    }
}
