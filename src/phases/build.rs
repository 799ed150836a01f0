//! Phase 3: Build
//!
//! Hands every changed target's plan to the build executor, at most once per
//! distinct plan path.
//!
//! ## Process
//!
//! 1.  **Selection**: targets with `change == Some(true)`, in discovery order.
//!
//! 2.  **Dedup (`SeenPlans`)**: the first target naming a plan triggers the
//!     build; later targets naming the same plan are marked skipped with a log
//!     line pointing at that plan. Their registry metadata is still refreshed
//!     so the group phase sees the same state as for built targets.
//!
//! 3.  **Invocation**: the executor gets the plan path, a version override of
//!     `BRANCH.COMMIT[..12]` when a commit is known and the target's tag when
//!     it declares one. A non-zero exit marks the target failed; the remaining
//!     plans are still built.
//!
//! The seen-plans set lives on this call's stack, so two runs never share it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;

use super::detection::lookup_published;
use crate::error::Error;
use crate::executor::{BuildExecutor, Override};
use crate::registry::Registry;
use crate::target::{Outcome, Target};

/// Outcome sets of one build pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub built: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    /// Plans handed to the executor, in invocation order.
    pub plans: Vec<PathBuf>,
}

impl BuildReport {
    /// A run fails only when nothing was built and something failed.
    pub fn is_failure(&self) -> bool {
        self.built.is_empty() && !self.failed.is_empty()
    }
}

/// Plan paths already handed to the executor during one pass.
#[derive(Debug, Default)]
struct SeenPlans {
    order: Vec<PathBuf>,
    index: HashSet<PathBuf>,
}

impl SeenPlans {
    /// Returns false when `plan` was seen before.
    fn insert(&mut self, plan: &Path) -> bool {
        if !self.index.insert(plan.to_path_buf()) {
            return false;
        }
        self.order.push(plan.to_path_buf());
        true
    }

    fn into_vec(self) -> Vec<PathBuf> {
        self.order
    }
}

/// Executes Phase 3 over the changed targets in `targets`.
pub fn execute(targets: &mut [Target], executor: &dyn BuildExecutor, registry: &dyn Registry) -> BuildReport {
    let mut report = BuildReport::default();
    let mut seen = SeenPlans::default();

    for target in targets.iter_mut().filter(|t| t.is_changed()) {
        if !seen.insert(&target.plan) {
            skip(target, registry);
            report.skipped.push(target.name.clone());
            continue;
        }
        match build(target, executor, registry) {
            Outcome::Built => report.built.push(target.name.clone()),
            _ => report.failed.push(target.name.clone()),
        }
    }

    report.plans = seen.into_vec();
    report
}

fn skip(target: &mut Target, registry: &dyn Registry) {
    target.log = Some(format!("Built in {}", target.plan.display()));
    target.outcome = Outcome::Skipped;
    debug!("{}: {}", target.name, target.plan.display());
    if let Err(err) = lookup_published(target, registry) {
        warn!("Unable to refresh published version of {}: {}", target.name, err);
    }
}

fn build(target: &mut Target, executor: &dyn BuildExecutor, registry: &dyn Registry) -> Outcome {
    let version = target.build_version();
    let version_override = version.as_deref().map(|value| Override {
        name: &target.name,
        value,
    });
    let tag_override = target.tag.as_deref().map(|value| Override {
        name: &target.name,
        value,
    });

    let invocation = executor.invoke(&target.plan, version_override, tag_override);
    let (outcome, log) = match invocation {
        Ok(invocation) if invocation.succeeded() => match lookup_published(target, registry) {
            Ok(()) => (Outcome::Built, format!("Success: {}", invocation.command_line)),
            Err(err) => (
                Outcome::Failed,
                format!("Failed: {} (registry refresh: {})", invocation.command_line, err),
            ),
        },
        Ok(invocation) => {
            let err = Error::BuildExecution {
                plan: target.plan.clone(),
                exit_code: invocation.exit_code,
                command: invocation.command_line.clone(),
            };
            warn!("{}", err);
            (Outcome::Failed, format!("Failed: {}", invocation.command_line))
        }
        Err(err) => {
            warn!("Unable to run build executor for {}: {}", target.plan.display(), err);
            (Outcome::Failed, format!("Failed: {}", err))
        }
    };

    target.outcome = outcome;
    target.log = Some(log);
    outcome
}

/// Logs the pass the way operators read it: built, failed, skipped.
pub fn log_report(report: &BuildReport, targets: &[Target], dry_run: bool) {
    if dry_run {
        for target in targets.iter().filter(|t| t.outcome != Outcome::Pending) {
            info!("{}: {}", target.name, target.log.as_deref().unwrap_or_default());
        }
        for plan in &report.plans {
            info!("Would build {}", plan.display());
        }
        if !report.skipped.is_empty() {
            info!("Skipped: {}", report.skipped.join(" "));
        }
    }
    if report.built.is_empty() && report.failed.is_empty() {
        info!("Nothing to build");
        return;
    }
    info!("Built: {}", report.built.join(" "));
    if !report.failed.is_empty() {
        warn!("Failed: {}", report.failed.join(" "));
    }
}
