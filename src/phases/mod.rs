//! Implementation of the phases of a reconciliation run.
//!
//! ## Overview
//!
//! A run follows 4 phases:
//! 1. Discovery - Read plans, resolve their branch and repositories, attach controllers
//! 2. Detection - Resolve each target's commit and published revision, set its change flag
//! 3. Build - Invoke the build executor once per distinct plan of the changed targets
//! 4. Group - Diff the group's desired membership against the published one and
//!    publish a new group version when they differ
//!
//! [`orchestrator`] sequences them. Errors scoped to a plan or a target are
//! collected as [`PlanFailure`]s and the run continues with the rest.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Error;

pub mod build;
pub mod detection;
pub mod discovery;
pub mod group;
pub mod orchestrator;

/// A plan or target that was dropped from the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanFailure {
    pub plan: PathBuf,
    /// Set when only one target of the plan was affected.
    pub target: Option<String>,
    pub message: String,
}

impl PlanFailure {
    pub fn plan(plan: &Path, error: &Error) -> Self {
        Self {
            plan: plan.to_path_buf(),
            target: None,
            message: error.to_string(),
        }
    }

    pub fn target(plan: &Path, target: &str, error: &Error) -> Self {
        Self {
            plan: plan.to_path_buf(),
            target: Some(target.to_string()),
            message: error.to_string(),
        }
    }
}
