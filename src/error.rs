//! # Error Handling
//!
//! This module defines the centralized error type for `buildtide`. It uses the
//! `thiserror` library to create a single `Error` enum covering every failure
//! the reconciliation pipeline can surface, each variant carrying enough
//! context (plan path, target name, branch values, locator) to diagnose the
//! problem without a debugger.
//!
//! ## Scope of each failure
//!
//! - **`Configuration`**: an unknown repository type or a declaration missing
//!   its base or path. Fatal for the affected plan.
//! - **`BranchMissing`** / **`BranchMismatch`**: the branch requested for the
//!   run is absent from, or differs from, the branch a plan declares. Fatal for
//!   that plan only; sibling plans keep going.
//! - **`AmbiguousController`**: a target has several repository declarations
//!   and none is named after its primary scm. Fatal for that target.
//! - **`SourceUnavailable`**: a revision source query or snapshot failed. Never
//!   retried here.
//! - **`BuildExecution`**: a non-zero build exit status. The build pass records
//!   these as failed outcomes instead of returning them.
//! - **`Registry`**: the registry collaborator failed. Fatal for the affected
//!   target's change detection.
//!
//! The remaining variants cover the ambient concerns: plan parsing, macro
//! expansion, the revision ledger, git subprocesses and wrapped library errors.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for buildtide operations
#[derive(Error, Debug)]
pub enum Error {
    /// A repository declaration or tool setting is invalid.
    #[error("Configuration error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    Configuration {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// A branch was requested for the run but the plan declares none.
    #[error("Plan {} does not declare a branch (macro 'branch' or 'sourceControlBranch'), but branch '{requested}' was requested", plan.display())]
    BranchMissing { plan: PathBuf, requested: String },

    /// The run branch and the plan branch disagree.
    #[error("Plan {} declares branch '{declared}' but branch '{requested}' was requested", plan.display())]
    BranchMismatch {
        plan: PathBuf,
        declared: String,
        requested: String,
    },

    /// No unambiguous controller matches the target's primary scm.
    #[error("Target '{target}' in {} has {} repositories and none is named '{}'; cannot choose a commit source", plan.display(), candidates.len(), scm.as_deref().unwrap_or("<unset>"))]
    AmbiguousController {
        target: String,
        plan: PathBuf,
        scm: Option<String>,
        candidates: Vec<String>,
    },

    /// A revision source could not be queried or materialized.
    #[error("Source unavailable: {locator} - {message}")]
    SourceUnavailable { locator: String, message: String },

    /// The build executor exited unsuccessfully.
    #[error("Build of {} failed with exit status {exit_code}: {command}", plan.display())]
    BuildExecution {
        plan: PathBuf,
        exit_code: i32,
        command: String,
    },

    /// The registry collaborator failed.
    #[error("Registry error: {message}")]
    Registry { message: String },

    /// A plan file could not be parsed.
    #[error("Plan parse error in {}:{line}: {message}", path.display())]
    PlanParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// A macro reference could not be resolved.
    #[error("Macro expansion error: {message} (macro: {name})")]
    Macro { name: String, message: String },

    /// The revision ledger or its CI override is inconsistent.
    #[error("Revision ledger error: {message}")]
    Ledger { message: String },

    /// An error occurred while executing a Git command.
    #[error("Git command failed for {url}: {command} - {stderr}")]
    GitCommand {
        command: String,
        url: String,
        stderr: String,
    },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML parsing error, wrapped from `serde_yaml::Error`.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A JSON serialization error, wrapped from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// A URL parsing error, wrapped from `url::ParseError`.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// An error indicating that a mutex or other lock has been poisoned.
    #[error("Lock poisoned: {context}")]
    LockPoisoned { context: String },

    /// An error for a feature that has not yet been implemented.
    #[error("Feature not implemented: {feature}")]
    NotImplemented { feature: String },
}

impl Error {
    /// Shorthand for a `Configuration` error without a hint.
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
            hint: None,
        }
    }

    /// Shorthand for a `SourceUnavailable` error.
    pub fn unavailable(locator: impl Into<String>, message: impl Into<String>) -> Self {
        Error::SourceUnavailable {
            locator: locator.into(),
            message: message.into(),
        }
    }

    /// Returns true for errors that abort a whole plan rather than one target.
    pub fn is_plan_scoped(&self) -> bool {
        matches!(
            self,
            Error::Configuration { .. }
                | Error::BranchMissing { .. }
                | Error::BranchMismatch { .. }
                | Error::PlanParse { .. }
                | Error::Macro { .. }
                | Error::Ledger { .. }
        )
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
