//! # buildtide
//!
//! buildtide reconciles the build targets declared in a tree of build plans
//! against two sources of truth: the revision sources the targets are built
//! from, and the registry their artifacts are published to. Targets whose
//! source moved since their last published version are handed to an external
//! build executor, once per plan, and a composite group artifact is
//! republished when its membership drifted.
//!
//! ## Quick Example
//!
//! ```
//! use buildtide::phases::detection::detect_change;
//!
//! // The published revision keeps a truncated commit; a prefix match is enough.
//! let commit = "3abc000000000000000000000000000000000000";
//! assert!(!detect_change(Some(commit), Some("1.2.3"), false));
//! assert!(detect_change(Some(commit), None, false));
//! ```
//!
//! ## Core Concepts
//!
//! - **Plans (`plan`, `reader`)**: line-oriented files declaring targets, the
//!   repositories they are built from and the macros filling both in.
//! - **Revision sources (`scm`, `ledger`, `cache`)**: one [`scm::Controller`]
//!   per distinct repository declaration, backed by a poll service, git or a
//!   local directory, with a revision ledger that can pin heads.
//! - **Registry (`registry`, `version`)**: the published-artifact store, queried
//!   for the latest version of each target under its label.
//! - **Build executor (`executor`)**: an external program run once per plan.
//!
//! ## Execution Flow
//!
//! [`phases::orchestrator`] runs the phases in order:
//!
//! 1.  **Discovery**: plans become targets with branch, label and controllers.
//! 2.  **Detection**: each target gets its commit, published revision and change flag.
//! 3.  **Build**: changed targets are built, deduplicated by plan path.
//! 4.  **Group**: the group artifact is republished when its members moved.

pub mod cache;
pub mod config;
pub mod defaults;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod macros;
pub mod output;
pub mod phases;
pub mod plan;
pub mod reader;
pub mod registry;
pub mod scm;
pub mod target;
pub mod templates;
pub mod version;
