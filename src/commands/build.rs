//! # Build Command Implementation
//!
//! This module implements the `build` subcommand, the full reconciliation run:
//!
//! 1. The plan tree named by `--repo` is read in place or fetched into a
//!    temporary directory.
//! 2. Every target's commit is compared with its latest published revision.
//! 3. Changed targets are built, once per plan.
//! 4. When something was built, the group is reconciled.
//!
//! The command fails when nothing was built and at least one build failed.
//! With `--strict` it also fails when a plan or target had to be dropped.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use log::warn;

use buildtide::cache::ControllerCache;
use buildtide::config::Config;
use buildtide::executor::CommandExecutor;
use buildtide::ledger::Ledger;
use buildtide::output::{emoji, outcome_marker, OutputConfig};
use buildtide::phases::group::GroupDefinition;
use buildtide::phases::orchestrator::{self, Collaborators, RunOptions, RunReport};
use buildtide::registry::CommandRegistry;
use buildtide::scm::ScmContext;
use buildtide::target::Outcome;

use crate::cli::Global;

/// Options shared by `build` and `check`.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Plan tree: a local directory, a git URL or a poll-service repository URL.
    #[arg(long, value_name = "URI|DIR")]
    pub repo: String,

    /// Branch every plan must declare.
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Configuration file layered over the system and user files.
    #[arg(short, long, value_name = "FILE", env = "BUILDTIDE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Also discover external targets.
    #[arg(long)]
    pub external: bool,

    /// Also discover and build products.
    #[arg(long)]
    pub products: bool,

    /// Fail when any plan or target was dropped from the run.
    #[arg(long)]
    pub strict: bool,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    pub json: bool,

    /// Restrict the run to these plan files.
    #[arg(value_name = "PLAN")]
    pub plans: Vec<PathBuf>,
}

/// Detect changed targets, build them and reconcile the group
#[derive(Args, Debug)]
pub struct BuildArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Build this target even if it did not change. Repeatable.
    #[arg(long = "force-build", value_name = "TARGET")]
    pub force_build: Vec<String>,

    /// Record the build commands without running them.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Group to reconcile instead of the one in the group config plan.
    #[arg(long, value_name = "NAME", requires = "group_label")]
    pub group: Option<String>,

    /// Label of `--group`.
    #[arg(long, value_name = "LABEL", requires = "group")]
    pub group_label: Option<String>,
}

/// Execute the `build` command.
pub fn execute(args: BuildArgs, global: &Global) -> Result<()> {
    let config = Config::load(args.run.config.as_deref())?;
    global.init_logging(config.debug_mode)?;

    let mut dry_run = args.dry_run;
    if config.test_only && !dry_run {
        warn!("test_only is set in the configuration; running as a dry run");
        dry_run = true;
    }

    let options = RunOptions {
        branch: args.run.branch.clone(),
        force: args.force_build.iter().cloned().collect::<BTreeSet<_>>(),
        dry_run,
        include_products: args.run.products,
        include_external: args.run.external,
        group: match (&args.group, &args.group_label) {
            (Some(name), Some(label)) => Some(GroupDefinition::new(name, label, args.run.external)),
            _ => None,
        },
        plans: args.run.plans.clone(),
        detect_only: false,
    };

    let registry = CommandRegistry::new(&config.registry_exec);
    let executor = CommandExecutor::new(&config.build_exec, dry_run);
    let report = run(&args.run, &config, &options, &registry, &executor)?;

    let out = OutputConfig::from_env_and_flag(&global.color);
    if args.run.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, &out, dry_run);
    }

    if report.is_failure(args.run.strict) {
        bail!("build run failed");
    }
    Ok(())
}

/// Fetches the plans and runs the orchestrator with command-backed collaborators.
pub(crate) fn run(
    args: &RunArgs,
    config: &Config,
    options: &RunOptions,
    registry: &CommandRegistry,
    executor: &CommandExecutor,
) -> Result<RunReport> {
    let ledger = Ledger::load(&config.ledger_dir)?;
    let scm = ScmContext::new(config.cache_dir.clone(), ledger);
    let cache = ControllerCache::new();
    // Dropping `root` removes a fetched snapshot
    let root = orchestrator::fetch_plans(&args.repo, args.branch.as_deref(), config, &scm, &cache)?;

    let with = Collaborators {
        registry,
        publisher: registry,
        executor,
        scm: &scm,
        cache: &cache,
    };
    Ok(orchestrator::execute(&root.path, config, options, &with)?)
}

fn print_report(report: &RunReport, out: &OutputConfig, dry_run: bool) {
    let acted: Vec<_> = report
        .targets
        .iter()
        .filter(|t| t.outcome != Outcome::Pending)
        .collect();
    if acted.is_empty() {
        println!("{} Nothing to build", emoji(out, "\u{2728}", "[OK]"));
    }
    for target in acted {
        println!(
            "{} {}: {}",
            outcome_marker(out, target.outcome),
            target.name,
            target.log.as_deref().unwrap_or_default()
        );
    }

    if let Some(build) = &report.build {
        println!(
            "\nBuilt: {}  Failed: {}  Skipped: {}{}",
            build.built.len(),
            build.failed.len(),
            build.skipped.len(),
            if dry_run { "  (dry run)" } else { "" }
        );
    }
    if let Some(group) = &report.group {
        match &group.version {
            Some(version) => println!("Group {} published at {}", group.name, version),
            None if group.changed => println!("Group {} changed but was not published", group.name),
            None => println!("Group {} is up to date", group.name),
        }
    }
    if let Some(err) = &report.group_error {
        println!("{} Group: {}", emoji(out, "\u{274c}", "[ERR]"), err);
    }
    for failure in &report.errors {
        println!(
            "{} {}{}: {}",
            emoji(out, "\u{26a0}\u{fe0f}", "[WARN]"),
            failure.plan.display(),
            failure
                .target
                .as_deref()
                .map(|t| format!(" ({})", t))
                .unwrap_or_default(),
            failure.message
        );
    }
}
