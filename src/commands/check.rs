//! # Check Command Implementation
//!
//! This module implements the `check` subcommand. It runs discovery and change
//! detection exactly like `build` does, then prints every target's change
//! flag with the commit and published revision it was derived from.
//!
//! Nothing is built and no group is touched, so the command is safe to run
//! against production plans.

use anyhow::{bail, Result};
use clap::Args;

use buildtide::config::Config;
use buildtide::executor::CommandExecutor;
use buildtide::output::{change_marker, OutputConfig};
use buildtide::phases::orchestrator::{RunOptions, RunReport};
use buildtide::registry::CommandRegistry;

use super::build::{run, RunArgs};
use crate::cli::Global;

/// Detect changed targets without building anything
#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub run: RunArgs,
}

/// Execute the `check` command.
pub fn execute(args: CheckArgs, global: &Global) -> Result<()> {
    let config = Config::load(args.run.config.as_deref())?;
    global.init_logging(config.debug_mode)?;

    let options = RunOptions {
        branch: args.run.branch.clone(),
        include_products: args.run.products,
        include_external: args.run.external,
        plans: args.run.plans.clone(),
        detect_only: true,
        dry_run: true,
        ..RunOptions::default()
    };
    let registry = CommandRegistry::new(&config.registry_exec);
    let executor = CommandExecutor::new(&config.build_exec, true);
    let report = run(&args.run, &config, &options, &registry, &executor)?;

    if args.run.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_targets(&report, &OutputConfig::from_env_and_flag(&global.color));
    }

    if report.is_failure(args.run.strict) {
        bail!("{} plans or targets could not be checked", report.errors.len());
    }
    Ok(())
}

fn print_targets(report: &RunReport, out: &OutputConfig) {
    for target in &report.targets {
        println!(
            "{:<10} {:<32} commit {:<14} published {}",
            change_marker(out, target.change),
            target.name,
            target.commit.as_deref().map(short).unwrap_or("-"),
            target.revision.as_deref().unwrap_or("-")
        );
    }
    for failure in &report.errors {
        println!("error      {}: {}", failure.plan.display(), failure.message);
    }
    println!("\n{} of {} targets changed", report.changed().count(), report.targets.len());
}

fn short(commit: &str) -> &str {
    commit.get(..12).unwrap_or(commit)
}
