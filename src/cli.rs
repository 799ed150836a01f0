//! CLI argument parsing and command dispatch

use std::env;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

use crate::commands;

/// buildtide - Rebuild what moved upstream, once per plan
#[derive(Parser, Debug)]
#[command(name = "buildtide")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: Global,
}

/// Flags shared by every command.
#[derive(Args, Debug, Clone)]
pub struct Global {
    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    pub color: String,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

impl Global {
    /// Installs the logger. `debug_mode` comes from the configuration file and
    /// wins over the flags.
    pub fn init_logging(&self, debug_mode: bool) -> Result<()> {
        let level = if debug_mode {
            LevelFilter::Debug
        } else if self.quiet {
            LevelFilter::Error
        } else {
            self.log_level
                .parse::<LevelFilter>()
                .map_err(|_| anyhow!("invalid log level '{}'", self.log_level))?
        };

        let from_env = self.log_level == "info" && !self.quiet && !debug_mode && env::var_os("RUST_LOG").is_some();
        let mut builder = if from_env {
            env_logger::Builder::from_env(env_logger::Env::default())
        } else {
            let mut builder = env_logger::Builder::new();
            builder.filter_level(level);
            builder
        };
        // A logger may already be installed when commands run in-process
        let _ = builder.format_timestamp_secs().try_init();
        Ok(())
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Detect changed targets, build them and reconcile the group
    Build(commands::build::BuildArgs),

    /// Detect changed targets without building anything
    Check(commands::check::CheckArgs),

    /// Print the effective configuration
    Config(commands::config::ConfigArgs),

    /// Generate shell completion scripts
    Completions(commands::completions::CompletionsArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        match self.command {
            Commands::Build(args) => commands::build::execute(args, &self.global),
            Commands::Check(args) => commands::check::execute(args, &self.global),
            Commands::Config(args) => commands::config::execute(args, &self.global),
            Commands::Completions(args) => commands::completions::execute(args),
        }
    }
}
