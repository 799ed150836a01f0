//! # Config Command Implementation
//!
//! Prints the effective configuration, after the system file, the user file
//! and `--config` have been layered over the built-in defaults, as YAML.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use buildtide::config::Config;

use crate::cli::Global;

/// Print the effective configuration
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Configuration file layered over the system and user files.
    #[arg(short, long, value_name = "FILE", env = "BUILDTIDE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Execute the `config` command.
pub fn execute(args: ConfigArgs, global: &Global) -> Result<()> {
    let config = Config::load(args.config.as_deref())?;
    global.init_logging(config.debug_mode)?;
    print!("{}", config.to_yaml()?);
    Ok(())
}
