//! # buildtide CLI
//!
//! This is the binary entry point for the `buildtide` command-line tool.
//!
//! It parses command-line arguments with `clap` and dispatches to the matching
//! command. Errors bubble up as `anyhow` errors and end the process with exit
//! status 1. The reconciliation logic itself lives in the library crate.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli.execute()
}
