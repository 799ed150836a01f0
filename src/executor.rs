//! Build executor invocation.
//!
//! The executor is an external program run once per plan as
//! `BUILD_EXEC PLAN [--set-version=NAME=VERSION] [--set-tag=NAME=TAG]`.
//! Its exit status is the only result this crate looks at.

use std::path::Path;
use std::process::Command;

use log::{debug, info};

use crate::error::Result;

/// Name/value override passed to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Override<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

/// What happened when a plan was handed to the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub exit_code: i32,
    pub command_line: String,
}

impl Invocation {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Trait for build invocations - allows mocking in tests
pub trait BuildExecutor {
    /// Runs the executor for `plan`. A non-zero exit is reported in the
    /// returned [`Invocation`], not as an error; errors mean the executor
    /// could not be started at all.
    fn invoke(
        &self,
        plan: &Path,
        version: Option<Override<'_>>,
        tag: Option<Override<'_>>,
    ) -> Result<Invocation>;
}

/// Builds the executor argument list.
pub fn command_args(plan: &Path, version: Option<Override<'_>>, tag: Option<Override<'_>>) -> Vec<String> {
    let mut args = vec![plan.display().to_string()];
    if let Some(version) = version {
        args.push(format!("--set-version={}={}", version.name, version.value));
    }
    if let Some(tag) = tag {
        args.push(format!("--set-tag={}={}", tag.name, tag.value));
    }
    args
}

/// Executor that runs a program, or only records the command in dry-run mode.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    exec: String,
    dry_run: bool,
}

impl CommandExecutor {
    pub fn new(exec: impl Into<String>, dry_run: bool) -> Self {
        Self {
            exec: exec.into(),
            dry_run,
        }
    }
}

impl BuildExecutor for CommandExecutor {
    fn invoke(
        &self,
        plan: &Path,
        version: Option<Override<'_>>,
        tag: Option<Override<'_>>,
    ) -> Result<Invocation> {
        let args = command_args(plan, version, tag);
        let command_line = format!("{} {}", self.exec, args.join(" "));
        if let Some(version) = version {
            info!("Building {}={}", version.name, version.value);
        }
        debug!("Calling build executor: {}", command_line);

        if self.dry_run {
            return Ok(Invocation {
                exit_code: 0,
                command_line,
            });
        }

        let status = Command::new(&self.exec).args(&args).status()?;
        Ok(Invocation {
            // Killed by a signal
            exit_code: status.code().unwrap_or(-1),
            command_line,
        })
    }
}
