//! # Output Configuration
//!
//! Controls how run reports look on a terminal: colored markers when the
//! terminal supports them, bracketed plain-text markers otherwise.
//!
//! The following environment variables and flags are respected:
//! - `--color=never|always|auto` - CLI flag for color control
//! - `NO_COLOR` - Disables colors when set (per https://no-color.org/)
//! - `CLICOLOR=0` - Disables colors
//! - `CLICOLOR_FORCE=1` - Forces colors even in non-TTY
//! - `TERM=dumb` - Disables colors for dumb terminals
//!
//! ```rust,ignore
//! use buildtide::output::{OutputConfig, outcome_marker};
//!
//! let config = OutputConfig::from_env_and_flag("auto");
//! println!("{} widget", outcome_marker(&config, Outcome::Built));
//! ```

use std::env;

use console::style;

use crate::target::Outcome;

/// Output configuration for controlling colors and emojis.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Whether colors and emojis should be used in output.
    pub use_color: bool,
}

impl OutputConfig {
    /// Create an output configuration from environment and CLI flag.
    ///
    /// `--color=always` forces colors on (overriding `NO_COLOR`),
    /// `--color=never` forces them off, and anything else detects support
    /// from the environment and the terminal.
    pub fn from_env_and_flag(color_flag: &str) -> Self {
        let use_color = match color_flag.to_lowercase().as_str() {
            "always" => true,
            "never" => false,
            _ => Self::detect_color_support(),
        };

        Self { use_color }
    }

    fn detect_color_support() -> bool {
        // Presence alone disables colors, even when empty
        if env::var_os("NO_COLOR").is_some() {
            return false;
        }

        if env::var("CLICOLOR").is_ok_and(|v| v == "0") {
            return false;
        }

        if env::var("CLICOLOR_FORCE").is_ok_and(|v| v != "0" && !v.is_empty()) {
            return true;
        }

        if env::var("TERM").is_ok_and(|v| v == "dumb") {
            return false;
        }

        console::Term::stdout().features().colors_supported()
    }

    #[cfg(test)]
    pub fn with_color() -> Self {
        Self { use_color: true }
    }

    #[cfg(test)]
    pub fn without_color() -> Self {
        Self { use_color: false }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::from_env_and_flag("auto")
    }
}

/// Returns `emoji_str` when colors are enabled, `plain` otherwise.
pub fn emoji<'a>(config: &OutputConfig, emoji_str: &'a str, plain: &'a str) -> &'a str {
    if config.use_color {
        emoji_str
    } else {
        plain
    }
}

/// Marker printed in front of a target in a run report.
pub fn outcome_marker(config: &OutputConfig, outcome: Outcome) -> String {
    let (symbol, plain) = match outcome {
        Outcome::Built => ("\u{2705}", "[BUILT]"),
        Outcome::Failed => ("\u{274c}", "[FAILED]"),
        Outcome::Skipped => ("\u{23ed}", "[SKIPPED]"),
        Outcome::Pending => ("\u{2022}", "[-]"),
    };
    emoji(config, symbol, plain).to_string()
}

/// Change flag as printed by `check`.
pub fn change_marker(config: &OutputConfig, change: Option<bool>) -> String {
    let text = match change {
        Some(true) => "changed",
        Some(false) => "unchanged",
        None => "error",
    };
    if !config.use_color {
        return text.to_string();
    }
    match change {
        Some(true) => style(text).yellow().to_string(),
        Some(false) => style(text).green().to_string(),
        None => style(text).red().to_string(),
    }
}
