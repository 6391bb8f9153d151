//! CLI command implementations.
//!
//! | Module   | Commands handled                         |
//! |----------|------------------------------------------|
//! | `launch` | the default launch (no subcommand)       |
//! | `state`  | `Status`, `History`, `Cancel`, `Prune`   |
//!
//! Each returns `Ok(true)` on success and `Ok(false)` for a reported failure.

pub mod launch;
pub mod state;

use anyhow::{Context, Result};
use shoplaunch::settings::LaunchSettings;

use super::Cli;

pub use launch::run_launch;
pub use state::{cmd_cancel, cmd_history, cmd_prune, cmd_status};

/// Resolve the project directory and load settings for it.
fn load_settings(cli: &Cli) -> Result<LaunchSettings> {
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    LaunchSettings::new(project_dir, cli.settings.as_deref())
}
