//! The launch itself: `launch-shop --config <path> [flags]`.

use anyhow::{Context, Result};
use console::style;
use std::sync::Arc;
use tracing::warn;

use shoplaunch::logging;
use shoplaunch::orchestrator::{LaunchOptions, LaunchResult, LaunchServices, Orchestrator};
use shoplaunch::secrets::SecretSource;
use shoplaunch::state::LaunchStep;
use shoplaunch::ui::LaunchUI;
use shoplaunch::ui::icons::{CROSS, LINK, WARN};

use super::super::{Cli, LaunchArgs};
use super::load_settings;

fn launch_options(args: &LaunchArgs) -> Result<LaunchOptions> {
    let config_path = args.config.clone().context("--config is required")?;
    let mut options = LaunchOptions::new(config_path, args.mode);
    options.secret_source = SecretSource::from_args(args.env_file.clone(), args.vault_cmd.clone());
    options.validate = args.validate;
    options.dry_run = args.dry_run;
    options.force = args.force;
    options.allow_dirty_git = args.allow_dirty_git;
    options.resume = args.resume;
    options.fresh = args.fresh;
    options.skip_e2e = args.skip_e2e;
    options.e2e_url = args.e2e_url.clone();
    Ok(options)
}

pub async fn run_launch(cli: &Cli) -> Result<bool> {
    let settings = load_settings(cli)?;
    let _logging = logging::init(
        cli.verbose,
        cli.json,
        &settings.toml.logging,
        &settings.project_dir,
    );
    for warning in settings.toml.validate() {
        warn!("{}", warning);
    }

    let options = launch_options(&cli.launch)?;
    let last = if options.validate {
        LaunchStep::GoLiveGates
    } else if options.dry_run {
        LaunchStep::CiSetup
    } else {
        LaunchStep::Report
    };
    let total = LaunchStep::plan(options.mode)
        .into_iter()
        .filter(|s| *s <= last)
        .count() as u64;
    let ui = if cli.json {
        LaunchUI::hidden()
    } else {
        LaunchUI::new(total, cli.verbose > 0)
    };

    let services = LaunchServices::from_settings(&settings);
    let orchestrator = Orchestrator::new(settings, services).with_ui(Arc::new(ui));
    let result = orchestrator.launch(&options).await;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialize launch result")?
        );
    } else {
        print_summary(&result);
    }
    Ok(result.success)
}

fn print_summary(result: &LaunchResult) {
    if !result.warnings.is_empty() {
        eprintln!();
        eprintln!("{}", style(format!("Warnings ({})", result.warnings.len())).yellow().bold());
        for warning in &result.warnings {
            eprintln!("  {}{}", WARN, warning);
        }
    }
    if !result.errors.is_empty() {
        eprintln!();
        eprintln!("{}", style(format!("Errors ({})", result.errors.len())).red().bold());
        for error in &result.errors {
            eprintln!("  {}{}", CROSS, error);
        }
    }

    if result.success {
        if let Some(url) = &result.deploy_url {
            println!("{}Deploy URL: {}", LINK, url);
        }
        if let Some(url) = &result.workflow_run_url {
            println!("Workflow run: {}", url);
        }
        if let Some(path) = &result.report_path {
            println!("Report: {}", path.display());
        }
    } else if !result.launch_id.is_empty() {
        eprintln!();
        eprintln!(
            "Launch {} did not complete. Inspect it with `launch-shop status --shop {}`.",
            result.launch_id, result.shop_id
        );
    }
}
