//! Launch state inspection and housekeeping: `status`, `history`, `cancel`, `prune`.

use anyhow::{Context, Result};
use console::style;
use serde_json::json;

use shoplaunch::logging;
use shoplaunch::report::read_latest;
use shoplaunch::settings::LaunchSettings;
use shoplaunch::state::{CheckpointStore, format_checkpoint_status};
use shoplaunch::ui::icons::{CHECK, SKIP};

use super::super::Cli;
use super::load_settings;

fn open_store(cli: &Cli) -> Result<(LaunchSettings, CheckpointStore, logging::LoggingGuard)> {
    let settings = load_settings(cli)?;
    let guard = logging::init(
        cli.verbose,
        cli.json,
        &settings.toml.logging,
        &settings.project_dir,
    );
    let store = CheckpointStore::new(settings.state_dir());
    Ok((settings, store, guard))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

pub fn cmd_status(cli: &Cli, shop: &str) -> Result<bool> {
    let (settings, store, _guard) = open_store(cli)?;
    let active = store.read(shop)?;
    let latest = read_latest(&settings.launches_dir(shop))?;

    if cli.json {
        print_json(&json!({ "shopId": shop, "active": active, "latestReport": latest }))?;
        return Ok(true);
    }

    println!();
    match &active {
        Some(checkpoint) => {
            println!("{}", style("Active launch").bold());
            println!("{}", format_checkpoint_status(checkpoint));
        }
        None => println!("No active launch for shop {}.", shop),
    }
    if let Some(latest) = latest {
        println!();
        println!("{}", style("Latest report").bold());
        println!("  Launch ID:  {}", latest.launch_id);
        println!("  Completed:  {}", latest.completed_at.to_rfc3339());
        if let Some(url) = &latest.deploy_url {
            println!("  Deploy URL: {}", url);
        }
        println!("  Path:       {}", settings.relative(&latest.report_path).display());
    }
    println!();
    Ok(true)
}

pub fn cmd_history(cli: &Cli, shop: &str) -> Result<bool> {
    let (_settings, store, _guard) = open_store(cli)?;
    let launches = store.list_recent(shop)?;

    if cli.json {
        print_json(&json!({ "shopId": shop, "launches": launches }))?;
        return Ok(true);
    }

    if launches.is_empty() {
        println!("No archived launches for shop {}.", shop);
        return Ok(true);
    }
    println!();
    println!(
        "{:<32} {:<10} {:<11} {:<26} Deploy URL",
        "Launch ID", "Mode", "Status", "Started"
    );
    println!(
        "{:<32} {:<10} {:<11} {:<26} ----------",
        "-".repeat(32),
        "----",
        "------",
        "-------"
    );
    for launch in &launches {
        println!(
            "{:<32} {:<10} {:<11} {:<26} {}",
            launch.launch_id,
            launch.mode.to_string(),
            launch.status.to_string(),
            launch.started_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            launch.deploy_url.as_deref().unwrap_or("-")
        );
    }
    println!();
    Ok(true)
}

pub fn cmd_cancel(cli: &Cli, shop: &str) -> Result<bool> {
    let (_settings, store, _guard) = open_store(cli)?;
    let _lock = store.lock(shop)?;

    let cancelled = store.cancel(shop)?;
    if cli.json {
        print_json(&json!({ "shopId": shop, "cancelled": cancelled }))?;
        return Ok(true);
    }
    match cancelled {
        Some(checkpoint) => println!(
            "{}Cancelled launch {} for shop {} and archived it.",
            CHECK, checkpoint.launch_id, shop
        ),
        None => println!("{}No active launch for shop {}.", SKIP, shop),
    }
    Ok(true)
}

pub fn cmd_prune(cli: &Cli, shop: &str, keep: usize) -> Result<bool> {
    let (_settings, store, _guard) = open_store(cli)?;
    let removed = store.prune(shop, keep)?;

    if cli.json {
        print_json(&json!({ "shopId": shop, "removed": removed, "kept": keep }))?;
        return Ok(true);
    }
    println!(
        "{}Removed {} archived launch(es) for shop {} (keeping {}).",
        CHECK, removed, shop, keep
    );
    Ok(true)
}
