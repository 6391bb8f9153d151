use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use shoplaunch::config::LaunchMode;

mod cmd;

#[derive(Parser)]
#[command(name = "launch-shop")]
#[command(
    version,
    about = "Provision, gate, deploy and report a shop launch",
    subcommand_negates_reqs = true,
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    /// Increase diagnostic logging (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Print the result as JSON on stdout instead of the progress display.
    #[arg(long, global = true)]
    pub json: bool,

    /// Project root (defaults to the current directory).
    #[arg(long, global = true, env = "LAUNCH_SHOP_PROJECT_DIR")]
    pub project_dir: Option<PathBuf>,

    /// Settings file (defaults to launch.toml in the project root).
    #[arg(long, global = true, env = "LAUNCH_SHOP_SETTINGS")]
    pub settings: Option<PathBuf>,

    #[command(flatten)]
    pub launch: LaunchArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Args, Clone)]
pub struct LaunchArgs {
    /// Launch configuration JSON.
    #[arg(long, required = true)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LaunchMode::Preview)]
    pub mode: LaunchMode,

    /// Load secrets from a dotenv file.
    #[arg(long, conflicts_with = "vault_cmd")]
    pub env_file: Option<PathBuf>,

    /// Load secrets from a command that prints KEY=VALUE lines.
    #[arg(long)]
    pub vault_cmd: Option<String>,

    /// Run preflight and gates, print the plan, change nothing.
    #[arg(long, conflicts_with = "dry_run")]
    pub validate: bool,

    /// Scaffold and write the workflow, but do not commit, push or deploy.
    #[arg(long)]
    pub dry_run: bool,

    /// Overwrite an existing shop app.
    #[arg(long)]
    pub force: bool,

    /// Allow uncommitted changes in the working tree.
    #[arg(long)]
    pub allow_dirty_git: bool,

    /// Continue a failed launch from its first unfinished step.
    #[arg(long, conflicts_with = "fresh")]
    pub resume: bool,

    /// Discard previous launch state and start over.
    #[arg(long)]
    pub fresh: bool,

    /// Skip the E2E checkout gate.
    #[arg(long, conflicts_with = "e2e_url")]
    pub skip_e2e: bool,

    /// Run the E2E suite now against this URL instead of using cached results.
    #[arg(long)]
    pub e2e_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the active launch of a shop and its latest report
    Status {
        #[arg(long)]
        shop: String,
    },
    /// List archived launches of a shop, newest first
    History {
        #[arg(long)]
        shop: String,
    },
    /// Cancel the active launch of a shop and archive it
    Cancel {
        #[arg(long)]
        shop: String,
    },
    /// Delete old archived launches of a shop
    Prune {
        #[arg(long)]
        shop: String,
        /// Number of archived launches to keep
        #[arg(long, default_value = "10")]
        keep: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let outcome = match &cli.command {
        None => cmd::run_launch(&cli).await,
        Some(Commands::Status { shop }) => cmd::cmd_status(&cli, shop),
        Some(Commands::History { shop }) => cmd::cmd_history(&cli, shop),
        Some(Commands::Cancel { shop }) => cmd::cmd_cancel(&cli, shop),
        Some(Commands::Prune { shop, keep }) => cmd::cmd_prune(&cli, shop, *keep),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
