//! Step Executor / Orchestrator.
//!
//! Sequences the fixed launch steps, consults the checkpoint store to skip or
//! resume, and records every outcome. See [`runner::Orchestrator::launch`].

pub mod runner;

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LaunchMode;
use crate::gates::{CommandE2eRunner, E2eMode, E2eRunner, InventoryStore, SqliteInventoryStore};
use crate::platform::{CiPlatform, GhCli, GitRepo, SecretLister, Vcs};
use crate::report::ExecutionPlan;
use crate::secrets::SecretSource;
use crate::settings::LaunchSettings;
use crate::state::{LaunchCheckpoint, LaunchStatus};
use crate::steps::{
    CiSetup, CommandScaffolder, CommandWebhookRegistrar, HttpSmokeRunner, Scaffolder, SmokeRunner,
    WebhookRegistrar, WorkflowCiSetup,
};
use crate::util::find_executable;

pub use runner::Orchestrator;

/// Per-request timeout for smoke checks.
const SMOKE_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// What the operator asked for on the command line.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub config_path: PathBuf,
    pub mode: LaunchMode,
    pub secret_source: SecretSource,
    /// Stop after the gates without mutating anything.
    pub validate: bool,
    /// Stop after CI setup: local scaffolding only.
    pub dry_run: bool,
    pub force: bool,
    pub allow_dirty_git: bool,
    pub resume: bool,
    pub fresh: bool,
    pub skip_e2e: bool,
    pub e2e_url: Option<String>,
}

impl LaunchOptions {
    pub fn new(config_path: PathBuf, mode: LaunchMode) -> Self {
        Self {
            config_path,
            mode,
            secret_source: SecretSource::None,
            validate: false,
            dry_run: false,
            force: false,
            allow_dirty_git: false,
            resume: false,
            fresh: false,
            skip_e2e: false,
            e2e_url: None,
        }
    }

    /// E2E gate mode. A dry run never executes the suite.
    pub fn e2e_mode(&self) -> E2eMode {
        if self.skip_e2e || self.dry_run {
            E2eMode::Skip
        } else if let Some(url) = &self.e2e_url {
            E2eMode::Execute {
                base_url: Some(url.clone()),
            }
        } else {
            E2eMode::Cached
        }
    }
}

/// Final outcome of one invocation, carrying every error and warning.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchResult {
    pub success: bool,
    pub launch_id: String,
    pub shop_id: String,
    pub status: Option<LaunchStatus>,
    pub resumed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_run_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<ExecutionPlan>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(skip)]
    pub checkpoint: Option<LaunchCheckpoint>,
}

impl LaunchResult {
    pub(crate) fn failure(launch_id: impl Into<String>, shop_id: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            success: false,
            launch_id: launch_id.into(),
            shop_id: shop_id.into(),
            status: None,
            resumed: false,
            deploy_url: None,
            workflow_run_url: None,
            report_path: None,
            plan: None,
            errors,
            warnings: Vec::new(),
            checkpoint: None,
        }
    }
}

/// External collaborators for one launch.
#[derive(Clone)]
pub struct LaunchServices {
    pub vcs: Arc<dyn Vcs>,
    pub ci: Arc<dyn CiPlatform>,
    pub secret_lister: Arc<dyn SecretLister>,
    pub inventory: Arc<dyn InventoryStore>,
    pub e2e_runner: Arc<dyn E2eRunner>,
    pub scaffolder: Arc<dyn Scaffolder>,
    pub ci_setup: Arc<dyn CiSetup>,
    pub webhook: Arc<dyn WebhookRegistrar>,
    pub smoke: Arc<dyn SmokeRunner>,
    pub locate_tool: fn(&str) -> Option<PathBuf>,
}

impl LaunchServices {
    /// Real collaborators: git, the `gh` CLI, the SQLite inventory database and
    /// the project's configured commands.
    pub fn from_settings(settings: &LaunchSettings) -> Self {
        let project_dir = settings.project_dir.clone();
        let toml = &settings.toml;
        let gh = Arc::new(GhCli::new(&project_dir));
        let timeout = settings.command_timeout();

        Self {
            vcs: Arc::new(GitRepo::new(&project_dir)),
            ci: gh.clone(),
            secret_lister: gh,
            inventory: Arc::new(SqliteInventoryStore::new(settings.database_path())),
            e2e_runner: Arc::new(CommandE2eRunner::new(
                toml.commands.e2e.clone(),
                project_dir.clone(),
                timeout,
            )),
            scaffolder: Arc::new(CommandScaffolder::new(
                toml.commands.scaffold.clone(),
                project_dir.clone(),
                timeout,
            )),
            ci_setup: Arc::new(WorkflowCiSetup::new(
                settings.workflows_dir(),
                toml.ci.workflow.clone(),
                toml.paths.apps_dir.to_string_lossy().into_owned(),
                toml.ci.metadata_artifact.clone(),
            )),
            webhook: Arc::new(CommandWebhookRegistrar::new(
                toml.commands.webhook.clone(),
                project_dir,
                timeout,
            )),
            smoke: Arc::new(HttpSmokeRunner::new(
                toml.polling.reachability_attempts,
                Duration::from_secs(toml.polling.reachability_delay_secs),
                SMOKE_REQUEST_TIMEOUT,
            )),
            locate_tool: find_executable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_e2e_mode_selection() {
        let mut opts = LaunchOptions::new(PathBuf::from("launch.json"), LaunchMode::Production);
        assert_eq!(opts.e2e_mode(), E2eMode::Cached);

        opts.e2e_url = Some("https://staging.acme.test".into());
        assert!(matches!(opts.e2e_mode(), E2eMode::Execute { base_url: Some(_) }));

        opts.dry_run = true;
        assert_eq!(opts.e2e_mode(), E2eMode::Skip);
    }
}
