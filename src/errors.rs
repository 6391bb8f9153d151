//! Typed error hierarchy for the launch pipeline.
//!
//! - `ConfigError`: launch configuration could not be loaded or failed validation
//! - `StoreError`: checkpoint persistence failures
//! - `DeployError`: commit, trigger and workflow-run failures, each classified
//!   as recoverable-by-resume or not
//! - `LaunchError`: what a pipeline step reports back to the orchestrator

use std::path::PathBuf;

use thiserror::Error;

use crate::config::SchemaIssue;
use crate::state::LaunchStep;

/// Errors from loading and validating the launch configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read launch config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Launch config at {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Launch config is invalid: {}", format_issues(.issues))]
    Invalid { issues: Vec<SchemaIssue> },
}

fn format_issues(issues: &[SchemaIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from the checkpoint store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Checkpoint I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint at {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Another launch for shop {shop_id} is in progress (lock held on {path})")]
    Locked { shop_id: String, path: PathBuf },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from a deploy attempt.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Commit failed: {0}")]
    Commit(String),

    #[error("Push to {branch} failed: {message}")]
    Push { branch: String, message: String },

    #[error("Failed to trigger workflow {workflow} on {branch}: {message}")]
    Trigger {
        workflow: String,
        branch: String,
        message: String,
    },

    #[error("No run of workflow {workflow} appeared on {branch} after {attempts} attempts: {message}")]
    RunNotFound {
        workflow: String,
        branch: String,
        attempts: u32,
        message: String,
    },

    #[error("Lost contact with workflow run {run_id} while polling: {message}")]
    PollFailed { run_id: u64, message: String },

    #[error(
        "Gave up waiting for workflow run {run_id} after {waited_secs}s; it may still be running, check {run_url}"
    )]
    TimedOut {
        run_id: u64,
        run_url: String,
        waited_secs: u64,
    },

    #[error("Workflow run {run_id} concluded with '{conclusion}': {run_url}")]
    RunFailed {
        run_id: u64,
        run_url: String,
        conclusion: String,
    },
}

impl DeployError {
    /// Whether resuming the same launch attempt is a valid remediation.
    ///
    /// Failures before the run exists are recoverable, as is a transport error
    /// while polling a known run. A missing run after a successful trigger, a
    /// bad conclusion and a timeout are not: resuming would re-trigger a deploy
    /// whose outcome is known-bad or unknown.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DeployError::Commit(_)
                | DeployError::Push { .. }
                | DeployError::Trigger { .. }
                | DeployError::PollFailed { .. }
        )
    }

    /// Whether we stopped waiting rather than observing a failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DeployError::TimedOut { .. })
    }
}

/// Errors surfaced by the orchestrator and its steps.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Preflight checks failed: {}", .errors.join("; "))]
    Preflight { errors: Vec<String> },

    #[error("Go-live gates failed: {}", .errors.join("; "))]
    Gates { errors: Vec<String> },

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Existing launch state found for shop {shop_id} (launch {launch_id}): {detail}")]
    ExistingState {
        shop_id: String,
        launch_id: String,
        detail: String,
    },

    #[error("{step} failed: {message}")]
    Step { step: LaunchStep, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LaunchError {
    pub fn step(step: LaunchStep, message: impl Into<String>) -> Self {
        LaunchError::Step {
            step,
            message: message.into(),
        }
    }

    /// Whether a checkpoint failed with this error may be resumed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            LaunchError::Config(_) | LaunchError::ExistingState { .. } => false,
            LaunchError::Deploy(e) => e.is_recoverable(),
            LaunchError::Preflight { .. }
            | LaunchError::Gates { .. }
            | LaunchError::Store(_)
            | LaunchError::Step { .. }
            | LaunchError::Other(_) => true,
        }
    }

    /// Individual messages for the final result; aggregated variants are expanded.
    pub fn messages(&self) -> Vec<String> {
        match self {
            LaunchError::Preflight { errors } | LaunchError::Gates { errors } => errors.clone(),
            LaunchError::Config(ConfigError::Invalid { issues }) => {
                issues.iter().map(|i| i.to_string()).collect()
            }
            other => vec![other.to_string()],
        }
    }
}
