//! External collaborators: version control, CI workflow runner and secret listing.
//!
//! The pipeline talks to these only through the traits below so tests can
//! substitute in-memory fakes.

pub mod git;
pub mod github;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

pub use git::GitRepo;
pub use github::GhCli;

/// Version-control operations the launch needs.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Paths with uncommitted changes, ignoring ignored files.
    async fn dirty_paths(&self) -> Result<Vec<String>>;

    /// Current HEAD revision, `None` on an unborn branch.
    async fn head_revision(&self) -> Result<Option<String>>;

    async fn current_branch(&self) -> Result<String>;

    /// Stage `paths` and commit them. Returns the new revision, or `None` when
    /// there was nothing to commit.
    async fn commit_paths(&self, paths: &[PathBuf], message: &str) -> Result<Option<String>>;

    /// Push HEAD to `branch` on the default remote.
    async fn push(&self, branch: &str) -> Result<()>;
}

/// CI workflow runner.
#[async_trait]
pub trait CiPlatform: Send + Sync {
    async fn check_auth(&self) -> Result<()>;

    async fn trigger_workflow(&self, workflow: &str, branch: &str) -> Result<()>;

    /// Most recent runs of `workflow` on `branch`, newest first.
    async fn list_runs(&self, workflow: &str, branch: &str, limit: u32) -> Result<Vec<WorkflowRun>>;

    async fn get_run(&self, run_id: u64) -> Result<WorkflowRun>;

    /// Download artifact `name` from a run into `dest`.
    async fn download_artifact(&self, run_id: u64, name: &str, dest: &Path) -> Result<()>;
}

/// Lists configured CI secret names. Never returns values.
#[async_trait]
pub trait SecretLister: Send + Sync {
    async fn list_secret_names(&self) -> Result<Vec<String>>;
}

/// One workflow run as reported by the CI platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    #[serde(rename = "databaseId")]
    pub id: u64,
    #[serde(default)]
    pub head_sha: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }

    pub fn is_success(&self) -> bool {
        self.conclusion.as_deref() == Some("success")
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}
