//! External step collaborators, specified at their interface.
//!
//! The orchestrator drives scaffolding, CI workflow setup, webhook
//! registration and smoke checks through these traits. The implementations in
//! the submodules shell out to project commands or talk HTTP.

pub mod ci_setup;
pub mod scaffold;
pub mod smoke;
pub mod webhook;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{LaunchConfig, SmokeCheck};
use crate::secrets::ResolvedSecrets;

pub use ci_setup::WorkflowCiSetup;
pub use scaffold::CommandScaffolder;
pub use smoke::HttpSmokeRunner;
pub use webhook::CommandWebhookRegistrar;

/// Outcome of one smoke-check request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmokeCheckResult {
    pub endpoint: String,
    pub url: String,
    pub expected_status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Everything the scaffolder needs for one shop.
pub struct ScaffoldRequest<'a> {
    pub config: &'a LaunchConfig,
    pub config_path: &'a Path,
    pub app_dir: &'a Path,
    pub secrets: &'a ResolvedSecrets,
    pub force: bool,
}

#[async_trait]
pub trait Scaffolder: Send + Sync {
    /// Create or refresh the shop app. Returns the paths to commit.
    async fn scaffold(&self, request: &ScaffoldRequest<'_>) -> Result<Vec<PathBuf>>;
}

#[async_trait]
pub trait CiSetup: Send + Sync {
    /// Write the shop's deploy workflow. Returns the workflow file path.
    async fn setup(&self, config: &LaunchConfig) -> Result<PathBuf>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Registered,
    Skipped(String),
}

#[async_trait]
pub trait WebhookRegistrar: Send + Sync {
    async fn register(
        &self,
        shop_id: &str,
        deploy_url: Option<&str>,
        secrets: &ResolvedSecrets,
    ) -> Result<WebhookOutcome>;
}

#[async_trait]
pub trait SmokeRunner: Send + Sync {
    /// Wait for `base_url` to answer at all. `false` when it never did.
    async fn wait_until_reachable(&self, base_url: &str) -> bool;

    async fn run_checks(&self, base_url: &str, checks: &[SmokeCheck]) -> Vec<SmokeCheckResult>;
}

/// Join a base URL and an endpoint path without doubling slashes.
pub fn join_url(base: &str, endpoint: &str) -> String {
    let base = base.trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else if endpoint.starts_with('/') {
        format!("{}{}", base, endpoint)
    } else {
        format!("{}/{}", base, endpoint)
    }
}
