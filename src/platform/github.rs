use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::time::timeout;

use super::{CiPlatform, SecretLister, WorkflowRun};

/// Fields requested from `gh run list` / `gh run view`.
const RUN_FIELDS: &str = "databaseId,headSha,status,conclusion,url,createdAt";

/// Upper bound for a single `gh` invocation.
const GH_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// GitHub Actions through the `gh` CLI.
pub struct GhCli {
    project_dir: PathBuf,
    gh_cmd: String,
    call_timeout: Duration,
}

impl GhCli {
    pub fn new(project_dir: &Path) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
            gh_cmd: "gh".to_string(),
            call_timeout: GH_CALL_TIMEOUT,
        }
    }

    async fn gh(&self, args: &[&str]) -> Result<String> {
        let child = tokio::process::Command::new(&self.gh_cmd)
            .args(args)
            .current_dir(&self.project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to run gh {}", args.first().unwrap_or(&"")))?;

        let output = match timeout(self.call_timeout, child.wait_with_output()).await {
            Ok(result) => {
                result.with_context(|| format!("Failed to wait for gh {}", args.join(" ")))?
            }
            Err(_) => anyhow::bail!(
                "gh {} timed out after {} seconds",
                args.join(" "),
                self.call_timeout.as_secs()
            ),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("gh {} failed: {}", args.join(" "), stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl CiPlatform for GhCli {
    async fn check_auth(&self) -> Result<()> {
        self.gh(&["auth", "status"])
            .await
            .map(|_| ())
            .context("GitHub CLI not authenticated; run `gh auth login`")
    }

    async fn trigger_workflow(&self, workflow: &str, branch: &str) -> Result<()> {
        self.gh(&["workflow", "run", workflow, "--ref", branch])
            .await
            .map(|_| ())
    }

    async fn list_runs(&self, workflow: &str, branch: &str, limit: u32) -> Result<Vec<WorkflowRun>> {
        let limit = limit.to_string();
        let out = self
            .gh(&[
                "run", "list", "--workflow", workflow, "--branch", branch, "--limit", &limit,
                "--json", RUN_FIELDS,
            ])
            .await?;
        parse_runs(&out)
    }

    async fn get_run(&self, run_id: u64) -> Result<WorkflowRun> {
        let id = run_id.to_string();
        let out = self.gh(&["run", "view", &id, "--json", RUN_FIELDS]).await?;
        serde_json::from_str(&out).with_context(|| format!("Unexpected gh run view output for {}", run_id))
    }

    async fn download_artifact(&self, run_id: u64, name: &str, dest: &Path) -> Result<()> {
        let id = run_id.to_string();
        let dest = dest.to_string_lossy();
        self.gh(&["run", "download", &id, "--name", name, "--dir", &dest])
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl SecretLister for GhCli {
    async fn list_secret_names(&self) -> Result<Vec<String>> {
        let out = self.gh(&["secret", "list"]).await?;
        Ok(parse_secret_names(&out))
    }
}

fn parse_runs(out: &str) -> Result<Vec<WorkflowRun>> {
    if out.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(out).context("Unexpected gh run list output")
}

/// First column of `gh secret list` output.
fn parse_secret_names(out: &str) -> Vec<String> {
    out.lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}
