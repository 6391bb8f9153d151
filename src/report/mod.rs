//! Report Generator.
//!
//! A launch report is a read-only projection of the checkpoint written once per
//! launch attempt to `data/shops/<shop>/launches/<launch>.json`, plus a
//! `latest.json` pointer beside it. Reports carry identifiers and public URLs
//! only; the secret source is recorded by kind.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::{DeployTargetKind, LaunchConfig, LaunchMode};
use crate::gates::GoLiveGatesResult;
use crate::secrets::SecretSourceKind;
use crate::state::{LaunchCheckpoint, LaunchStep, StepResult};
use crate::steps::SmokeCheckResult;
use crate::util::write_atomic;

pub const LATEST_FILE: &str = "latest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchReport {
    pub launch_id: String,
    pub shop_id: String,
    pub mode: LaunchMode,
    pub config_fingerprint: String,
    pub git_ref: Option<String>,
    pub secret_source: SecretSourceKind,
    pub deploy_target: DeployTargetKind,
    pub project_name: String,
    pub deploy_url: Option<String>,
    pub workflow_run_url: Option<String>,
    pub workflow_run_id: Option<u64>,
    pub steps: Vec<StepResult>,
    pub go_live_gates: Option<GoLiveGatesResult>,
    pub smoke_checks: Vec<SmokeCheckResult>,
    pub warnings: Vec<String>,
    pub resume_count: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub generated_by: String,
}

impl LaunchReport {
    pub fn from_checkpoint(
        checkpoint: &LaunchCheckpoint,
        config: &LaunchConfig,
        secret_source: SecretSourceKind,
        now: DateTime<Utc>,
    ) -> Self {
        let duration_ms = (now - checkpoint.started_at).num_milliseconds().max(0) as u64;
        Self {
            launch_id: checkpoint.launch_id.clone(),
            shop_id: checkpoint.shop_id.clone(),
            mode: checkpoint.mode,
            config_fingerprint: checkpoint.config_fingerprint.clone(),
            git_ref: checkpoint.git_ref.clone(),
            secret_source,
            deploy_target: config.deploy_target.kind,
            project_name: config.project_name(),
            deploy_url: checkpoint.deploy_url.clone(),
            workflow_run_url: checkpoint.workflow_run_url.clone(),
            workflow_run_id: checkpoint.workflow_run_id,
            steps: checkpoint.completed_steps.clone(),
            go_live_gates: checkpoint.go_live_gates.clone(),
            smoke_checks: checkpoint.smoke_checks.clone(),
            warnings: checkpoint.warnings.clone(),
            resume_count: checkpoint.resume_count,
            started_at: checkpoint.started_at,
            completed_at: now,
            duration_ms,
            generated_by: format!("launch-shop {}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Pointer to the most recent report of a shop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestPointer {
    pub launch_id: String,
    pub report_path: PathBuf,
    pub deploy_url: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Write `report` into `launches_dir` and point `latest.json` at it.
///
/// Reports are write-once. If a report for the same launch is already on
/// disk, for instance because the checkpoint save after a previous write
/// failed, that report is kept and the pointer is refreshed from it. Any
/// other file at the path is an error.
pub fn write_report(launches_dir: &Path, report: &LaunchReport) -> Result<PathBuf> {
    std::fs::create_dir_all(launches_dir)
        .with_context(|| format!("Failed to create {}", launches_dir.display()))?;

    let path = launches_dir.join(format!("{}.json", report.launch_id));
    let body = serde_json::to_vec_pretty(report).context("Failed to serialize launch report")?;

    let written = match std::fs::OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(mut file) => {
            file.write_all(&body)
                .and_then(|()| file.sync_all())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "Wrote launch report");
            report.clone()
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            let existing = read_report(&path)?;
            if existing.launch_id != report.launch_id {
                anyhow::bail!(
                    "Launch report {} belongs to launch {}",
                    path.display(),
                    existing.launch_id
                );
            }
            info!(path = %path.display(), "Launch report already written");
            existing
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to create {}", path.display()));
        }
    };

    let pointer = LatestPointer {
        launch_id: written.launch_id.clone(),
        report_path: path.clone(),
        deploy_url: written.deploy_url.clone(),
        completed_at: written.completed_at,
    };
    let pointer_body = serde_json::to_vec_pretty(&pointer).context("Failed to serialize latest pointer")?;
    write_atomic(&launches_dir.join(LATEST_FILE), &pointer_body)?;
    Ok(path)
}

fn read_report(path: &Path) -> Result<LaunchReport> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Launch report {} exists but is not a readable report", path.display()))
}

pub fn read_latest(launches_dir: &Path) -> Result<Option<LatestPointer>> {
    let path = launches_dir.join(LATEST_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let pointer = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(pointer))
}

/// One line of the `--validate` execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedStep {
    pub step: LaunchStep,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub shop_id: String,
    pub mode: LaunchMode,
    pub steps: Vec<PlannedStep>,
}

/// Inputs that shape the plan beyond the config itself.
pub struct PlanContext<'a> {
    pub app_dir: &'a Path,
    pub workflow: &'a str,
    pub branch: &'a str,
}

pub fn execution_plan(config: &LaunchConfig, mode: LaunchMode, ctx: &PlanContext<'_>) -> ExecutionPlan {
    let steps = LaunchStep::plan(mode)
        .into_iter()
        .map(|step| {
            let action = match step {
                LaunchStep::Preflight => "Check tools, credentials, working tree and config".to_string(),
                LaunchStep::GoLiveGates => "Evaluate go-live gates".to_string(),
                LaunchStep::Scaffold => format!("Scaffold shop app at {}", ctx.app_dir.display()),
                LaunchStep::CiSetup => format!("Write workflow {}", ctx.workflow),
                LaunchStep::Commit => format!("Commit launch changes and push to {}", ctx.branch),
                LaunchStep::Deploy => format!(
                    "Trigger {} on {} and deploy to {} ({})",
                    ctx.workflow,
                    ctx.branch,
                    config.deploy_target.kind,
                    config.project_name()
                ),
                LaunchStep::Webhook => "Register payment webhook".to_string(),
                LaunchStep::Smoke => format!(
                    "Run {} smoke check(s)",
                    config.effective_smoke_checks().len()
                ),
                LaunchStep::Report => "Write launch report".to_string(),
            };
            PlannedStep { step, action }
        })
        .collect();

    ExecutionPlan {
        shop_id: config.shop_id.clone(),
        mode,
        steps,
    }
}

pub fn format_execution_plan(plan: &ExecutionPlan) -> String {
    let mut lines = vec![format!(
        "Execution plan for {} ({} mode):",
        plan.shop_id, plan.mode
    )];
    for (i, planned) in plan.steps.iter().enumerate() {
        lines.push(format!("  {}. {:<14} {}", i + 1, planned.step.as_str(), planned.action));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_document;
    use crate::state::LaunchStatus;
    use serde_json::json;
    use tempfile::tempdir;

    fn config() -> LaunchConfig {
        parse_document(json!({"shopId": "acme", "deployTarget": {"type": "cloudflare-pages"}})).unwrap()
    }

    fn checkpoint() -> LaunchCheckpoint {
        let mut cp = LaunchCheckpoint::new(
            "launch-20261015120000-a1b2c3".into(),
            "acme".into(),
            "f".repeat(64),
            LaunchMode::Preview,
        );
        cp.start();
        cp.mark_step_completed(LaunchStep::Preflight, 40);
        cp.deploy_url = Some("https://shop-acme.pages.dev".into());
        cp.workflow_run_url = Some("https://github.com/acme/shops/actions/runs/7".into());
        cp.git_ref = Some("abc123".into());
        cp
    }

    #[test]
    fn test_report_projects_checkpoint() {
        let cp = checkpoint();
        let report = LaunchReport::from_checkpoint(&cp, &config(), SecretSourceKind::EnvFile, Utc::now());
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.git_ref.as_deref(), Some("abc123"));
        assert_eq!(report.project_name, "shop-acme");
        assert_eq!(cp.status, LaunchStatus::Running);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["secretSource"], "env-file");
        assert_eq!(json["deployTarget"], "cloudflare-pages");
        assert!(json.get("configFingerprint").is_some());
    }

    #[test]
    fn test_report_is_write_once_and_updates_latest() {
        let dir = tempdir().unwrap();
        let launches = dir.path().join("data/shops/acme/launches");
        let report = LaunchReport::from_checkpoint(&checkpoint(), &config(), SecretSourceKind::None, Utc::now());

        let path = write_report(&launches, &report).unwrap();
        assert!(path.ends_with("launch-20261015120000-a1b2c3.json"));
        let latest = read_latest(&launches).unwrap().unwrap();
        assert_eq!(latest.launch_id, report.launch_id);
        assert_eq!(latest.report_path, path);
    }

    #[test]
    fn test_rewriting_same_launch_keeps_first_report() {
        let dir = tempdir().unwrap();
        let launches = dir.path().join("launches");
        let first = LaunchReport::from_checkpoint(&checkpoint(), &config(), SecretSourceKind::None, Utc::now());
        let path = write_report(&launches, &first).unwrap();
        let original = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(launches.join(LATEST_FILE)).unwrap();

        let mut retried = checkpoint();
        retried.resume_count = 1;
        let second = LaunchReport::from_checkpoint(&retried, &config(), SecretSourceKind::None, Utc::now());
        assert_eq!(write_report(&launches, &second).unwrap(), path);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
        let latest = read_latest(&launches).unwrap().unwrap();
        assert_eq!(latest.completed_at, first.completed_at);
    }

    #[test]
    fn test_unreadable_existing_report_is_error() {
        let dir = tempdir().unwrap();
        let launches = dir.path().join("launches");
        std::fs::create_dir_all(&launches).unwrap();
        std::fs::write(launches.join("launch-20261015120000-a1b2c3.json"), "{ truncated").unwrap();

        let report = LaunchReport::from_checkpoint(&checkpoint(), &config(), SecretSourceKind::None, Utc::now());
        let err = write_report(&launches, &report).unwrap_err();
        assert!(format!("{:#}", err).contains("not a readable report"));
    }

    #[test]
    fn test_execution_plan_lists_mode_steps() {
        let cfg = config();
        let ctx = PlanContext {
            app_dir: Path::new("apps/shop-acme"),
            workflow: "shop-acme.yml",
            branch: "main",
        };
        let preview = execution_plan(&cfg, LaunchMode::Preview, &ctx);
        assert!(!preview.steps.iter().any(|s| s.step == LaunchStep::GoLiveGates));

        let production = execution_plan(&cfg, LaunchMode::Production, &ctx);
        assert_eq!(production.steps[1].step, LaunchStep::GoLiveGates);
        let text = format_execution_plan(&production);
        assert!(text.contains("Execution plan for acme (production mode):"));
        assert!(text.contains("Write workflow shop-acme.yml"));
    }
}
