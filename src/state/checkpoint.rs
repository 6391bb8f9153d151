use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::LaunchMode;
use crate::gates::GoLiveGatesResult;
use crate::steps::SmokeCheckResult;

/// The fixed, ordered set of launch steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LaunchStep {
    Preflight,
    GoLiveGates,
    Scaffold,
    CiSetup,
    Commit,
    Deploy,
    Webhook,
    Smoke,
    Report,
}

impl LaunchStep {
    /// Execution order.
    pub const ALL: [LaunchStep; 9] = [
        LaunchStep::Preflight,
        LaunchStep::GoLiveGates,
        LaunchStep::Scaffold,
        LaunchStep::CiSetup,
        LaunchStep::Commit,
        LaunchStep::Deploy,
        LaunchStep::Webhook,
        LaunchStep::Smoke,
        LaunchStep::Report,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LaunchStep::Preflight => "preflight",
            LaunchStep::GoLiveGates => "go-live-gates",
            LaunchStep::Scaffold => "scaffold",
            LaunchStep::CiSetup => "ci-setup",
            LaunchStep::Commit => "commit",
            LaunchStep::Deploy => "deploy",
            LaunchStep::Webhook => "webhook",
            LaunchStep::Smoke => "smoke",
            LaunchStep::Report => "report",
        }
    }

    /// Steps whose failure becomes a warning instead of halting the launch.
    pub fn is_post_deploy(self) -> bool {
        matches!(self, LaunchStep::Webhook | LaunchStep::Smoke)
    }

    /// Go-live gates only run for production launches.
    pub fn applies_to(self, mode: LaunchMode) -> bool {
        self != LaunchStep::GoLiveGates || mode.is_production()
    }

    /// Steps that run for `mode`, in order.
    pub fn plan(mode: LaunchMode) -> Vec<LaunchStep> {
        Self::ALL.into_iter().filter(|s| s.applies_to(mode)).collect()
    }
}

impl fmt::Display for LaunchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LaunchStep {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LaunchStep::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown launch step '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl LaunchStatus {
    pub fn is_active(self) -> bool {
        matches!(self, LaunchStatus::Pending | LaunchStatus::Running)
    }
}

impl fmt::Display for LaunchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LaunchStatus::Pending => "pending",
            LaunchStatus::Running => "running",
            LaunchStatus::Completed => "completed",
            LaunchStatus::Failed => "failed",
            LaunchStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub name: LaunchStep,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Why the step was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Persisted progress of one launch attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchCheckpoint {
    pub launch_id: String,
    pub shop_id: String,
    pub config_fingerprint: String,
    pub mode: LaunchMode,
    pub status: LaunchStatus,
    #[serde(default)]
    pub last_completed_step: Option<LaunchStep>,
    #[serde(default)]
    pub completed_steps: Vec<StepResult>,
    #[serde(default)]
    pub failed_step: Option<LaunchStep>,
    #[serde(default)]
    pub failed_error: Option<String>,
    #[serde(default)]
    pub failed_recoverable: bool,
    #[serde(default)]
    pub resume_count: u32,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub go_live_gates: Option<GoLiveGatesResult>,
    #[serde(default)]
    pub deploy_url: Option<String>,
    #[serde(default)]
    pub workflow_run_url: Option<String>,
    #[serde(default)]
    pub workflow_run_id: Option<u64>,
    #[serde(default)]
    pub smoke_checks: Vec<SmokeCheckResult>,
    #[serde(default)]
    pub git_ref: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl LaunchCheckpoint {
    pub fn new(launch_id: String, shop_id: String, config_fingerprint: String, mode: LaunchMode) -> Self {
        let now = Utc::now();
        Self {
            launch_id,
            shop_id,
            config_fingerprint,
            mode,
            status: LaunchStatus::Pending,
            last_completed_step: None,
            completed_steps: Vec::new(),
            failed_step: None,
            failed_error: None,
            failed_recoverable: false,
            resume_count: 0,
            warnings: Vec::new(),
            go_live_gates: None,
            deploy_url: None,
            workflow_run_url: None,
            workflow_run_id: None,
            smoke_checks: Vec::new(),
            git_ref: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// True iff a success has already been recorded for `step`.
    pub fn should_skip_step(&self, step: LaunchStep) -> bool {
        self.completed_steps
            .iter()
            .any(|r| r.name == step && r.status == StepStatus::Success)
    }

    pub fn start(&mut self) {
        if self.status == LaunchStatus::Pending {
            self.status = LaunchStatus::Running;
        }
    }

    /// Record a successful step. A second success for the same step is ignored.
    pub fn mark_step_completed(&mut self, step: LaunchStep, duration_ms: u64) {
        if self.should_skip_step(step) {
            return;
        }
        self.completed_steps.push(StepResult {
            name: step,
            status: StepStatus::Success,
            duration_ms,
            error: None,
            reason: None,
        });
        self.last_completed_step = Some(step);
    }

    pub fn mark_step_failed(&mut self, step: LaunchStep, duration_ms: u64, error: impl Into<String>) {
        self.completed_steps.push(StepResult {
            name: step,
            status: StepStatus::Failed,
            duration_ms,
            error: Some(error.into()),
            reason: None,
        });
    }

    pub fn mark_step_skipped(&mut self, step: LaunchStep, reason: impl Into<String>) {
        self.completed_steps.push(StepResult {
            name: step,
            status: StepStatus::Skipped,
            duration_ms: 0,
            error: None,
            reason: Some(reason.into()),
        });
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    /// Terminal for this attempt; the checkpoint stays resumable when `recoverable`.
    pub fn mark_launch_failed(&mut self, step: LaunchStep, error: impl Into<String>, recoverable: bool) {
        self.status = LaunchStatus::Failed;
        self.failed_step = Some(step);
        self.failed_error = Some(error.into());
        self.failed_recoverable = recoverable;
    }

    pub fn mark_launch_completed(&mut self) {
        self.status = LaunchStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.failed_step = None;
        self.failed_error = None;
        self.failed_recoverable = false;
    }

    pub fn mark_cancelled(&mut self) {
        self.status = LaunchStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// Fail an attempt that stopped without recording an outcome.
    ///
    /// An interrupted deploy is not recoverable: its workflow run may still be
    /// in flight.
    pub fn mark_interrupted(&mut self) {
        if !self.status.is_active() {
            return;
        }
        let step = self.resume_from_step().unwrap_or(LaunchStep::Report);
        self.mark_launch_failed(
            step,
            format!("Launch was interrupted before {} finished", step),
            step != LaunchStep::Deploy,
        );
    }

    pub fn prepare_for_resume(&mut self) {
        self.resume_count += 1;
        self.status = LaunchStatus::Running;
        self.failed_step = None;
        self.failed_error = None;
        self.failed_recoverable = false;
    }

    /// First step that applies to this launch's mode without a recorded success.
    pub fn resume_from_step(&self) -> Option<LaunchStep> {
        LaunchStep::plan(self.mode)
            .into_iter()
            .find(|step| !self.should_skip_step(*step))
    }

    pub fn step_result(&self, step: LaunchStep) -> Option<&StepResult> {
        self.completed_steps.iter().rev().find(|r| r.name == step)
    }

    /// Milliseconds between start and completion, or until the last update.
    pub fn total_duration_ms(&self) -> u64 {
        let end = self.completed_at.unwrap_or(self.updated_at);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// Fresh launch identifier: `launch-<UTC yyyymmddHHMMSS>-<6 hex>`.
pub fn generate_launch_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "launch-{}-{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        &suffix[..6]
    )
}

/// Multi-line status summary of a checkpoint.
pub fn format_checkpoint_status(checkpoint: &LaunchCheckpoint) -> String {
    let mut lines = vec![
        format!("Launch ID:   {}", checkpoint.launch_id),
        format!("Shop:        {}", checkpoint.shop_id),
        format!("Mode:        {}", checkpoint.mode),
        format!("Status:      {}", checkpoint.status),
        format!("Started:     {}", checkpoint.started_at.to_rfc3339()),
        format!("Updated:     {}", checkpoint.updated_at.to_rfc3339()),
    ];
    if checkpoint.resume_count > 0 {
        lines.push(format!("Resumed:     {} time(s)", checkpoint.resume_count));
    }
    if let Some(step) = checkpoint.last_completed_step {
        lines.push(format!("Last step:   {}", step));
    }
    if let Some(step) = checkpoint.failed_step {
        lines.push(format!(
            "Failed at:   {} ({})",
            step,
            if checkpoint.failed_recoverable {
                "recoverable"
            } else {
                "not recoverable"
            }
        ));
    }
    if let Some(err) = &checkpoint.failed_error {
        lines.push(format!("Error:       {}", err));
    }
    if let Some(url) = &checkpoint.deploy_url {
        lines.push(format!("Deploy URL:  {}", url));
    }
    if let Some(url) = &checkpoint.workflow_run_url {
        lines.push(format!("Workflow:    {}", url));
    }

    lines.push(String::new());
    lines.push("Steps:".to_string());
    for step in LaunchStep::plan(checkpoint.mode) {
        let marker = match checkpoint.step_result(step).map(|r| r.status) {
            Some(StepStatus::Success) => "[x]",
            Some(StepStatus::Failed) => "[!]",
            Some(StepStatus::Skipped) => "[-]",
            None => "[ ]",
        };
        lines.push(format!("  {} {}", marker, step));
    }
    if !checkpoint.warnings.is_empty() {
        lines.push(String::new());
        lines.push(format!("Warnings ({}):", checkpoint.warnings.len()));
        for w in &checkpoint.warnings {
            lines.push(format!("  - {}", w));
        }
    }
    lines.join("\n")
}
