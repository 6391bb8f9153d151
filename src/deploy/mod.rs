//! Deploy Driver.
//!
//! One deploy attempt moves through
//! `committing → pushing → triggering → waiting-for-run → polling` and ends
//! `succeeded`, `failed` or `timed-out`. Each way of giving up is a distinct
//! [`DeployError`] variant because they differ in whether a resume is safe.
//!
//! Run discovery prefers a run whose head revision matches the pushed commit.
//! If none shows up within the retry budget the most recent run created since
//! the trigger is used, then the most recent run on the branch at all, and a
//! warning is returned with the outcome. Under concurrent pushes to the same
//! branch this can pick the wrong run.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::DeployTargetKind;
use crate::errors::DeployError;
use crate::platform::{CiPlatform, Vcs, WorkflowRun};
use crate::settings::PollingSection;

/// Runs listed per discovery attempt.
const RUN_LIST_LIMIT: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeployPhase {
    Committing,
    Pushing,
    Triggering,
    WaitingForRun,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
}

impl fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeployPhase::Committing => "committing",
            DeployPhase::Pushing => "pushing",
            DeployPhase::Triggering => "triggering",
            DeployPhase::WaitingForRun => "waiting-for-run",
            DeployPhase::Polling => "polling",
            DeployPhase::Succeeded => "succeeded",
            DeployPhase::Failed => "failed",
            DeployPhase::TimedOut => "timed-out",
        };
        f.write_str(s)
    }
}

/// Retry and timeout budget for the external workflow runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingPolicy {
    pub discovery_attempts: u32,
    pub discovery_delay: Duration,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub artifact_attempts: u32,
    pub artifact_delay: Duration,
}

impl PollingPolicy {
    pub fn from_settings(polling: &PollingSection) -> Self {
        Self {
            discovery_attempts: polling.discovery_attempts,
            discovery_delay: Duration::from_secs(polling.discovery_delay_secs),
            poll_interval: Duration::from_secs(polling.poll_interval_secs),
            poll_timeout: Duration::from_secs(polling.poll_timeout_secs),
            artifact_attempts: polling.artifact_attempts,
            artifact_delay: Duration::from_secs(polling.artifact_delay_secs),
        }
    }
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self::from_settings(&PollingSection::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    /// HEAD after the commit (or the existing HEAD when nothing changed).
    pub revision: Option<String>,
    pub committed: bool,
}

/// What to deploy.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub workflow: String,
    pub branch: String,
    /// Revision the run is expected to build.
    pub expected_sha: Option<String>,
    pub target: DeployTargetKind,
    pub project_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOutcome {
    pub run_id: u64,
    pub run_url: String,
    pub deploy_url: Option<String>,
    pub head_sha: String,
    /// Whether the run was matched to the expected revision.
    pub exact_match: bool,
    pub warnings: Vec<String>,
}

/// Live URL used when the metadata artifact cannot be read.
pub fn fallback_deploy_url(target: DeployTargetKind, project_name: &str) -> Option<String> {
    match target {
        DeployTargetKind::CloudflarePages => Some(format!("https://{}.pages.dev", project_name)),
        DeployTargetKind::Vercel => Some(format!("https://{}.vercel.app", project_name)),
        DeployTargetKind::Local => None,
    }
}

pub struct DeployDriver {
    vcs: Arc<dyn Vcs>,
    ci: Arc<dyn CiPlatform>,
    policy: PollingPolicy,
    metadata_artifact: String,
}

impl DeployDriver {
    pub fn new(
        vcs: Arc<dyn Vcs>,
        ci: Arc<dyn CiPlatform>,
        policy: PollingPolicy,
        metadata_artifact: impl Into<String>,
    ) -> Self {
        Self {
            vcs,
            ci,
            policy,
            metadata_artifact: metadata_artifact.into(),
        }
    }

    fn enter(&self, phase: DeployPhase) {
        info!(phase = %phase, "Deploy phase");
    }

    /// Commit `paths` and push HEAD to `branch`.
    pub async fn commit_and_push(
        &self,
        paths: &[PathBuf],
        message: &str,
        branch: &str,
    ) -> Result<CommitOutcome, DeployError> {
        self.enter(DeployPhase::Committing);
        let committed = self
            .vcs
            .commit_paths(paths, message)
            .await
            .map_err(|e| DeployError::Commit(format!("{:#}", e)))?;
        let revision = match committed.clone() {
            Some(rev) => Some(rev),
            None => {
                debug!("Nothing to commit; pushing existing HEAD");
                self.vcs
                    .head_revision()
                    .await
                    .map_err(|e| DeployError::Commit(format!("{:#}", e)))?
            }
        };

        self.enter(DeployPhase::Pushing);
        self.vcs.push(branch).await.map_err(|e| DeployError::Push {
            branch: branch.to_string(),
            message: format!("{:#}", e),
        })?;

        Ok(CommitOutcome {
            revision,
            committed: committed.is_some(),
        })
    }

    /// Trigger the workflow, find its run and wait for a successful conclusion.
    pub async fn trigger_and_wait(&self, request: &DeployRequest) -> Result<DeployOutcome, DeployError> {
        let mut warnings = Vec::new();

        self.enter(DeployPhase::Triggering);
        let triggered_at = Utc::now();
        self.ci
            .trigger_workflow(&request.workflow, &request.branch)
            .await
            .map_err(|e| DeployError::Trigger {
                workflow: request.workflow.clone(),
                branch: request.branch.clone(),
                message: format!("{:#}", e),
            })?;

        self.enter(DeployPhase::WaitingForRun);
        let (run, exact_match) = self.discover_run(request, triggered_at).await?;
        if !exact_match {
            let msg = format!(
                "Could not match a workflow run to commit {}; using the most recent run {} on {}",
                request.expected_sha.as_deref().unwrap_or("(unknown)"),
                run.id,
                request.branch
            );
            warn!("{}", msg);
            warnings.push(msg);
        }
        info!(run_id = run.id, url = %run.url, "Watching workflow run");

        self.enter(DeployPhase::Polling);
        let finished = match self.poll_until_complete(run).await {
            Ok(run) => run,
            Err(e) => {
                self.enter(if e.is_timeout() {
                    DeployPhase::TimedOut
                } else {
                    DeployPhase::Failed
                });
                return Err(e);
            }
        };
        self.enter(DeployPhase::Succeeded);

        let deploy_url = match self.fetch_deploy_url(finished.id).await {
            Some(url) => Some(url),
            None => {
                let fallback = fallback_deploy_url(request.target, &request.project_name);
                let msg = match &fallback {
                    Some(url) => format!(
                        "Deploy metadata artifact unavailable; using fallback URL {}",
                        url
                    ),
                    None => "Deploy metadata artifact unavailable; no deploy URL for a local target"
                        .to_string(),
                };
                warn!("{}", msg);
                warnings.push(msg);
                fallback
            }
        };

        Ok(DeployOutcome {
            run_id: finished.id,
            run_url: finished.url,
            deploy_url,
            head_sha: finished.head_sha,
            exact_match,
            warnings,
        })
    }

    async fn discover_run(
        &self,
        request: &DeployRequest,
        triggered_at: DateTime<Utc>,
    ) -> Result<(WorkflowRun, bool), DeployError> {
        let attempts = self.policy.discovery_attempts.max(1);
        let mut since_trigger: Option<WorkflowRun> = None;
        let mut latest: Option<WorkflowRun> = None;
        let mut last_error = None;

        for attempt in 1..=attempts {
            sleep(self.policy.discovery_delay).await;
            match self
                .ci
                .list_runs(&request.workflow, &request.branch, RUN_LIST_LIMIT)
                .await
            {
                Ok(runs) => {
                    if let Some(sha) = request.expected_sha.as_deref()
                        && let Some(run) = runs.iter().find(|r| r.head_sha == sha)
                    {
                        debug!(attempt, run_id = run.id, "Matched run to commit");
                        return Ok((run.clone(), true));
                    }
                    debug!(attempt, listed = runs.len(), "No matching run yet");
                    if let Some(run) = runs
                        .iter()
                        .find(|r| r.created_at.is_some_and(|at| at >= triggered_at))
                    {
                        since_trigger = Some(run.clone());
                    }
                    if let Some(first) = runs.into_iter().next() {
                        latest = Some(first);
                    }
                }
                Err(e) => {
                    debug!(attempt, error = %e, "Listing runs failed");
                    last_error = Some(format!("{:#}", e));
                }
            }
        }

        match since_trigger.or(latest) {
            Some(run) if request.expected_sha.is_none() => Ok((run, true)),
            Some(run) => Ok((run, false)),
            None => Err(DeployError::RunNotFound {
                workflow: request.workflow.clone(),
                branch: request.branch.clone(),
                attempts,
                message: last_error.unwrap_or_else(|| "no runs listed".to_string()),
            }),
        }
    }

    async fn poll_until_complete(&self, run: WorkflowRun) -> Result<WorkflowRun, DeployError> {
        let started = Instant::now();
        let run_id = run.id;
        let mut run_url = run.url;

        loop {
            // A single status call may not outlive the polling budget.
            let budget = self
                .policy
                .poll_timeout
                .saturating_sub(started.elapsed())
                .max(self.policy.poll_interval);
            let current = match timeout(budget, self.ci.get_run(run_id)).await {
                Ok(result) => result.map_err(|e| DeployError::PollFailed {
                    run_id,
                    message: format!("{:#}", e),
                })?,
                Err(_) => {
                    return Err(DeployError::TimedOut {
                        run_id,
                        run_url,
                        waited_secs: started.elapsed().as_secs(),
                    });
                }
            };
            if !current.url.is_empty() {
                run_url = current.url.clone();
            }

            if current.is_completed() {
                if current.is_success() {
                    return Ok(current);
                }
                return Err(DeployError::RunFailed {
                    run_id,
                    run_url,
                    conclusion: current.conclusion.unwrap_or_else(|| "unknown".to_string()),
                });
            }

            let waited = started.elapsed();
            if waited >= self.policy.poll_timeout {
                return Err(DeployError::TimedOut {
                    run_id,
                    run_url,
                    waited_secs: waited.as_secs(),
                });
            }
            debug!(run_id, status = %current.status, waited_secs = waited.as_secs(), "Run in progress");
            sleep(self.policy.poll_interval).await;
        }
    }

    async fn fetch_deploy_url(&self, run_id: u64) -> Option<String> {
        for attempt in 1..=self.policy.artifact_attempts.max(1) {
            let dir = match tempfile::tempdir() {
                Ok(dir) => dir,
                Err(e) => {
                    warn!(error = %e, "Cannot create temp dir for deploy metadata");
                    return None;
                }
            };
            let result = self
                .ci
                .download_artifact(run_id, &self.metadata_artifact, dir.path())
                .await
                .and_then(|()| read_deploy_url(dir.path()));
            match result {
                Ok(Some(url)) => return Some(url),
                Ok(None) => debug!(attempt, "Deploy metadata has no deployUrl"),
                Err(e) => debug!(attempt, error = %e, "Deploy metadata not available yet"),
            }
            if attempt < self.policy.artifact_attempts {
                sleep(self.policy.artifact_delay).await;
            }
        }
        None
    }
}

/// Find `deployUrl` in the downloaded metadata files.
fn read_deploy_url(dir: &Path) -> anyhow::Result<Option<String>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    for file in files {
        let content = std::fs::read_to_string(&file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let value: Value = serde_json::from_str(&content)
            .with_context(|| format!("Invalid deploy metadata in {}", file.display()))?;
        if let Some(url) = value.get("deployUrl").and_then(Value::as_str)
            && !url.is_empty()
        {
            return Ok(Some(url.to_string()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn run(id: u64, sha: &str, status: &str, conclusion: Option<&str>) -> WorkflowRun {
        WorkflowRun {
            id,
            head_sha: sha.to_string(),
            status: status.to_string(),
            conclusion: conclusion.map(String::from),
            url: format!("https://github.com/acme/shops/actions/runs/{}", id),
            created_at: None,
        }
    }

    #[derive(Default)]
    struct ScriptedCi {
        trigger_error: Option<String>,
        listings: Mutex<VecDeque<Result<Vec<WorkflowRun>, String>>>,
        polls: Mutex<VecDeque<Result<WorkflowRun, String>>>,
        artifact: Option<String>,
        downloads: Mutex<u32>,
        hang_polls: bool,
    }

    #[async_trait]
    impl CiPlatform for ScriptedCi {
        async fn check_auth(&self) -> Result<()> {
            Ok(())
        }

        async fn trigger_workflow(&self, _workflow: &str, _branch: &str) -> Result<()> {
            match &self.trigger_error {
                Some(msg) => anyhow::bail!("{}", msg),
                None => Ok(()),
            }
        }

        async fn list_runs(&self, _workflow: &str, _branch: &str, _limit: u32) -> Result<Vec<WorkflowRun>> {
            let next = self.listings.lock().unwrap().pop_front();
            match next {
                Some(Ok(runs)) => Ok(runs),
                Some(Err(msg)) => anyhow::bail!("{}", msg),
                None => Ok(vec![]),
            }
        }

        async fn get_run(&self, run_id: u64) -> Result<WorkflowRun> {
            if self.hang_polls {
                std::future::pending::<()>().await;
            }
            let next = self.polls.lock().unwrap().pop_front();
            match next {
                Some(Ok(run)) => Ok(run),
                Some(Err(msg)) => anyhow::bail!("{}", msg),
                None => Ok(run(run_id, "", "in_progress", None)),
            }
        }

        async fn download_artifact(&self, _run_id: u64, _name: &str, dest: &Path) -> Result<()> {
            *self.downloads.lock().unwrap() += 1;
            match &self.artifact {
                Some(body) => {
                    std::fs::write(dest.join("deploy.json"), body)?;
                    Ok(())
                }
                None => anyhow::bail!("no artifact named deploy-metadata"),
            }
        }
    }

    struct NoopVcs;

    #[async_trait]
    impl Vcs for NoopVcs {
        async fn dirty_paths(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn head_revision(&self) -> Result<Option<String>> {
            Ok(Some("head0".into()))
        }
        async fn current_branch(&self) -> Result<String> {
            Ok("main".into())
        }
        async fn commit_paths(&self, _paths: &[PathBuf], _message: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn push(&self, branch: &str) -> Result<()> {
            if branch == "protected" {
                anyhow::bail!("remote rejected")
            }
            Ok(())
        }
    }

    fn fast_policy() -> PollingPolicy {
        PollingPolicy {
            discovery_attempts: 3,
            discovery_delay: Duration::from_millis(1),
            poll_interval: Duration::from_millis(1),
            poll_timeout: Duration::from_millis(200),
            artifact_attempts: 2,
            artifact_delay: Duration::from_millis(1),
        }
    }

    fn driver(ci: ScriptedCi) -> (DeployDriver, Arc<ScriptedCi>) {
        let ci = Arc::new(ci);
        let driver = DeployDriver::new(Arc::new(NoopVcs), ci.clone(), fast_policy(), "deploy-metadata");
        (driver, ci)
    }

    fn request() -> DeployRequest {
        DeployRequest {
            workflow: "shop-acme.yml".into(),
            branch: "main".into(),
            expected_sha: Some("abc123".into()),
            target: DeployTargetKind::CloudflarePages,
            project_name: "shop-acme".into(),
        }
    }

    #[tokio::test]
    async fn test_success_with_exact_match_and_artifact() {
        let ci = ScriptedCi {
            listings: Mutex::new(VecDeque::from([
                Ok(vec![]),
                Ok(vec![run(7, "abc123", "queued", None), run(6, "old", "completed", Some("success"))]),
            ])),
            polls: Mutex::new(VecDeque::from([
                Ok(run(7, "abc123", "in_progress", None)),
                Ok(run(7, "abc123", "completed", Some("success"))),
            ])),
            artifact: Some(r#"{"deployUrl":"https://abc.shop-acme.pages.dev"}"#.into()),
            ..Default::default()
        };
        let (driver, _) = driver(ci);
        let outcome = driver.trigger_and_wait(&request()).await.unwrap();
        assert_eq!(outcome.run_id, 7);
        assert!(outcome.exact_match);
        assert_eq!(outcome.deploy_url.as_deref(), Some("https://abc.shop-acme.pages.dev"));
        assert!(outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_falls_back_to_latest_run_with_warning() {
        let ci = ScriptedCi {
            listings: Mutex::new(VecDeque::from([Ok(vec![run(9, "other", "queued", None)])])),
            polls: Mutex::new(VecDeque::from([Ok(run(9, "other", "completed", Some("success")))])),
            artifact: Some(r#"{"deployUrl":"https://shop-acme.pages.dev"}"#.into()),
            ..Default::default()
        };
        let (driver, _) = driver(ci);
        let outcome = driver.trigger_and_wait(&request()).await.unwrap();
        assert_eq!(outcome.run_id, 9);
        assert!(!outcome.exact_match);
        assert!(outcome.warnings[0].contains("most recent run 9"));
    }

    #[tokio::test]
    async fn test_fallback_prefers_run_created_after_trigger() {
        let fresh = WorkflowRun {
            created_at: Some(Utc::now() + chrono::Duration::minutes(1)),
            ..run(12, "other", "queued", None)
        };
        let stale = WorkflowRun {
            created_at: Some(Utc::now() - chrono::Duration::hours(1)),
            ..run(11, "older", "completed", Some("success"))
        };
        let ci = ScriptedCi {
            listings: Mutex::new(VecDeque::from([Ok(vec![fresh]), Ok(vec![stale]), Ok(vec![])])),
            polls: Mutex::new(VecDeque::from([Ok(run(12, "other", "completed", Some("success")))])),
            ..Default::default()
        };
        let (driver, _) = driver(ci);
        let outcome = driver.trigger_and_wait(&request()).await.unwrap();
        assert_eq!(outcome.run_id, 12);
        assert!(!outcome.exact_match);
    }

    #[tokio::test]
    async fn test_no_run_is_not_recoverable() {
        let ci = ScriptedCi {
            listings: Mutex::new(VecDeque::from([Err("HTTP 502".to_string())])),
            ..Default::default()
        };
        let (driver, _) = driver(ci);
        let err = driver.trigger_and_wait(&request()).await.unwrap_err();
        assert!(matches!(err, DeployError::RunNotFound { attempts: 3, .. }));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_trigger_failure_is_recoverable() {
        let ci = ScriptedCi {
            trigger_error: Some("workflow not found on default branch".into()),
            ..Default::default()
        };
        let (driver, _) = driver(ci);
        let err = driver.trigger_and_wait(&request()).await.unwrap_err();
        assert!(matches!(err, DeployError::Trigger { .. }));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_bad_conclusion_is_run_failed() {
        let ci = ScriptedCi {
            listings: Mutex::new(VecDeque::from([Ok(vec![run(3, "abc123", "queued", None)])])),
            polls: Mutex::new(VecDeque::from([Ok(run(3, "abc123", "completed", Some("failure")))])),
            ..Default::default()
        };
        let (driver, _) = driver(ci);
        let err = driver.trigger_and_wait(&request()).await.unwrap_err();
        assert!(matches!(err, DeployError::RunFailed { ref conclusion, .. } if conclusion == "failure"));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_poll_ceiling_is_timeout_not_failure() {
        let ci = ScriptedCi {
            listings: Mutex::new(VecDeque::from([Ok(vec![run(4, "abc123", "queued", None)])])),
            ..Default::default()
        };
        let (driver, _) = driver(ci);
        let err = driver.trigger_and_wait(&request()).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_hung_status_call_gives_up_at_poll_ceiling() {
        let ci = ScriptedCi {
            listings: Mutex::new(VecDeque::from([Ok(vec![run(4, "abc123", "queued", None)])])),
            hang_polls: true,
            ..Default::default()
        };
        let (driver, _) = driver(ci);
        let started = std::time::Instant::now();
        let err = driver.trigger_and_wait(&request()).await.unwrap_err();
        assert!(matches!(err, DeployError::TimedOut { run_id: 4, .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_transport_error_mid_poll_is_recoverable() {
        let ci = ScriptedCi {
            listings: Mutex::new(VecDeque::from([Ok(vec![run(5, "abc123", "queued", None)])])),
            polls: Mutex::new(VecDeque::from([
                Ok(run(5, "abc123", "in_progress", None)),
                Err("connection reset by peer".to_string()),
            ])),
            ..Default::default()
        };
        let (driver, _) = driver(ci);
        let err = driver.trigger_and_wait(&request()).await.unwrap_err();
        assert!(matches!(err, DeployError::PollFailed { run_id: 5, .. }));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_missing_artifact_uses_fallback_url() {
        let ci = ScriptedCi {
            listings: Mutex::new(VecDeque::from([Ok(vec![run(8, "abc123", "queued", None)])])),
            polls: Mutex::new(VecDeque::from([Ok(run(8, "abc123", "completed", Some("success")))])),
            ..Default::default()
        };
        let (driver, ci) = driver(ci);
        let outcome = driver.trigger_and_wait(&request()).await.unwrap();
        assert_eq!(outcome.deploy_url.as_deref(), Some("https://shop-acme.pages.dev"));
        assert!(outcome.warnings.iter().any(|w| w.contains("fallback URL")));
        assert_eq!(*ci.downloads.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_push_failure_is_push_error() {
        let (driver, _) = driver(ScriptedCi::default());
        let outcome = driver.commit_and_push(&[], "launch", "main").await.unwrap();
        assert_eq!(outcome.revision.as_deref(), Some("head0"));
        assert!(!outcome.committed);

        let err = driver.commit_and_push(&[], "launch", "protected").await.unwrap_err();
        assert!(matches!(err, DeployError::Push { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_fallback_urls() {
        assert_eq!(
            fallback_deploy_url(DeployTargetKind::Vercel, "acme").as_deref(),
            Some("https://acme.vercel.app")
        );
        assert_eq!(fallback_deploy_url(DeployTargetKind::Local, "acme"), None);
    }
}
