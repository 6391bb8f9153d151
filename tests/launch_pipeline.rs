//! End-to-end launch scenarios against in-memory collaborators.
//!
//! Each test builds an [`Orchestrator`] over a temporary project directory with
//! fake git, CI, inventory and step services, and checks what was executed and
//! what ended up on disk.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use shoplaunch::config::{LaunchMode, SmokeCheck};
use shoplaunch::gates::{E2eRunner, E2eTestResult, InventoryStore};
use shoplaunch::gates::runtime::RoutingRow;
use shoplaunch::orchestrator::{LaunchOptions, LaunchServices, Orchestrator};
use shoplaunch::platform::{CiPlatform, SecretLister, Vcs, WorkflowRun};
use shoplaunch::secrets::ResolvedSecrets;
use shoplaunch::settings::LaunchSettings;
use shoplaunch::state::{CheckpointStore, LaunchStatus, LaunchStep, StepStatus};
use shoplaunch::steps::{
    CiSetup, ScaffoldRequest, Scaffolder, SmokeCheckResult, SmokeRunner, WebhookOutcome,
    WebhookRegistrar,
};

const SHA: &str = "abc123def456";
const DEPLOY_URL: &str = "https://shop-acme.pages.dev";
const RUN_URL: &str = "https://github.com/acme/shops/actions/runs/42";

// =============================================================================
// Fakes
// =============================================================================

/// Ordered record of side-effecting calls across every fake.
#[derive(Clone, Default)]
struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn push(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

struct FakeVcs {
    log: CallLog,
}

#[async_trait]
impl Vcs for FakeVcs {
    async fn dirty_paths(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn head_revision(&self) -> Result<Option<String>> {
        Ok(Some(SHA.to_string()))
    }

    async fn current_branch(&self) -> Result<String> {
        Ok("feature/acme".to_string())
    }

    async fn commit_paths(&self, _paths: &[PathBuf], _message: &str) -> Result<Option<String>> {
        self.log.push("commit");
        Ok(Some(SHA.to_string()))
    }

    async fn push(&self, branch: &str) -> Result<()> {
        self.log.push(format!("push {}", branch));
        Ok(())
    }
}

struct FakeCi {
    log: CallLog,
    /// Responses for `get_run`; a completed successful run once exhausted.
    polls: Mutex<VecDeque<Result<WorkflowRun, String>>>,
}

impl FakeCi {
    fn new(log: CallLog) -> Self {
        Self {
            log,
            polls: Mutex::new(VecDeque::new()),
        }
    }

    fn script(&self, responses: Vec<Result<WorkflowRun, String>>) {
        *self.polls.lock().unwrap() = responses.into();
    }
}

fn run(status: &str, conclusion: Option<&str>) -> WorkflowRun {
    WorkflowRun {
        id: 42,
        head_sha: SHA.to_string(),
        status: status.to_string(),
        conclusion: conclusion.map(str::to_string),
        url: RUN_URL.to_string(),
        created_at: Some(Utc::now()),
    }
}

#[async_trait]
impl CiPlatform for FakeCi {
    async fn check_auth(&self) -> Result<()> {
        Ok(())
    }

    async fn trigger_workflow(&self, workflow: &str, branch: &str) -> Result<()> {
        self.log.push(format!("trigger {} {}", workflow, branch));
        Ok(())
    }

    async fn list_runs(&self, _workflow: &str, _branch: &str, _limit: u32) -> Result<Vec<WorkflowRun>> {
        Ok(vec![run("queued", None)])
    }

    async fn get_run(&self, _run_id: u64) -> Result<WorkflowRun> {
        self.log.push("poll");
        match self.polls.lock().unwrap().pop_front() {
            Some(Ok(run)) => Ok(run),
            Some(Err(msg)) => anyhow::bail!("{}", msg),
            None => Ok(run("completed", Some("success"))),
        }
    }

    async fn download_artifact(&self, _run_id: u64, _name: &str, dest: &Path) -> Result<()> {
        std::fs::write(
            dest.join("deploy.json"),
            json!({"shopId": "acme", "deployUrl": DEPLOY_URL, "sha": SHA}).to_string(),
        )?;
        Ok(())
    }
}

struct FakeSecretLister;

#[async_trait]
impl SecretLister for FakeSecretLister {
    async fn list_secret_names(&self) -> Result<Vec<String>> {
        Ok(vec![
            "CLOUDFLARE_API_TOKEN".to_string(),
            "CLOUDFLARE_ACCOUNT_ID".to_string(),
        ])
    }
}

struct EmptyInventory;

#[async_trait]
impl InventoryStore for EmptyInventory {
    async fn central_item_count(&self) -> Result<u64> {
        Ok(0)
    }

    async fn routings_for_shop(&self, _shop_id: &str) -> Result<Vec<RoutingRow>> {
        Ok(Vec::new())
    }

    async fn shop_inventory_count(&self, _shop_id: &str) -> Result<u64> {
        Ok(0)
    }
}

/// Inventory with stock routed to every shop.
struct StockedInventory;

#[async_trait]
impl InventoryStore for StockedInventory {
    async fn central_item_count(&self) -> Result<u64> {
        Ok(25)
    }

    async fn routings_for_shop(&self, _shop_id: &str) -> Result<Vec<RoutingRow>> {
        Ok(vec![RoutingRow {
            sku: Some("ACME-TEE-M".to_string()),
            quantity: Some(5),
        }])
    }

    async fn shop_inventory_count(&self, _shop_id: &str) -> Result<u64> {
        Ok(5)
    }
}

/// Passing checkout suite that records each run.
struct PassingE2e {
    log: CallLog,
}

#[async_trait]
impl E2eRunner for PassingE2e {
    async fn run(&self, _shop_id: &str, base_url: &str) -> Result<E2eTestResult> {
        self.log.push(format!("e2e {}", base_url));
        Ok(E2eTestResult {
            passed: true,
            timestamp: Utc::now(),
            total_tests: 3,
            passed_count: 3,
            failed_count: 0,
            failures: Vec::new(),
        })
    }
}

struct UnusedE2e;

#[async_trait]
impl E2eRunner for UnusedE2e {
    async fn run(&self, _shop_id: &str, _base_url: &str) -> Result<E2eTestResult> {
        anyhow::bail!("e2e suite should not run in these scenarios")
    }
}

struct FakeScaffolder {
    log: CallLog,
}

#[async_trait]
impl Scaffolder for FakeScaffolder {
    async fn scaffold(&self, request: &ScaffoldRequest<'_>) -> Result<Vec<PathBuf>> {
        self.log.push("scaffold");
        Ok(vec![request.app_dir.to_path_buf()])
    }
}

struct FakeCiSetup {
    log: CallLog,
}

#[async_trait]
impl CiSetup for FakeCiSetup {
    async fn setup(&self, config: &shoplaunch::config::LaunchConfig) -> Result<PathBuf> {
        self.log.push("ci-setup");
        Ok(PathBuf::from(format!(".github/workflows/shop-{}.yml", config.shop_id)))
    }
}

struct FakeWebhook {
    log: CallLog,
    fail: bool,
}

#[async_trait]
impl WebhookRegistrar for FakeWebhook {
    async fn register(
        &self,
        _shop_id: &str,
        deploy_url: Option<&str>,
        _secrets: &ResolvedSecrets,
    ) -> Result<WebhookOutcome> {
        self.log.push("webhook");
        if self.fail {
            anyhow::bail!("Stripe rejected the endpoint");
        }
        Ok(match deploy_url {
            Some(_) => WebhookOutcome::Registered,
            None => WebhookOutcome::Skipped("no deploy URL".to_string()),
        })
    }
}

struct FakeSmoke {
    log: CallLog,
    failing_status: Option<u16>,
}

#[async_trait]
impl SmokeRunner for FakeSmoke {
    async fn wait_until_reachable(&self, _base_url: &str) -> bool {
        true
    }

    async fn run_checks(&self, base_url: &str, checks: &[SmokeCheck]) -> Vec<SmokeCheckResult> {
        self.log.push("smoke");
        checks
            .iter()
            .map(|check| {
                let status = self.failing_status.unwrap_or(check.expected_status);
                let passed = status == check.expected_status;
                SmokeCheckResult {
                    endpoint: check.endpoint.clone(),
                    url: format!("{}{}", base_url, check.endpoint),
                    expected_status: check.expected_status,
                    status: Some(status),
                    passed,
                    error: (!passed)
                        .then(|| format!("expected {}, got {}", check.expected_status, status)),
                    duration_ms: 3,
                }
            })
            .collect()
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    dir: TempDir,
    log: CallLog,
    ci: Arc<FakeCi>,
    webhook_fails: bool,
    smoke_status: Option<u16>,
    /// Stocked inventory and a passing e2e suite instead of the empty defaults.
    go_live_ready: bool,
}

impl Harness {
    fn new() -> Self {
        let log = CallLog::default();
        Self {
            dir: TempDir::new().unwrap(),
            ci: Arc::new(FakeCi::new(log.clone())),
            log,
            webhook_fails: false,
            smoke_status: None,
            go_live_ready: false,
        }
    }

    fn settings(&self) -> LaunchSettings {
        let mut settings = LaunchSettings::with_defaults(self.dir.path().to_path_buf());
        let polling = &mut settings.toml.polling;
        polling.discovery_attempts = 1;
        polling.discovery_delay_secs = 0;
        polling.poll_interval_secs = 0;
        polling.poll_timeout_secs = 5;
        polling.artifact_attempts = 1;
        polling.artifact_delay_secs = 0;
        settings
    }

    fn orchestrator(&self) -> Orchestrator {
        let inventory: Arc<dyn InventoryStore> = if self.go_live_ready {
            Arc::new(StockedInventory)
        } else {
            Arc::new(EmptyInventory)
        };
        let e2e_runner: Arc<dyn E2eRunner> = if self.go_live_ready {
            Arc::new(PassingE2e { log: self.log.clone() })
        } else {
            Arc::new(UnusedE2e)
        };
        let services = LaunchServices {
            vcs: Arc::new(FakeVcs { log: self.log.clone() }),
            ci: self.ci.clone(),
            secret_lister: Arc::new(FakeSecretLister),
            inventory,
            e2e_runner,
            scaffolder: Arc::new(FakeScaffolder { log: self.log.clone() }),
            ci_setup: Arc::new(FakeCiSetup { log: self.log.clone() }),
            webhook: Arc::new(FakeWebhook {
                log: self.log.clone(),
                fail: self.webhook_fails,
            }),
            smoke: Arc::new(FakeSmoke {
                log: self.log.clone(),
                failing_status: self.smoke_status,
            }),
            locate_tool: |_| Some(PathBuf::from("/usr/bin/true")),
        };
        Orchestrator::new(self.settings(), services)
    }

    fn store(&self) -> CheckpointStore {
        CheckpointStore::new(self.settings().state_dir())
    }

    fn write_config(&self, config: serde_json::Value) -> PathBuf {
        let path = self.dir.path().join("launch.json");
        std::fs::write(&path, serde_json::to_vec_pretty(&config).unwrap()).unwrap();
        path
    }

    fn preview_options(&self) -> LaunchOptions {
        let path = self.write_config(json!({
            "schemaVersion": 1,
            "shopId": "acme",
            "deployTarget": {"type": "cloudflare-pages"}
        }));
        LaunchOptions::new(path, LaunchMode::Preview)
    }

    fn production_options(&self) -> LaunchOptions {
        let signed_at = (Utc::now() - Duration::days(1)).to_rfc3339();
        let path = self.write_config(json!({
            "schemaVersion": 1,
            "shopId": "acme",
            "deployTarget": {"type": "cloudflare-pages"},
            "legalPages": {"terms": "terms-v1", "privacy": "privacy-v1", "returns": "returns-v1"},
            "complianceSignOff": {
                "signedOffBy": "Dana Reviewer",
                "signedOffAt": signed_at,
                "approved": true,
                "directorApprovedTemplates": true
            }
        }));
        LaunchOptions::new(path, LaunchMode::Production)
    }

    /// Shop data and CMS checklist that satisfy every file-based gate.
    fn seed_go_live_files(&self) {
        let shop_dir = self.dir.path().join("data/shops/acme");
        std::fs::create_dir_all(shop_dir.join("pages")).unwrap();
        std::fs::write(
            shop_dir.join("shop.json"),
            json!({
                "inventoryHoldTtlMinutes": 20,
                "blockOutOfStock": true,
                "payment": ["stripe"],
                "logo": "/brand/logo.svg",
                "favicon": "/brand/favicon.ico",
                "seo": {"title": "Acme", "description": "Acme goods"}
            })
            .to_string(),
        )
        .unwrap();
        for slug in ["home", "shop", "product", "checkout"] {
            std::fs::write(
                shop_dir.join("pages").join(format!("{}.json", slug)),
                json!({"templateId": format!("tpl-{}", slug), "status": "published"}).to_string(),
            )
            .unwrap();
        }
        let cms_dir = self.dir.path().join("data/cms");
        std::fs::create_dir_all(&cms_dir).unwrap();
        std::fs::write(
            cms_dir.join("launch-gate.json"),
            json!({"acme": {"qaAck": true, "stageTestsStatus": "passed"}}).to_string(),
        )
        .unwrap();
    }

    fn files_under(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let mut stack = vec![self.dir.path().to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir).unwrap().flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    out.push(path);
                }
            }
        }
        out.sort();
        out
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn scenario_a_empty_inventory_blocks_production_before_scaffold() {
    let h = Harness::new();
    let mut options = h.production_options();
    options.skip_e2e = true;

    let result = h.orchestrator().launch(&options).await;

    assert!(!result.success);
    assert!(
        result.errors.iter().any(|e| e.contains("inventory is empty")),
        "errors: {:?}",
        result.errors
    );
    assert_eq!(h.log.count("scaffold"), 0);
    assert_eq!(h.log.count("commit"), 0);

    let checkpoint = h.store().read("acme").unwrap().unwrap();
    assert_eq!(checkpoint.status, LaunchStatus::Failed);
    assert_eq!(checkpoint.failed_step, Some(LaunchStep::GoLiveGates));
    let gates = checkpoint.go_live_gates.expect("gate results recorded");
    assert!(!gates.all_passed);
}

#[tokio::test]
async fn scenario_b_preview_launch_completes_with_report() {
    let h = Harness::new();
    let options = h.preview_options();

    let result = h.orchestrator().launch(&options).await;

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.status, Some(LaunchStatus::Completed));
    assert_eq!(result.deploy_url.as_deref(), Some(DEPLOY_URL));
    assert_eq!(result.workflow_run_url.as_deref(), Some(RUN_URL));
    assert!(h.log.calls().contains(&"push feature/acme".to_string()));
    assert!(h.log.calls().contains(&"trigger shop-acme.yml feature/acme".to_string()));

    let report_path = result.report_path.expect("report written");
    assert!(report_path.starts_with(h.dir.path().join("data/shops/acme/launches")));
    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report["deployUrl"], DEPLOY_URL);
    assert_eq!(report["workflowRunUrl"], RUN_URL);
    assert_eq!(report["gitRef"], SHA);
    assert_eq!(report["secretSource"], "none");
    assert!(h.dir.path().join("data/shops/acme/launches/latest.json").exists());

    // Completed launches leave the active slot and land in the archive.
    let store = h.store();
    assert!(store.read("acme").unwrap().is_none());
    let history = store.list_recent("acme").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, LaunchStatus::Completed);
}

#[tokio::test]
async fn scenario_c_poll_failure_resumes_at_deploy_only() {
    let h = Harness::new();
    let options = h.preview_options();
    h.ci.script(vec![Err("connection reset by peer".to_string())]);

    let first = h.orchestrator().launch(&options).await;
    assert!(!first.success);
    let failed = h.store().read("acme").unwrap().unwrap();
    assert_eq!(failed.status, LaunchStatus::Failed);
    assert_eq!(failed.failed_step, Some(LaunchStep::Deploy));
    assert!(failed.failed_recoverable);
    assert_eq!(h.log.count("scaffold"), 1);

    h.log.clear();
    let mut resume = options.clone();
    resume.resume = true;
    let second = h.orchestrator().launch(&resume).await;

    assert!(second.success, "errors: {:?}", second.errors);
    assert!(second.resumed);
    assert_eq!(second.launch_id, first.launch_id);
    let calls = h.log.calls();
    assert!(!calls.iter().any(|c| c == "scaffold" || c == "ci-setup" || c == "commit"));
    assert!(calls.iter().any(|c| c.starts_with("trigger")));

    let archived = &h.store().list_recent("acme").unwrap()[0];
    assert_eq!(archived.resume_count, 1);
    let deploy_attempts: Vec<_> = archived
        .completed_steps
        .iter()
        .filter(|r| r.name == LaunchStep::Deploy)
        .map(|r| r.status)
        .collect();
    assert_eq!(deploy_attempts, vec![StepStatus::Failed, StepStatus::Success]);
    assert_eq!(
        archived
            .completed_steps
            .iter()
            .filter(|r| r.name == LaunchStep::Scaffold)
            .count(),
        1
    );
}

#[tokio::test]
async fn scenario_d_smoke_failures_are_warnings() {
    let mut h = Harness::new();
    h.smoke_status = Some(503);
    h.webhook_fails = true;
    let options = h.preview_options();

    let result = h.orchestrator().launch(&options).await;

    assert!(result.success, "errors: {:?}", result.errors);
    assert!(result.errors.is_empty());
    assert!(
        result
            .warnings
            .iter()
            .any(|w| w.contains("Smoke test failures") && w.contains("expected 200, got 503")),
        "warnings: {:?}",
        result.warnings
    );
    assert!(result.warnings.iter().any(|w| w.contains("Stripe rejected the endpoint")));

    let report: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(result.report_path.unwrap()).unwrap(),
    )
    .unwrap();
    assert_eq!(report["smokeChecks"][0]["passed"], false);
    let smoke_step = report["steps"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["name"] == "smoke")
        .unwrap();
    assert_eq!(smoke_step["status"], "failed");
}

#[tokio::test]
async fn scenario_e_validate_changes_nothing() {
    let h = Harness::new();
    let mut options = h.preview_options();
    options.validate = true;
    let before = h.files_under();

    let result = h.orchestrator().launch(&options).await;

    assert!(result.success, "errors: {:?}", result.errors);
    let plan = result.plan.expect("execution plan");
    assert!(plan.steps.iter().any(|s| s.step == LaunchStep::Deploy));
    assert_eq!(h.files_under(), before);
    assert!(!h.settings().state_dir().exists());
    assert!(h.log.calls().is_empty());
}

#[tokio::test]
async fn production_launch_runs_every_gate_and_deploys_main() {
    let mut h = Harness::new();
    h.go_live_ready = true;
    h.seed_go_live_files();
    let mut options = h.production_options();
    options.e2e_url = Some("https://stage.acme.test".to_string());

    let result = h.orchestrator().launch(&options).await;

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.status, Some(LaunchStatus::Completed));
    assert_eq!(h.log.count("e2e https://stage.acme.test"), 1);
    let calls = h.log.calls();
    assert!(calls.contains(&"push main".to_string()), "calls: {:?}", calls);
    assert!(calls.contains(&"trigger shop-acme.yml main".to_string()), "calls: {:?}", calls);

    let report: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(result.report_path.expect("report written")).unwrap(),
    )
    .unwrap();
    assert_eq!(report["mode"], "production");
    assert_eq!(report["goLiveGates"]["allPassed"], true);
    assert_eq!(report["goLiveGates"]["gates"].as_array().unwrap().len(), 6);
    assert_eq!(report["deployUrl"], DEPLOY_URL);
}

#[tokio::test]
async fn production_dry_run_does_not_count_as_passed_gates() {
    let mut h = Harness::new();
    h.go_live_ready = true;
    h.seed_go_live_files();
    let mut options = h.production_options();
    options.dry_run = true;

    let dry = h.orchestrator().launch(&options).await;
    assert!(dry.success, "errors: {:?}", dry.errors);
    assert_eq!(h.log.count("e2e https://stage.acme.test"), 0);
    let checkpoint = h.store().read("acme").unwrap().unwrap();
    assert!(!checkpoint.should_skip_step(LaunchStep::GoLiveGates));

    // Without e2e results the resumed launch stops at the gates.
    let mut resume = options.clone();
    resume.dry_run = false;
    resume.resume = true;
    let blocked = h.orchestrator().launch(&resume).await;
    assert!(!blocked.success);
    assert!(
        blocked.errors.iter().any(|e| e.contains("E2E checkout test results not found")),
        "errors: {:?}",
        blocked.errors
    );
    assert!(!h.log.calls().iter().any(|c| c.starts_with("trigger") || c == "commit"));

    resume.e2e_url = Some("https://stage.acme.test".to_string());
    let result = h.orchestrator().launch(&resume).await;
    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.launch_id, dry.launch_id);
    assert_eq!(h.log.count("e2e https://stage.acme.test"), 1);
    assert_eq!(h.log.count("scaffold"), 1);
    assert!(h.log.calls().contains(&"trigger shop-acme.yml main".to_string()));
}

#[tokio::test]
async fn production_validate_with_e2e_url_writes_nothing() {
    let mut h = Harness::new();
    h.go_live_ready = true;
    h.seed_go_live_files();
    let mut options = h.production_options();
    options.validate = true;
    options.e2e_url = Some("https://stage.acme.test".to_string());
    let before = h.files_under();

    let result = h.orchestrator().launch(&options).await;

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(h.log.count("e2e https://stage.acme.test"), 1);
    assert_eq!(h.files_under(), before);
    assert!(!h.settings().state_dir().exists());
}

// =============================================================================
// Existing state
// =============================================================================

#[tokio::test]
async fn failed_launch_requires_resume_or_fresh() {
    let h = Harness::new();
    let options = h.preview_options();
    h.ci.script(vec![Err("connection reset".to_string())]);
    let first = h.orchestrator().launch(&options).await;
    assert!(!first.success);

    let blocked = h.orchestrator().launch(&options).await;
    assert!(!blocked.success);
    assert!(blocked.errors[0].contains("--resume"), "errors: {:?}", blocked.errors);
    assert_eq!(blocked.launch_id, first.launch_id);

    let mut fresh = options.clone();
    fresh.fresh = true;
    let restarted = h.orchestrator().launch(&fresh).await;
    assert!(restarted.success, "errors: {:?}", restarted.errors);
    assert_ne!(restarted.launch_id, first.launch_id);

    let history = h.store().list_recent("acme").unwrap();
    assert!(history.iter().any(|cp| cp.launch_id == first.launch_id && cp.status == LaunchStatus::Cancelled));
}

#[tokio::test]
async fn changed_config_refuses_resume() {
    let h = Harness::new();
    let options = h.preview_options();
    h.ci.script(vec![Err("connection reset".to_string())]);
    assert!(!h.orchestrator().launch(&options).await.success);

    h.write_config(json!({
        "schemaVersion": 1,
        "shopId": "acme",
        "name": "Acme Outlet",
        "deployTarget": {"type": "cloudflare-pages"}
    }));
    let mut resume = options.clone();
    resume.resume = true;
    let result = h.orchestrator().launch(&resume).await;

    assert!(!result.success);
    assert!(result.errors[0].contains("configuration has changed"), "errors: {:?}", result.errors);
}

#[tokio::test]
async fn dry_run_then_resume_deploys_without_rescaffolding() {
    let h = Harness::new();
    let mut options = h.preview_options();
    options.dry_run = true;

    let dry = h.orchestrator().launch(&options).await;
    assert!(dry.success, "errors: {:?}", dry.errors);
    assert_eq!(dry.status, Some(LaunchStatus::Running));
    assert_eq!(h.log.count("ci-setup"), 1);
    assert_eq!(h.log.count("commit"), 0);

    h.log.clear();
    let mut resume = options.clone();
    resume.dry_run = false;
    resume.resume = true;
    let result = h.orchestrator().launch(&resume).await;

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.launch_id, dry.launch_id);
    assert_eq!(h.log.count("scaffold"), 0);
    assert_eq!(h.log.count("commit"), 1);
}

#[tokio::test]
async fn timed_out_deploy_is_not_resumable() {
    let h = Harness::new();
    let mut settings_override = h.settings();
    settings_override.toml.polling.poll_timeout_secs = 0;
    let options = h.preview_options();
    h.ci.script(vec![Ok(run("in_progress", None))]);

    let services = LaunchServices {
        vcs: Arc::new(FakeVcs { log: h.log.clone() }),
        ci: h.ci.clone(),
        secret_lister: Arc::new(FakeSecretLister),
        inventory: Arc::new(EmptyInventory),
        e2e_runner: Arc::new(UnusedE2e),
        scaffolder: Arc::new(FakeScaffolder { log: h.log.clone() }),
        ci_setup: Arc::new(FakeCiSetup { log: h.log.clone() }),
        webhook: Arc::new(FakeWebhook { log: h.log.clone(), fail: false }),
        smoke: Arc::new(FakeSmoke { log: h.log.clone(), failing_status: None }),
        locate_tool: |_| Some(PathBuf::from("/usr/bin/true")),
    };
    let result = Orchestrator::new(settings_override, services).launch(&options).await;

    assert!(!result.success);
    assert!(result.errors[0].contains("Gave up waiting"), "errors: {:?}", result.errors);
    assert_eq!(result.workflow_run_url.as_deref(), Some(RUN_URL));
    let checkpoint = h.store().read("acme").unwrap().unwrap();
    assert!(!checkpoint.failed_recoverable);

    let mut resume = options.clone();
    resume.resume = true;
    let refused = h.orchestrator().launch(&resume).await;
    assert!(!refused.success);
    assert!(refused.errors[0].contains("--fresh"), "errors: {:?}", refused.errors);
}
