use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{LaunchOptions, LaunchResult, LaunchServices};
use crate::config::{self, LoadedConfig};
use crate::deploy::{DeployDriver, DeployRequest, PollingPolicy};
use crate::errors::{DeployError, LaunchError};
use crate::gates::{GateContext, GateEvaluator, format_gate_results};
use crate::preflight::{Preflight, PreflightOptions};
use crate::report::{LaunchReport, PlanContext, execution_plan, format_execution_plan, write_report};
use crate::secrets::{self, ResolvedSecrets};
use crate::settings::LaunchSettings;
use crate::state::{
    CheckpointStore, LaunchCheckpoint, LaunchStatus, LaunchStep, format_checkpoint_status,
    generate_launch_id,
};
use crate::steps::{ScaffoldRequest, WebhookOutcome};
use crate::ui::LaunchUI;

const STRIPE_WEBHOOK_SECRET: &str = "STRIPE_WEBHOOK_SECRET";

/// How a step ended when it did not fail.
enum StepOutcome {
    Done,
    Skipped(String),
}

/// Mutable state of one attempt.
struct Attempt<'a> {
    options: &'a LaunchOptions,
    loaded: &'a LoadedConfig,
    secrets: &'a ResolvedSecrets,
    checkpoint: LaunchCheckpoint,
    /// `false` for validation: nothing is written to the store.
    persist: bool,
    report_path: Option<PathBuf>,
}

/// Runs a launch end to end.
pub struct Orchestrator {
    settings: LaunchSettings,
    services: LaunchServices,
    store: CheckpointStore,
    ui: Option<Arc<LaunchUI>>,
}

impl Orchestrator {
    pub fn new(settings: LaunchSettings, services: LaunchServices) -> Self {
        let store = CheckpointStore::new(settings.state_dir());
        Self {
            settings,
            services,
            store,
            ui: None,
        }
    }

    pub fn with_ui(mut self, ui: Arc<LaunchUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Run (or resume) a launch. Never panics on step failure: every error and
    /// warning ends up in the returned result.
    pub async fn launch(&self, options: &LaunchOptions) -> LaunchResult {
        let loaded = match config::load_and_validate(&options.config_path) {
            Ok(loaded) => loaded,
            Err(e) => {
                let err = LaunchError::from(e);
                return LaunchResult::failure("", "", err.messages());
            }
        };
        let shop_id = loaded.config.shop_id.clone();

        let secrets = match secrets::resolve(
            &options.secret_source,
            &self.settings.project_dir,
            self.settings.command_timeout(),
        )
        .await
        {
            Ok(secrets) => secrets,
            Err(e) => {
                return LaunchResult::failure("", &shop_id, vec![format!("Secret resolution failed: {:#}", e)]);
            }
        };

        if options.validate {
            return self.validate(options, &loaded, &secrets).await;
        }

        let _lock = match self.store.lock(&shop_id) {
            Ok(lock) => lock,
            Err(e) => return LaunchResult::failure("", &shop_id, vec![e.to_string()]),
        };

        let mut notes = Vec::new();
        let (mut checkpoint, resumed) = match self.prepare_checkpoint(options, &loaded, &mut notes) {
            Ok(prepared) => prepared,
            Err(e) => return self.refused(&shop_id, e, notes),
        };
        for note in notes {
            self.warn_ui(&note);
            checkpoint.add_warning(note);
        }

        checkpoint.start();
        if let Err(e) = self.store.save(&mut checkpoint) {
            let mut result = LaunchResult::failure(&checkpoint.launch_id, &shop_id, vec![e.to_string()]);
            result.warnings = checkpoint.warnings.clone();
            return result;
        }

        let attempt = Attempt {
            options,
            loaded: &loaded,
            secrets: &secrets,
            checkpoint,
            persist: true,
            report_path: None,
        };
        let last = if options.dry_run {
            LaunchStep::CiSetup
        } else {
            LaunchStep::Report
        };
        let mut result = self.execute(attempt, last).await;
        result.resumed = resumed;
        result
    }

    /// Preflight and gates against an in-memory checkpoint, then print the plan.
    async fn validate(
        &self,
        options: &LaunchOptions,
        loaded: &LoadedConfig,
        secrets: &ResolvedSecrets,
    ) -> LaunchResult {
        let mut checkpoint = LaunchCheckpoint::new(
            generate_launch_id(),
            loaded.config.shop_id.clone(),
            loaded.fingerprint.clone(),
            options.mode,
        );
        checkpoint.start();
        let attempt = Attempt {
            options,
            loaded,
            secrets,
            checkpoint,
            persist: false,
            report_path: None,
        };

        let mut result = self.execute(attempt, LaunchStep::GoLiveGates).await;
        if !result.success {
            return result;
        }

        let branch = match self.deploy_branch(options).await {
            Ok(branch) => branch,
            Err(e) => {
                result.warnings.push(format!("Could not determine deploy branch: {}", e));
                "HEAD".to_string()
            }
        };
        let app_dir = self.settings.app_dir(&loaded.config.app_slug());
        let workflow = self.settings.workflow_for(&loaded.config.shop_id);
        let plan = execution_plan(
            &loaded.config,
            options.mode,
            &PlanContext {
                app_dir: &self.settings.relative(&app_dir),
                workflow: &workflow,
                branch: &branch,
            },
        );
        if let Some(ui) = &self.ui {
            ui.block(&format_execution_plan(&plan));
        }
        result.plan = Some(plan);
        result
    }

    /// Load, settle or discard existing state and return the checkpoint to run.
    fn prepare_checkpoint(
        &self,
        options: &LaunchOptions,
        loaded: &LoadedConfig,
        notes: &mut Vec<String>,
    ) -> Result<(LaunchCheckpoint, bool), LaunchError> {
        let shop_id = &loaded.config.shop_id;
        let fresh = || {
            self.store.create_checkpoint(
                generate_launch_id(),
                shop_id.clone(),
                loaded.fingerprint.clone(),
                options.mode,
            )
        };

        let existing = match self.store.read(shop_id) {
            Ok(existing) => existing,
            Err(e) => {
                warn!("Discarding unreadable launch state for {}: {}", shop_id, e);
                notes.push(format!("Ignored unreadable launch state: {}", e));
                None
            }
        };
        let Some(mut existing) = existing else {
            if options.resume {
                notes.push("No previous launch to resume; starting a new launch".to_string());
            }
            return Ok((fresh(), false));
        };

        // We hold the shop lock, so an active checkpoint belongs to a process that died.
        if existing.status.is_active() {
            existing.mark_interrupted();
            self.store.save(&mut existing)?;
            notes.push(format!(
                "Previous launch {} was interrupted during {}",
                existing.launch_id,
                existing
                    .failed_step
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "an unknown step".to_string())
            ));
        }

        if existing.status != LaunchStatus::Failed {
            self.store.archive(&existing)?;
            if options.resume {
                notes.push(format!(
                    "Previous launch {} is {}; starting a new launch",
                    existing.launch_id, existing.status
                ));
            }
            return Ok((fresh(), false));
        }

        if options.fresh {
            existing.mark_cancelled();
            self.store.archive(&existing)?;
            info!("Archived launch {} for a fresh start", existing.launch_id);
            notes.push(format!("Discarded previous launch {} (--fresh)", existing.launch_id));
            return Ok((fresh(), false));
        }

        let info = self.store.check_resumeability(
            shop_id,
            &loaded.fingerprint,
            options.mode,
            self.settings.max_state_age(),
        );
        if !info.can_resume {
            return Err(LaunchError::ExistingState {
                shop_id: shop_id.clone(),
                launch_id: existing.launch_id,
                detail: format!(
                    "it cannot be resumed ({}). Use --fresh to start over.",
                    info.reason.as_deref().unwrap_or("unknown reason")
                ),
            });
        }
        let from = info
            .resume_from_step
            .map(|s| s.to_string())
            .unwrap_or_else(|| "the next step".to_string());
        if !options.resume {
            return Err(LaunchError::ExistingState {
                shop_id: shop_id.clone(),
                launch_id: existing.launch_id,
                detail: format!("use --resume to continue from {} or --fresh to start over", from),
            });
        }

        let mut checkpoint = info.checkpoint.unwrap_or(existing);
        checkpoint.prepare_for_resume();
        info!(
            "Resuming launch {} from {} (attempt {})",
            checkpoint.launch_id, from, checkpoint.resume_count
        );
        Ok((checkpoint, true))
    }

    /// Result for a launch that refused to touch existing state.
    fn refused(&self, shop_id: &str, err: LaunchError, notes: Vec<String>) -> LaunchResult {
        let launch_id = match &err {
            LaunchError::ExistingState { launch_id, .. } => launch_id.clone(),
            _ => String::new(),
        };
        let existing = self.store.read(shop_id).ok().flatten();
        if let (Some(ui), Some(existing)) = (&self.ui, &existing) {
            ui.block(&format_checkpoint_status(existing));
        }
        let mut result = LaunchResult::failure(launch_id, shop_id, err.messages());
        result.status = existing.map(|cp| cp.status);
        result.warnings = notes;
        result
    }

    /// Walk the plan up to and including `last`.
    async fn execute(&self, mut attempt: Attempt<'_>, last: LaunchStep) -> LaunchResult {
        let started = Instant::now();
        let mode = attempt.options.mode;
        if let Some(ui) = &self.ui {
            ui.banner(
                &attempt.checkpoint.shop_id,
                &attempt.checkpoint.launch_id,
                &mode.to_string(),
                attempt.checkpoint.resume_count,
            );
        }

        for step in LaunchStep::plan(mode).into_iter().filter(|s| *s <= last) {
            if attempt.checkpoint.should_skip_step(step) {
                debug!("Skipping {}: already completed", step);
                if let Some(ui) = &self.ui {
                    ui.step_skipped(step, "already completed");
                }
                continue;
            }

            if let Some(ui) = &self.ui {
                ui.start_step(step);
            }
            let step_start = Instant::now();
            let outcome = self.run_step(step, &mut attempt).await;
            let duration_ms = step_start.elapsed().as_millis() as u64;

            match outcome {
                Ok(StepOutcome::Done) => {
                    attempt.checkpoint.mark_step_completed(step, duration_ms);
                    if let Some(ui) = &self.ui {
                        ui.step_succeeded(step, duration_ms);
                    }
                }
                Ok(StepOutcome::Skipped(reason)) => {
                    attempt.checkpoint.mark_step_skipped(step, &reason);
                    attempt.checkpoint.add_warning(&reason);
                    if let Some(ui) = &self.ui {
                        ui.step_skipped(step, &reason);
                    }
                }
                Err(e) if step.is_post_deploy() => {
                    let message = e.to_string();
                    warn!("{} failed after deploy: {}", step, message);
                    attempt.checkpoint.mark_step_failed(step, duration_ms, &message);
                    attempt.checkpoint.add_warning(&message);
                    if let Some(ui) = &self.ui {
                        ui.step_degraded(step, &message);
                    }
                }
                Err(e) => {
                    return self.fail(attempt, step, duration_ms, e, started);
                }
            }

            if attempt.persist
                && let Err(e) = self.store.save(&mut attempt.checkpoint)
            {
                warn!("Failed to save launch state after {}: {}", step, e);
                if let Some(ui) = &self.ui {
                    ui.finish(false, None, started.elapsed().as_millis() as u64);
                }
                return self.result(attempt, false, vec![LaunchError::from(e).to_string()]);
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if !attempt.persist {
            info!("Validation passed for {}", attempt.checkpoint.shop_id);
            if let Some(ui) = &self.ui {
                ui.finish(true, None, elapsed_ms);
            }
            return self.result(attempt, true, Vec::new());
        }

        if last < LaunchStep::Report {
            info!("Dry run stopped after {}", last);
            if let Some(ui) = &self.ui {
                ui.message("Dry run complete: nothing was committed, pushed or deployed.");
                ui.message("Run again with --resume to deploy, or --fresh to start over.");
                ui.finish(true, None, elapsed_ms);
            }
            return self.result(attempt, true, Vec::new());
        }

        attempt.checkpoint.mark_launch_completed();
        if let Err(e) = self.store.save(&mut attempt.checkpoint) {
            attempt.checkpoint.add_warning(format!("Failed to record completion: {}", e));
        }
        if let Err(e) = self.store.archive(&attempt.checkpoint) {
            warn!("Failed to archive launch {}: {}", attempt.checkpoint.launch_id, e);
            attempt.checkpoint.add_warning(format!("Failed to archive launch state: {}", e));
        }
        info!(
            "Launch {} for {} completed",
            attempt.checkpoint.launch_id, attempt.checkpoint.shop_id
        );
        if let Some(ui) = &self.ui {
            ui.finish(true, attempt.checkpoint.deploy_url.as_deref(), elapsed_ms);
        }
        self.result(attempt, true, Vec::new())
    }

    fn fail(
        &self,
        mut attempt: Attempt<'_>,
        step: LaunchStep,
        duration_ms: u64,
        err: LaunchError,
        started: Instant,
    ) -> LaunchResult {
        let message = err.to_string();
        warn!("Launch step {} failed: {}", step, message);
        if let Some(ui) = &self.ui {
            ui.step_failed(step, &message);
        }

        let mut errors = err.messages();
        attempt.checkpoint.mark_step_failed(step, duration_ms, &message);
        attempt
            .checkpoint
            .mark_launch_failed(step, &message, err.is_recoverable());
        if attempt.persist
            && let Err(e) = self.store.save(&mut attempt.checkpoint)
        {
            errors.push(format!("Failed to save launch state: {}", e));
        }

        if let Some(ui) = &self.ui {
            ui.finish(false, None, started.elapsed().as_millis() as u64);
        }
        self.result(attempt, false, errors)
    }

    fn result(&self, attempt: Attempt<'_>, success: bool, errors: Vec<String>) -> LaunchResult {
        let cp = attempt.checkpoint;
        LaunchResult {
            success,
            launch_id: cp.launch_id.clone(),
            shop_id: cp.shop_id.clone(),
            status: attempt.persist.then_some(cp.status),
            resumed: false,
            deploy_url: cp.deploy_url.clone(),
            workflow_run_url: cp.workflow_run_url.clone(),
            report_path: attempt.report_path,
            plan: None,
            errors,
            warnings: cp.warnings.clone(),
            checkpoint: Some(cp),
        }
    }

    fn warn_ui(&self, msg: &str) {
        if let Some(ui) = &self.ui {
            ui.warning(msg);
        }
    }

    async fn run_step(&self, step: LaunchStep, attempt: &mut Attempt<'_>) -> Result<StepOutcome, LaunchError> {
        match step {
            LaunchStep::Preflight => self.preflight(attempt).await,
            LaunchStep::GoLiveGates => self.gates(attempt).await,
            LaunchStep::Scaffold => self.scaffold(attempt).await,
            LaunchStep::CiSetup => {
                let path = self
                    .services
                    .ci_setup
                    .setup(&attempt.loaded.config)
                    .await
                    .map_err(|e| LaunchError::step(step, format!("{:#}", e)))?;
                debug!("Workflow ready at {}", path.display());
                Ok(StepOutcome::Done)
            }
            LaunchStep::Commit => self.commit(attempt).await,
            LaunchStep::Deploy => self.deploy(attempt).await,
            LaunchStep::Webhook => self.webhook(attempt).await,
            LaunchStep::Smoke => self.smoke(attempt).await,
            LaunchStep::Report => self.report(attempt),
        }
    }

    async fn preflight(&self, attempt: &mut Attempt<'_>) -> Result<StepOutcome, LaunchError> {
        let preflight = Preflight::new(
            self.services.vcs.clone(),
            self.services.ci.clone(),
            self.services.secret_lister.clone(),
            self.settings.clone(),
        )
        .with_tool_locator(self.services.locate_tool);

        let result = preflight
            .run(&PreflightOptions {
                config: &attempt.loaded.config,
                mode: attempt.options.mode,
                secrets: attempt.secrets,
                allow_dirty_git: attempt.options.allow_dirty_git,
                force: attempt.options.force,
                now: Utc::now(),
            })
            .await;

        for warning in &result.warnings {
            self.warn_ui(warning);
            attempt.checkpoint.add_warning(warning);
        }
        if !result.ok {
            return Err(LaunchError::Preflight { errors: result.errors });
        }
        Ok(StepOutcome::Done)
    }

    async fn gates(&self, attempt: &mut Attempt<'_>) -> Result<StepOutcome, LaunchError> {
        let evaluator = GateEvaluator::new(
            self.services.inventory.clone(),
            self.services.e2e_runner.clone(),
            &self.settings,
        );
        let stripe_webhook_secret = attempt.secrets.names().contains(&STRIPE_WEBHOOK_SECRET)
            || std::env::var_os(STRIPE_WEBHOOK_SECRET).is_some();

        let result = evaluator
            .run(&GateContext {
                config: &attempt.loaded.config,
                mode: attempt.options.mode,
                e2e: attempt.options.e2e_mode(),
                stripe_webhook_secret,
                record_e2e: attempt.persist,
                now: Utc::now(),
            })
            .await;

        if let Some(ui) = &self.ui {
            ui.block(&format_gate_results(&result));
        }
        for warning in &result.warnings {
            attempt.checkpoint.add_warning(warning);
        }
        let passed = result.all_passed;
        let errors = result.errors.clone();
        attempt.checkpoint.go_live_gates = Some(result);

        if !passed {
            return Err(LaunchError::Gates { errors });
        }
        // A dry run never executes the e2e suite, so its gates are not a go-live
        // verdict unless the operator opted out of e2e explicitly.
        if attempt.options.dry_run && !attempt.options.skip_e2e {
            return Ok(StepOutcome::Skipped(
                "Go-live gates passed without the E2E checkout test (dry run); they run again before deploy"
                    .to_string(),
            ));
        }
        Ok(StepOutcome::Done)
    }

    async fn scaffold(&self, attempt: &mut Attempt<'_>) -> Result<StepOutcome, LaunchError> {
        let config = &attempt.loaded.config;
        let app_dir = self.settings.app_dir(&config.app_slug());
        let paths = self
            .services
            .scaffolder
            .scaffold(&ScaffoldRequest {
                config,
                config_path: &attempt.loaded.path,
                app_dir: &app_dir,
                secrets: attempt.secrets,
                force: attempt.options.force,
            })
            .await
            .map_err(|e| LaunchError::step(LaunchStep::Scaffold, format!("{:#}", e)))?;
        debug!("Scaffolded {} path(s) for {}", paths.len(), config.shop_id);
        Ok(StepOutcome::Done)
    }

    async fn commit(&self, attempt: &mut Attempt<'_>) -> Result<StepOutcome, LaunchError> {
        let config = &attempt.loaded.config;
        let branch = self.deploy_branch(attempt.options).await?;
        let paths = vec![
            self.settings.relative(&self.settings.app_dir(&config.app_slug())),
            self.settings.relative(
                &self
                    .settings
                    .workflows_dir()
                    .join(self.settings.workflow_for(&config.shop_id)),
            ),
        ];
        let message = format!(
            "Launch shop {} ({})",
            config.shop_id, attempt.checkpoint.launch_id
        );

        let outcome = self.driver().commit_and_push(&paths, &message, &branch).await?;
        if !outcome.committed {
            info!("No changes to commit for {}; pushed existing HEAD", config.shop_id);
        }
        attempt.checkpoint.git_ref = outcome.revision;
        Ok(StepOutcome::Done)
    }

    async fn deploy(&self, attempt: &mut Attempt<'_>) -> Result<StepOutcome, LaunchError> {
        let config = &attempt.loaded.config;
        let branch = self.deploy_branch(attempt.options).await?;
        let expected_sha = match attempt.checkpoint.git_ref.clone() {
            Some(sha) => Some(sha),
            None => self
                .services
                .vcs
                .head_revision()
                .await
                .map_err(|e| LaunchError::step(LaunchStep::Deploy, format!("{:#}", e)))?,
        };

        let request = DeployRequest {
            workflow: self.settings.workflow_for(&config.shop_id),
            branch,
            expected_sha,
            target: config.deploy_target.kind,
            project_name: config.project_name(),
        };

        let outcome = match self.driver().trigger_and_wait(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let DeployError::TimedOut { run_id, run_url, .. } | DeployError::RunFailed { run_id, run_url, .. } = &e {
                    attempt.checkpoint.workflow_run_id = Some(*run_id);
                    attempt.checkpoint.workflow_run_url = Some(run_url.clone());
                }
                return Err(e.into());
            }
        };

        for warning in &outcome.warnings {
            self.warn_ui(warning);
            attempt.checkpoint.add_warning(warning);
        }
        attempt.checkpoint.workflow_run_id = Some(outcome.run_id);
        attempt.checkpoint.workflow_run_url = Some(outcome.run_url);
        attempt.checkpoint.deploy_url = outcome.deploy_url;
        if attempt.checkpoint.git_ref.is_none() {
            attempt.checkpoint.git_ref = Some(outcome.head_sha);
        }
        Ok(StepOutcome::Done)
    }

    async fn webhook(&self, attempt: &mut Attempt<'_>) -> Result<StepOutcome, LaunchError> {
        let outcome = self
            .services
            .webhook
            .register(
                &attempt.loaded.config.shop_id,
                attempt.checkpoint.deploy_url.as_deref(),
                attempt.secrets,
            )
            .await
            .map_err(|e| LaunchError::step(LaunchStep::Webhook, format!("{:#}", e)))?;
        Ok(match outcome {
            WebhookOutcome::Registered => StepOutcome::Done,
            WebhookOutcome::Skipped(reason) => StepOutcome::Skipped(reason),
        })
    }

    async fn smoke(&self, attempt: &mut Attempt<'_>) -> Result<StepOutcome, LaunchError> {
        let Some(base_url) = attempt.checkpoint.deploy_url.clone() else {
            return Ok(StepOutcome::Skipped(
                "Smoke tests skipped: no deploy URL available".to_string(),
            ));
        };

        if !self.services.smoke.wait_until_reachable(&base_url).await {
            return Err(LaunchError::step(
                LaunchStep::Smoke,
                format!("Deploy URL {} never became reachable", base_url),
            ));
        }

        let checks = attempt.loaded.config.effective_smoke_checks();
        let results = self.services.smoke.run_checks(&base_url, &checks).await;
        let failures: Vec<String> = results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| {
                format!(
                    "{}: {}",
                    r.endpoint,
                    r.error.as_deref().unwrap_or("check failed")
                )
            })
            .collect();
        attempt.checkpoint.smoke_checks = results;

        if !failures.is_empty() {
            return Err(LaunchError::step(
                LaunchStep::Smoke,
                format!("Smoke test failures: {}", failures.join("; ")),
            ));
        }
        Ok(StepOutcome::Done)
    }

    fn report(&self, attempt: &mut Attempt<'_>) -> Result<StepOutcome, LaunchError> {
        let report = LaunchReport::from_checkpoint(
            &attempt.checkpoint,
            &attempt.loaded.config,
            attempt.options.secret_source.kind(),
            Utc::now(),
        );
        let path = write_report(&self.settings.launches_dir(&attempt.checkpoint.shop_id), &report)
            .map_err(|e| LaunchError::step(LaunchStep::Report, format!("{:#}", e)))?;
        if let Some(ui) = &self.ui {
            ui.message(&format!("Report: {}", self.settings.relative(&path).display()));
        }
        attempt.report_path = Some(path);
        Ok(StepOutcome::Done)
    }

    fn driver(&self) -> DeployDriver {
        DeployDriver::new(
            self.services.vcs.clone(),
            self.services.ci.clone(),
            PollingPolicy::from_settings(&self.settings.toml.polling),
            self.settings.toml.ci.metadata_artifact.clone(),
        )
    }

    /// Production deploys from the configured branch; previews from the current one.
    async fn deploy_branch(&self, options: &LaunchOptions) -> Result<String, LaunchError> {
        if options.mode.is_production() {
            return Ok(self.settings.toml.ci.production_branch.clone());
        }
        self.services
            .vcs
            .current_branch()
            .await
            .map_err(|e| LaunchError::Other(e.context("Failed to determine current branch")))
    }
}
