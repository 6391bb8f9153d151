//! Preflight Validator.
//!
//! A flat battery of environment, configuration and credential checks. Every
//! check runs; findings are collected into one [`PreflightResult`] and the
//! caller decides what to do with them. Nothing here is persisted, so the
//! battery is re-run on every resume.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

use crate::config::{self, DeployTargetKind, LaunchConfig, LaunchMode};
use crate::platform::{CiPlatform, SecretLister, Vcs};
use crate::secrets::ResolvedSecrets;
use crate::settings::LaunchSettings;
use crate::util::find_executable;

/// Sign-offs older than this block a production launch.
pub const SIGN_OFF_MAX_AGE_DAYS: i64 = 30;

const CLOUDFLARE_MAX_NAME: usize = 63;
const VERCEL_MAX_NAME: usize = 100;

static PROJECT_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("static regex"));

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreflightResult {
    pub ok: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Inputs for one preflight run.
#[derive(Debug, Clone, Copy)]
pub struct PreflightOptions<'a> {
    pub config: &'a LaunchConfig,
    pub mode: LaunchMode,
    pub secrets: &'a ResolvedSecrets,
    pub allow_dirty_git: bool,
    pub force: bool,
    pub now: DateTime<Utc>,
}

#[derive(Default)]
struct Findings {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Findings {
    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }
}

pub struct Preflight {
    vcs: Arc<dyn Vcs>,
    ci: Arc<dyn CiPlatform>,
    secret_lister: Arc<dyn SecretLister>,
    settings: LaunchSettings,
    locate_tool: fn(&str) -> Option<PathBuf>,
}

impl Preflight {
    pub fn new(
        vcs: Arc<dyn Vcs>,
        ci: Arc<dyn CiPlatform>,
        secret_lister: Arc<dyn SecretLister>,
        settings: LaunchSettings,
    ) -> Self {
        Self {
            vcs,
            ci,
            secret_lister,
            settings,
            locate_tool: find_executable,
        }
    }

    /// Replace the `PATH` lookup used for the runtime check.
    pub fn with_tool_locator(mut self, locate: fn(&str) -> Option<PathBuf>) -> Self {
        self.locate_tool = locate;
        self
    }

    pub async fn run(&self, opts: &PreflightOptions<'_>) -> PreflightResult {
        let mut findings = Findings::default();

        self.check_tools(&mut findings);
        self.check_auth(&mut findings).await;
        self.check_working_tree(opts, &mut findings).await;
        check_schema(opts.config, &mut findings);
        self.check_theme_and_template(opts.config, &mut findings);
        self.check_collision(opts, &mut findings);
        check_placeholders(opts, &mut findings);
        self.check_required_secrets(opts.config, &mut findings).await;
        check_project_name(opts.config, &mut findings);
        if opts.mode.is_production() {
            check_sign_off(opts.config, opts.now, &mut findings);
            check_legal_pages(opts.config, &mut findings);
        } else if !opts.config.missing_legal_pages().is_empty() {
            findings.warn(format!(
                "Legal pages not mapped yet: {} (required for production)",
                opts.config.missing_legal_pages().join(", ")
            ));
        }

        info!(
            errors = findings.errors.len(),
            warnings = findings.warnings.len(),
            "Preflight complete"
        );
        PreflightResult {
            ok: findings.errors.is_empty(),
            errors: findings.errors,
            warnings: findings.warnings,
        }
    }

    fn check_tools(&self, findings: &mut Findings) {
        for tool in &self.settings.toml.ci.required_tools {
            match (self.locate_tool)(tool) {
                Some(path) => debug!(tool = %tool, path = %path.display(), "Found tool"),
                None => findings.error(format!(
                    "Runtime check failed: required tool '{}' not found on PATH",
                    tool
                )),
            }
        }
    }

    async fn check_auth(&self, findings: &mut Findings) {
        if let Err(e) = self.ci.check_auth().await {
            findings.error(format!("{:#}", e));
        }
    }

    async fn check_working_tree(&self, opts: &PreflightOptions<'_>, findings: &mut Findings) {
        match self.vcs.dirty_paths().await {
            Ok(paths) if paths.is_empty() => {}
            Ok(paths) => {
                let sample = paths.iter().take(5).cloned().collect::<Vec<_>>().join(", ");
                let msg = format!(
                    "Git working tree is dirty ({} changed path(s): {})",
                    paths.len(),
                    sample
                );
                if opts.allow_dirty_git {
                    findings.warn(format!("{}; continuing because --allow-dirty-git is set", msg));
                } else {
                    findings.error(format!(
                        "{}; commit or stash them, or pass --allow-dirty-git",
                        msg
                    ));
                }
            }
            Err(e) => findings.error(format!("Could not read git status: {:#}", e)),
        }
    }

    fn check_theme_and_template(&self, config: &LaunchConfig, findings: &mut Findings) {
        if let Some(theme) = config.theme.as_deref() {
            let dir = self.settings.theme_dir(theme);
            if !dir.is_dir() {
                findings.error(format!(
                    "Theme '{}' not found at {}",
                    theme,
                    self.settings.relative(&dir).display()
                ));
            }
        }
        if let Some(template) = config.template.as_deref() {
            let dir = self.settings.template_dir(template);
            if !dir.is_dir() {
                findings.error(format!(
                    "Template '{}' not found at {}",
                    template,
                    self.settings.relative(&dir).display()
                ));
            }
        }
    }

    fn check_collision(&self, opts: &PreflightOptions<'_>, findings: &mut Findings) {
        let app_dir = self.settings.app_dir(&opts.config.app_slug());
        if !app_dir.exists() {
            return;
        }
        let shown = self.settings.relative(&app_dir);
        if opts.force {
            findings.warn(format!(
                "Shop app {} already exists and will be overwritten (--force)",
                shown.display()
            ));
        } else {
            findings.error(format!(
                "Shop app {} already exists; pass --force to overwrite it",
                shown.display()
            ));
        }
    }

    async fn check_required_secrets(&self, config: &LaunchConfig, findings: &mut Findings) {
        let kind = config.deploy_target.kind;
        let required = kind.required_secrets();
        if required.is_empty() {
            return;
        }
        match self.secret_lister.list_secret_names().await {
            Ok(names) => {
                let missing: Vec<&str> = required
                    .iter()
                    .copied()
                    .filter(|r| !names.iter().any(|n| n == r))
                    .collect();
                if !missing.is_empty() {
                    findings.error(format!(
                        "Missing required GitHub secrets for {}: {}",
                        kind,
                        missing.join(", ")
                    ));
                }
            }
            Err(e) => findings.error(format!("Could not list GitHub secrets: {:#}", e)),
        }
    }
}

fn check_schema(config: &LaunchConfig, findings: &mut Findings) {
    match serde_json::to_value(config) {
        Ok(doc) => {
            for issue in config::validate_document(&doc) {
                findings.error(format!("Config schema: {}", issue));
            }
        }
        Err(e) => findings.error(format!("Config schema: could not serialize config: {}", e)),
    }
}

fn check_placeholders(opts: &PreflightOptions<'_>, findings: &mut Findings) {
    let placeholders = opts.secrets.placeholders();
    if placeholders.is_empty() {
        return;
    }
    let msg = format!(
        "Placeholder secret values (TODO_...) still set: {}",
        placeholders.join(", ")
    );
    if opts.mode.is_production() {
        findings.error(msg);
    } else {
        findings.warn(msg);
    }
}

fn check_project_name(config: &LaunchConfig, findings: &mut Findings) {
    let name = config.project_name();
    let (label, max) = match config.deploy_target.kind {
        DeployTargetKind::CloudflarePages => ("Cloudflare", CLOUDFLARE_MAX_NAME),
        DeployTargetKind::Vercel => ("Vercel", VERCEL_MAX_NAME),
        DeployTargetKind::Local => return,
    };
    if name.len() > max {
        findings.error(format!(
            "{} project name '{}' is too long ({} > {} characters)",
            label,
            name,
            name.len(),
            max
        ));
    }
    if !PROJECT_NAME_RE.is_match(&name) {
        findings.error(format!(
            "Invalid {} project name '{}': use lowercase letters, digits and hyphens, not starting or ending with a hyphen",
            label, name
        ));
    }
}

fn check_sign_off(config: &LaunchConfig, now: DateTime<Utc>, findings: &mut Findings) {
    let Some(sign_off) = config.compliance_sign_off.as_ref() else {
        findings.error("Compliance sign-off is required for production launches");
        return;
    };
    if sign_off.signed_off_by.trim().is_empty() {
        findings.error("Compliance sign-off has no signer");
    }
    if !sign_off.approved {
        findings.error(format!(
            "Compliance sign-off by {} is not approved",
            sign_off.signed_off_by
        ));
    }
    if sign_off.signed_off_at > now {
        findings.error("Compliance sign-off date is in the future");
    } else if now - sign_off.signed_off_at > Duration::days(SIGN_OFF_MAX_AGE_DAYS) {
        findings.error(format!(
            "Compliance sign-off is {} days old; it must be renewed every {} days",
            (now - sign_off.signed_off_at).num_days(),
            SIGN_OFF_MAX_AGE_DAYS
        ));
    }
}

fn check_legal_pages(config: &LaunchConfig, findings: &mut Findings) {
    let missing = config.missing_legal_pages();
    if !missing.is_empty() {
        findings.error(format!(
            "Legal page mapping incomplete; missing: {}",
            missing.join(", ")
        ));
    }
}
