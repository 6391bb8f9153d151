//! Operational settings for the launch pipeline.
//!
//! Settings are read from `launch.toml` in the project directory and layered
//! file → environment (`LAUNCH_SHOP_*`) → CLI. Every field has a default, so a
//! project without a settings file behaves like this one:
//!
//! ```toml
//! [paths]
//! state_dir = "data/launch-state"
//! shops_dir = "data/shops"
//! apps_dir = "apps"
//! cms_dir = "data/cms"
//! workflows_dir = ".github/workflows"
//! themes_dir = "packages/themes"
//! templates_dir = "packages/templates"
//!
//! [ci]
//! workflow = "shop-{shop_id}.yml"
//! metadata_artifact = "deploy-metadata"
//! production_branch = "main"
//! required_tools = ["git", "gh"]
//!
//! [polling]
//! discovery_attempts = 10
//! discovery_delay_secs = 3
//! poll_interval_secs = 10
//! poll_timeout_secs = 600
//! artifact_attempts = 5
//! artifact_delay_secs = 5
//! reachability_attempts = 12
//! reachability_delay_secs = 5
//!
//! [resume]
//! max_state_age_hours = 24
//!
//! [commands]
//! scaffold = "pnpm init-shop --config {config}"
//! webhook = "pnpm setup-webhooks --shop {shop_id} --url {deploy_url}"
//! e2e = "pnpm exec cypress run --config baseUrl={base_url}"
//!
//! [database]
//! path = "data/inventory.db"
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SETTINGS_FILE: &str = "launch.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsSection {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_shops_dir")]
    pub shops_dir: PathBuf,
    #[serde(default = "default_apps_dir")]
    pub apps_dir: PathBuf,
    #[serde(default = "default_cms_dir")]
    pub cms_dir: PathBuf,
    #[serde(default = "default_workflows_dir")]
    pub workflows_dir: PathBuf,
    #[serde(default = "default_themes_dir")]
    pub themes_dir: PathBuf,
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("data/launch-state")
}
fn default_shops_dir() -> PathBuf {
    PathBuf::from("data/shops")
}
fn default_apps_dir() -> PathBuf {
    PathBuf::from("apps")
}
fn default_cms_dir() -> PathBuf {
    PathBuf::from("data/cms")
}
fn default_workflows_dir() -> PathBuf {
    PathBuf::from(".github/workflows")
}
fn default_themes_dir() -> PathBuf {
    PathBuf::from("packages/themes")
}
fn default_templates_dir() -> PathBuf {
    PathBuf::from("packages/templates")
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            shops_dir: default_shops_dir(),
            apps_dir: default_apps_dir(),
            cms_dir: default_cms_dir(),
            workflows_dir: default_workflows_dir(),
            themes_dir: default_themes_dir(),
            templates_dir: default_templates_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiSection {
    /// Workflow file name; `{shop_id}` is substituted.
    #[serde(default = "default_workflow")]
    pub workflow: String,
    #[serde(default = "default_metadata_artifact")]
    pub metadata_artifact: String,
    #[serde(default = "default_production_branch")]
    pub production_branch: String,
    #[serde(default = "default_required_tools")]
    pub required_tools: Vec<String>,
}

fn default_workflow() -> String {
    "shop-{shop_id}.yml".to_string()
}
fn default_metadata_artifact() -> String {
    "deploy-metadata".to_string()
}
fn default_production_branch() -> String {
    "main".to_string()
}
fn default_required_tools() -> Vec<String> {
    vec!["git".to_string(), "gh".to_string()]
}

impl Default for CiSection {
    fn default() -> Self {
        Self {
            workflow: default_workflow(),
            metadata_artifact: default_metadata_artifact(),
            production_branch: default_production_branch(),
            required_tools: default_required_tools(),
        }
    }
}

impl CiSection {
    pub fn workflow_for(&self, shop_id: &str) -> String {
        self.workflow.replace("{shop_id}", shop_id)
    }
}

/// Retry counts and delays for every bounded loop in the deploy driver and
/// smoke checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSection {
    #[serde(default = "default_discovery_attempts")]
    pub discovery_attempts: u32,
    #[serde(default = "default_discovery_delay_secs")]
    pub discovery_delay_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_artifact_attempts")]
    pub artifact_attempts: u32,
    #[serde(default = "default_artifact_delay_secs")]
    pub artifact_delay_secs: u64,
    #[serde(default = "default_reachability_attempts")]
    pub reachability_attempts: u32,
    #[serde(default = "default_reachability_delay_secs")]
    pub reachability_delay_secs: u64,
}

fn default_discovery_attempts() -> u32 {
    10
}
fn default_discovery_delay_secs() -> u64 {
    3
}
fn default_poll_interval_secs() -> u64 {
    10
}
fn default_poll_timeout_secs() -> u64 {
    600
}
fn default_artifact_attempts() -> u32 {
    5
}
fn default_artifact_delay_secs() -> u64 {
    5
}
fn default_reachability_attempts() -> u32 {
    12
}
fn default_reachability_delay_secs() -> u64 {
    5
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            discovery_attempts: default_discovery_attempts(),
            discovery_delay_secs: default_discovery_delay_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
            artifact_attempts: default_artifact_attempts(),
            artifact_delay_secs: default_artifact_delay_secs(),
            reachability_attempts: default_reachability_attempts(),
            reachability_delay_secs: default_reachability_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeSection {
    /// Checkpoints last updated longer ago than this are not resumed.
    #[serde(default = "default_max_state_age_hours")]
    pub max_state_age_hours: u64,
}

fn default_max_state_age_hours() -> u64 {
    24
}

impl Default for ResumeSection {
    fn default() -> Self {
        Self {
            max_state_age_hours: default_max_state_age_hours(),
        }
    }
}

/// Shell commands for the external collaborators. Placeholders in braces are
/// substituted before running.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandsSection {
    #[serde(default)]
    pub scaffold: Option<String>,
    #[serde(default)]
    pub webhook: Option<String>,
    #[serde(default)]
    pub e2e: Option<String>,
    #[serde(default = "default_command_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_command_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/inventory.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// When set, logs are also written to a daily file in this directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

/// The complete launch.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchToml {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub ci: CiSection,
    #[serde(default)]
    pub polling: PollingSection,
    #[serde(default)]
    pub resume: ResumeSection,
    #[serde(default)]
    pub commands: CommandsSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl LaunchToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse launch.toml")
    }

    /// Load `launch.toml` from `project_dir`, or defaults when absent.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(SETTINGS_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `LAUNCH_SHOP_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("LAUNCH_SHOP_STATE_DIR") {
            self.paths.state_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LAUNCH_SHOP_PRODUCTION_BRANCH") {
            self.ci.production_branch = v;
        }
        if let Some(v) = lookup("LAUNCH_SHOP_DATABASE") {
            self.database.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("LAUNCH_SHOP_LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("LAUNCH_SHOP_LOG_JSON") {
            self.logging.json = v != "false" && v != "0";
        }
        if let Some(v) = lookup("LAUNCH_SHOP_POLL_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.polling.poll_timeout_secs = v;
        }
        if let Some(v) = lookup("LAUNCH_SHOP_POLL_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.polling.poll_interval_secs = v;
        }
        if let Some(v) = lookup("LAUNCH_SHOP_MAX_STATE_AGE_HOURS").and_then(|v| v.parse().ok()) {
            self.resume.max_state_age_hours = v;
        }
    }

    /// Return warnings for settings that load but cannot work.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.polling.poll_interval_secs == 0 {
            warnings.push("polling.poll_interval_secs is 0; polling will spin".to_string());
        }
        if self.polling.poll_timeout_secs < self.polling.poll_interval_secs {
            warnings.push(format!(
                "polling.poll_timeout_secs ({}) is shorter than poll_interval_secs ({})",
                self.polling.poll_timeout_secs, self.polling.poll_interval_secs
            ));
        }
        if !self.ci.workflow.ends_with(".yml") && !self.ci.workflow.ends_with(".yaml") {
            warnings.push(format!(
                "ci.workflow '{}' does not look like a workflow file name",
                self.ci.workflow
            ));
        }
        warnings
    }
}

/// Resolved settings for one invocation, with paths anchored at the project
/// directory.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub project_dir: PathBuf,
    pub toml: LaunchToml,
}

impl LaunchSettings {
    /// Load settings for `project_dir`, optionally from an explicit file.
    pub fn new(project_dir: PathBuf, settings_file: Option<&Path>) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let mut toml = match settings_file {
            Some(path) => LaunchToml::load(path)?,
            None => LaunchToml::load_or_default(&project_dir)?,
        };
        toml.apply_env();
        Ok(Self { project_dir, toml })
    }

    /// Settings rooted at `project_dir` with every default, no file or env.
    pub fn with_defaults(project_dir: PathBuf) -> Self {
        Self {
            project_dir,
            toml: LaunchToml::default(),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.resolve(&self.toml.paths.state_dir)
    }

    pub fn shops_dir(&self) -> PathBuf {
        self.resolve(&self.toml.paths.shops_dir)
    }

    pub fn shop_dir(&self, shop_id: &str) -> PathBuf {
        self.shops_dir().join(shop_id)
    }

    pub fn app_dir(&self, app_slug: &str) -> PathBuf {
        self.resolve(&self.toml.paths.apps_dir).join(app_slug)
    }

    pub fn cms_dir(&self) -> PathBuf {
        self.resolve(&self.toml.paths.cms_dir)
    }

    pub fn workflows_dir(&self) -> PathBuf {
        self.resolve(&self.toml.paths.workflows_dir)
    }

    pub fn theme_dir(&self, theme: &str) -> PathBuf {
        self.resolve(&self.toml.paths.themes_dir).join(theme)
    }

    pub fn template_dir(&self, template: &str) -> PathBuf {
        self.resolve(&self.toml.paths.templates_dir).join(template)
    }

    pub fn launches_dir(&self, shop_id: &str) -> PathBuf {
        self.shop_dir(shop_id).join("launches")
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve(&self.toml.database.path)
    }

    pub fn workflow_for(&self, shop_id: &str) -> String {
        self.toml.ci.workflow_for(shop_id)
    }

    /// Path relative to the project directory, for staging in git.
    pub fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.project_dir)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    pub fn max_state_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.toml.resume.max_state_age_hours as i64)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.commands.timeout_secs)
    }
}
