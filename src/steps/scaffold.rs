use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use super::{ScaffoldRequest, Scaffolder};
use crate::util::{run_shell, write_atomic};

/// File the built-in scaffolder writes into the app directory.
pub const APP_CONFIG_FILE: &str = "shop.launch.json";

/// Runs the project's scaffold command, or lays down a minimal app directory
/// when none is configured.
///
/// The command may use `{shop_id}`, `{config}` and `{app_dir}` placeholders and
/// receives the resolved secrets in its environment.
pub struct CommandScaffolder {
    command: Option<String>,
    project_dir: PathBuf,
    timeout: Duration,
}

impl CommandScaffolder {
    pub fn new(command: Option<String>, project_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            command,
            project_dir,
            timeout,
        }
    }

    fn render(template: &str, request: &ScaffoldRequest<'_>) -> String {
        template
            .replace("{shop_id}", &request.config.shop_id)
            .replace("{config}", &request.config_path.to_string_lossy())
            .replace("{app_dir}", &request.app_dir.to_string_lossy())
    }
}

#[async_trait]
impl Scaffolder for CommandScaffolder {
    async fn scaffold(&self, request: &ScaffoldRequest<'_>) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(request.app_dir)
            .with_context(|| format!("Failed to create {}", request.app_dir.display()))?;

        let Some(template) = self.command.as_deref() else {
            let body = serde_json::to_vec_pretty(request.config)
                .context("Failed to serialize launch config")?;
            let target = request.app_dir.join(APP_CONFIG_FILE);
            write_atomic(&target, &body)?;
            debug!(path = %target.display(), "Wrote app launch config");
            return Ok(vec![request.app_dir.to_path_buf()]);
        };

        let command = Self::render(template, request);
        let mut envs = request.secrets.env_pairs();
        envs.push(("LAUNCH_SHOP_ID".into(), request.config.shop_id.clone()));
        envs.push((
            "LAUNCH_CONFIG".into(),
            request.config_path.to_string_lossy().into_owned(),
        ));
        envs.push((
            "LAUNCH_APP_DIR".into(),
            request.app_dir.to_string_lossy().into_owned(),
        ));
        if request.force {
            envs.push(("LAUNCH_FORCE".into(), "1".into()));
        }

        info!(shop_id = %request.config.shop_id, "Running scaffold command");
        let output = run_shell(&command, &self.project_dir, &envs, self.timeout).await?;
        if !output.success() {
            anyhow::bail!("Scaffold command failed: {}", output.failure_summary());
        }
        Ok(vec![request.app_dir.to_path_buf()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_document;
    use crate::secrets::ResolvedSecrets;
    use serde_json::json;
    use tempfile::tempdir;

    fn config() -> crate::config::LaunchConfig {
        parse_document(json!({"shopId": "acme", "deployTarget": {"type": "local"}})).unwrap()
    }

    #[tokio::test]
    async fn test_builtin_scaffold_writes_app_config() {
        let dir = tempdir().unwrap();
        let cfg = config();
        let app_dir = dir.path().join("apps/shop-acme");
        let config_path = dir.path().join("launch.json");
        let secrets = ResolvedSecrets::default();
        let scaffolder = CommandScaffolder::new(None, dir.path().to_path_buf(), Duration::from_secs(5));

        let paths = scaffolder
            .scaffold(&ScaffoldRequest {
                config: &cfg,
                config_path: &config_path,
                app_dir: &app_dir,
                secrets: &secrets,
                force: false,
            })
            .await
            .unwrap();

        assert_eq!(paths, vec![app_dir.clone()]);
        let written = std::fs::read_to_string(app_dir.join(APP_CONFIG_FILE)).unwrap();
        assert!(written.contains("\"shopId\": \"acme\""));
    }

    #[tokio::test]
    async fn test_command_receives_placeholders_and_secrets() {
        let dir = tempdir().unwrap();
        let cfg = config();
        let app_dir = dir.path().join("apps/shop-acme");
        let config_path = dir.path().join("launch.json");
        let secrets = ResolvedSecrets::from_pairs([("STRIPE_SECRET_KEY", "sk_test_1")]);
        let scaffolder = CommandScaffolder::new(
            Some("echo {shop_id}:$STRIPE_SECRET_KEY > {app_dir}/out.txt".into()),
            dir.path().to_path_buf(),
            Duration::from_secs(5),
        );

        scaffolder
            .scaffold(&ScaffoldRequest {
                config: &cfg,
                config_path: &config_path,
                app_dir: &app_dir,
                secrets: &secrets,
                force: false,
            })
            .await
            .unwrap();

        let out = std::fs::read_to_string(app_dir.join("out.txt")).unwrap();
        assert_eq!(out.trim(), "acme:sk_test_1");
    }

    #[tokio::test]
    async fn test_failing_command_is_error() {
        let dir = tempdir().unwrap();
        let cfg = config();
        let app_dir = dir.path().join("apps/shop-acme");
        let secrets = ResolvedSecrets::default();
        let scaffolder = CommandScaffolder::new(
            Some("echo template missing >&2; exit 3".into()),
            dir.path().to_path_buf(),
            Duration::from_secs(5),
        );
        let err = scaffolder
            .scaffold(&ScaffoldRequest {
                config: &cfg,
                config_path: &dir.path().join("launch.json"),
                app_dir: &app_dir,
                secrets: &secrets,
                force: false,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("template missing"));
    }
}
