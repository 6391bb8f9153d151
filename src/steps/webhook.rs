use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use super::{WebhookOutcome, WebhookRegistrar, join_url};
use crate::secrets::ResolvedSecrets;
use crate::util::run_shell;

/// Path of the payment webhook handler on a deployed shop.
pub const WEBHOOK_PATH: &str = "/api/stripe-webhook";

/// Registers the shop's payment webhook by running a project command.
///
/// Placeholders: `{shop_id}`, `{deploy_url}`, `{webhook_url}`.
pub struct CommandWebhookRegistrar {
    command: Option<String>,
    project_dir: PathBuf,
    timeout: Duration,
}

impl CommandWebhookRegistrar {
    pub fn new(command: Option<String>, project_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            command,
            project_dir,
            timeout,
        }
    }
}

#[async_trait]
impl WebhookRegistrar for CommandWebhookRegistrar {
    async fn register(
        &self,
        shop_id: &str,
        deploy_url: Option<&str>,
        secrets: &ResolvedSecrets,
    ) -> Result<WebhookOutcome> {
        let Some(deploy_url) = deploy_url.filter(|u| !u.is_empty()) else {
            return Ok(WebhookOutcome::Skipped(
                "Webhook registration skipped: no deploy URL available".into(),
            ));
        };
        let Some(template) = self.command.as_deref() else {
            return Ok(WebhookOutcome::Skipped(
                "Webhook registration skipped: no webhook command configured".into(),
            ));
        };

        let webhook_url = join_url(deploy_url, WEBHOOK_PATH);
        let command = template
            .replace("{shop_id}", shop_id)
            .replace("{deploy_url}", deploy_url)
            .replace("{webhook_url}", &webhook_url);

        info!(shop_id, webhook_url = %webhook_url, "Registering webhook");
        let output = run_shell(&command, &self.project_dir, &secrets.env_pairs(), self.timeout).await?;
        if !output.success() {
            anyhow::bail!("Webhook registration failed: {}", output.failure_summary());
        }
        Ok(WebhookOutcome::Registered)
    }
}
