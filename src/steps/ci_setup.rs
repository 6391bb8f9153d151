use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info};

use super::CiSetup;
use crate::config::{DeployTargetKind, LaunchConfig};
use crate::util::write_atomic;

/// Writes the shop's workflow file (`shop-<id>.yml` by default), a manually
/// dispatched workflow that builds the shop app, deploys it and uploads a
/// metadata artifact carrying the live URL.
pub struct WorkflowCiSetup {
    workflows_dir: PathBuf,
    workflow_pattern: String,
    apps_dir: String,
    metadata_artifact: String,
}

impl WorkflowCiSetup {
    pub fn new(
        workflows_dir: PathBuf,
        workflow_pattern: impl Into<String>,
        apps_dir: impl Into<String>,
        metadata_artifact: impl Into<String>,
    ) -> Self {
        Self {
            workflows_dir,
            workflow_pattern: workflow_pattern.into(),
            apps_dir: apps_dir.into(),
            metadata_artifact: metadata_artifact.into(),
        }
    }

    pub fn workflow_path(&self, config: &LaunchConfig) -> PathBuf {
        self.workflows_dir
            .join(self.workflow_pattern.replace("{shop_id}", &config.shop_id))
    }

    pub fn render(&self, config: &LaunchConfig) -> String {
        let slug = config.app_slug();
        let project = config.project_name();
        let app_path = format!("{}/{}", self.apps_dir.trim_end_matches('/'), slug);

        let deploy = match config.deploy_target.kind {
            DeployTargetKind::CloudflarePages => format!(
                r#"      - name: Deploy to Cloudflare Pages
        id: deploy
        env:
          CLOUDFLARE_API_TOKEN: ${{{{ secrets.CLOUDFLARE_API_TOKEN }}}}
          CLOUDFLARE_ACCOUNT_ID: ${{{{ secrets.CLOUDFLARE_ACCOUNT_ID }}}}
        run: |
          url=$(npx wrangler pages deploy {app_path}/out --project-name {project} --branch "${{GITHUB_REF_NAME}}" | grep -Eo 'https://[^ ]+\.pages\.dev' | tail -n1)
          echo "url=${{url:-https://{project}.pages.dev}}" >> "$GITHUB_OUTPUT"
"#
            ),
            DeployTargetKind::Vercel => format!(
                r#"      - name: Deploy to Vercel
        id: deploy
        env:
          VERCEL_TOKEN: ${{{{ secrets.VERCEL_TOKEN }}}}
        run: |
          url=$(npx vercel deploy {app_path} --yes --token "$VERCEL_TOKEN" --name {project})
          echo "url=${{url:-https://{project}.vercel.app}}" >> "$GITHUB_OUTPUT"
"#
            ),
            DeployTargetKind::Local => r#"      - name: Build only (local target)
        id: deploy
        run: echo "url=" >> "$GITHUB_OUTPUT"
"#
            .to_string(),
        };

        format!(
            r#"# Generated by launch-shop for shop {shop_id}. Re-running the launch overwrites this file.
name: Deploy shop {shop_id}

on:
  workflow_dispatch:

concurrency:
  group: shop-{shop_id}-${{{{ github.ref }}}}
  cancel-in-progress: false

jobs:
  deploy:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - uses: pnpm/action-setup@v4
      - uses: actions/setup-node@v4
        with:
          node-version: 20
          cache: pnpm
      - run: pnpm install --frozen-lockfile
      - run: pnpm --filter ./{app_path} build
{deploy}      - name: Write deploy metadata
        run: |
          mkdir -p deploy-metadata
          printf '{{"shopId":"%s","deployUrl":"%s","sha":"%s"}}\n' \
            "{shop_id}" "${{{{ steps.deploy.outputs.url }}}}" "$GITHUB_SHA" > deploy-metadata/deploy.json
      - uses: actions/upload-artifact@v4
        with:
          name: {artifact}
          path: deploy-metadata/deploy.json
"#,
            shop_id = config.shop_id,
            app_path = app_path,
            deploy = deploy,
            artifact = self.metadata_artifact,
        )
    }
}

#[async_trait]
impl CiSetup for WorkflowCiSetup {
    async fn setup(&self, config: &LaunchConfig) -> Result<PathBuf> {
        let path = self.workflow_path(config);
        let content = self.render(config);

        if std::fs::read_to_string(&path).is_ok_and(|existing| existing == content) {
            debug!(path = %path.display(), "Workflow unchanged");
            return Ok(path);
        }
        write_atomic(&path, content.as_bytes())
            .with_context(|| format!("Failed to write workflow {}", path.display()))?;
        info!(path = %path.display(), "Wrote deploy workflow");
        Ok(path)
    }
}
