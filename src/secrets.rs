//! Secret sourcing for the launch.
//!
//! Secrets come from at most one of `--env-file` or `--vault-cmd`. Values are
//! handed to the scaffold command's environment and otherwise never leave this
//! module: `Debug` redacts them and reports record only the source kind.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::util::run_shell;

/// Values that mark a secret as not yet filled in.
const PLACEHOLDER_PREFIX: &str = "TODO_";
const PLACEHOLDER_EXACT: &[&str] = &["CHANGEME"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    None,
    EnvFile(PathBuf),
    VaultCmd(String),
}

impl SecretSource {
    pub fn from_args(env_file: Option<PathBuf>, vault_cmd: Option<String>) -> Self {
        match (env_file, vault_cmd) {
            (Some(path), _) => SecretSource::EnvFile(path),
            (None, Some(cmd)) => SecretSource::VaultCmd(cmd),
            (None, None) => SecretSource::None,
        }
    }

    pub fn kind(&self) -> SecretSourceKind {
        match self {
            SecretSource::None => SecretSourceKind::None,
            SecretSource::EnvFile(_) => SecretSourceKind::EnvFile,
            SecretSource::VaultCmd(_) => SecretSourceKind::VaultCmd,
        }
    }
}

/// What is recorded about the secret source in checkpoints and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretSourceKind {
    None,
    EnvFile,
    VaultCmd,
}

#[derive(Clone, Default)]
pub struct ResolvedSecrets {
    values: BTreeMap<String, String>,
}

impl fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("names", &self.names())
            .finish()
    }
}

impl ResolvedSecrets {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.values.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Names of secrets whose value is still a placeholder.
    pub fn placeholders(&self) -> Vec<&str> {
        self.values
            .iter()
            .filter(|(_, v)| is_placeholder(v))
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Environment pairs for a child process.
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

pub fn is_placeholder(value: &str) -> bool {
    let value = value.trim();
    value.starts_with(PLACEHOLDER_PREFIX) || PLACEHOLDER_EXACT.contains(&value)
}

/// Load secrets from the selected source.
pub async fn resolve(
    source: &SecretSource,
    working_dir: &Path,
    limit: Duration,
) -> Result<ResolvedSecrets> {
    match source {
        SecretSource::None => Ok(ResolvedSecrets::default()),
        SecretSource::EnvFile(path) => load_env_file(path),
        SecretSource::VaultCmd(cmd) => {
            let output = run_shell(cmd, working_dir, &[], limit)
                .await
                .context("Failed to run vault command")?;
            if !output.success() {
                anyhow::bail!("Vault command failed: {}", output.failure_summary());
            }
            parse_dotenv(output.stdout.as_bytes()).context("Vault command output is not KEY=VALUE")
        }
    }
}

fn load_env_file(path: &Path) -> Result<ResolvedSecrets> {
    let iter = dotenvy::from_path_iter(path)
        .with_context(|| format!("Failed to open env file {}", path.display()))?;
    let mut values = BTreeMap::new();
    for item in iter {
        let (k, v) = item.with_context(|| format!("Failed to parse env file {}", path.display()))?;
        values.insert(k, v);
    }
    Ok(ResolvedSecrets { values })
}

fn parse_dotenv(content: &[u8]) -> Result<ResolvedSecrets> {
    let mut values = BTreeMap::new();
    for item in dotenvy::from_read_iter(content) {
        let (k, v) = item?;
        values.insert(k, v);
    }
    Ok(ResolvedSecrets { values })
}
