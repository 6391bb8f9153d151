//! Launch configuration document.
//!
//! The document is JSON with camelCase keys:
//!
//! ```json
//! {
//!   "schemaVersion": 1,
//!   "shopId": "acme",
//!   "theme": "base",
//!   "deployTarget": { "type": "cloudflare-pages", "projectName": "acme-shop" },
//!   "legalPages": { "terms": "legal-terms-v2", "privacy": "legal-privacy-v1" },
//!   "complianceSignOff": {
//!     "signedOffBy": "ops@acme.test",
//!     "signedOffAt": "2026-10-01T09:00:00Z",
//!     "approved": true
//!   },
//!   "smokeChecks": [{ "endpoint": "/", "expectedStatus": 200 }]
//! }
//! ```
//!
//! Validation walks the raw document first so every problem is reported with
//! its field path, then deserializes into [`LaunchConfig`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ConfigError;
use crate::state::hash_config;

pub const SUPPORTED_SCHEMA_VERSION: u64 = 1;

/// Legal documents every storefront must map to a template.
pub const REQUIRED_LEGAL_PAGES: &[&str] = &["terms", "privacy", "returns"];

/// Pages every storefront must publish before production.
pub const REQUIRED_PAGES_BASIC: &[&str] = &["home", "shop", "product", "checkout"];

static SHOP_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{0,62}$").expect("static regex"));

/// Launch mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    #[default]
    Preview,
    Production,
}

impl LaunchMode {
    pub fn is_production(self) -> bool {
        self == LaunchMode::Production
    }
}

impl fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchMode::Preview => write!(f, "preview"),
            LaunchMode::Production => write!(f, "production"),
        }
    }
}

impl std::str::FromStr for LaunchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "preview" => Ok(LaunchMode::Preview),
            "production" => Ok(LaunchMode::Production),
            _ => anyhow::bail!("Invalid launch mode '{}'. Valid values: preview, production", s),
        }
    }
}

/// Where the storefront is deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeployTargetKind {
    CloudflarePages,
    Vercel,
    Local,
}

impl DeployTargetKind {
    pub const ALL: [DeployTargetKind; 3] = [
        DeployTargetKind::CloudflarePages,
        DeployTargetKind::Vercel,
        DeployTargetKind::Local,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DeployTargetKind::CloudflarePages => "cloudflare-pages",
            DeployTargetKind::Vercel => "vercel",
            DeployTargetKind::Local => "local",
        }
    }

    /// CI secrets the deploy workflow needs for this target.
    pub fn required_secrets(self) -> &'static [&'static str] {
        match self {
            DeployTargetKind::CloudflarePages => &["CLOUDFLARE_API_TOKEN", "CLOUDFLARE_ACCOUNT_ID"],
            DeployTargetKind::Vercel => &["VERCEL_TOKEN"],
            DeployTargetKind::Local => &[],
        }
    }
}

impl fmt::Display for DeployTargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployTarget {
    #[serde(rename = "type")]
    pub kind: DeployTargetKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
}

/// Owner sign-off required before a production launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceSignOff {
    pub signed_off_by: String,
    pub signed_off_at: DateTime<Utc>,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub director_approved_templates: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmokeCheck {
    pub endpoint: String,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
}

fn default_expected_status() -> u16 {
    200
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeoConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A validated launch configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: u64,
    pub shop_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    pub deploy_target: DeployTarget,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub legal_pages: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance_sign_off: Option<ComplianceSignOff>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub smoke_checks: Vec<SmokeCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seo: Option<SeoConfig>,
    /// Fields this pipeline does not interpret; handed to the scaffolder untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_schema_version() -> u64 {
    SUPPORTED_SCHEMA_VERSION
}

impl LaunchConfig {
    /// Directory name of the storefront app, e.g. `shop-acme`.
    pub fn app_slug(&self) -> String {
        format!("shop-{}", self.shop_id)
    }

    /// Deploy project name, defaulting to the app slug.
    pub fn project_name(&self) -> String {
        self.deploy_target
            .project_name
            .clone()
            .unwrap_or_else(|| self.app_slug())
    }

    /// Smoke checks to run, defaulting to the site root.
    pub fn effective_smoke_checks(&self) -> Vec<SmokeCheck> {
        if self.smoke_checks.is_empty() {
            vec![SmokeCheck {
                endpoint: "/".to_string(),
                expected_status: default_expected_status(),
            }]
        } else {
            self.smoke_checks.clone()
        }
    }

    /// Required legal pages with no template mapping.
    pub fn missing_legal_pages(&self) -> Vec<&'static str> {
        REQUIRED_LEGAL_PAGES
            .iter()
            .copied()
            .filter(|slug| {
                self.legal_pages
                    .get(*slug)
                    .is_none_or(|template| template.trim().is_empty())
            })
            .collect()
    }
}

/// A loaded configuration together with where it came from and its fingerprint.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: LaunchConfig,
    pub path: PathBuf,
    pub fingerprint: String,
}

/// One validation problem, addressed by field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIssue {
    pub path: String,
    pub message: String,
}

impl SchemaIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Read, validate and fingerprint the launch configuration at `path`.
pub fn load_and_validate(path: &Path) -> Result<LoadedConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let document: Value = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_document(document)?;
    let fingerprint = fingerprint(&config)?;

    Ok(LoadedConfig {
        config,
        path: path.to_path_buf(),
        fingerprint,
    })
}

/// Validate a raw document and deserialize it.
pub fn parse_document(document: Value) -> Result<LaunchConfig, ConfigError> {
    let issues = validate_document(&document);
    if !issues.is_empty() {
        return Err(ConfigError::Invalid { issues });
    }
    serde_json::from_value(document).map_err(|e| ConfigError::Invalid {
        issues: vec![SchemaIssue::new("$", e.to_string())],
    })
}

/// Fingerprint of the full configuration, independent of key order.
pub fn fingerprint(config: &LaunchConfig) -> Result<String, ConfigError> {
    let value = serde_json::to_value(config).map_err(|e| ConfigError::Invalid {
        issues: vec![SchemaIssue::new("$", format!("cannot be serialized: {}", e))],
    })?;
    Ok(hash_config(&value))
}

/// Collect every schema problem in the raw document.
pub fn validate_document(document: &Value) -> Vec<SchemaIssue> {
    let mut issues = Vec::new();

    let Some(root) = document.as_object() else {
        issues.push(SchemaIssue::new("$", "must be a JSON object"));
        return issues;
    };

    if let Some(version) = root.get("schemaVersion")
        && version.as_u64() != Some(SUPPORTED_SCHEMA_VERSION)
    {
        issues.push(SchemaIssue::new(
            "schemaVersion",
            format!("must be {}", SUPPORTED_SCHEMA_VERSION),
        ));
    }

    match root.get("shopId") {
        None | Some(Value::Null) => issues.push(SchemaIssue::new("shopId", "is required")),
        Some(Value::String(id)) if !SHOP_ID_RE.is_match(id) => issues.push(SchemaIssue::new(
            "shopId",
            "must be 1-63 lowercase letters, digits or hyphens and start with a letter or digit",
        )),
        Some(Value::String(_)) => {}
        Some(_) => issues.push(SchemaIssue::new("shopId", "must be a string")),
    }

    for key in ["name", "theme", "template", "favicon"] {
        expect_optional_string(root.get(key), key, &mut issues);
    }

    match root.get("deployTarget") {
        None | Some(Value::Null) => issues.push(SchemaIssue::new("deployTarget", "is required")),
        Some(Value::Object(target)) => {
            match target.get("type") {
                None | Some(Value::Null) => {
                    issues.push(SchemaIssue::new("deployTarget.type", "is required"))
                }
                Some(Value::String(kind))
                    if DeployTargetKind::ALL.iter().any(|k| k.as_str() == kind) => {}
                Some(other) => issues.push(SchemaIssue::new(
                    "deployTarget.type",
                    format!(
                        "must be one of {} (got {})",
                        DeployTargetKind::ALL
                            .iter()
                            .map(|k| k.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                        other
                    ),
                )),
            }
            expect_optional_string(
                target.get("projectName"),
                "deployTarget.projectName",
                &mut issues,
            );
        }
        Some(_) => issues.push(SchemaIssue::new("deployTarget", "must be an object")),
    }

    match root.get("legalPages") {
        None | Some(Value::Null) => {}
        Some(Value::Object(pages)) => {
            for (slug, template) in pages {
                if !template.as_str().is_some_and(|t| !t.trim().is_empty()) {
                    issues.push(SchemaIssue::new(
                        format!("legalPages.{}", slug),
                        "must be a non-empty template id",
                    ));
                }
            }
        }
        Some(_) => issues.push(SchemaIssue::new("legalPages", "must be an object")),
    }

    match root.get("complianceSignOff") {
        None | Some(Value::Null) => {}
        Some(Value::Object(sign_off)) => {
            if !sign_off
                .get("signedOffBy")
                .and_then(Value::as_str)
                .is_some_and(|s| !s.trim().is_empty())
            {
                issues.push(SchemaIssue::new(
                    "complianceSignOff.signedOffBy",
                    "is required",
                ));
            }
            match sign_off.get("signedOffAt").and_then(Value::as_str) {
                Some(ts) if DateTime::parse_from_rfc3339(ts).is_ok() => {}
                Some(_) => issues.push(SchemaIssue::new(
                    "complianceSignOff.signedOffAt",
                    "must be an RFC 3339 timestamp",
                )),
                None => issues.push(SchemaIssue::new(
                    "complianceSignOff.signedOffAt",
                    "is required",
                )),
            }
            for flag in ["approved", "directorApprovedTemplates"] {
                if let Some(v) = sign_off.get(flag)
                    && !v.is_boolean()
                {
                    issues.push(SchemaIssue::new(
                        format!("complianceSignOff.{}", flag),
                        "must be a boolean",
                    ));
                }
            }
        }
        Some(_) => issues.push(SchemaIssue::new("complianceSignOff", "must be an object")),
    }

    match root.get("smokeChecks") {
        None | Some(Value::Null) => {}
        Some(Value::Array(checks)) => {
            for (i, check) in checks.iter().enumerate() {
                let path = format!("smokeChecks[{}]", i);
                let Some(check) = check.as_object() else {
                    issues.push(SchemaIssue::new(path, "must be an object"));
                    continue;
                };
                if !check
                    .get("endpoint")
                    .and_then(Value::as_str)
                    .is_some_and(|e| e.starts_with('/'))
                {
                    issues.push(SchemaIssue::new(
                        format!("{}.endpoint", path),
                        "must be a path starting with '/'",
                    ));
                }
                if let Some(status) = check.get("expectedStatus")
                    && !status.as_u64().is_some_and(|s| (100..=599).contains(&s))
                {
                    issues.push(SchemaIssue::new(
                        format!("{}.expectedStatus", path),
                        "must be an HTTP status code",
                    ));
                }
            }
        }
        Some(_) => issues.push(SchemaIssue::new("smokeChecks", "must be an array")),
    }

    issues
}

fn expect_optional_string(value: Option<&Value>, path: &str, issues: &mut Vec<SchemaIssue>) {
    match value {
        None | Some(Value::Null) | Some(Value::String(_)) => {}
        Some(_) => issues.push(SchemaIssue::new(path, "must be a string")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_document() -> Value {
        json!({
            "schemaVersion": 1,
            "shopId": "acme",
            "deployTarget": { "type": "cloudflare-pages", "projectName": "acme-shop" }
        })
    }

    #[test]
    fn test_parse_minimal_document() {
        let config = parse_document(base_document()).unwrap();
        assert_eq!(config.shop_id, "acme");
        assert_eq!(config.deploy_target.kind, DeployTargetKind::CloudflarePages);
        assert_eq!(config.project_name(), "acme-shop");
        assert_eq!(config.app_slug(), "shop-acme");
    }

    #[test]
    fn test_project_name_defaults_to_app_slug() {
        let mut doc = base_document();
        doc["deployTarget"] = json!({ "type": "vercel" });
        let config = parse_document(doc).unwrap();
        assert_eq!(config.project_name(), "shop-acme");
    }

    #[test]
    fn test_missing_required_fields_report_paths() {
        let issues = validate_document(&json!({ "deployTarget": {} }));
        let paths: Vec<_> = issues.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"shopId"));
        assert!(paths.contains(&"deployTarget.type"));
    }

    #[test]
    fn test_unknown_deploy_target_rejected() {
        let mut doc = base_document();
        doc["deployTarget"]["type"] = json!("heroku");
        let err = parse_document(doc).unwrap_err();
        assert!(err.to_string().contains("deployTarget.type"));
    }

    #[test]
    fn test_invalid_shop_id_rejected() {
        let mut doc = base_document();
        doc["shopId"] = json!("Acme_Shop");
        let issues = validate_document(&doc);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "shopId");
    }

    #[test]
    fn test_all_issues_collected_not_just_first() {
        let doc = json!({
            "schemaVersion": 2,
            "shopId": 7,
            "deployTarget": "cloudflare",
            "smokeChecks": [{ "endpoint": "health", "expectedStatus": 999 }]
        });
        let issues = validate_document(&doc);
        assert!(issues.len() >= 5, "expected every issue, got {:?}", issues);
    }

    #[test]
    fn test_compliance_sign_off_validation() {
        let mut doc = base_document();
        doc["complianceSignOff"] = json!({ "signedOffBy": "", "signedOffAt": "yesterday" });
        let issues = validate_document(&doc);
        let paths: Vec<_> = issues.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"complianceSignOff.signedOffBy"));
        assert!(paths.contains(&"complianceSignOff.signedOffAt"));
    }

    #[test]
    fn test_unknown_fields_are_preserved() {
        let mut doc = base_document();
        doc["payment"] = json!(["stripe"]);
        let config = parse_document(doc).unwrap();
        assert_eq!(config.extra.get("payment"), Some(&json!(["stripe"])));
    }

    #[test]
    fn test_missing_legal_pages() {
        let mut doc = base_document();
        doc["legalPages"] = json!({ "terms": "legal-terms-v1" });
        let config = parse_document(doc).unwrap();
        assert_eq!(config.missing_legal_pages(), vec!["privacy", "returns"]);
    }

    #[test]
    fn test_default_smoke_checks() {
        let config = parse_document(base_document()).unwrap();
        let checks = config.effective_smoke_checks();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].endpoint, "/");
        assert_eq!(checks[0].expected_status, 200);
    }

    #[test]
    fn test_load_and_validate_fingerprints_independent_of_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.json");
        let b = dir.path().join("b.json");
        std::fs::write(
            &a,
            r#"{"shopId":"acme","deployTarget":{"type":"local"},"theme":"base"}"#,
        )
        .unwrap();
        std::fs::write(
            &b,
            r#"{"theme":"base","deployTarget":{"type":"local"},"shopId":"acme"}"#,
        )
        .unwrap();
        let la = load_and_validate(&a).unwrap();
        let lb = load_and_validate(&b).unwrap();
        assert_eq!(la.fingerprint, lb.fingerprint);
    }

    #[test]
    fn test_load_and_validate_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            load_and_validate(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_launch_mode_from_str() {
        assert_eq!("production".parse::<LaunchMode>().unwrap(), LaunchMode::Production);
        assert_eq!("Preview".parse::<LaunchMode>().unwrap(), LaunchMode::Preview);
        assert!("staging".parse::<LaunchMode>().is_err());
    }
}
