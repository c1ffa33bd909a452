use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::SyncError;
use crate::model::record::HierarchyLevel;
use crate::status::StatusRule;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub jira: JiraConfig,
    pub github: GitHubConfig,
    #[serde(default)]
    pub status_rules: Vec<StatusRule>,
    #[serde(default)]
    pub hierarchy: HierarchyConfig,
    #[serde(default)]
    pub sync: SyncOptions,
}

#[derive(Debug, Deserialize)]
pub struct JiraConfig {
    pub domain: String,
    pub email: String,
    pub api_token: String,
    /// Project receiving records created from the destination side.
    pub project_key: String,
    /// JQL selecting the candidate record set for each run.
    pub jql: String,
}

#[derive(Debug, Deserialize)]
pub struct GitHubConfig {
    pub owner: String,
    pub repo: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct HierarchyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Destination-side nesting ceiling. Children past this depth are
    /// created unlinked at top level instead of failing the run.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// Source status name -> hierarchy level.
    #[serde(default)]
    pub levels: HashMap<String, HierarchyLevel>,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_depth: default_max_depth(),
            levels: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SyncOptions {
    /// Only sync source records carrying this label, when set.
    #[serde(default)]
    pub label_filter: Option<String>,
    /// Label marking destination records as managed by the bridge.
    #[serde(default = "default_sync_label")]
    pub sync_label: String,
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            label_filter: None,
            sync_label: default_sync_label(),
            dry_run: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_depth() -> u32 {
    8
}

fn default_sync_label() -> String {
    "trackbridge".to_string()
}

fn config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".trackbridge")
        .join("config.toml")
}

pub fn load_config() -> Result<AppConfig> {
    load_config_from(&config_path())
}

pub fn load_config_from(path: &PathBuf) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let config: AppConfig =
        toml::from_str(&contents).with_context(|| "Failed to parse config.toml")?;
    Ok(config)
}

impl AppConfig {
    /// Pre-flight validation. Any failure here is fatal and aborts the run
    /// before a single record is touched.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.jira.domain.is_empty() || self.jira.api_token.is_empty() {
            return Err(SyncError::Validation(
                "jira.domain and jira.api_token are required".into(),
            ));
        }
        if self.jira.jql.trim().is_empty() {
            return Err(SyncError::Validation("jira.jql must not be empty".into()));
        }
        if self.github.owner.is_empty() || self.github.repo.is_empty() {
            return Err(SyncError::Validation(
                "github.owner and github.repo are required".into(),
            ));
        }
        if self.status_rules.is_empty() {
            return Err(SyncError::Validation(
                "at least one [[status_rules]] entry is required".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for rule in &self.status_rules {
            if rule.source_status.trim().is_empty() {
                return Err(SyncError::Validation(
                    "status_rules entries need a non-empty source_status".into(),
                ));
            }
            if !seen.insert(rule.source_status.to_ascii_lowercase()) {
                return Err(SyncError::Validation(format!(
                    "duplicate status rule for source status '{}'",
                    rule.source_status
                )));
            }
        }
        if self.hierarchy.max_depth == 0 {
            return Err(SyncError::Validation(
                "hierarchy.max_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[jira]
domain = "acme"
email = "bot@acme.dev"
api_token = "token"
project_key = "PROJ"
jql = "project = PROJ AND updated >= -7d"

[github]
owner = "acme"
repo = "product"
token = "ghp_x"

[[status_rules]]
source_status = "Ready"
dest_state = "open"

[[status_rules]]
source_status = "Done"
dest_state = "closed"

[hierarchy]
max_depth = 4

[hierarchy.levels]
"Epic Backlog" = "epic"
"Ready" = "story"
"#;

    #[test]
    fn parses_sample_config() {
        let config: AppConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.jira.domain, "acme");
        assert_eq!(config.status_rules.len(), 2);
        assert_eq!(config.hierarchy.max_depth, 4);
        assert_eq!(
            config.hierarchy.levels.get("Epic Backlog"),
            Some(&HierarchyLevel::Epic)
        );
        assert_eq!(config.sync.sync_label, "trackbridge");
        assert!(!config.sync.dry_run);
        config.validate().unwrap();
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(SAMPLE.as_bytes()).unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.github.repo, "product");
    }

    #[test]
    fn validation_rejects_empty_rules() {
        let mut config: AppConfig = toml::from_str(SAMPLE).unwrap();
        config.status_rules.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("status_rules"));
        assert!(err.is_fatal());
    }

    #[test]
    fn validation_rejects_duplicate_statuses() {
        let mut config: AppConfig = toml::from_str(SAMPLE).unwrap();
        config.status_rules.push(StatusRule {
            source_status: "done".into(),
            dest_state: crate::status::DestState::Open,
            dest_label: None,
        });
        assert!(config.validate().is_err());
    }
}
