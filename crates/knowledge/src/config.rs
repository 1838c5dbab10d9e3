//! Retrieval configuration management.

use crate::types::Intent;
use concierge_core::config::STATE_DIR;
use concierge_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A named collection and the intent routed to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub intent: Intent,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>, intent: Intent) -> Self {
        Self {
            name: name.into(),
            intent,
        }
    }
}

/// What escalation does after an `unknown` attempt fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AfterUnknown {
    /// Go straight to web search
    #[default]
    WebFallback,
    /// Spend remaining budget re-querying every collection
    RetryUnknown,
}

/// Per-component call deadlines in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub classifier_ms: u64,
    pub retriever_ms: u64,
    pub grader_ms: u64,
    pub web_search_ms: u64,
    pub synthesizer_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            classifier_ms: 10_000,
            retriever_ms: 10_000,
            grader_ms: 20_000,
            web_search_ms: 10_000,
            synthesizer_ms: 60_000,
        }
    }
}

impl Timeouts {
    pub fn classifier(&self) -> Duration {
        Duration::from_millis(self.classifier_ms)
    }

    pub fn retriever(&self) -> Duration {
        Duration::from_millis(self.retriever_ms)
    }

    pub fn grader(&self) -> Duration {
        Duration::from_millis(self.grader_ms)
    }

    pub fn web_search(&self) -> Duration {
        Duration::from_millis(self.web_search_ms)
    }

    pub fn synthesizer(&self) -> Duration {
        Duration::from_millis(self.synthesizer_ms)
    }
}

/// Web search fallback settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSearchSettings {
    pub enabled: bool,
    /// Instant-answer endpoint override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl Default for WebSearchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: None,
        }
    }
}

/// Retrieval orchestrator configuration (`.concierge/retrieval.yaml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Collection re-attempts allowed after the first retrieval
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Documents requested per retrieval
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Documents scoring below this are dropped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_floor: Option<f32>,

    #[serde(default)]
    pub timeouts: Timeouts,

    /// Ordered routing table; order breaks score ties on merge
    #[serde(default = "default_collections")]
    pub collections: Vec<CollectionSpec>,

    /// Pause before the single grader retry
    #[serde(default = "default_grader_backoff_ms")]
    pub grader_backoff_ms: u64,

    #[serde(default)]
    pub web_search: WebSearchSettings,

    #[serde(default)]
    pub after_unknown: AfterUnknown,
}

fn default_max_retries() -> u32 {
    2
}

fn default_top_k() -> usize {
    5
}

fn default_grader_backoff_ms() -> u64 {
    250
}

fn default_collections() -> Vec<CollectionSpec> {
    vec![
        CollectionSpec::new("product_catalog", Intent::Catalog),
        CollectionSpec::new("faq", Intent::Faq),
        CollectionSpec::new("troubleshooting", Intent::Troubleshooting),
    ]
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            top_k: default_top_k(),
            similarity_floor: None,
            timeouts: Timeouts::default(),
            collections: default_collections(),
            grader_backoff_ms: default_grader_backoff_ms(),
            web_search: WebSearchSettings::default(),
            after_unknown: AfterUnknown::default(),
        }
    }
}

impl RetrievalConfig {
    pub fn grader_backoff(&self) -> Duration {
        Duration::from_millis(self.grader_backoff_ms)
    }

    /// Upper bound on attempts a session can record.
    pub fn max_attempts(&self) -> usize {
        self.max_retries as usize + 2
    }

    /// Validate the routing table and numeric bounds.
    pub fn validate(&self) -> AppResult<()> {
        if self.top_k == 0 {
            return Err(AppError::Config("top_k must be at least 1".to_string()));
        }

        if let Some(floor) = self.similarity_floor {
            if !(0.0..=1.0).contains(&floor) {
                return Err(AppError::Config(format!(
                    "similarity_floor must be within [0, 1], got {}",
                    floor
                )));
            }
        }

        let mut names = HashSet::new();
        let mut intents = HashSet::new();
        for spec in &self.collections {
            if spec.name.trim().is_empty() {
                return Err(AppError::Config(
                    "Collection name cannot be empty".to_string(),
                ));
            }
            if spec.name == crate::types::WEB_COLLECTION {
                return Err(AppError::Config(format!(
                    "Collection name '{}' is reserved for web results",
                    spec.name
                )));
            }
            if spec.intent == Intent::Unknown {
                return Err(AppError::Config(format!(
                    "Collection '{}' cannot be mapped to intent 'unknown'",
                    spec.name
                )));
            }
            if !names.insert(spec.name.as_str()) {
                return Err(AppError::Config(format!(
                    "Duplicate collection name: {}",
                    spec.name
                )));
            }
            if !intents.insert(spec.intent) {
                return Err(AppError::Config(format!(
                    "Intent '{}' is mapped to more than one collection",
                    spec.intent
                )));
            }
        }

        Ok(())
    }
}

/// Load retrieval configuration.
///
/// Reads `.concierge/retrieval.yaml` if it exists, otherwise returns defaults.
pub fn load_config(workspace: &Path) -> AppResult<RetrievalConfig> {
    let config_path = get_config_path(workspace);

    let config = if config_path.exists() {
        let content = fs::read_to_string(&config_path).map_err(|e| {
            AppError::Config(format!("Failed to read config at {:?}: {}", config_path, e))
        })?;

        let config: RetrievalConfig = serde_yaml::from_str(&content).map_err(|e| {
            AppError::Config(format!("Failed to parse config at {:?}: {}", config_path, e))
        })?;

        tracing::debug!("Loaded retrieval config from {:?}", config_path);
        config
    } else {
        tracing::debug!("Using default retrieval config (no config file found)");
        RetrievalConfig::default()
    };

    config.validate()?;
    Ok(config)
}

/// Path to the retrieval config file.
pub fn get_config_path(workspace: &Path) -> PathBuf {
    workspace.join(STATE_DIR).join("retrieval.yaml")
}

/// Path to the embedding config file.
pub fn get_embeddings_path(workspace: &Path) -> PathBuf {
    workspace.join(STATE_DIR).join("embeddings.yaml")
}

/// Path to the SQLite document store.
pub fn get_store_path(workspace: &Path) -> PathBuf {
    workspace.join(STATE_DIR).join("store.sqlite")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_default_config() {
        let temp = TempDir::new().unwrap();
        let config = load_config(temp.path()).unwrap();

        assert_eq!(config.max_retries, 2);
        assert_eq!(config.top_k, 5);
        assert_eq!(config.grader_backoff_ms, 250);
        assert_eq!(config.after_unknown, AfterUnknown::WebFallback);
        assert!(config.web_search.enabled);
        assert_eq!(config.max_attempts(), 4);
        let faq = config.collections.iter().find(|c| c.intent == Intent::Faq);
        assert_eq!(faq.map(|c| c.name.as_str()), Some("faq"));
        assert!(config.collections.iter().all(|c| c.intent != Intent::Unknown));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
max_retries: 1
timeouts:
  grader_ms: 500
collections:
  - name: parts
    intent: catalog
after_unknown: retry_unknown
"#;
        let config: RetrievalConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.top_k, 5);
        assert_eq!(config.timeouts.grader_ms, 500);
        assert_eq!(config.timeouts.classifier_ms, 10_000);
        assert_eq!(config.collections.len(), 1);
        assert_eq!(config.after_unknown, AfterUnknown::RetryUnknown);
    }

    #[test]
    fn test_written_config_loads_back() {
        let temp = TempDir::new().unwrap();
        let config = RetrievalConfig {
            top_k: 8,
            similarity_floor: Some(0.3),
            ..Default::default()
        };

        let path = get_config_path(temp.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, serde_yaml::to_string(&config).unwrap()).unwrap();

        let loaded = load_config(temp.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_validate_rejects_duplicate_intent() {
        let config = RetrievalConfig {
            collections: vec![
                CollectionSpec::new("faq", Intent::Faq),
                CollectionSpec::new("faq_archive", Intent::Faq),
            ],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_name() {
        let config = RetrievalConfig {
            collections: vec![
                CollectionSpec::new("docs", Intent::Faq),
                CollectionSpec::new("docs", Intent::Catalog),
            ],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_mapping_and_web_name() {
        let config = RetrievalConfig {
            collections: vec![CollectionSpec::new("misc", Intent::Unknown)],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RetrievalConfig {
            collections: vec![CollectionSpec::new("web", Intent::Faq)],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_floor_out_of_range() {
        let config = RetrievalConfig {
            similarity_floor: Some(1.5),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
