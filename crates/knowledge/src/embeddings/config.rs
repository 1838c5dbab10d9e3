//! Embedding configuration types and management.

use concierge_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Embedding configuration shared by ingestion and retrieval.
///
/// Both sides must agree on provider, model and dimensions, otherwise stored
/// vectors and query vectors are not comparable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    /// Provider name: "trigram", "openai", "ollama"
    pub provider: String,

    /// Model identifier (provider-specific)
    pub model: String,

    /// Embedding vector dimensions
    pub dimensions: usize,

    /// Whether to normalize embeddings to unit length
    #[serde(default = "default_normalize")]
    pub normalize: bool,

    /// Maximum batch size for embedding requests
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_normalize() -> bool {
    true
}

fn default_batch_size() -> usize {
    100
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "trigram".to_string(),
            model: "trigram-v1".to_string(),
            dimensions: 384,
            normalize: true,
            batch_size: 100,
        }
    }
}

impl EmbeddingConfig {
    /// Load embedding config from `.concierge/embeddings.yaml`.
    pub fn load(workspace: &Path) -> AppResult<Self> {
        let config_path = crate::config::get_embeddings_path(workspace);

        if !config_path.exists() {
            tracing::debug!("No embedding config file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path).map_err(|e| {
            AppError::Embedding(format!("Failed to read config at {:?}: {}", config_path, e))
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            AppError::Embedding(format!(
                "Failed to parse config at {:?}: {}",
                config_path, e
            ))
        })?;

        if config.dimensions == 0 {
            return Err(AppError::Embedding(
                "Embedding dimensions must be positive".to_string(),
            ));
        }

        Ok(config)
    }

    /// Save embedding config to `.concierge/embeddings.yaml`.
    pub fn save(&self, workspace: &Path) -> AppResult<()> {
        let config_path = crate::config::get_embeddings_path(workspace);

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Embedding(format!("Failed to create config directory: {}", e))
            })?;
        }

        let yaml = serde_yaml::to_string(self)
            .map_err(|e| AppError::Embedding(format!("Failed to serialize config: {}", e)))?;

        fs::write(&config_path, yaml).map_err(|e| {
            AppError::Embedding(format!(
                "Failed to write config to {:?}: {}",
                config_path, e
            ))
        })?;

        tracing::debug!("Saved embedding config to {:?}", config_path);
        Ok(())
    }

    /// Validate that another config is consistent with this one.
    pub fn validate_consistency(&self, other: &Self) -> AppResult<()> {
        if self.provider != other.provider {
            return Err(AppError::Embedding(format!(
                "Provider mismatch: expected '{}', got '{}'",
                self.provider, other.provider
            )));
        }

        if self.model != other.model {
            return Err(AppError::Embedding(format!(
                "Model mismatch: expected '{}', got '{}'",
                self.model, other.model
            )));
        }

        if self.dimensions != other.dimensions {
            return Err(AppError::Embedding(format!(
                "Dimension mismatch: expected {}, got {}",
                self.dimensions, other.dimensions
            )));
        }

        Ok(())
    }
}
