//! OpenAI embedding provider (`/v1/embeddings`).

use crate::embeddings::provider::{normalize, EmbeddingProvider};
use crate::embeddings::EmbeddingConfig;
use async_trait::async_trait;
use concierge_core::{AppError, AppResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    batch_size: usize,
    normalize: bool,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiProvider {
    pub fn new(config: &EmbeddingConfig, endpoint: Option<&str>, api_key: &str) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                AppError::Embedding(format!("Failed to create HTTP client for OpenAI: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: endpoint
                .unwrap_or(DEFAULT_OPENAI_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.to_string(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            batch_size: config.batch_size.max(1),
            normalize: config.normalize,
        })
    }

    async fn embed_chunk(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| AppError::Embedding(format!("Failed to send request to OpenAI: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::Embedding(format!(
                "OpenAI API error ({}): {}",
                status, error_text
            )));
        }

        let mut body: EmbeddingResponse = response.json().await.map_err(|e| {
            AppError::Embedding(format!("Failed to parse OpenAI response: {}", e))
        })?;

        if body.data.len() != texts.len() {
            return Err(AppError::Embedding(format!(
                "OpenAI returned {} embeddings for {} inputs",
                body.data.len(),
                texts.len()
            )));
        }

        // Results are not guaranteed to come back in input order
        body.data.sort_by_key(|d| d.index);

        body.data
            .into_iter()
            .map(|d| {
                if d.embedding.len() != self.dimensions {
                    return Err(AppError::Embedding(format!(
                        "OpenAI model '{}' returned {} dimensions, expected {}",
                        self.model,
                        d.embedding.len(),
                        self.dimensions
                    )));
                }
                let mut embedding = d.embedding;
                if self.normalize {
                    normalize(&mut embedding);
                }
                Ok(embedding)
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[instrument(skip(self, texts), fields(batch_size = texts.len(), model = %self.model))]
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            embeddings.extend(self.embed_chunk(chunk).await?);
        }

        debug!("Embedded {} texts via OpenAI", embeddings.len());
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_settings() {
        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            batch_size: 0,
            ..Default::default()
        };

        let provider = OpenAiProvider::new(&config, None, "sk-test").unwrap();
        assert_eq!(provider.base_url, DEFAULT_OPENAI_URL);
        assert_eq!(provider.batch_size, 1);
        assert_eq!(provider.dimensions(), 1536);
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_request() {
        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            ..Default::default()
        };
        let provider = OpenAiProvider::new(&config, Some("http://127.0.0.1:9"), "sk-test").unwrap();

        assert!(provider.embed_batch(&[]).await.unwrap().is_empty());
    }
}
