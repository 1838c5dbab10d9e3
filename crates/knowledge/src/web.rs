//! Web search fallback.

use crate::error::WebSearchFailure;
use crate::types::{Document, Query, WEB_COLLECTION};
use async_trait::async_trait;
use concierge_core::{AppError, AppResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_DUCKDUCKGO_URL: &str = "https://api.duckduckgo.com/";
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// A raw result from a search provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

/// A general web search backend.
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    fn provider_name(&self) -> &str;

    /// Up to `k` results, best first.
    async fn search(&self, text: &str, k: usize) -> AppResult<Vec<WebResult>>;
}

/// Search seam used by the orchestrator; results come back as documents.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &Query, k: usize) -> Result<Vec<Document>, WebSearchFailure>;
}

/// DuckDuckGo instant-answer API: the abstract plus related topics.
#[derive(Debug, Clone)]
pub struct DuckDuckGoSearch {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Default, Deserialize)]
struct InstantAnswer {
    #[serde(rename = "Heading", default)]
    heading: String,
    #[serde(rename = "AbstractText", default)]
    abstract_text: String,
    #[serde(rename = "AbstractURL", default)]
    abstract_url: String,
    #[serde(rename = "RelatedTopics", default)]
    related_topics: Vec<RelatedTopic>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RelatedTopic {
    Topic {
        #[serde(rename = "Text")]
        text: String,
        #[serde(rename = "FirstURL")]
        first_url: String,
    },
    Group {
        #[serde(rename = "Topics")]
        topics: Vec<RelatedTopic>,
    },
}

impl DuckDuckGoSearch {
    pub fn new(endpoint: Option<&str>) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("concierge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::WebSearch(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.unwrap_or(DEFAULT_DUCKDUCKGO_URL).to_string(),
        })
    }
}

#[async_trait]
impl WebSearchProvider for DuckDuckGoSearch {
    fn provider_name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(&self, text: &str, k: usize) -> AppResult<Vec<WebResult>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", text),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .map_err(|e| AppError::WebSearch(format!("Failed to reach DuckDuckGo: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::WebSearch(format!(
                "DuckDuckGo returned status {}",
                status
            )));
        }

        // Served as application/x-javascript, so decode the text ourselves
        let body = response
            .text()
            .await
            .map_err(|e| AppError::WebSearch(format!("Failed to read DuckDuckGo reply: {}", e)))?;
        let answer: InstantAnswer = serde_json::from_str(&body)
            .map_err(|e| AppError::WebSearch(format!("Invalid DuckDuckGo reply: {}", e)))?;

        let mut results = collect_results(answer);
        results.truncate(k);
        Ok(results)
    }
}

fn collect_results(answer: InstantAnswer) -> Vec<WebResult> {
    let mut results = Vec::new();

    if !answer.abstract_text.trim().is_empty() {
        results.push(WebResult {
            title: answer.heading,
            snippet: answer.abstract_text,
            url: answer.abstract_url,
        });
    }

    fn flatten(topics: Vec<RelatedTopic>, out: &mut Vec<WebResult>) {
        for topic in topics {
            match topic {
                RelatedTopic::Topic { text, first_url } if !text.trim().is_empty() => {
                    let title = text
                        .split_once(" - ")
                        .map_or(text.as_str(), |(head, _)| head)
                        .to_string();
                    out.push(WebResult {
                        title,
                        snippet: text,
                        url: first_url,
                    });
                }
                RelatedTopic::Topic { .. } => {}
                RelatedTopic::Group { topics } => flatten(topics, out),
            }
        }
    }
    flatten(answer.related_topics, &mut results);

    results
}

/// Wraps a [`WebSearchProvider`] and tags its results as `web` documents.
pub struct WebSearchAdapter {
    provider: Arc<dyn WebSearchProvider>,
}

impl WebSearchAdapter {
    pub fn new(provider: Arc<dyn WebSearchProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl WebSearch for WebSearchAdapter {
    async fn search(&self, query: &Query, k: usize) -> Result<Vec<Document>, WebSearchFailure> {
        let results = self.provider.search(query.text(), k).await?;

        tracing::debug!(
            "{} returned {} web results",
            self.provider.provider_name(),
            results.len()
        );

        Ok(to_documents(results, k))
    }
}

/// Map ranked results to documents scored `1 / (rank + 1)`.
pub fn to_documents(results: Vec<WebResult>, k: usize) -> Vec<Document> {
    let mut seen = HashSet::new();

    results
        .into_iter()
        .filter(|r| seen.insert(web_document_id(r)))
        .take(k)
        .enumerate()
        .map(|(rank, r)| Document {
            id: web_document_id(&r),
            text: if r.title.is_empty() {
                r.snippet.clone()
            } else {
                format!("{}: {}", r.title, r.snippet)
            },
            collection: WEB_COLLECTION.to_string(),
            score: 1.0 / (rank as f32 + 1.0),
            metadata: serde_json::json!({
                "title": r.title,
                "url": r.url,
                "rank": rank + 1,
            }),
        })
        .collect()
}

/// Stable id derived from the result URL (or snippet when there is none).
fn web_document_id(result: &WebResult) -> String {
    let key = if result.url.is_empty() {
        &result.snippet
    } else {
        &result.url
    };
    let digest = Sha256::digest(key.as_bytes());
    let hex: String = digest.iter().take(6).map(|b| format!("{:02x}", b)).collect();
    format!("web-{}", hex)
}
