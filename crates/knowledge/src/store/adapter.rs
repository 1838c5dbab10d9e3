//! Intent-routed document store.
//!
//! A specific intent reads its single registered collection. `Unknown` reads
//! every registered collection and merges the results.

use crate::config::{CollectionSpec, RetrievalConfig};
use crate::embeddings::EmbeddingProvider;
use crate::error::StoreUnavailable;
use crate::store::VectorStore;
use crate::types::{Document, Intent, Query};
use async_trait::async_trait;
use futures::future::try_join_all;
use std::sync::Arc;

/// Retrieval seam used by the orchestrator.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Up to `k` documents for `intent`, best first. An intent with no
    /// collection, or no match, yields an empty list.
    async fn retrieve(
        &self,
        intent: Intent,
        query: &Query,
        k: usize,
    ) -> Result<Vec<Document>, StoreUnavailable>;

    /// Collection names `intent` is allowed to return documents from.
    fn collections_for(&self, intent: Intent) -> Vec<String>;
}

/// Routes intents to collections of a [`VectorStore`].
pub struct DocumentStore {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    collections: Vec<CollectionSpec>,
    similarity_floor: Option<f32>,
}

impl DocumentStore {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            collections: config.collections.clone(),
            similarity_floor: config.similarity_floor,
        }
    }

    fn targets(&self, intent: Intent) -> Vec<&CollectionSpec> {
        match intent {
            Intent::Unknown => self.collections.iter().collect(),
            specific => self
                .collections
                .iter()
                .filter(|c| c.intent == specific)
                .collect(),
        }
    }
}

#[async_trait]
impl Retriever for DocumentStore {
    async fn retrieve(
        &self,
        intent: Intent,
        query: &Query,
        k: usize,
    ) -> Result<Vec<Document>, StoreUnavailable> {
        let targets = self.targets(intent);
        if targets.is_empty() || k == 0 {
            tracing::debug!("No collection registered for intent '{}'", intent);
            return Ok(Vec::new());
        }

        let embedding = self
            .embedder
            .embed(query.text())
            .await
            .map_err(|e| StoreUnavailable::new(intent, None, e))?;

        let lookups = targets.iter().enumerate().map(|(order, spec)| {
            let embedding = &embedding;
            async move {
                self.store
                    .query(&spec.name, embedding, k)
                    .await
                    .map(|docs| (order, spec.name.as_str(), docs))
                    .map_err(|e| StoreUnavailable::new(intent, Some(spec.name.clone()), e))
            }
        });

        let batches = try_join_all(lookups).await?;

        let batches = batches
            .into_iter()
            .map(|(order, name, docs)| {
                let (owned, foreign): (Vec<_>, Vec<_>) =
                    docs.into_iter().partition(|d| d.collection == name);
                if !foreign.is_empty() {
                    tracing::warn!(
                        "Dropped {} documents returned for '{}' that belong to another collection",
                        foreign.len(),
                        name
                    );
                }
                (order, owned)
            })
            .collect();

        let merged = merge_ranked(batches, self.similarity_floor, k);

        tracing::debug!(
            "Retrieved {} documents for intent '{}' from {} collection(s)",
            merged.len(),
            intent,
            targets.len()
        );

        Ok(merged)
    }

    fn collections_for(&self, intent: Intent) -> Vec<String> {
        self.targets(intent)
            .into_iter()
            .map(|c| c.name.clone())
            .collect()
    }
}

/// Merge per-collection results into one ranking.
///
/// Each batch is tagged with its collection's registration order. Documents
/// below `floor` are dropped; the rest sort by score descending, then
/// registration order, then id, and the top `k` are kept.
pub fn merge_ranked(
    batches: Vec<(usize, Vec<Document>)>,
    floor: Option<f32>,
    k: usize,
) -> Vec<Document> {
    let mut ranked: Vec<(usize, Document)> = batches
        .into_iter()
        .flat_map(|(order, docs)| docs.into_iter().map(move |d| (order, d)))
        .filter(|(_, d)| floor.map_or(true, |f| d.score >= f))
        .collect();

    ranked.sort_by(|(order_a, a), (order_b, b)| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| order_a.cmp(order_b))
            .then_with(|| a.id.cmp(&b.id))
    });

    ranked.into_iter().take(k).map(|(_, d)| d).collect()
}
