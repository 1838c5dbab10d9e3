//! Vector store backends and the intent-routed document store.

pub mod adapter;
pub mod sqlite;

pub use adapter::{merge_ranked, DocumentStore, Retriever};
pub use sqlite::SqliteVectorStore;

use crate::types::Document;
use async_trait::async_trait;
use concierge_core::AppResult;
use serde::{Deserialize, Serialize};

/// A document ready to be written, with its embedding.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub id: String,
    pub text: String,
    pub metadata: serde_json::Value,
    pub embedding: Vec<f32>,
}

/// Per-collection counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub name: String,
    pub documents: usize,
}

/// Named collections queryable by embedding similarity.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace documents in a collection. Returns the number written.
    async fn upsert(&self, collection: &str, documents: Vec<StoredDocument>) -> AppResult<usize>;

    /// Top `top_k` documents of one collection, best first, scores in [0, 1].
    async fn query(&self, collection: &str, embedding: &[f32], top_k: usize)
        -> AppResult<Vec<Document>>;

    /// Every collection holding at least one document.
    async fn stats(&self) -> AppResult<Vec<CollectionStats>>;

    /// Remove every document of a collection. Returns the number removed.
    async fn clear(&self, collection: &str) -> AppResult<usize>;
}
