//! Embedding providers for collection documents and queries.
//!
//! The same provider must be used for ingestion and retrieval; its settings
//! live in `.concierge/embeddings.yaml`.

pub mod config;
pub mod provider;
pub mod providers;

pub use config::EmbeddingConfig;
pub use provider::{create_provider, EmbeddingProvider};
