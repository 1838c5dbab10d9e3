//! Embedding provider implementations.

pub mod ollama;
pub mod openai;
pub mod trigram;
