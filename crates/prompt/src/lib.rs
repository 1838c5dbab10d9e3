//! Prompt system for the Concierge CLI.
//!
//! This crate provides structured prompt management with:
//! - YAML-based prompt definitions
//! - Built-in router prompts with workspace overrides
//! - Handlebars template rendering

pub mod builder;
pub mod builtin;
pub mod loader;
pub mod types;

// Re-export main types
pub use builder::build_prompt;
pub use builtin::{builtin_ids, builtin_prompt, INSUFFICIENT_MARKER};
pub use loader::{list_prompts, load_prompt, resolve_prompt};
pub use types::{BuiltPrompt, BuiltPromptMetadata, PromptDefinition, PromptOrigin, PromptOutputSpec};
