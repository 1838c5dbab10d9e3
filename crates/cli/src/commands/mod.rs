//! Command handlers for the Concierge CLI.

pub mod ask;
pub mod collections;
pub mod prompts;

// Re-export command types for convenience
pub use ask::AskCommand;
pub use collections::CollectionsCommand;
pub use prompts::PromptsCommand;
