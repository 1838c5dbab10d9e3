//! Collections command handler.
//!
//! Loads CSV and JSONL rows into the registered collections and reports on
//! them.

use clap::{Args, Subcommand};
use concierge_core::{config::AppConfig, AppResult};
use concierge_knowledge::{clear_collection, collection_stats, ingest_collection, load_config};
use std::path::PathBuf;

/// Collection management
#[derive(Args, Debug)]
pub struct CollectionsCommand {
    #[command(subcommand)]
    pub action: CollectionsAction,
}

#[derive(Subcommand, Debug)]
pub enum CollectionsAction {
    /// Ingest CSV or JSONL files into collections
    Ingest(IngestCommand),
    /// Show registered collections and document counts
    Stats(StatsCommand),
    /// Remove every document of a collection
    Clear(ClearCommand),
}

impl CollectionsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        match &self.action {
            CollectionsAction::Ingest(cmd) => cmd.execute(config).await,
            CollectionsAction::Stats(cmd) => cmd.execute(config).await,
            CollectionsAction::Clear(cmd) => cmd.execute(config).await,
        }
    }
}

/// Ingest CSV or JSONL files
#[derive(Args, Debug)]
pub struct IngestCommand {
    /// CSV/JSONL files or directories containing them
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Load every file into this collection instead of the one named after
    /// the file (must be registered in retrieval.yaml)
    #[arg(long)]
    pub collection: Option<String>,

    /// Clear the target collections before ingesting
    #[arg(long)]
    pub reset: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl IngestCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        match &self.collection {
            Some(collection) => tracing::info!("Executing ingest into '{}'", collection),
            None => tracing::info!("Executing ingest into per-file collections"),
        }

        let retrieval = load_config(&config.workspace)?;
        let stats = ingest_collection(
            config,
            &retrieval,
            self.collection.as_deref(),
            self.paths.clone(),
            self.reset,
        )
        .await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        } else {
            println!(
                "Ingested {} documents from {} files into {} in {:.2}s",
                stats.documents,
                stats.files,
                stats.collections.join(", "),
                stats.duration_secs
            );
            if stats.removed > 0 {
                println!("Removed {} existing documents first", stats.removed);
            }
            if stats.skipped_rows > 0 {
                println!("Skipped {} unreadable rows", stats.skipped_rows);
            }
        }

        Ok(())
    }
}

/// Show collection statistics
#[derive(Args, Debug)]
pub struct StatsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let retrieval = load_config(&config.workspace)?;
        let counts = collection_stats(config).await?;

        let count_of = |name: &str| {
            counts
                .iter()
                .find(|c| c.name == name)
                .map_or(0, |c| c.documents)
        };

        // Documents left in collections no longer registered
        let orphaned: Vec<_> = counts
            .iter()
            .filter(|c| !retrieval.collections.iter().any(|r| r.name == c.name))
            .collect();

        if self.json {
            let registered: Vec<_> = retrieval
                .collections
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "name": c.name,
                        "intent": c.intent,
                        "documents": count_of(&c.name),
                    })
                })
                .collect();
            let output = serde_json::json!({
                "collections": registered,
                "unregistered": orphaned,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            return Ok(());
        }

        println!("{:<24} {:<16} {:>9}", "COLLECTION", "INTENT", "DOCUMENTS");
        for spec in &retrieval.collections {
            println!(
                "{:<24} {:<16} {:>9}",
                spec.name,
                spec.intent.as_str(),
                count_of(&spec.name)
            );
        }
        for stats in orphaned {
            println!("{:<24} {:<16} {:>9}", stats.name, "(unregistered)", stats.documents);
        }

        Ok(())
    }
}

/// Clear a collection
#[derive(Args, Debug)]
pub struct ClearCommand {
    /// Collection name
    pub collection: String,
}

impl ClearCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let removed = clear_collection(config, &self.collection).await?;
        println!("Removed {} documents from '{}'", removed, self.collection);
        Ok(())
    }
}
