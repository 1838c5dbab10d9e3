//! Adaptive retrieval routing over curated collections.
//!
//! Queries are classified, routed to the matching collection, graded and
//! escalated (to every collection, then to the web) until the answer is
//! grounded or the retry budget runs out.

pub mod classifier;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod grader;
pub mod ingest;
pub mod orchestrator;
pub mod prompting;
pub mod store;
pub mod synthesizer;
pub mod types;
pub mod web;

// Re-export commonly used types
pub use config::{load_config, AfterUnknown, CollectionSpec, RetrievalConfig};
pub use error::{SessionError, StoreUnavailable};
pub use ingest::{IngestOptions, IngestStats};
pub use orchestrator::{Orchestrator, Phase, SessionReport};
pub use types::{Answer, AttemptSource, Document, GradeResult, Intent, Query, RetrievalAttempt};

use classifier::{Classifier, KeywordClassifier, LlmClassifier};
use concierge_core::{AppConfig, AppError, AppResult};
use concierge_llm::create_client;
use concierge_prompt::builtin::{CLASSIFY, GRADE, SYNTHESIZE};
use embeddings::{create_provider, EmbeddingConfig, EmbeddingProvider};
use grader::LlmGrader;
use prompting::PromptRunner;
use std::sync::Arc;
use store::{CollectionStats, DocumentStore, SqliteVectorStore, VectorStore};
use synthesizer::LlmSynthesizer;
use web::{DuckDuckGoSearch, WebSearchAdapter};

/// Switches for assembling an orchestrator.
#[derive(Debug, Clone, Default)]
pub struct RouterOptions {
    /// Classify with keyword rules instead of the LLM.
    pub keyword_router: bool,
}

/// Assemble an orchestrator from application and retrieval settings.
pub fn build_orchestrator(
    app: &AppConfig,
    config: RetrievalConfig,
    options: &RouterOptions,
) -> AppResult<Orchestrator> {
    config.validate()?;

    let workspace = &app.workspace;
    let endpoint = app.provider_endpoint(&app.provider);
    let api_key = app.resolve_api_key(&app.provider);
    let client = create_client(&app.provider, endpoint.as_deref(), api_key.as_deref())?;

    tracing::debug!(
        "Building orchestrator: provider={}, model={}, keyword_router={}",
        app.provider,
        app.model,
        options.keyword_router
    );

    let classifier: Arc<dyn Classifier> = if options.keyword_router {
        Arc::new(KeywordClassifier)
    } else {
        let runner = PromptRunner::resolve(workspace, CLASSIFY, client.clone(), &app.model)?;
        Arc::new(LlmClassifier::new(runner))
    };

    let grader = LlmGrader::new(PromptRunner::resolve(
        workspace,
        GRADE,
        client.clone(),
        &app.model,
    )?);
    let synthesizer = LlmSynthesizer::new(PromptRunner::resolve(
        workspace,
        SYNTHESIZE,
        client,
        &app.model,
    )?);

    let (_, embedder) = create_embedder(app)?;
    let retriever = DocumentStore::new(open_store(app)?, embedder, &config);

    let web_enabled = config.web_search.enabled;
    let web_endpoint = config.web_search.endpoint.clone();

    let orchestrator = Orchestrator::new(
        config,
        classifier,
        Arc::new(retriever),
        Arc::new(grader),
        Arc::new(synthesizer),
    );

    if !web_enabled {
        return Ok(orchestrator);
    }

    let search = DuckDuckGoSearch::new(web_endpoint.as_deref())?;
    Ok(orchestrator.with_web_search(Arc::new(WebSearchAdapter::new(Arc::new(search)))))
}

/// Open the workspace document store, creating it when missing.
pub fn open_store(app: &AppConfig) -> AppResult<Arc<dyn VectorStore>> {
    app.ensure_state_dir()?;
    let store = SqliteVectorStore::open(&config::get_store_path(&app.workspace))?;
    Ok(Arc::new(store))
}

/// Resolve the embedding settings and build the matching provider.
pub fn create_embedder(
    app: &AppConfig,
) -> AppResult<(EmbeddingConfig, Arc<dyn EmbeddingProvider>)> {
    let embedding = resolve_embedding_config(app)?;
    let endpoint = app.provider_endpoint(&embedding.provider);
    let api_key = app.resolve_api_key(&embedding.provider);
    let provider = create_provider(&embedding, endpoint.as_deref(), api_key.as_deref())?;
    Ok((embedding, provider))
}

/// Stored embedding settings, checked against the embedding model named in
/// `config.yaml`, if any.
///
/// Collections built with one model cannot be queried with another, so a
/// mismatch is an error rather than a silent switch.
fn resolve_embedding_config(app: &AppConfig) -> AppResult<EmbeddingConfig> {
    let stored = EmbeddingConfig::load(&app.workspace)?;

    let provider = app.embedding_provider();
    let Some(model) = app
        .get_provider_config(&provider)
        .and_then(|pc| pc.embedding_model().map(str::to_string))
    else {
        return Ok(stored);
    };

    let requested = EmbeddingConfig {
        provider,
        model,
        ..stored.clone()
    };

    if config::get_embeddings_path(&app.workspace).exists() {
        stored.validate_consistency(&requested).map_err(|e| {
            AppError::Embedding(format!(
                "{}. Collections were ingested with {}/{}; remove {} and re-ingest every collection to switch",
                e,
                stored.provider,
                stored.model,
                config::get_embeddings_path(&app.workspace).display()
            ))
        })?;
    }

    Ok(requested)
}

/// Ingest CSV and JSONL files into registered collections of the workspace
/// store. Without `collection` each file fills the collection named after its
/// stem.
pub async fn ingest_collection(
    app: &AppConfig,
    config: &RetrievalConfig,
    collection: Option<&str>,
    paths: Vec<std::path::PathBuf>,
    reset: bool,
) -> AppResult<IngestStats> {
    let (embedding, embedder) = create_embedder(app)?;
    let store = open_store(app)?;

    let options = IngestOptions {
        collection: collection.map(str::to_string),
        paths,
        reset,
        batch_size: embedding.batch_size,
    };
    let stats = ingest::ingest(store.as_ref(), embedder.as_ref(), config, &options).await?;

    // Queries must embed with the same settings
    embedding.save(&app.workspace)?;

    Ok(stats)
}

/// Document counts for every non-empty collection.
pub async fn collection_stats(app: &AppConfig) -> AppResult<Vec<CollectionStats>> {
    open_store(app)?.stats().await
}

/// Remove every document of `collection`. Returns the number removed.
pub async fn clear_collection(app: &AppConfig, collection: &str) -> AppResult<usize> {
    let removed = open_store(app)?.clear(collection).await?;
    tracing::info!("Removed {} documents from '{}'", removed, collection);
    Ok(removed)
}
