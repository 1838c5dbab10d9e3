//! CSV and JSONL ingestion into named collections.
//!
//! Every CSV row, and every line of a `.jsonl` file holding a JSON object,
//! becomes one document. The document text lists the record's fields in order
//! as `key: value` pairs joined by ` | `; the fields themselves are kept as
//! metadata.
//!
//! Without an explicit collection each file goes to the collection named after
//! its stem, so `Product-Catalog.csv` fills `product_catalog`.

use crate::config::RetrievalConfig;
use crate::embeddings::EmbeddingProvider;
use crate::store::{StoredDocument, VectorStore};
use concierge_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

/// Options for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Single target collection. `None` routes each file to the collection
    /// named after its stem. Either way the target must be registered.
    pub collection: Option<String>,

    /// Files or directories to read.
    pub paths: Vec<PathBuf>,

    /// Clear every target collection before writing.
    pub reset: bool,

    /// Documents embedded per provider call.
    pub batch_size: usize,
}

/// Totals reported after ingestion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestStats {
    pub collections: Vec<String>,
    pub files: usize,
    pub documents: usize,
    pub skipped_rows: usize,
    pub removed: usize,
    pub duration_secs: f64,
}

/// Supported input formats, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Jsonl,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "csv" => Some(Self::Csv),
            "jsonl" => Some(Self::Jsonl),
            _ => None,
        }
    }
}

/// An input file and its id within the run.
#[derive(Debug, Clone, PartialEq)]
struct SourceFile {
    path: PathBuf,
    /// Path relative to the argument it was found under, `/`-separated.
    source: String,
    format: SourceFormat,
}

/// Load records into the registered collections.
pub async fn ingest(
    store: &dyn VectorStore,
    embedder: &dyn EmbeddingProvider,
    config: &RetrievalConfig,
    options: &IngestOptions,
) -> AppResult<IngestStats> {
    let start = Instant::now();

    let files = collect_files(&options.paths)?;
    if files.is_empty() {
        return Err(AppError::Config(
            "No .csv or .jsonl files found in the given paths".to_string(),
        ));
    }

    // Resolve every target before writing anything
    let mut targets = Vec::with_capacity(files.len());
    for file in &files {
        let collection = match &options.collection {
            Some(name) => name.clone(),
            None => collection_name_for(&file.path),
        };
        if !config.collections.iter().any(|c| c.name == collection) {
            return Err(AppError::Config(format!(
                "Collection '{}' (for {}) is not registered. Known collections: {}",
                collection,
                file.source,
                config
                    .collections
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        targets.push(collection);
    }

    let collections: BTreeSet<&str> = targets.iter().map(String::as_str).collect();

    tracing::info!(
        "Ingesting {} files into {} with {}",
        files.len(),
        collections.iter().copied().collect::<Vec<_>>().join(", "),
        embedder.model_name()
    );

    let mut stats = IngestStats {
        collections: collections.iter().map(|c| c.to_string()).collect(),
        ..Default::default()
    };

    if options.reset {
        for collection in &collections {
            let removed = store.clear(collection).await?;
            tracing::info!("Cleared {} documents from '{}'", removed, collection);
            stats.removed += removed;
        }
    }

    let batch_size = options.batch_size.max(1);

    for (file, collection) in files.iter().zip(&targets) {
        let content = tokio::fs::read_to_string(&file.path).await?;
        let (records, skipped) = match file.format {
            SourceFormat::Csv => parse_csv_records(collection, &file.source, &content),
            SourceFormat::Jsonl => parse_records(collection, &file.source, &content),
        };
        stats.skipped_rows += skipped;

        for batch in records.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|r| r.text.clone()).collect();
            let embeddings = embedder.embed_batch(&texts).await?;
            if embeddings.len() != batch.len() {
                return Err(AppError::Embedding(format!(
                    "Expected {} embeddings, got {}",
                    batch.len(),
                    embeddings.len()
                )));
            }

            let documents = batch
                .iter()
                .cloned()
                .zip(embeddings)
                .map(|(record, embedding)| StoredDocument {
                    id: record.id,
                    text: record.text,
                    metadata: record.metadata,
                    embedding,
                })
                .collect();

            stats.documents += store.upsert(collection, documents).await?;
        }

        stats.files += 1;
        tracing::debug!(
            "Ingested {} records from {} into '{}'",
            records.len(),
            file.source,
            collection
        );
    }

    stats.duration_secs = start.elapsed().as_secs_f64();

    tracing::info!(
        "Ingestion completed: {} documents from {} files in {:.2}s ({} rows skipped)",
        stats.documents,
        stats.files,
        stats.duration_secs,
        stats.skipped_rows
    );

    Ok(stats)
}

/// A parsed record, not yet embedded.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub text: String,
    pub metadata: Value,
}

/// Parse JSONL content. Returns the records and the number of skipped lines.
///
/// Blank lines are ignored. Lines that are not JSON objects are skipped with
/// a warning.
pub fn parse_records(collection: &str, source: &str, content: &str) -> (Vec<Record>, usize) {
    let mut records = Vec::new();
    let mut skipped = 0;

    for (row_index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields = match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(fields)) => fields,
            Ok(_) => {
                tracing::warn!("{}:{}: not a JSON object, skipping", source, row_index + 1);
                skipped += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!("{}:{}: invalid JSON, skipping: {}", source, row_index + 1, e);
                skipped += 1;
                continue;
            }
        };

        match build_record(collection, source, row_index, fields) {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }

    (records, skipped)
}

/// Parse CSV content with a header row. Returns the records and the number of
/// skipped rows.
///
/// Header names become the field keys in column order. `row_index` counts
/// data rows from zero.
pub fn parse_csv_records(collection: &str, source: &str, content: &str) -> (Vec<Record>, usize) {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(e) => {
            tracing::warn!("{}: unreadable header row, skipping file: {}", source, e);
            return (Vec::new(), 0);
        }
    };

    let mut records = Vec::new();
    let mut skipped = 0;

    for (row_index, row) in reader.records().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!("{}: row {} unreadable, skipping: {}", source, row_index, e);
                skipped += 1;
                continue;
            }
        };

        let fields: Map<String, Value> = headers
            .iter()
            .zip(row.iter())
            .map(|(key, cell)| (key.to_string(), cell_value(cell)))
            .collect();

        match build_record(collection, source, row_index, fields) {
            Some(record) => records.push(record),
            None => skipped += 1,
        }
    }

    (records, skipped)
}

fn build_record(
    collection: &str,
    source: &str,
    row_index: usize,
    fields: Map<String, Value>,
) -> Option<Record> {
    let text = record_text(&fields);
    if text.is_empty() {
        return None;
    }

    let mut metadata = fields;
    metadata.insert("source".to_string(), Value::from(source));
    metadata.insert("row_index".to_string(), Value::from(row_index));

    Some(Record {
        id: document_id(collection, source, row_index),
        text,
        metadata: Value::Object(metadata),
    })
}

/// Empty cells are null; numeric cells are numbers.
fn cell_value(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(n) = cell.parse::<i64>() {
        return Value::from(n);
    }
    if let Some(n) = cell.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    Value::from(cell)
}

/// `key: value | key: value` in field order. Null fields are left out.
fn record_text(fields: &Map<String, Value>) -> String {
    fields
        .iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(s) => Some(format!("{}: {}", key, s.trim())),
            other => Some(format!("{}: {}", key, other)),
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Stable across re-ingestion of the same file.
fn document_id(collection: &str, source: &str, row_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(collection.as_bytes());
    hasher.update([0u8]);
    hasher.update(source.as_bytes());
    hasher.update([0u8]);
    hasher.update(row_index.to_string().as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(16).map(|b| format!("{:02x}", b)).collect()
}

/// Collection a file ingests into when none is given: the lowercased stem
/// with spaces and dashes turned into underscores.
pub fn collection_name_for(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy())
        .unwrap_or_default()
        .replace([' ', '-'], "_")
        .to_lowercase()
}

fn relative_source(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn collect_files(paths: &[PathBuf]) -> AppResult<Vec<SourceFile>> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_file() {
            let Some(format) = SourceFormat::from_path(path) else {
                return Err(AppError::Config(format!(
                    "Unsupported file type: {} (expected .csv or .jsonl)",
                    path.display()
                )));
            };
            let root = path.parent().unwrap_or_else(|| Path::new(""));
            files.push(SourceFile {
                path: path.clone(),
                source: relative_source(root, path),
                format,
            });
        } else if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Some(format) = SourceFormat::from_path(entry.path()) {
                    files.push(SourceFile {
                        source: relative_source(path, entry.path()),
                        path: entry.into_path(),
                        format,
                    });
                }
            }
        } else {
            return Err(AppError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Path not found: {}", path.display()),
            )));
        }
    }

    Ok(files)
}
