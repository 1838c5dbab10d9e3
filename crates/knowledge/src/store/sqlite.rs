//! SQLite-backed vector store.
//!
//! Embeddings are stored as little-endian `f32` blobs and ranked with a full
//! cosine scan per collection.

use crate::store::{CollectionStats, StoredDocument, VectorStore};
use crate::types::Document;
use async_trait::async_trait;
use chrono::Utc;
use concierge_core::{AppError, AppResult};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Vector store over a single SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteVectorStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteVectorStore {
    /// Open (or create) the store at `db_path`.
    pub fn open(db_path: &Path) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::Store(format!("Failed to create store directory: {}", e)))?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| AppError::Store(format!("Failed to open SQLite store: {}", e)))?;

        init_schema(&conn)?;

        tracing::debug!("Opened SQLite store at {:?}", db_path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a private in-memory store.
    pub fn in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Store(format!("Failed to open in-memory store: {}", e)))?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut Connection) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| AppError::Store("Store connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| AppError::Store(format!("Store task failed: {}", e)))?
    }
}

fn init_schema(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            metadata TEXT NOT NULL,
            ingested_at TEXT NOT NULL,
            PRIMARY KEY (collection, id)
        );

        CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
        "#,
    )
    .map_err(|e| AppError::Store(format!("Failed to create tables: {}", e)))?;

    Ok(())
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, collection: &str, documents: Vec<StoredDocument>) -> AppResult<usize> {
        let collection = collection.to_string();

        self.with_conn(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| AppError::Store(format!("Failed to begin transaction: {}", e)))?;
            let ingested_at = Utc::now().to_rfc3339();

            {
                let mut stmt = tx
                    .prepare(
                        "INSERT OR REPLACE INTO documents (collection, id, text, embedding, metadata, ingested_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )
                    .map_err(|e| AppError::Store(format!("Failed to prepare insert: {}", e)))?;

                for doc in &documents {
                    let metadata_json = serde_json::to_string(&doc.metadata)?;
                    stmt.execute(params![
                        collection,
                        doc.id,
                        doc.text,
                        embedding_to_bytes(&doc.embedding),
                        metadata_json,
                        ingested_at,
                    ])
                    .map_err(|e| AppError::Store(format!("Failed to insert document: {}", e)))?;
                }
            }

            tx.commit()
                .map_err(|e| AppError::Store(format!("Failed to commit documents: {}", e)))?;

            tracing::debug!("Upserted {} documents into '{}'", documents.len(), collection);
            Ok(documents.len())
        })
        .await
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> AppResult<Vec<Document>> {
        let collection = collection.to_string();
        let query_embedding = embedding.to_vec();

        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT id, text, embedding, metadata FROM documents WHERE collection = ?1")
                .map_err(|e| AppError::Store(format!("Failed to prepare query: {}", e)))?;

            let rows = stmt
                .query_map(params![collection], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .map_err(|e| AppError::Store(format!("Failed to query documents: {}", e)))?;

            let mut results = Vec::new();
            for row in rows {
                let (id, text, embedding_bytes, metadata_json) =
                    row.map_err(|e| AppError::Store(format!("Failed to read row: {}", e)))?;

                let stored = bytes_to_embedding(&embedding_bytes)?;
                if stored.len() != query_embedding.len() {
                    return Err(AppError::Store(format!(
                        "Collection '{}' holds {}-dimensional embeddings but the query has {}; re-ingest with the current embedding config",
                        collection,
                        stored.len(),
                        query_embedding.len()
                    )));
                }

                let metadata = serde_json::from_str(&metadata_json)?;
                results.push(Document {
                    id,
                    text,
                    collection: collection.clone(),
                    score: cosine_similarity(&query_embedding, &stored).clamp(0.0, 1.0),
                    metadata,
                });
            }

            results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
            results.truncate(top_k);

            tracing::debug!(
                "Retrieved {} documents from '{}' (requested top-{})",
                results.len(),
                collection,
                top_k
            );

            Ok(results)
        })
        .await
    }

    async fn stats(&self) -> AppResult<Vec<CollectionStats>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT collection, COUNT(*) FROM documents GROUP BY collection ORDER BY collection",
                )
                .map_err(|e| AppError::Store(format!("Failed to prepare stats query: {}", e)))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok(CollectionStats {
                        name: row.get(0)?,
                        documents: row.get::<_, i64>(1)? as usize,
                    })
                })
                .map_err(|e| AppError::Store(format!("Failed to count documents: {}", e)))?;

            let stats = rows
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AppError::Store(format!("Failed to count documents: {}", e)))?;
            Ok(stats)
        })
        .await
    }

    async fn clear(&self, collection: &str) -> AppResult<usize> {
        let collection = collection.to_string();

        self.with_conn(move |conn| {
            let removed = conn
                .execute("DELETE FROM documents WHERE collection = ?1", params![collection])
                .map_err(|e| AppError::Store(format!("Failed to delete documents: {}", e)))?;

            tracing::info!("Cleared {} documents from '{}'", removed, collection);
            Ok(removed)
        })
        .await
    }
}

/// Convert embedding vector to bytes for storage.
fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Convert bytes back to embedding vector.
fn bytes_to_embedding(bytes: &[u8]) -> AppResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(AppError::Store("Invalid embedding bytes length".to_string()));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Calculate cosine similarity between two vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc(id: &str, embedding: Vec<f32>) -> StoredDocument {
        StoredDocument {
            id: id.to_string(),
            text: format!("text of {}", id),
            metadata: serde_json::json!({ "row_index": 0 }),
            embedding,
        }
    }

    #[tokio::test]
    async fn test_insert_and_query() {
        let temp = TempDir::new().unwrap();
        let store = SqliteVectorStore::open(&temp.path().join("store.sqlite")).unwrap();

        store
            .upsert(
                "faq",
                vec![doc("a", vec![1.0, 0.0, 0.0]), doc("b", vec![0.6, 0.8, 0.0])],
            )
            .await
            .unwrap();

        let results = store.query("faq", &[1.0, 0.0, 0.0], 5).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[0].collection, "faq");
        assert!((results[0].score - 1.0).abs() < 0.001);
        assert!((results[1].score - 0.6).abs() < 0.001);
        assert_eq!(results[0].metadata["row_index"], 0);
    }

    #[tokio::test]
    async fn test_query_is_scoped_to_collection() {
        let store = SqliteVectorStore::in_memory().unwrap();
        store.upsert("faq", vec![doc("a", vec![1.0, 0.0])]).await.unwrap();
        store
            .upsert("troubleshooting", vec![doc("t", vec![1.0, 0.0])])
            .await
            .unwrap();

        let results = store.query("faq", &[1.0, 0.0], 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");

        assert!(store.query("missing", &[1.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ties_break_by_id_and_negative_scores_clamp() {
        let store = SqliteVectorStore::in_memory().unwrap();
        store
            .upsert(
                "faq",
                vec![
                    doc("z", vec![1.0, 0.0]),
                    doc("m", vec![1.0, 0.0]),
                    doc("opposite", vec![-1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let results = store.query("faq", &[1.0, 0.0], 2).await.unwrap();
        let ids: Vec<_> = results.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["m", "z"]);

        let all = store.query("faq", &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(all[2].score, 0.0);
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let store = SqliteVectorStore::in_memory().unwrap();
        store.upsert("faq", vec![doc("a", vec![1.0, 0.0])]).await.unwrap();
        store.upsert("faq", vec![doc("a", vec![0.0, 1.0])]).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(
            stats,
            vec![CollectionStats {
                name: "faq".to_string(),
                documents: 1
            }]
        );
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_an_error() {
        let store = SqliteVectorStore::in_memory().unwrap();
        store.upsert("faq", vec![doc("a", vec![1.0, 0.0])]).await.unwrap();

        let err = store.query("faq", &[1.0, 0.0, 0.0], 5).await.unwrap_err();
        assert!(err.to_string().contains("re-ingest"));
    }

    #[tokio::test]
    async fn test_clear_collection() {
        let store = SqliteVectorStore::in_memory().unwrap();
        store
            .upsert("faq", vec![doc("a", vec![1.0]), doc("b", vec![1.0])])
            .await
            .unwrap();
        store.upsert("catalog", vec![doc("c", vec![1.0])]).await.unwrap();

        assert_eq!(store.clear("faq").await.unwrap(), 2);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].name, "catalog");
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.001);

        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 0.001);
    }

    #[test]
    fn test_embedding_bytes_round_trip() {
        let embedding = vec![0.25, -1.5, 3.0];
        let bytes = embedding_to_bytes(&embedding);
        assert_eq!(bytes_to_embedding(&bytes).unwrap(), embedding);
        assert!(bytes_to_embedding(&bytes[..5]).is_err());
    }
}
