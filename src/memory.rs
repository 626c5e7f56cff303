//! Long-term vector memory.
//!
//! Text chunks are addressed by a content hash ([`chunk_id`]) and stored with
//! their embedding vector. Retrieval embeds the query and ranks the stored
//! chunks by cosine similarity, brute force over the collection.
//!
//! The [`MemoryStore`] trait is the seam the task router depends on;
//! [`SqliteMemory`] is the production implementation.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::debug;

use crate::embedding::{self, EmbeddingProvider};

/// Failures of the memory layer. An empty retrieval is `Ok(vec![])`, never an error.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("embeddings are disabled")]
    EmbeddingsDisabled,
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("memory storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Deterministic chunk identifier: lowercase hex SHA-256 of the text.
pub fn chunk_id(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Store `text` under `id`, replacing any chunk already stored under it.
    async fn upsert(&self, id: &str, text: &str) -> Result<(), MemoryError>;

    /// Return up to `k` stored texts, nearest to `text` first.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<String>, MemoryError>;
}

/// SQLite-backed memory for one named collection.
pub struct SqliteMemory {
    pool: SqlitePool,
    provider: Arc<dyn EmbeddingProvider>,
    collection: String,
}

impl SqliteMemory {
    pub fn new(
        pool: SqlitePool,
        provider: Arc<dyn EmbeddingProvider>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            provider,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Number of chunks in the collection.
    pub async fn count(&self) -> Result<i64, MemoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM memory_chunks WHERE collection = ?")
                .bind(&self.collection)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        if self.provider.model_name() == "disabled" {
            return Err(MemoryError::EmbeddingsDisabled);
        }
        let vector = embedding::embed_query(self.provider.as_ref(), text)
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;
        if vector.len() != self.provider.dims() {
            return Err(MemoryError::Embedding(format!(
                "model {} returned {} dims, expected {}",
                self.provider.model_name(),
                vector.len(),
                self.provider.dims()
            )));
        }
        Ok(vector)
    }
}

#[async_trait]
impl MemoryStore for SqliteMemory {
    async fn upsert(&self, id: &str, text: &str) -> Result<(), MemoryError> {
        let vector = self.embed_one(text).await?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO memory_chunks (collection, id, text, model, dims, embedding, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(collection, id) DO UPDATE SET
                text = excluded.text,
                model = excluded.model,
                dims = excluded.dims,
                embedding = excluded.embedding,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.collection)
        .bind(id)
        .bind(text)
        .bind(self.provider.model_name())
        .bind(vector.len() as i64)
        .bind(embedding::vec_to_blob(&vector))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(chunk_id = id, collection = %self.collection, "upserted memory chunk");
        Ok(())
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<String>, MemoryError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        // Only a truly empty collection skips the embedder; stored chunks
        // behind an unavailable embedder are an error.
        if self.count().await? == 0 {
            return Ok(Vec::new());
        }

        let query_vec = self.embed_one(text).await?;

        let rows = sqlx::query(
            "SELECT text, embedding FROM memory_chunks WHERE collection = ? AND model = ?",
        )
        .bind(&self.collection)
        .bind(self.provider.model_name())
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(f32, String)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity =
                    embedding::cosine_similarity(&query_vec, &embedding::blob_to_vec(&blob));
                (similarity, row.get("text"))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        debug!(results = scored.len(), collection = %self.collection, "memory query");
        Ok(scored.into_iter().map(|(_, text)| text).collect())
    }
}
