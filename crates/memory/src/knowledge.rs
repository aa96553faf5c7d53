//! Knowledge index over the approved flood-guidance documents.
//!
//! The index is a JSON array of chunks produced out-of-band by the ingestion
//! job: each chunk carries its text, source metadata (file, page) and,
//! optionally, its embedding.
//!
//! Storage location: `~/.flavia/knowledge/index.json`
//!
//! Queries are embedded through the configured [`Provider`] and ranked by
//! cosine similarity. Without an embedder, or when the index carries no
//! embeddings, chunks are ranked by keyword overlap instead.

use async_trait::async_trait;
use flavia_core::error::MemoryError;
use flavia_core::knowledge::{Document, KnowledgeBase};
use flavia_core::provider::{EmbeddingRequest, Provider};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::vector::{cosine_similarity, keyword_score, query_terms, top_k};

/// One indexed passage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub content: String,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl IndexedChunk {
    fn to_document(&self) -> Document {
        Document {
            content: self.content.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Embedding model used to embed queries.
struct Embedder {
    provider: Arc<dyn Provider>,
    model: String,
}

/// An in-memory, read-only knowledge index.
pub struct VectorKnowledgeBase {
    chunks: Vec<IndexedChunk>,
    embedder: Option<Embedder>,
}

impl VectorKnowledgeBase {
    pub fn new(chunks: Vec<IndexedChunk>) -> Self {
        Self {
            chunks,
            embedder: None,
        }
    }

    /// Load an index file. A missing file yields an empty index.
    pub fn load(path: &Path) -> Result<Self, MemoryError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "No knowledge index found, retrieval will find nothing");
                return Ok(Self::new(Vec::new()));
            }
            Err(e) => {
                return Err(MemoryError::Storage(format!(
                    "Failed to read knowledge index {}: {e}",
                    path.display()
                )));
            }
        };

        let chunks: Vec<IndexedChunk> =
            serde_json::from_str(&content).map_err(|e| MemoryError::Corrupted {
                key: path.display().to_string(),
                reason: e.to_string(),
            })?;

        info!(path = %path.display(), chunks = chunks.len(), "Knowledge index loaded");
        Ok(Self::new(chunks))
    }

    /// Embed queries with `provider` so chunks can be ranked by cosine similarity.
    pub fn with_embedder(mut self, provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        self.embedder = Some(Embedder {
            provider,
            model: model.into(),
        });
        self
    }

    fn has_embeddings(&self) -> bool {
        self.chunks.iter().any(|c| c.embedding.is_some())
    }

    async fn embed_query(&self, embedder: &Embedder, query: &str) -> Result<Vec<f32>, MemoryError> {
        let response = embedder
            .provider
            .embed(EmbeddingRequest {
                model: embedder.model.clone(),
                inputs: vec![query.to_string()],
            })
            .await
            .map_err(|e| MemoryError::EmbeddingFailed(e.to_string()))?;

        response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| MemoryError::EmbeddingFailed("empty embedding response".into()))
    }

    fn keyword_search(&self, query: &str, k: usize) -> Vec<usize> {
        let terms = query_terms(query);
        top_k(&self.chunks, k, 0.0, |c| Some(keyword_score(&c.content, &terms)))
    }
}

#[async_trait]
impl KnowledgeBase for VectorKnowledgeBase {
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<Document>, MemoryError> {
        let ranked = match &self.embedder {
            Some(embedder) if self.has_embeddings() => {
                let query_embedding = self.embed_query(embedder, query).await?;
                top_k(&self.chunks, k, f32::NEG_INFINITY, |c| {
                    c.embedding
                        .as_ref()
                        .map(|e| cosine_similarity(e, &query_embedding))
                })
            }
            _ => self.keyword_search(query, k),
        };

        debug!(query = %query, k, hits = ranked.len(), "Knowledge search");
        Ok(ranked.into_iter().map(|i| self.chunks[i].to_document()).collect())
    }

    async fn len(&self) -> usize {
        self.chunks.len()
    }
}
