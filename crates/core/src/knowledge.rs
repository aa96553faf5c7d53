//! Knowledge base contract: similarity search over the approved documents.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// A retrieved passage plus whatever metadata the index stored with it
/// (source file, page number).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Similarity search, most relevant first.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Return at most `k` documents for `query`. An empty result is not an error.
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<Document>, MemoryError>;

    /// Number of indexed passages.
    async fn len(&self) -> usize;
}
