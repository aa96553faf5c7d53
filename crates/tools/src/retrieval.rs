//! Retrieval tool: top-K search over the approved guidance documents.

use async_trait::async_trait;
use flavia_core::error::ToolError;
use flavia_core::knowledge::KnowledgeBase;
use flavia_core::tool::Tool;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

pub const NO_RELEVANT_INFORMATION: &str = "I found no relevant information in the documentation.";

pub const DEFAULT_TOP_K: usize = 6;

pub struct RetrieverTool {
    knowledge: Arc<dyn KnowledgeBase>,
    top_k: usize,
}

impl RetrieverTool {
    pub fn new(knowledge: Arc<dyn KnowledgeBase>) -> Self {
        Self {
            knowledge,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct RetrieverArgs {
    pub query: String,
}

#[async_trait]
impl Tool for RetrieverTool {
    type Args = RetrieverArgs;

    fn name(&self) -> &str {
        "retriever_tool"
    }

    fn description(&self) -> &str {
        "This tool searches the approved documents and returns the relevant information."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look up in the flood guidance documents"
                }
            },
            "required": ["query"]
        })
    }

    async fn call(&self, args: RetrieverArgs) -> Result<String, ToolError> {
        let docs = self
            .knowledge
            .similarity_search(&args.query, self.top_k)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "retriever_tool".into(),
                reason: e.to_string(),
            })?;

        debug!(query = %args.query, hits = docs.len(), "Retrieved documents");

        if docs.is_empty() {
            return Ok(NO_RELEVANT_INFORMATION.to_string());
        }

        Ok(docs
            .iter()
            .enumerate()
            .map(|(i, doc)| format!("Document {}:\n{}", i + 1, doc.content))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flavia_core::error::MemoryError;
    use flavia_core::knowledge::Document;
    use std::sync::Mutex;

    /// Returns canned documents and records the requested `k`.
    struct CannedKnowledge {
        docs: Vec<Document>,
        requested_k: Mutex<Option<usize>>,
    }

    impl CannedKnowledge {
        fn new(docs: &[&str]) -> Self {
            Self {
                docs: docs.iter().map(|d| Document::new(*d)).collect(),
                requested_k: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl KnowledgeBase for CannedKnowledge {
        async fn similarity_search(&self, _query: &str, k: usize) -> Result<Vec<Document>, MemoryError> {
            *self.requested_k.lock().unwrap() = Some(k);
            Ok(self.docs.iter().take(k).cloned().collect())
        }

        async fn len(&self) -> usize {
            self.docs.len()
        }
    }

    struct BrokenKnowledge;

    #[async_trait]
    impl KnowledgeBase for BrokenKnowledge {
        async fn similarity_search(&self, _query: &str, _k: usize) -> Result<Vec<Document>, MemoryError> {
            Err(MemoryError::QueryFailed("index offline".into()))
        }

        async fn len(&self) -> usize {
            0
        }
    }

    fn args(query: &str) -> RetrieverArgs {
        RetrieverArgs { query: query.into() }
    }

    #[tokio::test]
    async fn no_matches_returns_sentinel() {
        let tool = RetrieverTool::new(Arc::new(CannedKnowledge::new(&[])));
        let out = tool.call(args("insurance claims")).await.unwrap();
        assert_eq!(out, NO_RELEVANT_INFORMATION);
    }

    #[tokio::test]
    async fn matches_are_numbered_in_rank_order() {
        let tool = RetrieverTool::new(Arc::new(CannedKnowledge::new(&[
            "Move valuables upstairs.",
            "Turn off gas and electricity.",
        ])));
        let out = tool.call(args("what should I do")).await.unwrap();
        assert_eq!(
            out,
            "Document 1:\nMove valuables upstairs.\n\nDocument 2:\nTurn off gas and electricity."
        );
    }

    #[tokio::test]
    async fn requests_configured_top_k() {
        let knowledge = Arc::new(CannedKnowledge::new(&["a", "b", "c"]));
        let tool = RetrieverTool::new(knowledge.clone());
        tool.call(args("anything")).await.unwrap();
        assert_eq!(*knowledge.requested_k.lock().unwrap(), Some(6));

        let tool = RetrieverTool::new(knowledge.clone()).with_top_k(2);
        let out = tool.call(args("anything")).await.unwrap();
        assert!(out.contains("Document 2:"));
        assert!(!out.contains("Document 3:"));
    }

    #[tokio::test]
    async fn knowledge_failure_is_execution_error() {
        let tool = RetrieverTool::new(Arc::new(BrokenKnowledge));
        let err = tool.call(args("sandbags")).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }
}
