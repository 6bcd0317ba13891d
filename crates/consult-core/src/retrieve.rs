//! Query-time retrieval: embed the question, then search the document store.
//!
//! An empty [`RetrievalResult`] is the normal "no relevant context" outcome
//! and is never reported as an error. Embedding failures keep their own kind
//! so callers can tell throttling from outages; any document store failure is
//! reported as [`PipelineError::RetrievalUnavailable`].

use std::sync::Arc;

use crate::embedding::{truncate_for_embedding, Embedder, DEFAULT_MAX_INPUT_CHARS};
use crate::error::PipelineError;
use crate::models::RetrievalResult;
use crate::store::DocumentStore;

/// Retrieval knobs.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub min_score: f32,
    pub max_input_chars: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 3,
            min_score: 0.25,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
        }
    }
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn DocumentStore>,
    settings: RetrievalSettings,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn DocumentStore>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            embedder,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> RetrievalSettings {
        self.settings
    }

    /// Top-k documents for `query` using the configured `k` and floor.
    pub async fn retrieve(&self, query: &str) -> Result<RetrievalResult, PipelineError> {
        self.retrieve_with(query, self.settings.top_k, self.settings.min_score)
            .await
    }

    pub async fn retrieve_with(
        &self,
        query: &str,
        k: usize,
        min_score: f32,
    ) -> Result<RetrievalResult, PipelineError> {
        let input = truncate_for_embedding(query, self.settings.max_input_chars);
        if input.is_empty() {
            return Ok(RetrievalResult::default());
        }

        let query_vec = self.embedder.embed(input).await?;

        let result = self
            .store
            .search(&query_vec, k, min_score)
            .await
            .map_err(|e| PipelineError::RetrievalUnavailable(format!("{:#}", e)))?;

        tracing::debug!(
            k,
            min_score,
            hits = result.len(),
            top_score = result.hits.first().map(|h| h.score),
            "retrieval complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewDocument;
    use crate::store::memory::InMemoryDocumentStore;
    use async_trait::async_trait;

    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keyword"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
            if text.contains("fail") {
                return Err(PipelineError::EmbeddingUnavailable("down".into()));
            }
            if text.contains("investment") {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        }
    }

    async fn store_with_doc() -> Arc<InMemoryDocumentStore> {
        let store = Arc::new(InMemoryDocumentStore::new());
        let doc = NewDocument {
            filename: "vc.md".into(),
            content: "Minimum investment is 100k".into(),
            file_type: Some("md".into()),
            byte_size: Some(26),
            source_id: None,
        };
        store.add(&doc, &[1.0, 0.0]).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_retrieve_hits_relevant_document() {
        let retriever = Retriever::new(
            Arc::new(KeywordEmbedder),
            store_with_doc().await,
            RetrievalSettings::default(),
        );
        let result = retriever.retrieve("minimum investment?").await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.hits[0].document.filename, "vc.md");
    }

    #[tokio::test]
    async fn test_retrieve_unrelated_query_is_empty_not_error() {
        let retriever = Retriever::new(
            Arc::new(KeywordEmbedder),
            store_with_doc().await,
            RetrievalSettings::default(),
        );
        let result = retriever.retrieve("weather today").await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_keeps_kind() {
        let retriever = Retriever::new(
            Arc::new(KeywordEmbedder),
            store_with_doc().await,
            RetrievalSettings::default(),
        );
        let err = retriever.retrieve("please fail").await.unwrap_err();
        assert!(matches!(err, PipelineError::EmbeddingUnavailable(_)));
    }
}
