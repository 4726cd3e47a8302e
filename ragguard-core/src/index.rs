//! Vector index contract and an in-memory implementation.

use crate::embeddings::cosine_similarity;
use crate::error::RetrievalError;
use crate::types::{IndexedVector, RetrievalFilters, RetrievalResult};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Nearest-neighbour search over stored passages.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Up to `top_k` results in descending similarity.
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filters: &RetrievalFilters,
    ) -> Result<Vec<RetrievalResult>, RetrievalError>;

    async fn upsert(&self, vectors: Vec<IndexedVector>) -> Result<usize, RetrievalError>;

    /// Remove one chunk. Returns whether it existed.
    async fn delete(&self, chunk_id: &str) -> Result<bool, RetrievalError>;
}

/// Brute-force cosine index, suitable for tests and small corpora.
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    entries: RwLock<HashMap<String, IndexedVector>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filters: &RetrievalFilters,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        let entries = self.entries.read().await;
        let mut results: Vec<RetrievalResult> = entries
            .values()
            .filter(|e| !e.text.trim().is_empty())
            .map(|e| {
                let score = cosine_similarity(vector, &e.vector).clamp(0.0, 1.0);
                RetrievalResult {
                    chunk_id: e.chunk_id.clone(),
                    document_id: e.document_id.clone(),
                    text: e.text.clone(),
                    score,
                    metadata: e.metadata.clone(),
                }
            })
            .filter(|r| filters.matches(r))
            .collect();

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        results.truncate(top_k);
        Ok(results)
    }

    async fn upsert(&self, vectors: Vec<IndexedVector>) -> Result<usize, RetrievalError> {
        let mut entries = self.entries.write().await;
        let count = vectors.len();
        for v in vectors {
            entries.insert(v.chunk_id.clone(), v);
        }
        Ok(count)
    }

    async fn delete(&self, chunk_id: &str) -> Result<bool, RetrievalError> {
        Ok(self.entries.write().await.remove(chunk_id).is_some())
    }
}
