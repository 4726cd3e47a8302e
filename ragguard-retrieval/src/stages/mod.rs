//! Pipeline stages and the seams they plug into.
//!
//! Query expansion and both re-ranking stages are trait objects so a
//! synonym expander or a cross-encoder can be substituted without touching
//! the pipeline. Budget packing and metadata filtering are pure functions.

pub mod filters;
pub mod mmr;
pub mod packing;
pub mod relevance;

use async_trait::async_trait;
use ragguard_core::{RetrievalError, RetrievalResult};
use std::collections::HashSet;

pub use filters::{apply_metadata_filters, apply_score_floor};
pub use mmr::{MmrReranker, jaccard_similarity, mmr_select};
pub use packing::{AssembledContext, ContextBudget, PackingSummary};
pub use relevance::{TermOverlapReranker, text_relevance};

/// Reorders (and may shrink) a candidate set.
#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    /// Return at most `top_k` candidates. Scores written by the reranker are
    /// clamped into `[0, 1]` by the pipeline.
    async fn rerank(
        &self,
        query: &str,
        candidates: &[RetrievalResult],
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError>;
}

/// Rewrites a query before retrieval.
#[async_trait]
pub trait QueryExpander: Send + Sync {
    /// The query to embed and whether it differs from the input.
    async fn expand(&self, query: &str) -> Result<(String, bool), RetrievalError>;
}

/// Leaves the query as it is.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughExpander;

#[async_trait]
impl QueryExpander for PassthroughExpander {
    async fn expand(&self, query: &str) -> Result<(String, bool), RetrievalError> {
        Ok((query.to_string(), false))
    }
}

/// Lowercased whitespace-separated words.
pub(crate) fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}
