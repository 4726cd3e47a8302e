//! Term-overlap relevance re-ranking.

use super::{Reranker, word_set};
use async_trait::async_trait;
use ragguard_core::{RetrievalError, RetrievalResult};

/// Weight of the retrieval score in the blended score.
pub const ORIGINAL_SCORE_WEIGHT: f32 = 0.6;
/// Weight of [`text_relevance`] in the blended score.
pub const TEXT_RELEVANCE_WEIGHT: f32 = 0.4;

/// Mean of query-term coverage and text precision over word sets.
pub fn text_relevance(query: &str, text: &str) -> f32 {
    let query_words = word_set(query);
    if query_words.is_empty() {
        return 0.0;
    }
    let text_words = word_set(text);
    let shared = query_words.intersection(&text_words).count() as f32;

    let coverage = shared / query_words.len() as f32;
    let precision = if text_words.is_empty() {
        0.0
    } else {
        shared / text_words.len() as f32
    };
    (coverage + precision) / 2.0
}

/// Blends retrieval score with [`text_relevance`], then sorts descending.
///
/// Stands in for a cross-encoder; the blend is `0.6·score + 0.4·relevance`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TermOverlapReranker;

#[async_trait]
impl Reranker for TermOverlapReranker {
    fn name(&self) -> &str {
        "term_overlap"
    }

    async fn rerank(
        &self,
        query: &str,
        candidates: &[RetrievalResult],
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        let mut rescored: Vec<RetrievalResult> = candidates
            .iter()
            .map(|c| {
                let blended = ORIGINAL_SCORE_WEIGHT * c.score
                    + TEXT_RELEVANCE_WEIGHT * text_relevance(query, &c.text);
                c.clone().with_score(blended)
            })
            .collect();
        rescored.sort_by(|a, b| b.score.total_cmp(&a.score));
        rescored.truncate(top_k);
        Ok(rescored)
    }
}
