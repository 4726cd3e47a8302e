//! Maximal Marginal Relevance diversity re-ranking.
//!
//! Similarity between two passages is word-set Jaccard. This is
//! intentionally naive; a reranker backed by embeddings can replace
//! [`MmrReranker`] through the [`Reranker`] trait.

use super::{Reranker, word_set};
use async_trait::async_trait;
use ragguard_core::{RetrievalError, RetrievalResult};
use std::collections::HashSet;

/// |A ∩ B| / |A ∪ B|, or 0 when both sets are empty.
pub fn jaccard_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

/// Greedy MMR selection of up to `top_k` candidates.
///
/// Seeds with the highest-scoring candidate, then repeatedly takes the
/// candidate maximising `λ·score − (1−λ)·max_sim(selected)`. Ties go to the
/// candidate that appears first in the input.
pub fn mmr_select(candidates: &[RetrievalResult], top_k: usize, lambda: f32) -> Vec<RetrievalResult> {
    if candidates.is_empty() || top_k == 0 {
        return Vec::new();
    }

    let sets: Vec<HashSet<String>> = candidates.iter().map(|c| word_set(&c.text)).collect();

    let mut seed = 0;
    for (i, c) in candidates.iter().enumerate() {
        if c.score > candidates[seed].score {
            seed = i;
        }
    }

    let mut selected = vec![seed];
    let mut remaining: Vec<usize> = (0..candidates.len()).filter(|&i| i != seed).collect();

    while selected.len() < top_k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_value = f32::NEG_INFINITY;
        for (pos, &idx) in remaining.iter().enumerate() {
            let max_sim = selected
                .iter()
                .map(|&s| jaccard_similarity(&sets[idx], &sets[s]))
                .fold(0.0f32, f32::max);
            let value = lambda * candidates[idx].score - (1.0 - lambda) * max_sim;
            if value > best_value {
                best_value = value;
                best_pos = pos;
            }
        }
        selected.push(remaining.remove(best_pos));
    }

    selected.into_iter().map(|i| candidates[i].clone()).collect()
}

/// [`Reranker`] running [`mmr_select`] with a fixed λ.
#[derive(Debug, Clone)]
pub struct MmrReranker {
    pub lambda: f32,
}

impl MmrReranker {
    pub fn new(lambda: f32) -> Self {
        Self {
            lambda: lambda.clamp(0.0, 1.0),
        }
    }
}

impl Default for MmrReranker {
    fn default() -> Self {
        Self { lambda: 0.3 }
    }
}

#[async_trait]
impl Reranker for MmrReranker {
    fn name(&self) -> &str {
        "mmr"
    }

    async fn rerank(
        &self,
        _query: &str,
        candidates: &[RetrievalResult],
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        Ok(mmr_select(candidates, top_k, self.lambda))
    }
}
