//! The multi-stage retrieval pipeline.
//!
//! A request runs through, strictly in order: query expansion, initial
//! retrieval (embedding plus an over-fetching index search), score
//! filtering, MMR diversity re-ranking, relevance re-ranking, per-document
//! budget packing and caller metadata filtering.
//!
//! Only the embedding call and the index search can fail a request. Any
//! other stage that errors is recorded in [`PipelineStats`] and skipped,
//! passing its input through unchanged.

use crate::stages::{
    ContextBudget, MmrReranker, PassthroughExpander, QueryExpander, Reranker, TermOverlapReranker,
    apply_metadata_filters, apply_score_floor,
};
use crate::stats::{
    PipelineStats, STAGE_CONTEXT_OPTIMIZATION, STAGE_DIVERSITY_RERANK, STAGE_INITIAL_RETRIEVAL,
    STAGE_METADATA_FILTER, STAGE_QUERY_EXPANSION, STAGE_RELEVANCE_RERANK, STAGE_SCORE_FILTER,
    StageOutcome, StageTimer,
};
use ragguard_core::{
    EmbeddingProvider, QueryRequest, QueryType, RetrievalConfig, RetrievalError, RetrievalFilters,
    RetrievalResult, VectorIndex,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Ranked passages plus how they were produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalOutput {
    pub results: Vec<RetrievalResult>,
    pub stats: PipelineStats,
}

pub struct RetrievalPipeline {
    config: RetrievalConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    expander: Arc<dyn QueryExpander>,
    diversity: Arc<dyn Reranker>,
    relevance: Arc<dyn Reranker>,
}

impl RetrievalPipeline {
    /// Pipeline with the built-in MMR and term-overlap rerankers.
    pub fn new(
        config: RetrievalConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        let diversity = Arc::new(MmrReranker::new(config.diversity_lambda));
        Self {
            config,
            embedder,
            index,
            expander: Arc::new(PassthroughExpander),
            diversity,
            relevance: Arc::new(TermOverlapReranker),
        }
    }

    pub fn with_query_expander(mut self, expander: Arc<dyn QueryExpander>) -> Self {
        self.expander = expander;
        self
    }

    pub fn with_diversity_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.diversity = reranker;
        self
    }

    pub fn with_relevance_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.relevance = reranker;
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve at most `top_k` passages for `query`.
    pub async fn process(
        &self,
        query: &str,
        top_k: usize,
        filters: &RetrievalFilters,
        query_type: QueryType,
    ) -> Result<RetrievalOutput, RetrievalError> {
        let request = QueryRequest::new(query, top_k)
            .with_filters(filters.clone())
            .with_query_type(query_type);
        self.process_request(&request).await
    }

    /// [`process_request`](Self::process_request) bounded by `deadline`.
    ///
    /// Stages not yet started when the deadline passes never run.
    pub async fn process_within(
        &self,
        request: &QueryRequest,
        deadline: Duration,
    ) -> Result<RetrievalOutput, RetrievalError> {
        match tokio::time::timeout(deadline, self.process_request(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    query_id = %request.query_id,
                    timeout_ms = deadline.as_millis() as u64,
                    "Retrieval deadline exceeded"
                );
                Err(RetrievalError::DeadlineExceeded {
                    timeout_ms: deadline.as_millis() as u64,
                })
            }
        }
    }

    pub async fn process_request(
        &self,
        request: &QueryRequest,
    ) -> Result<RetrievalOutput, RetrievalError> {
        request.validate()?;
        let started = Instant::now();
        let top_k = request.top_k;
        let min_score = self.config.min_similarity_score;
        let mut stats = PipelineStats::new(request.query_id, request.query_type, top_k);

        // 1. Query expansion
        let query = self.expand(&request.query, &mut stats).await;

        // 2. Initial retrieval
        let reranking = self.config.use_reranking || self.config.use_diversity_rerank;
        let fetch_k = if reranking {
            top_k.saturating_mul(self.config.over_fetch_factor)
        } else {
            top_k
        };
        stats.candidates_requested = fetch_k;
        let timer = StageTimer::start(STAGE_INITIAL_RETRIEVAL, 0)
            .param("fetch_k", fetch_k)
            .param("query_type", request.query_type.to_string());
        let model_name = request.model_name.as_deref().unwrap_or_default();
        let embedding = self.embedder.embed(&query, model_name).await.map_err(|e| {
            warn!(query_id = %request.query_id, error = %e, "Query embedding failed");
            RetrievalError::EmbeddingUnavailable {
                message: e.to_string(),
            }
        })?;
        let raw = self
            .index
            .search(&embedding.vector, fetch_k, &request.filters)
            .await
            .map_err(|e| {
                warn!(query_id = %request.query_id, error = %e, "Vector search failed");
                RetrievalError::IndexUnavailable {
                    message: e.to_string(),
                }
            })?;
        let candidates = sanitize(raw);
        stats.candidates_retrieved = candidates.len();
        timer.finish(&mut stats, StageOutcome::Applied, candidates.len(), None);
        debug!(
            query_id = %request.query_id,
            candidates = candidates.len(),
            "Initial retrieval complete"
        );

        // 3. Score filtering
        let floor = request
            .filters
            .min_score
            .map_or(min_score, |m| m.max(min_score));
        let timer =
            StageTimer::start(STAGE_SCORE_FILTER, candidates.len()).param("min_score", floor);
        let candidates = apply_score_floor(candidates, floor);
        timer.finish(&mut stats, StageOutcome::Applied, candidates.len(), None);

        // 4. Diversity re-rank
        let candidates = if self.config.use_diversity_rerank && candidates.len() > top_k {
            let timer = StageTimer::start(STAGE_DIVERSITY_RERANK, candidates.len())
                .param("reranker", self.diversity.name())
                .param("lambda", self.config.diversity_lambda);
            self.run_reranker(&*self.diversity, &query, candidates, top_k, timer, &mut stats)
                .await
        } else {
            skip(STAGE_DIVERSITY_RERANK, &candidates, &mut stats);
            candidates
        };

        // 5. Relevance re-rank, then restore the score floor and bound
        let mut candidates = if self.config.use_reranking {
            let timer = StageTimer::start(STAGE_RELEVANCE_RERANK, candidates.len())
                .param("reranker", self.relevance.name());
            let reranked = self
                .run_reranker(&*self.relevance, &query, candidates, top_k, timer, &mut stats)
                .await;
            apply_score_floor(reranked, floor)
        } else {
            skip(STAGE_RELEVANCE_RERANK, &candidates, &mut stats);
            candidates
        };
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(top_k);

        // 6. Context optimization
        let candidates = if self.config.use_context_optimization {
            let budget = ContextBudget {
                max_context_length: self.config.max_context_length,
                max_chunks_per_document: self.config.max_chunks_per_document,
            };
            let timer = StageTimer::start(STAGE_CONTEXT_OPTIMIZATION, candidates.len())
                .param("max_context_length", budget.max_context_length)
                .param("max_chunks_per_document", budget.max_chunks_per_document);
            let (packed, summary) = budget.pack(candidates);
            timer
                .param("total_chars", summary.total_chars)
                .param("documents", summary.documents)
                .finish(&mut stats, StageOutcome::Applied, packed.len(), None);
            packed
        } else {
            skip(STAGE_CONTEXT_OPTIMIZATION, &candidates, &mut stats);
            candidates
        };

        // 7. Metadata filtering
        let results = if request.filters.is_empty() {
            skip(STAGE_METADATA_FILTER, &candidates, &mut stats);
            candidates
        } else {
            let timer = StageTimer::start(STAGE_METADATA_FILTER, candidates.len());
            let filtered = apply_metadata_filters(candidates, &request.filters);
            timer.finish(&mut stats, StageOutcome::Applied, filtered.len(), None);
            filtered
        };

        stats.results_returned = results.len();
        stats.total_duration_us = started.elapsed().as_micros() as u64;
        info!(
            query_id = %request.query_id,
            top_k,
            retrieved = stats.candidates_retrieved,
            returned = results.len(),
            degraded = stats.degraded(),
            duration_us = stats.total_duration_us,
            "Retrieval complete"
        );

        Ok(RetrievalOutput { results, stats })
    }

    async fn expand(&self, query: &str, stats: &mut PipelineStats) -> String {
        if !self.config.use_query_expansion {
            skip(STAGE_QUERY_EXPANSION, &[], stats);
            return query.to_string();
        }
        let timer = StageTimer::start(STAGE_QUERY_EXPANSION, 1);
        match self.expander.expand(query).await {
            Ok((expanded, changed)) if !expanded.trim().is_empty() => {
                stats.query_expanded = changed;
                timer
                    .param("expanded", changed)
                    .finish(stats, StageOutcome::Applied, 1, None);
                expanded
            }
            Ok(_) => {
                timer.finish(
                    stats,
                    StageOutcome::Failed,
                    1,
                    Some("expander returned an empty query".into()),
                );
                query.to_string()
            }
            Err(e) => {
                warn!(error = %e, "Query expansion failed; using original query");
                timer.finish(stats, StageOutcome::Failed, 1, Some(e.to_string()));
                query.to_string()
            }
        }
    }

    async fn run_reranker(
        &self,
        reranker: &dyn Reranker,
        query: &str,
        candidates: Vec<RetrievalResult>,
        top_k: usize,
        timer: StageTimer,
        stats: &mut PipelineStats,
    ) -> Vec<RetrievalResult> {
        match reranker.rerank(query, &candidates, top_k).await {
            Ok(reranked) => {
                let reranked: Vec<RetrievalResult> = reranked
                    .into_iter()
                    .map(|r| {
                        let score = r.score;
                        r.with_score(score)
                    })
                    .collect();
                timer.finish(stats, StageOutcome::Applied, reranked.len(), None);
                reranked
            }
            Err(e) => {
                warn!(
                    reranker = reranker.name(),
                    error = %e,
                    "Re-ranking stage failed; passing candidates through"
                );
                let count = candidates.len();
                timer.finish(stats, StageOutcome::Failed, count, Some(e.to_string()));
                candidates
            }
        }
    }
}

fn skip(name: &'static str, candidates: &[RetrievalResult], stats: &mut PipelineStats) {
    StageTimer::start(name, candidates.len()).finish(
        stats,
        StageOutcome::Skipped,
        candidates.len(),
        None,
    );
}

/// Enforce the result invariants on whatever the index returned.
fn sanitize(raw: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
    raw.into_iter()
        .filter(|r| !r.text.trim().is_empty())
        .map(|r| {
            let score = r.score;
            r.with_score(score)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragguard_core::{Embedding, IndexedVector};
    use std::sync::Mutex;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str, model_name: &str) -> Result<Embedding, RetrievalError> {
            Ok(Embedding::new(vec![1.0, 0.0], model_name))
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _text: &str, _model: &str) -> Result<Embedding, RetrievalError> {
            Err(RetrievalError::EmbeddingUnavailable {
                message: "model server down".into(),
            })
        }
    }

    /// Returns canned results and records the requested `top_k`.
    struct CannedIndex {
        results: Vec<RetrievalResult>,
        requested: Mutex<Vec<usize>>,
    }

    impl CannedIndex {
        fn new(results: Vec<RetrievalResult>) -> Self {
            Self {
                results,
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl VectorIndex for CannedIndex {
        async fn search(
            &self,
            _vector: &[f32],
            top_k: usize,
            _filters: &RetrievalFilters,
        ) -> Result<Vec<RetrievalResult>, RetrievalError> {
            self.requested.lock().unwrap().push(top_k);
            Ok(self.results.iter().take(top_k).cloned().collect())
        }

        async fn upsert(&self, vectors: Vec<IndexedVector>) -> Result<usize, RetrievalError> {
            Ok(vectors.len())
        }

        async fn delete(&self, _chunk_id: &str) -> Result<bool, RetrievalError> {
            Ok(false)
        }
    }

    struct FailingReranker;

    #[async_trait]
    impl Reranker for FailingReranker {
        fn name(&self) -> &str {
            "failing"
        }

        async fn rerank(
            &self,
            _query: &str,
            _candidates: &[RetrievalResult],
            _top_k: usize,
        ) -> Result<Vec<RetrievalResult>, RetrievalError> {
            Err(RetrievalError::StageFailed {
                stage: "rerank".into(),
                message: "cross-encoder crashed".into(),
            })
        }
    }

    fn result(id: &str, doc: &str, text: &str, score: f32) -> RetrievalResult {
        RetrievalResult::new(id, doc, text, score).unwrap()
    }

    fn plain_config() -> RetrievalConfig {
        RetrievalConfig {
            use_reranking: false,
            use_diversity_rerank: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_refund_policy_example() {
        let index = Arc::new(CannedIndex::new(vec![
            result("c1", "d1", "refund policy overview", 0.9),
            result("c2", "d2", "refund policy exceptions", 0.85),
            result("c3", "d3", "shipping", 0.4),
        ]));
        let pipeline = RetrievalPipeline::new(plain_config(), Arc::new(FixedEmbedder), index);
        let out = pipeline
            .process(
                "find refund policy",
                3,
                &RetrievalFilters::default(),
                QueryType::Semantic,
            )
            .await
            .unwrap();
        let ids: Vec<_> = out.results.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn test_over_fetch_when_reranking() {
        let index = Arc::new(CannedIndex::new(Vec::new()));
        let pipeline = RetrievalPipeline::new(
            RetrievalConfig::default(),
            Arc::new(FixedEmbedder),
            index.clone(),
        );
        pipeline
            .process("q", 4, &RetrievalFilters::default(), QueryType::Semantic)
            .await
            .unwrap();

        let pipeline = RetrievalPipeline::new(plain_config(), Arc::new(FixedEmbedder), index.clone());
        pipeline
            .process("q", 4, &RetrievalFilters::default(), QueryType::Semantic)
            .await
            .unwrap();
        assert_eq!(*index.requested.lock().unwrap(), vec![8, 4]);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_fatal() {
        let pipeline = RetrievalPipeline::new(
            RetrievalConfig::default(),
            Arc::new(FailingEmbedder),
            Arc::new(CannedIndex::new(Vec::new())),
        );
        let err = pipeline
            .process("q", 3, &RetrievalFilters::default(), QueryType::Semantic)
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_validation_runs_before_any_stage() {
        let index = Arc::new(CannedIndex::new(Vec::new()));
        let pipeline =
            RetrievalPipeline::new(RetrievalConfig::default(), Arc::new(FixedEmbedder), index.clone());
        let err = pipeline
            .process("q", 0, &RetrievalFilters::default(), QueryType::Semantic)
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidTopK { .. }));
        assert!(index.requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_reranker_degrades() {
        let index = Arc::new(CannedIndex::new(vec![
            result("c1", "d1", "alpha", 0.9),
            result("c2", "d2", "beta", 0.8),
            result("c3", "d3", "gamma", 0.7),
        ]));
        let pipeline = RetrievalPipeline::new(RetrievalConfig::default(), Arc::new(FixedEmbedder), index)
            .with_diversity_reranker(Arc::new(FailingReranker))
            .with_relevance_reranker(Arc::new(FailingReranker));
        let out = pipeline
            .process("q", 2, &RetrievalFilters::default(), QueryType::Semantic)
            .await
            .unwrap();
        assert_eq!(out.results.len(), 2);
        assert_eq!(out.results[0].chunk_id, "c1");
        assert!(out.stats.degraded());
        assert_eq!(out.stats.errors().len(), 2);
        let diversity = out.stats.stage(STAGE_DIVERSITY_RERANK).unwrap();
        assert_eq!(diversity.outcome, StageOutcome::Failed);
        assert_eq!(diversity.input_count, diversity.output_count);
    }

    #[tokio::test]
    async fn test_stages_recorded_in_order() {
        let pipeline = RetrievalPipeline::new(
            RetrievalConfig::default(),
            Arc::new(FixedEmbedder),
            Arc::new(CannedIndex::new(vec![result("c1", "d1", "alpha", 0.9)])),
        );
        let out = pipeline
            .process("alpha", 3, &RetrievalFilters::default(), QueryType::Keyword)
            .await
            .unwrap();
        let names: Vec<_> = out.stats.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                STAGE_QUERY_EXPANSION,
                STAGE_INITIAL_RETRIEVAL,
                STAGE_SCORE_FILTER,
                STAGE_DIVERSITY_RERANK,
                STAGE_RELEVANCE_RERANK,
                STAGE_CONTEXT_OPTIMIZATION,
                STAGE_METADATA_FILTER,
            ]
        );
        assert_eq!(out.stats.query_type, QueryType::Keyword);
        // Only one candidate, so MMR is not needed.
        assert_eq!(
            out.stats.stage(STAGE_DIVERSITY_RERANK).unwrap().outcome,
            StageOutcome::Skipped
        );
    }
}
