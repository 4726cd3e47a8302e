//! End-to-end retrieval over the in-memory index with hashing embeddings.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use ragguard_core::types::{META_CREATED_AT, META_DOCUMENT_TYPE, META_SOURCE, Metadata};
use ragguard_core::{
    DateRange, Embedding, EmbeddingProvider, HashingModelLoader, InMemoryVectorIndex,
    IndexedVector, ModelBackedEmbedder, ModelLifecycleManager, ModelsConfig, QueryRequest,
    QueryType, RetrievalConfig, RetrievalError, RetrievalFilters, VectorIndex,
};
use ragguard_retrieval::stats::{STAGE_CONTEXT_OPTIMIZATION, STAGE_METADATA_FILTER};
use ragguard_retrieval::{AssembledContext, RetrievalPipeline, StageOutcome};
use std::sync::Arc;
use std::time::Duration;

struct Doc {
    chunk_id: &'static str,
    document_id: &'static str,
    text: &'static str,
    doc_type: &'static str,
    source: &'static str,
    created_at: &'static str,
}

const CORPUS: &[Doc] = &[
    Doc {
        chunk_id: "refund-1",
        document_id: "policies",
        text: "refund policy customers may request a refund within thirty days",
        doc_type: "pdf",
        source: "handbook",
        created_at: "2024-02-01T00:00:00Z",
    },
    Doc {
        chunk_id: "refund-2",
        document_id: "policies",
        text: "refund policy exceptions apply to digital goods",
        doc_type: "pdf",
        source: "handbook",
        created_at: "2024-06-01T00:00:00Z",
    },
    Doc {
        chunk_id: "refund-faq",
        document_id: "faq",
        text: "how do I get a refund under the refund policy",
        doc_type: "html",
        source: "website",
        created_at: "2023-11-15T00:00:00Z",
    },
    Doc {
        chunk_id: "shipping",
        document_id: "logistics",
        text: "shipping takes five business days",
        doc_type: "html",
        source: "website",
        created_at: "2024-03-01T00:00:00Z",
    },
];

fn embedder() -> Arc<ModelBackedEmbedder<HashingModelLoader>> {
    let config = ModelsConfig {
        embedding_dimension: 256,
        ..Default::default()
    };
    let loader = HashingModelLoader::new(config.embedding_dimension);
    Arc::new(ModelBackedEmbedder::new(ModelLifecycleManager::new(loader, config)))
}

async fn seeded_index(embedder: &dyn EmbeddingProvider) -> Arc<InMemoryVectorIndex> {
    let index = Arc::new(InMemoryVectorIndex::new());
    let texts: Vec<String> = CORPUS.iter().map(|d| d.text.to_string()).collect();
    let embeddings = embedder.embed_batch(&texts, "").await.unwrap();
    let vectors = CORPUS
        .iter()
        .zip(embeddings)
        .map(|(doc, embedding)| {
            let mut metadata = Metadata::new();
            metadata.insert(META_DOCUMENT_TYPE.into(), doc.doc_type.into());
            metadata.insert(META_SOURCE.into(), doc.source.into());
            metadata.insert(META_CREATED_AT.into(), doc.created_at.into());
            IndexedVector {
                vector: embedding.vector,
                chunk_id: doc.chunk_id.into(),
                document_id: doc.document_id.into(),
                text: doc.text.into(),
                metadata,
            }
        })
        .collect();
    index.upsert(vectors).await.unwrap();
    index
}

fn config() -> RetrievalConfig {
    RetrievalConfig {
        min_similarity_score: 0.2,
        ..Default::default()
    }
}

#[tokio::test]
async fn refund_query_returns_refund_passages() {
    let embedder = embedder();
    let index = seeded_index(embedder.as_ref()).await;
    let pipeline = RetrievalPipeline::new(config(), embedder, index);

    let out = pipeline
        .process(
            "refund policy",
            3,
            &RetrievalFilters::default(),
            QueryType::Semantic,
        )
        .await
        .unwrap();

    assert!(!out.results.is_empty());
    assert!(out.results.len() <= 3);
    assert!(out.results.iter().all(|r| r.chunk_id.starts_with("refund")));
    assert!(out.results.iter().all(|r| r.score >= 0.2));
    assert!(
        out.results
            .windows(2)
            .all(|w| w[0].score >= w[1].score)
    );
    assert!(!out.stats.degraded());
}

#[tokio::test]
async fn document_type_and_date_filters_apply() {
    let embedder = embedder();
    let index = seeded_index(embedder.as_ref()).await;
    let pipeline = RetrievalPipeline::new(config(), embedder, index);

    let filters = RetrievalFilters::default()
        .with_document_type("pdf")
        .with_date_range(DateRange {
            start: Some("2024-05-01T00:00:00Z".parse().unwrap()),
            end: None,
        });
    let request = QueryRequest::new("refund policy", 5)
        .with_filters(filters)
        .with_query_type(QueryType::Hybrid);
    let out = pipeline.process_request(&request).await.unwrap();

    let ids: Vec<_> = out.results.iter().map(|r| r.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["refund-2"]);
    assert_eq!(
        out.stats.stage(STAGE_METADATA_FILTER).unwrap().outcome,
        StageOutcome::Applied
    );
}

#[tokio::test]
async fn context_budget_limits_output() {
    let embedder = embedder();
    let index = seeded_index(embedder.as_ref()).await;
    let pipeline = RetrievalPipeline::new(
        RetrievalConfig {
            min_similarity_score: 0.0,
            max_context_length: 70,
            ..Default::default()
        },
        embedder,
        index,
    );

    let out = pipeline
        .process("refund policy", 4, &RetrievalFilters::default(), QueryType::Semantic)
        .await
        .unwrap();
    let total: usize = out.results.iter().map(|r| r.char_len()).sum();
    assert!(total <= 70);
    let stage = out.stats.stage(STAGE_CONTEXT_OPTIMIZATION).unwrap();
    assert!(stage.output_count <= stage.input_count);

    let ctx = AssembledContext::from_results(&out.results);
    assert_eq!(ctx.chunks_used.len(), out.results.len());
}

struct SlowEmbedder;

#[async_trait]
impl EmbeddingProvider for SlowEmbedder {
    async fn embed(&self, _text: &str, model_name: &str) -> Result<Embedding, RetrievalError> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(Embedding::new(vec![0.0; 4], model_name))
    }
}

#[tokio::test]
async fn deadline_surfaces_as_unavailable() {
    let pipeline = RetrievalPipeline::new(
        RetrievalConfig::default(),
        Arc::new(SlowEmbedder),
        Arc::new(InMemoryVectorIndex::new()),
    );
    let request = QueryRequest::new("refund policy", 3);
    let err = pipeline
        .process_within(&request, Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::DeadlineExceeded { timeout_ms: 20 }));
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn named_model_is_resolved_through_manager() {
    let embedder = embedder();
    let index = seeded_index(embedder.as_ref()).await;
    let pipeline = RetrievalPipeline::new(config(), embedder.clone(), index);

    let request = QueryRequest::new("refund policy", 2).with_model("all-MiniLM-L6-v2");
    pipeline.process_request(&request).await.unwrap();
    let info = embedder.manager().entry("all-MiniLM-L6-v2").await.unwrap();
    assert!(info.request_count >= 2);
}
