//! # RAGGuard Core
//!
//! Shared building blocks for the retrieval pipeline and the safety decision
//! engine: data types, the error taxonomy, layered configuration, tracing
//! setup, the embedding provider and vector index contracts, and the model
//! lifecycle manager that keeps embedding models resident under a memory
//! budget.

pub mod config;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod logging;
pub mod models;
pub mod types;

pub use config::{
    FallbackStrategy, HallucinationConfig, LoggingConfig, ModelsConfig, RagGuardConfig,
    RetrievalConfig, SafetyConfig, SafetyTier, load_config, save_workspace_config,
};
pub use embeddings::{
    EmbeddingModel, EmbeddingProvider, HashingEmbeddingModel, ModelBackedEmbedder,
    cosine_similarity,
};
pub use error::{ConfigError, ModelError, RagGuardError, Result, RetrievalError, SafetyError};
pub use index::{InMemoryVectorIndex, VectorIndex};
pub use logging::init_tracing;
pub use models::{HashingModelLoader, ModelCacheEntryInfo, ModelLifecycleManager, ModelLoader};
pub use types::{
    DateRange, Embedding, IndexedVector, Metadata, QueryRequest, QueryType, RetrievalFilters,
    RetrievalResult,
};
