//! # RAGGuard Retrieval
//!
//! Turns a query into a bounded, ranked, diversified and budget-fit set of
//! passages. See [`RetrievalPipeline`] for the stage order and failure
//! semantics.

pub mod pipeline;
pub mod stages;
pub mod stats;

pub use pipeline::{RetrievalOutput, RetrievalPipeline};
pub use stages::{
    AssembledContext, ContextBudget, MmrReranker, PassthroughExpander, QueryExpander, Reranker,
    TermOverlapReranker,
};
pub use stats::{PipelineStats, StageOutcome, StageStats};
