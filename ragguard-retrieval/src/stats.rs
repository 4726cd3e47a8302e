//! Per-stage timing and counts for one pipeline run.

use ragguard_core::QueryType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use uuid::Uuid;

pub const STAGE_QUERY_EXPANSION: &str = "query_expansion";
pub const STAGE_INITIAL_RETRIEVAL: &str = "initial_retrieval";
pub const STAGE_SCORE_FILTER: &str = "score_filter";
pub const STAGE_DIVERSITY_RERANK: &str = "diversity_rerank";
pub const STAGE_RELEVANCE_RERANK: &str = "relevance_rerank";
pub const STAGE_CONTEXT_OPTIMIZATION: &str = "context_optimization";
pub const STAGE_METADATA_FILTER: &str = "metadata_filter";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Applied,
    /// Disabled or not needed for this input.
    Skipped,
    /// Raised an error; its input was passed through unchanged.
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageStats {
    pub name: String,
    pub outcome: StageOutcome,
    pub input_count: usize,
    pub output_count: usize,
    pub duration_us: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Accumulated while a request runs; returned to the caller when it completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStats {
    pub query_id: Uuid,
    pub query_type: QueryType,
    pub top_k: usize,
    pub query_expanded: bool,
    pub candidates_requested: usize,
    pub candidates_retrieved: usize,
    pub results_returned: usize,
    pub total_duration_us: u64,
    pub stages: Vec<StageStats>,
}

impl PipelineStats {
    pub fn new(query_id: Uuid, query_type: QueryType, top_k: usize) -> Self {
        Self {
            query_id,
            query_type,
            top_k,
            query_expanded: false,
            candidates_requested: 0,
            candidates_retrieved: 0,
            results_returned: 0,
            total_duration_us: 0,
            stages: Vec::new(),
        }
    }

    pub fn stage(&self, name: &str) -> Option<&StageStats> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Whether any stage failed and was skipped.
    pub fn degraded(&self) -> bool {
        self.stages.iter().any(|s| s.outcome == StageOutcome::Failed)
    }

    pub fn errors(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter_map(|s| s.error.as_deref())
            .collect()
    }
}

/// Times one stage and records it on completion.
pub(crate) struct StageTimer {
    name: &'static str,
    started: Instant,
    input_count: usize,
    parameters: BTreeMap<String, serde_json::Value>,
}

impl StageTimer {
    pub(crate) fn start(name: &'static str, input_count: usize) -> Self {
        Self {
            name,
            started: Instant::now(),
            input_count,
            parameters: BTreeMap::new(),
        }
    }

    pub(crate) fn param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub(crate) fn finish(
        self,
        stats: &mut PipelineStats,
        outcome: StageOutcome,
        output_count: usize,
        error: Option<String>,
    ) {
        stats.stages.push(StageStats {
            name: self.name.to_string(),
            outcome,
            input_count: self.input_count,
            output_count,
            duration_us: self.started.elapsed().as_micros() as u64,
            parameters: self.parameters,
            error,
        });
    }
}
