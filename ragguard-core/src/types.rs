//! Fundamental types shared by the retrieval pipeline and the safety engine.

use crate::error::RetrievalError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Smallest accepted `top_k`.
pub const MIN_TOP_K: usize = 1;
/// Largest accepted `top_k`.
pub const MAX_TOP_K: usize = 100;

/// Metadata key holding the document type of a chunk.
pub const META_DOCUMENT_TYPE: &str = "document_type";
/// Metadata key holding the source of a chunk.
pub const META_SOURCE: &str = "source";
/// Metadata key holding the RFC 3339 creation time of a chunk.
pub const META_CREATED_AT: &str = "created_at";

/// Ordered chunk metadata.
pub type Metadata = BTreeMap<String, String>;

/// A scored passage returned by the vector index and refined by the pipeline.
///
/// The score is always in `[0, 1]` and the text is never empty. Re-ranking
/// stages replace the score through [`RetrievalResult::with_score`], which
/// clamps into range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Metadata,
}

impl RetrievalResult {
    /// Create a result, rejecting empty text and out-of-range scores.
    pub fn new(
        chunk_id: impl Into<String>,
        document_id: impl Into<String>,
        text: impl Into<String>,
        score: f32,
    ) -> Result<Self, RetrievalError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(RetrievalError::InvalidResult {
                reason: "text cannot be empty".into(),
            });
        }
        if !(0.0..=1.0).contains(&score) {
            return Err(RetrievalError::InvalidResult {
                reason: format!("score {score} is outside [0, 1]"),
            });
        }
        Ok(Self {
            chunk_id: chunk_id.into(),
            document_id: document_id.into(),
            text,
            score,
            metadata: Metadata::new(),
        })
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Replace the score, clamping into `[0, 1]`. NaN maps to 0.
    pub fn with_score(mut self, score: f32) -> Self {
        self.score = if score.is_nan() {
            0.0
        } else {
            score.clamp(0.0, 1.0)
        };
        self
    }

    /// Character length of the passage, used for context budgeting.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// How the caller wants the query interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    #[default]
    Semantic,
    Hybrid,
    Keyword,
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryType::Semantic => write!(f, "semantic"),
            QueryType::Hybrid => write!(f, "hybrid"),
            QueryType::Keyword => write!(f, "keyword"),
        }
    }
}

/// Inclusive creation-time window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn contains(&self, at: &DateTime<Utc>) -> bool {
        if let Some(start) = &self.start {
            if at < start {
                return false;
            }
        }
        if let Some(end) = &self.end {
            if at > end {
                return false;
            }
        }
        true
    }
}

/// Caller-supplied predicates over retrieval results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f32>,
}

impl RetrievalFilters {
    pub fn is_empty(&self) -> bool {
        self.document_type.is_none()
            && self.source.is_none()
            && self.date_range.is_none()
            && self.min_score.is_none()
    }

    pub fn with_document_type(mut self, document_type: impl Into<String>) -> Self {
        self.document_type = Some(document_type.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    /// Document type, source and date-range checks against result metadata.
    ///
    /// A result without a `created_at` entry, or with one that is not valid
    /// RFC 3339, passes the date-range check.
    pub fn matches_metadata(&self, result: &RetrievalResult) -> bool {
        if let Some(expected) = &self.document_type {
            if result.metadata.get(META_DOCUMENT_TYPE) != Some(expected) {
                return false;
            }
        }
        if let Some(expected) = &self.source {
            if result.metadata.get(META_SOURCE) != Some(expected) {
                return false;
            }
        }
        if let Some(range) = &self.date_range {
            let created = result
                .metadata
                .get(META_CREATED_AT)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|dt| dt.with_timezone(&Utc));
            if let Some(created) = created {
                if !range.contains(&created) {
                    return false;
                }
            }
        }
        true
    }

    /// Metadata checks plus the optional minimum score.
    pub fn matches(&self, result: &RetrievalResult) -> bool {
        if let Some(min) = self.min_score {
            if result.score < min {
                return false;
            }
        }
        self.matches_metadata(result)
    }
}

/// A retrieval request as accepted by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query_id: Uuid,
    pub query: String,
    #[serde(default)]
    pub query_type: QueryType,
    pub top_k: usize,
    #[serde(default)]
    pub filters: RetrievalFilters,
    /// Embedding model to use; the default model when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, top_k: usize) -> Self {
        Self {
            query_id: Uuid::new_v4(),
            query: query.into(),
            query_type: QueryType::default(),
            top_k,
            filters: RetrievalFilters::default(),
            model_name: None,
        }
    }

    pub fn with_query_type(mut self, query_type: QueryType) -> Self {
        self.query_type = query_type;
        self
    }

    pub fn with_filters(mut self, filters: RetrievalFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_model(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }

    /// Reject malformed requests before any pipeline stage runs.
    pub fn validate(&self) -> Result<(), RetrievalError> {
        if self.query.trim().is_empty() {
            return Err(RetrievalError::InvalidQuery {
                reason: "query cannot be empty".into(),
            });
        }
        if !(MIN_TOP_K..=MAX_TOP_K).contains(&self.top_k) {
            return Err(RetrievalError::InvalidTopK {
                value: self.top_k,
                min: MIN_TOP_K,
                max: MAX_TOP_K,
            });
        }
        Ok(())
    }
}

/// A dense vector produced by an embedding provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub dimension: usize,
    pub model_name: String,
}

impl Embedding {
    pub fn new(vector: Vec<f32>, model_name: impl Into<String>) -> Self {
        Self {
            dimension: vector.len(),
            vector,
            model_name: model_name.into(),
        }
    }
}

/// A vector to be written into an index together with its passage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedVector {
    pub vector: Vec<f32>,
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn result(score: f32) -> RetrievalResult {
        RetrievalResult::new("c1", "d1", "refund policy text", score).unwrap()
    }

    #[test]
    fn test_result_rejects_empty_text() {
        assert!(RetrievalResult::new("c", "d", "   ", 0.5).is_err());
    }

    #[test]
    fn test_result_rejects_out_of_range_score() {
        assert!(RetrievalResult::new("c", "d", "text", 1.2).is_err());
        assert!(RetrievalResult::new("c", "d", "text", -0.1).is_err());
    }

    #[test]
    fn test_with_score_clamps() {
        assert_eq!(result(0.5).with_score(1.7).score, 1.0);
        assert_eq!(result(0.5).with_score(-2.0).score, 0.0);
        assert_eq!(result(0.5).with_score(f32::NAN).score, 0.0);
    }

    #[test]
    fn test_query_validation() {
        assert!(QueryRequest::new("find refund policy", 3).validate().is_ok());
        assert!(matches!(
            QueryRequest::new("  ", 3).validate(),
            Err(RetrievalError::InvalidQuery { .. })
        ));
        assert!(matches!(
            QueryRequest::new("q", 0).validate(),
            Err(RetrievalError::InvalidTopK { value: 0, .. })
        ));
        assert!(matches!(
            QueryRequest::new("q", 101).validate(),
            Err(RetrievalError::InvalidTopK { value: 101, .. })
        ));
    }

    #[test]
    fn test_filters_document_type_and_source() {
        let r = result(0.7)
            .with_metadata(META_DOCUMENT_TYPE, "pdf")
            .with_metadata(META_SOURCE, "handbook");
        assert!(RetrievalFilters::default().matches(&r));
        assert!(
            RetrievalFilters::default()
                .with_document_type("pdf")
                .matches(&r)
        );
        assert!(
            !RetrievalFilters::default()
                .with_document_type("html")
                .matches(&r)
        );
        assert!(!RetrievalFilters::default().with_source("wiki").matches(&r));
    }

    #[test]
    fn test_filters_date_range() {
        let r = result(0.7).with_metadata(META_CREATED_AT, "2024-03-10T12:00:00Z");
        let inside = DateRange {
            start: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            end: Some(Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap()),
        };
        let after = DateRange {
            start: Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()),
            end: None,
        };
        assert!(
            RetrievalFilters::default()
                .with_date_range(inside)
                .matches(&r)
        );
        assert!(
            !RetrievalFilters::default()
                .with_date_range(after.clone())
                .matches(&r)
        );

        // No date recorded: kept.
        assert!(
            RetrievalFilters::default()
                .with_date_range(after)
                .matches(&result(0.7))
        );
    }

    #[test]
    fn test_filters_min_score() {
        let filters = RetrievalFilters::default().with_min_score(0.6);
        assert!(filters.matches(&result(0.6)));
        assert!(!filters.matches(&result(0.59)));
        // min_score is not a metadata predicate
        assert!(filters.matches_metadata(&result(0.1)));
    }

    #[test]
    fn test_query_request_serde() {
        let req = QueryRequest::new("q", 5).with_query_type(QueryType::Hybrid);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"hybrid\""));
        let parsed: QueryRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.query_id, req.query_id);
        assert_eq!(parsed.query_type, QueryType::Hybrid);
    }
}
