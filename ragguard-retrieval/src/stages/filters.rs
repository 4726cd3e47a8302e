//! Remove-only, order-preserving filters.

use ragguard_core::{RetrievalFilters, RetrievalResult};

/// Drop results scoring below `floor`.
pub fn apply_score_floor(results: Vec<RetrievalResult>, floor: f32) -> Vec<RetrievalResult> {
    results.into_iter().filter(|r| r.score >= floor).collect()
}

/// Apply the caller's document type, source and date-range predicates.
pub fn apply_metadata_filters(
    results: Vec<RetrievalResult>,
    filters: &RetrievalFilters,
) -> Vec<RetrievalResult> {
    if filters.is_empty() {
        return results;
    }
    results
        .into_iter()
        .filter(|r| filters.matches_metadata(r))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragguard_core::types::META_DOCUMENT_TYPE;

    fn result(id: &str, score: f32, doc_type: &str) -> RetrievalResult {
        RetrievalResult::new(id, "d", "text", score)
            .unwrap()
            .with_metadata(META_DOCUMENT_TYPE, doc_type)
    }

    #[test]
    fn test_score_floor() {
        let out = apply_score_floor(vec![result("a", 0.9, "pdf"), result("b", 0.4, "pdf")], 0.5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].chunk_id, "a");
    }

    #[test]
    fn test_metadata_filters_preserve_order() {
        let input = vec![
            result("a", 0.9, "pdf"),
            result("b", 0.8, "html"),
            result("c", 0.7, "pdf"),
        ];
        let filters = RetrievalFilters::default().with_document_type("pdf");
        let out = apply_metadata_filters(input, &filters);
        let ids: Vec<_> = out.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }
}
