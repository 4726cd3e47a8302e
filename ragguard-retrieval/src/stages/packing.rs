//! Per-document budget packing and context assembly.

use ragguard_core::RetrievalResult;
use serde::{Deserialize, Serialize};

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Limits applied when packing candidates into a generation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBudget {
    /// Total characters across admitted chunks.
    pub max_context_length: usize,
    pub max_chunks_per_document: usize,
}

/// What packing kept and dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackingSummary {
    pub documents: usize,
    pub admitted: usize,
    pub dropped: usize,
    pub total_chars: usize,
    pub budget_exhausted: bool,
}

impl ContextBudget {
    /// Admit the best chunks of each document while the budget lasts.
    ///
    /// Documents are visited in order of first appearance. Within a document
    /// chunks are taken best-first; the first chunk that would overflow the
    /// character budget ends that document. Once the running total reaches
    /// the budget no further document is visited. The admitted set is
    /// returned sorted by descending score.
    pub fn pack(&self, candidates: Vec<RetrievalResult>) -> (Vec<RetrievalResult>, PackingSummary) {
        let input = candidates.len();

        let mut groups: Vec<(String, Vec<RetrievalResult>)> = Vec::new();
        for candidate in candidates {
            match groups.iter_mut().find(|(doc, _)| *doc == candidate.document_id) {
                Some((_, group)) => group.push(candidate),
                None => groups.push((candidate.document_id.clone(), vec![candidate])),
            }
        }

        let mut summary = PackingSummary {
            documents: groups.len(),
            ..Default::default()
        };
        let mut admitted = Vec::new();

        for (_, mut group) in groups {
            group.sort_by(|a, b| b.score.total_cmp(&a.score));
            for chunk in group.into_iter().take(self.max_chunks_per_document) {
                let len = chunk.char_len();
                if summary.total_chars + len > self.max_context_length {
                    break;
                }
                summary.total_chars += len;
                admitted.push(chunk);
            }
            if summary.total_chars >= self.max_context_length {
                summary.budget_exhausted = true;
                break;
            }
        }

        admitted.sort_by(|a, b| b.score.total_cmp(&a.score));
        summary.admitted = admitted.len();
        summary.dropped = input - admitted.len();
        (admitted, summary)
    }
}

/// Retrieved passages joined into a single generation context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssembledContext {
    pub context_text: String,
    pub chunks_used: Vec<String>,
    pub passages: Vec<String>,
    pub total_chars: usize,
}

impl AssembledContext {
    pub fn from_results(results: &[RetrievalResult]) -> Self {
        let passages: Vec<String> = results.iter().map(|r| r.text.clone()).collect();
        let context_text = passages.join(CONTEXT_SEPARATOR);
        Self {
            total_chars: context_text.chars().count(),
            chunks_used: results.iter().map(|r| r.chunk_id.clone()).collect(),
            passages,
            context_text,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, doc: &str, len: usize, score: f32) -> RetrievalResult {
        RetrievalResult::new(id, doc, "x".repeat(len), score).unwrap()
    }

    fn ids(results: &[RetrievalResult]) -> Vec<&str> {
        results.iter().map(|r| r.chunk_id.as_str()).collect()
    }

    #[test]
    fn test_per_document_cap() {
        let budget = ContextBudget {
            max_context_length: 10_000,
            max_chunks_per_document: 2,
        };
        let (out, summary) = budget.pack(vec![
            chunk("a1", "a", 10, 0.9),
            chunk("a2", "a", 10, 0.8),
            chunk("a3", "a", 10, 0.95),
            chunk("b1", "b", 10, 0.7),
        ]);
        assert_eq!(ids(&out), vec!["a3", "a1", "b1"]);
        assert_eq!(summary.documents, 2);
        assert_eq!(summary.dropped, 1);
    }

    #[test]
    fn test_overflowing_chunk_ends_its_document_only() {
        let budget = ContextBudget {
            max_context_length: 100,
            max_chunks_per_document: 5,
        };
        let (out, summary) = budget.pack(vec![
            chunk("a1", "a", 50, 0.9),
            chunk("a2", "a", 80, 0.8),
            chunk("a3", "a", 10, 0.7),
            chunk("b1", "b", 30, 0.6),
        ]);
        // a2 overflows and ends document a, so a3 is never considered
        assert_eq!(ids(&out), vec!["a1", "b1"]);
        assert_eq!(summary.total_chars, 80);
        assert!(!summary.budget_exhausted);
    }

    #[test]
    fn test_stops_when_budget_reached() {
        let budget = ContextBudget {
            max_context_length: 20,
            max_chunks_per_document: 5,
        };
        let (out, summary) = budget.pack(vec![
            chunk("a1", "a", 20, 0.5),
            chunk("b1", "b", 1, 0.9),
        ]);
        assert_eq!(ids(&out), vec!["a1"]);
        assert!(summary.budget_exhausted);
    }

    #[test]
    fn test_output_sorted_by_score() {
        let budget = ContextBudget {
            max_context_length: 1000,
            max_chunks_per_document: 5,
        };
        let (out, _) = budget.pack(vec![
            chunk("a1", "a", 5, 0.6),
            chunk("b1", "b", 5, 0.9),
            chunk("a2", "a", 5, 0.7),
        ]);
        assert_eq!(ids(&out), vec!["b1", "a2", "a1"]);
    }

    #[test]
    fn test_assembled_context() {
        let results = vec![
            RetrievalResult::new("c1", "d1", "first", 0.9).unwrap(),
            RetrievalResult::new("c2", "d2", "second", 0.8).unwrap(),
        ];
        let ctx = AssembledContext::from_results(&results);
        assert_eq!(ctx.context_text, "first\n\n---\n\nsecond");
        assert_eq!(ctx.chunks_used, vec!["c1", "c2"]);
        assert_eq!(ctx.passages.len(), 2);
        assert!(AssembledContext::from_results(&[]).is_empty());
    }
}
